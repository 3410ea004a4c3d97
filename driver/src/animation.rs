// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Demo animation: every LED cycles through the hue wheel at its own speed.

use breakout_core::{Color, FrameSource, LedFrame};

/// Stateless hue wheel; the phase of each LED is a function of the frame
/// number, so boards joining late pick up the same pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct HueWheel;

impl HueWheel {
    /// Phase increment per frame, between 512 and 1535.
    fn speed(slot: usize, strand: usize, led: usize) -> u32 {
        let mut x = (slot as u32).wrapping_mul(0x9E37_79B9)
            ^ (strand as u32).wrapping_mul(0x85EB_CA6B)
            ^ (led as u32).wrapping_mul(0xC2B2_AE35);
        x ^= x >> 16;
        x = x.wrapping_mul(0x7FEB_352D);
        x ^= x >> 15;
        512 + x % 1024
    }

    fn color(phase: u32) -> Color {
        let channel = |offset: u32| {
            let level = hue((phase + offset) & 0xff) - 128;
            level.clamp(0, 255) as u8
        };
        Color::from_rgb(channel(0), channel(85), channel(171))
    }
}

/// Triangular hue ramp over one 256-step turn.
fn hue(n: u32) -> i32 {
    let n = n as i32;
    match n {
        0..=63 => n * 4,
        64..=127 => 255,
        128..=191 => 252 - (n - 128) * 4,
        _ => 0,
    }
}

impl FrameSource for HueWheel {
    fn render(&mut self, frame_number: u64, slot: usize, frame: &mut LedFrame) {
        for led in 0..frame.leds_per_strand() {
            for strand in 0..frame.strands() {
                let phase = (frame_number as u32).wrapping_mul(Self::speed(slot, strand, led));
                frame.set(strand, led, Self::color((phase >> 10) & 0xff));
            }
        }
    }
}
