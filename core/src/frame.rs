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

use std::mem::swap;
use crate::definitions::Color;

/// Colors of every LED on one board, stored LED-major: all strands of LED 0,
/// then all strands of LED 1, and so on. This is the order the encoder reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedFrame {
    strands: usize,
    leds_per_strand: usize,
    colors: Vec<Color>,
}

impl LedFrame {
    pub fn new(strands: usize, leds_per_strand: usize) -> Self {
        Self {
            strands,
            leds_per_strand,
            colors: vec![Color::BLACK; strands * leds_per_strand],
        }
    }

    pub fn strands(&self) -> usize {
        self.strands
    }

    pub fn leds_per_strand(&self) -> usize {
        self.leds_per_strand
    }

    pub fn get(&self, strand: usize, led: usize) -> Option<Color> {
        self.index(strand, led).map(|i| self.colors[i])
    }

    /// Out of range coordinates are ignored.
    pub fn set(&mut self, strand: usize, led: usize, color: Color) {
        if let Some(i) = self.index(strand, led) {
            self.colors[i] = color;
        }
    }

    pub fn fill(&mut self, color: Color) {
        self.colors.fill(color);
    }

    /// Colors of LED `led` on every strand.
    pub fn led_row(&self, led: usize) -> &[Color] {
        let start = led * self.strands;
        &self.colors[start..start + self.strands]
    }

    pub fn led_row_mut(&mut self, led: usize) -> &mut [Color] {
        let start = led * self.strands;
        &mut self.colors[start..start + self.strands]
    }

    fn index(&self, strand: usize, led: usize) -> Option<usize> {
        (strand < self.strands && led < self.leds_per_strand).then(|| led * self.strands + strand)
    }
}

/// Double buffered frame of one board.
///
/// The animation writes the back frame and publishes it; the encoder switches
/// to the newest published frame only when a sweep starts. A sweep therefore
/// always reads one consistent frame even if the animation runs meanwhile.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    front: LedFrame,
    back: LedFrame,
    published: bool,
}

impl FrameBuffer {
    pub fn new(strands: usize, leds_per_strand: usize) -> Self {
        Self {
            front: LedFrame::new(strands, leds_per_strand),
            back: LedFrame::new(strands, leds_per_strand),
            published: false,
        }
    }

    /// Frame the animation writes next. Contents are stale and must be
    /// regenerated wholesale.
    pub fn back_mut(&mut self) -> &mut LedFrame {
        &mut self.back
    }

    /// Marks the back frame as the one the next sweep must show.
    pub fn publish(&mut self) {
        self.published = true;
    }

    /// Called by the encoder at cursor 0.
    pub fn begin_sweep(&mut self) -> &LedFrame {
        if self.published {
            swap(&mut self.front, &mut self.back);
            self.published = false;
        }
        &self.front
    }

    /// Frame of the sweep in progress.
    pub fn current(&self) -> &LedFrame {
        &self.front
    }
}

/// Producer of animation frames, called each time the frame barrier opens.
///
/// `render` is invoked once per configured board slot, claimed or not, with
/// that slot's back frame. The frame must be regenerated wholesale.
pub trait FrameSource {
    fn render(&mut self, frame_number: u64, slot: usize, frame: &mut LedFrame);
}

impl<F> FrameSource for F
where
    F: FnMut(u64, usize, &mut LedFrame),
{
    fn render(&mut self, frame_number: u64, slot: usize, frame: &mut LedFrame) {
        self(frame_number, slot, frame)
    }
}
