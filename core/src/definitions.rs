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

use serde::{Deserialize, Serialize};

/// USB vendor identifier of X32 breakout boards (pid.codes).
pub const BREAKOUT_VENDOR_ID: u16 = 0x1209;
/// USB product identifier of X32 breakout boards.
pub const BREAKOUT_PRODUCT_ID: u16 = 0x2305;

/// Interface claimed on every breakout board.
pub const BREAKOUT_INTERFACE: u8 = 3;
/// Bulk OUT endpoint carrying configuration and data packets.
pub const BREAKOUT_BULK_OUT_ENDPOINT: u8 = 0x05;

/// Number of color bits shifted out per LED.
pub const BITS_PER_LED: usize = 24;
/// One cross-strand word is 32 bits wide, so a board drives at most 32 strands.
pub const MAX_STRANDS: usize = 32;
/// Frame barrier masks are `u64`.
pub const MAX_DEVICES: usize = 64;

const COLOR_MASK: u32 = 0x00FF_FFFF;

/// A 24-bit LED color, packed as `r | g << 8 | b << 16`.
///
/// The packed value is shifted out MSB first, so the board receives blue,
/// green and red in that order. Strand chips that expect another order must be
/// fed pre-swizzled colors by the animation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color(u32);

impl Color {
    pub const BLACK: Color = Color(0);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(r as u32 | (g as u32) << 8 | (b as u32) << 16)
    }

    /// Bits above the 24th are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & COLOR_MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn r(self) -> u8 {
        self.0 as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn b(self) -> u8 {
        (self.0 >> 16) as u8
    }
}

/// Bit timing handed to the board in the configuration packet.
///
/// Values are in board timer ticks; the defaults drive WS2812-class strands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Length of one bit slot.
    pub period: u16,
    /// Tick at which the line goes high for every bit.
    pub one_bit: u16,
    /// Tick at which the data bit is driven onto the line.
    pub data_bit: u16,
    /// Tick at which the line returns low.
    pub zero_bit: u16,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            period: 37 * 4,
            one_bit: 0,
            data_bit: 13 * 4,
            zero_bit: 26 * 4,
        }
    }
}

/// Geometry of one board and of the packets sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrandLayout {
    pub strands: usize,
    pub leds_per_strand: usize,
    /// LEDs carried by one data packet (the batch size).
    pub leds_per_packet: usize,
    /// Size of every transfer buffer.
    pub block_size: usize,
}

impl StrandLayout {
    /// Bytes of a data packet that carry header and color words.
    pub fn data_payload_len(&self) -> usize {
        crate::protocol::DATA_HEADER_LEN + self.leds_per_packet * BITS_PER_LED * 4
    }

    /// Total bit length of one sweep over a strand.
    pub fn frame_bits(&self) -> usize {
        self.leds_per_strand * BITS_PER_LED
    }

    /// Data packets needed to cover every LED once.
    pub fn packets_per_sweep(&self) -> usize {
        self.leds_per_strand.div_ceil(self.leds_per_packet)
    }
}
