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

//! Wire format of the X32 breakout bulk OUT stream.
//!
//! Two packet kinds share the endpoint. A 12 byte configuration packet sets
//! the strand bit timing and must precede any data. Data packets start with a
//! 32-bit header followed by one 32-bit word per color bit per LED; bit `k`
//! of a word belongs to strand `k`. All multi-byte fields are little endian.

use thiserror::Error;
use crate::definitions::{Color, TimingConfig, BITS_PER_LED, MAX_STRANDS};

/// Mode-enable value written to both mode fields of the configuration packet.
pub const MODE_ENABLE_ALL: u16 = 0xFFFF;
pub const CONFIG_PACKET_LEN: usize = 6 * 2;
pub const DATA_HEADER_LEN: usize = 4;

const TERMINAL_FLAG: u32 = 0x8000;
const BIT_OFFSET_MASK: u32 = 0x7FFF;
/// Largest bit offset representable in a data header.
pub const MAX_BIT_OFFSET: usize = BIT_OFFSET_MASK as usize;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Buffer is too short for {name}: expected {expected}, got {actual} bytes")]
    TooShort {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Bit length {0} is not a whole number of LEDs")]
    PartialLed(u16),

    #[error("Strand count {0} does not fit a 32-bit word")]
    TooManyStrands(usize),
}

/// Header word of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Set on the last packet of a sweep.
    pub terminal: bool,
    /// Position of the first bit of this batch within the strand.
    pub bit_offset: u16,
    /// Number of bits carried by this batch.
    pub bit_length: u16,
}

impl DataHeader {
    pub fn to_word(self) -> u32 {
        let terminal = if self.terminal { TERMINAL_FLAG } else { 0 };
        terminal | (self.bit_offset as u32 & BIT_OFFSET_MASK) | (self.bit_length as u32) << 16
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            terminal: word & TERMINAL_FLAG != 0,
            bit_offset: (word & BIT_OFFSET_MASK) as u16,
            bit_length: (word >> 16) as u16,
        }
    }

    pub fn led_count(self) -> usize {
        self.bit_length as usize / BITS_PER_LED
    }
}

fn ensure_len(name: &'static str, buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() < expected {
        return Err(ProtocolError::TooShort { name, expected, actual: buf.len() });
    }
    Ok(())
}

/// Writes the configuration packet and returns its length on the wire.
pub fn write_configuration_packet(buf: &mut [u8], timing: &TimingConfig) -> Result<usize, ProtocolError> {
    ensure_len("configuration packet", buf, CONFIG_PACKET_LEN)?;
    let fields = [
        MODE_ENABLE_ALL,
        MODE_ENABLE_ALL,
        timing.period,
        timing.one_bit,
        timing.data_bit,
        timing.zero_bit,
    ];
    for (chunk, field) in buf.chunks_exact_mut(2).zip(fields) {
        chunk.copy_from_slice(&field.to_le_bytes());
    }
    Ok(CONFIG_PACKET_LEN)
}

pub fn read_configuration_packet(buf: &[u8]) -> Result<TimingConfig, ProtocolError> {
    ensure_len("configuration packet", buf, CONFIG_PACKET_LEN)?;
    let field = |i: usize| u16::from_le_bytes([buf[i * 2], buf[i * 2 + 1]]);
    Ok(TimingConfig {
        period: field(2),
        one_bit: field(3),
        data_bit: field(4),
        zero_bit: field(5),
    })
}

/// Bit-plane transpose of one LED position across strands.
///
/// `row[k]` is the color of strand `k`. Word `i` of the result holds color bit
/// `23 - i` of every strand, so the words come out MSB first.
pub fn transpose_led(row: &[Color]) -> [u32; BITS_PER_LED] {
    let mut words = [0u32; BITS_PER_LED];
    for (strand, color) in row.iter().enumerate().take(MAX_STRANDS) {
        let bits = color.bits();
        for (i, word) in words.iter_mut().enumerate() {
            let bit = (bits >> (BITS_PER_LED - 1 - i)) & 1;
            *word |= bit << strand;
        }
    }
    words
}

/// Inverse of [`transpose_led`] for `strands` strands.
pub fn untranspose_led(words: &[u32], strands: usize) -> Vec<Color> {
    (0..strands)
        .map(|strand| {
            let bits = words
                .iter()
                .take(BITS_PER_LED)
                .fold(0u32, |acc, word| (acc << 1) | ((word >> strand) & 1));
            Color::from_bits(bits)
        })
        .collect()
}

/// Writes a data packet header followed by the transposed `rows`.
///
/// Every row is one LED position across all strands. Returns the number of
/// payload bytes written; the caller pads the rest of the block.
pub fn write_data_packet<'a, I>(buf: &mut [u8], header: DataHeader, rows: I) -> Result<usize, ProtocolError>
where
    I: IntoIterator<Item = &'a [Color]>,
{
    let expected = DATA_HEADER_LEN + header.led_count() * BITS_PER_LED * 4;
    ensure_len("data packet", buf, expected)?;
    buf[..DATA_HEADER_LEN].copy_from_slice(&header.to_word().to_le_bytes());

    let mut words = buf[DATA_HEADER_LEN..expected].chunks_exact_mut(4);
    for row in rows.into_iter().take(header.led_count()) {
        for word in transpose_led(row) {
            if let Some(chunk) = words.next() {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
    }
    Ok(expected)
}

/// A data packet parsed back into per-strand colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    pub header: DataHeader,
    /// One entry per LED of the batch, each holding the color of every strand.
    pub leds: Vec<Vec<Color>>,
}

impl DecodedBatch {
    /// Index of the first LED in this batch.
    pub fn first_led(&self) -> usize {
        self.header.bit_offset as usize / BITS_PER_LED
    }
}

pub fn decode_data_packet(buf: &[u8], strands: usize) -> Result<DecodedBatch, ProtocolError> {
    if strands > MAX_STRANDS {
        return Err(ProtocolError::TooManyStrands(strands));
    }
    ensure_len("data packet header", buf, DATA_HEADER_LEN)?;
    let header = DataHeader::from_word(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
    if header.bit_length as usize % BITS_PER_LED != 0 {
        return Err(ProtocolError::PartialLed(header.bit_length));
    }
    let expected = DATA_HEADER_LEN + header.led_count() * BITS_PER_LED * 4;
    ensure_len("data packet", buf, expected)?;

    let words: Vec<u32> = buf[DATA_HEADER_LEN..expected]
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let leds = words
        .chunks_exact(BITS_PER_LED)
        .map(|led_words| untranspose_led(led_words, strands))
        .collect();
    Ok(DecodedBatch { header, leds })
}
