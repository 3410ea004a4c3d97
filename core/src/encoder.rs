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

use crate::definitions::{StrandLayout, TimingConfig, BITS_PER_LED};
use crate::frame::FrameBuffer;
use crate::protocol::{self, DataHeader, ProtocolError};

/// Handshake state of one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Configuration packet not sent yet.
    Unconfigured,
    /// Sending data; `cursor` is the first LED of the next batch.
    Streaming { cursor: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Configuration,
    Data(DataHeader),
}

/// Result of filling one transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    pub kind: PacketKind,
    /// Bytes to transfer.
    pub len: usize,
    /// The packet closes a sweep.
    pub sweep_complete: bool,
}

/// Turns the frame of one board into successive wire packets.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    layout: StrandLayout,
    timing: TimingConfig,
    state: EncoderState,
}

impl FrameEncoder {
    pub fn new(layout: StrandLayout, timing: TimingConfig) -> Self {
        Self {
            layout,
            timing,
            state: EncoderState::Unconfigured,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.state != EncoderState::Unconfigured
    }

    /// Fills `buf` with the next packet.
    ///
    /// Data packets always occupy the whole block with unused words zeroed.
    /// The configuration packet keeps its own 12 byte length, which is how the
    /// board tells it apart from data.
    pub fn encode(&mut self, frame: &mut FrameBuffer, buf: &mut Vec<u8>) -> Result<Encoded, ProtocolError> {
        buf.clear();
        buf.resize(self.layout.block_size, 0);

        let cursor = match self.state {
            EncoderState::Unconfigured => {
                let len = protocol::write_configuration_packet(buf, &self.timing)?;
                buf.truncate(len);
                self.state = EncoderState::Streaming { cursor: 0 };
                return Ok(Encoded { kind: PacketKind::Configuration, len, sweep_complete: false });
            }
            EncoderState::Streaming { cursor } => cursor,
        };

        let batch = self.layout.leds_per_packet;
        let remaining = self.layout.leds_per_strand.saturating_sub(cursor);
        let terminal = remaining <= batch;
        let count = remaining.min(batch);

        let header = DataHeader {
            terminal,
            bit_offset: (cursor * BITS_PER_LED) as u16,
            bit_length: (count * BITS_PER_LED) as u16,
        };
        let led_frame = if cursor == 0 { frame.begin_sweep() } else { frame.current() };
        protocol::write_data_packet(buf, header, (cursor..cursor + count).map(|led| led_frame.led_row(led)))?;

        self.state = EncoderState::Streaming {
            cursor: if terminal { 0 } else { cursor + count },
        };
        Ok(Encoded {
            kind: PacketKind::Data(header),
            len: buf.len(),
            sweep_complete: terminal,
        })
    }
}
