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

/// Rendezvous of every streaming board at frame boundaries.
///
/// Each active slot owns one bit. A bit enters `complete` when that board
/// finishes a sweep; once `complete` covers every active slot the barrier
/// opens, `complete` is cleared and the next frame may be rendered.
#[derive(Debug, Default, Clone)]
pub struct FrameSynchronizer {
    active: u64,
    complete: u64,
    frame_number: u64,
}

fn bit(slot: usize) -> u64 {
    debug_assert!(slot < u64::BITS as usize);
    1u64 << slot
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a board that just started streaming. Its completion bit starts
    /// cleared so it must finish a sweep of its own before the next opening.
    pub fn activate(&mut self, slot: usize) {
        self.active |= bit(slot);
        self.complete &= !bit(slot);
    }

    /// Removes a departed board from the wait set.
    pub fn deactivate(&mut self, slot: usize) {
        self.active &= !bit(slot);
        self.complete &= !bit(slot);
    }

    /// Records a finished sweep. Sweeps of inactive slots are ignored.
    pub fn sweep_complete(&mut self, slot: usize) {
        self.complete |= bit(slot) & self.active;
    }

    /// Opens the barrier when every active board has finished a sweep since the
    /// last opening. Returns the number of the frame to render next.
    pub fn try_open(&mut self) -> Option<u64> {
        if self.active == 0 || self.complete != self.active {
            return None;
        }
        self.complete = 0;
        self.frame_number += 1;
        Some(self.frame_number)
    }

    pub fn active_mask(&self) -> u64 {
        self.active
    }

    pub fn complete_mask(&self) -> u64 {
        self.complete
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}
