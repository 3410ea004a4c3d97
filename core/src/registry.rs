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

use std::fmt::Debug;
use std::mem::take;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::config::DriverConfig;
use crate::encoder::{EncoderState, FrameEncoder};
use crate::frame::{FrameBuffer, LedFrame};
use crate::pipeline::{Completed, TransferPipeline};
use crate::transport::{ClaimedDevice, TransferCompletion, TransferRing};
use crate::usb::errors::StreamError;

/// Which slots a departure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartTarget<K> {
    Device(K),
    All,
}

/// Result of handing a claimed board to the registry.
#[derive(Debug)]
pub enum AttachOutcome {
    /// The board streams; `sweeps_completed` sweeps already finished while
    /// priming.
    Streaming { slot: usize, sweeps_completed: usize },
    /// Serial not configured; the handle was released.
    UnknownSerial,
    /// The slot already streams from another handle; the new one was released.
    AlreadyClaimed { slot: usize },
    /// Priming failed; the slot stays unclaimed.
    PrimeFailed { slot: usize, error: StreamError },
}

/// What the control loop must do after a completion.
#[derive(Debug)]
pub enum CompletionAction {
    Resubmitted { bytes: usize, sweep_complete: bool },
    Suppressed,
    DeviceLost(StreamError),
}

struct Link<K, R> {
    key: K,
    pipeline: TransferPipeline<R>,
}

/// One configured board.
pub struct DeviceSlot<K, R> {
    serial: String,
    frame: FrameBuffer,
    link: Option<Link<K, R>>,
}

impl<K, R: TransferRing> DeviceSlot<K, R> {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn is_claimed(&self) -> bool {
        self.link.is_some()
    }

    /// Handshake state, `None` while unclaimed.
    pub fn encoder_state(&self) -> Option<EncoderState> {
        self.link.as_ref().map(|link| link.pipeline.encoder_state())
    }
}

/// Maps configured serial numbers to slots and owns every board's pipeline.
pub struct DeviceRegistry<K, R> {
    slots: Vec<DeviceSlot<K, R>>,
    /// Torn down pipelines waiting for their cancelled transfers.
    draining: Vec<TransferPipeline<R>>,
    encoder: FrameEncoder,
    transfers_in_flight: usize,
    next_poll: usize,
}

impl<K: Copy + Eq + Debug, R: TransferRing> DeviceRegistry<K, R> {
    /// Creates one unclaimed slot per configured serial, in order.
    pub fn new(config: &DriverConfig) -> Self {
        let layout = config.layout();
        let slots = config
            .serials
            .iter()
            .map(|serial| DeviceSlot {
                serial: serial.clone(),
                frame: FrameBuffer::new(layout.strands, layout.leds_per_strand),
                link: None,
            })
            .collect();
        Self {
            slots,
            draining: Vec::new(),
            encoder: FrameEncoder::new(layout, config.timing),
            transfers_in_flight: config.transfers_in_flight,
            next_poll: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, slot: usize) -> Option<&DeviceSlot<K, R>> {
        self.slots.get(slot)
    }

    pub fn slot_of_serial(&self, serial: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.serial == serial)
    }

    pub fn slot_of_key(&self, key: K) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.link.as_ref().is_some_and(|link| link.key == key))
    }

    pub fn claimed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_claimed()).count()
    }

    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    /// Starts streaming to a freshly claimed board.
    ///
    /// The slot gets a new encoder, so the configuration packet always goes
    /// out first, also after a re-arrival.
    pub fn attach(&mut self, device: ClaimedDevice<K, R>) -> AttachOutcome {
        let ClaimedDevice { key, serial, ring } = device;
        let Some(index) = self.slot_of_serial(&serial) else {
            debug!("Serial {} is not configured, releasing device", serial);
            return AttachOutcome::UnknownSerial;
        };
        if self.slots[index].is_claimed() {
            warn!("Device {} already streams as slot {}, releasing duplicate", serial, index);
            return AttachOutcome::AlreadyClaimed { slot: index };
        }

        let mut pipeline = TransferPipeline::new(ring, self.encoder.clone());
        let slot = &mut self.slots[index];
        match pipeline.prime(self.transfers_in_flight, &mut slot.frame) {
            Ok(report) => {
                info!("Device {} streaming as slot {} ({} transfers in flight)", serial, index, report.submitted);
                slot.link = Some(Link { key, pipeline });
                AttachOutcome::Streaming { slot: index, sweeps_completed: report.sweeps_completed }
            }
            Err(error) => {
                warn!("Failed to start streaming to device {}: {}", serial, error);
                pipeline.tear_down();
                self.retire(pipeline);
                AttachOutcome::PrimeFailed { slot: index, error }
            }
        }
    }

    /// Cancels the transfers of matching slots and releases their handles.
    ///
    /// Returns the slots that were streaming. Unknown keys and unclaimed slots
    /// are ignored, so repeated calls are harmless.
    pub fn depart(&mut self, target: DepartTarget<K>) -> Vec<usize> {
        let indices: Vec<usize> = match target {
            DepartTarget::Device(key) => self.slot_of_key(key).into_iter().collect(),
            DepartTarget::All => (0..self.slots.len()).collect(),
        };
        indices.into_iter().filter(|index| self.depart_slot(*index)).collect()
    }

    /// Departs one slot; `false` if it was not streaming.
    pub fn depart_slot(&mut self, index: usize) -> bool {
        let Some(link) = self.slots.get_mut(index).and_then(|slot| slot.link.take()) else {
            return false;
        };
        info!("Device {} (slot {}) removed", self.slots[index].serial, index);
        let mut pipeline = link.pipeline;
        pipeline.tear_down();
        self.retire(pipeline);
        true
    }

    fn retire(&mut self, pipeline: TransferPipeline<R>) {
        if pipeline.is_drained() {
            debug!("Device handle released");
        } else {
            self.draining.push(pipeline);
        }
    }

    /// Polls every streaming slot, starting after the one served last.
    ///
    /// Cancelled rings are drained on the way; their completions never
    /// surface and their handles are released once empty.
    pub fn poll_completion(&mut self, cx: &mut Context<'_>) -> Poll<(usize, TransferCompletion)> {
        self.poll_draining(cx);

        let count = self.slots.len();
        for step in 0..count {
            let index = (self.next_poll + step) % count;
            if let Some(link) = self.slots[index].link.as_mut() {
                if let Poll::Ready(completion) = link.pipeline.poll_complete(cx) {
                    self.next_poll = (index + 1) % count;
                    return Poll::Ready((index, completion));
                }
            }
        }
        Poll::Pending
    }

    fn poll_draining(&mut self, cx: &mut Context<'_>) {
        if self.draining.is_empty() {
            return;
        }
        for pipeline in self.draining.iter_mut() {
            while let Poll::Ready(completion) = pipeline.poll_complete(cx) {
                pipeline.complete(completion);
            }
        }
        let before = self.draining.len();
        self.draining.retain(|pipeline| !pipeline.is_drained());
        for _ in self.draining.len()..before {
            debug!("Device handle released");
        }
    }

    /// Handles a completion returned by [`poll_completion`](Self::poll_completion).
    pub fn on_completion(&mut self, index: usize, completion: TransferCompletion) -> CompletionAction {
        let Some(slot) = self.slots.get_mut(index) else {
            return CompletionAction::Suppressed;
        };
        let Some(link) = slot.link.as_mut() else {
            return CompletionAction::Suppressed;
        };
        match link.pipeline.complete(completion) {
            Completed::Ready { buffer, bytes } => match link.pipeline.refill(buffer, &mut slot.frame) {
                Ok(sweep_complete) => CompletionAction::Resubmitted { bytes, sweep_complete },
                Err(error) => CompletionAction::DeviceLost(error),
            },
            Completed::Suppressed => CompletionAction::Suppressed,
            Completed::Lost(error) => CompletionAction::DeviceLost(error.into()),
        }
    }

    /// Departs every slot whose ring made no progress for `timeout`.
    pub fn reap_stalled(&mut self, now: Instant, timeout: Duration) -> Vec<usize> {
        let stalled: Vec<(usize, Duration)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let link = slot.link.as_ref()?;
                link.pipeline.stalled_for(now, timeout).map(|idle| (index, idle))
            })
            .collect();
        stalled
            .into_iter()
            .filter(|(index, idle)| {
                warn!("Device {} (slot {}): {}", self.slots[*index].serial, index, StreamError::Stalled(*idle));
                self.depart_slot(*index)
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Lets `render` regenerate the back frame of every slot and publishes it.
    pub fn render_frames(&mut self, mut render: impl FnMut(usize, &mut LedFrame)) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            render(index, slot.frame.back_mut());
            slot.frame.publish();
        }
    }

    /// Drops torn down pipelines whether or not their cancellations arrived.
    pub fn release_draining(&mut self) -> usize {
        take(&mut self.draining).len()
    }
}
