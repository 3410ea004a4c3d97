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

use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use crate::encoder::{EncoderState, FrameEncoder};
use crate::frame::FrameBuffer;
use crate::transport::{TransferCompletion, TransferRing};
use crate::usb::errors::{StreamError, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Every completion is refilled and resubmitted.
    Streaming,
    /// Cancellation requested; completions are swallowed until the ring is empty.
    TornDown,
}

/// What a completion turned into.
#[derive(Debug)]
pub enum Completed {
    /// The buffer is free to be refilled; `bytes` were transferred.
    Ready { buffer: Vec<u8>, bytes: usize },
    /// Completion of a torn down ring, dropped.
    Suppressed,
    Lost(TransferError),
}

/// Result of priming a ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrimeReport {
    pub submitted: usize,
    /// Sweeps finished while priming; short frames can finish one before the
    /// ring is full.
    pub sweeps_completed: usize,
}

/// Fixed-depth ring of in-flight transfers feeding one board.
pub struct TransferPipeline<R> {
    ring: R,
    encoder: FrameEncoder,
    state: PipelineState,
    last_progress: Instant,
}

impl<R: TransferRing> TransferPipeline<R> {
    pub fn new(ring: R, encoder: FrameEncoder) -> Self {
        Self {
            ring,
            encoder,
            state: PipelineState::Streaming,
            last_progress: Instant::now(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn encoder_state(&self) -> EncoderState {
        self.encoder.state()
    }

    pub fn in_flight(&self) -> usize {
        self.ring.pending()
    }

    /// Fills and submits `depth` fresh buffers.
    pub fn prime(&mut self, depth: usize, frame: &mut FrameBuffer) -> Result<PrimeReport, StreamError> {
        let mut report = PrimeReport::default();
        for _ in 0..depth {
            if self.refill(Vec::new(), frame)? {
                report.sweeps_completed += 1;
            }
            report.submitted += 1;
        }
        self.last_progress = Instant::now();
        Ok(report)
    }

    /// Polls the oldest in-flight transfer.
    pub fn poll_complete(&mut self, cx: &mut Context<'_>) -> Poll<TransferCompletion> {
        if self.ring.pending() == 0 {
            return Poll::Pending;
        }
        self.ring.poll_complete(cx)
    }

    /// Classifies a completion. The state is checked before anything else, so
    /// a completion of a cancelled ring never reaches the encoder.
    pub fn complete(&mut self, completion: TransferCompletion) -> Completed {
        if self.state == PipelineState::TornDown {
            return Completed::Suppressed;
        }
        match completion.status {
            Ok(()) => {
                self.last_progress = Instant::now();
                Completed::Ready { buffer: completion.buffer, bytes: completion.actual_len }
            }
            Err(error) => Completed::Lost(error),
        }
    }

    /// Encodes the next packet into `buffer` and submits it.
    ///
    /// Returns whether the packet closed a sweep.
    pub fn refill(&mut self, mut buffer: Vec<u8>, frame: &mut FrameBuffer) -> Result<bool, StreamError> {
        if self.state == PipelineState::TornDown {
            return Err(TransferError::Cancelled.into());
        }
        let encoded = self.encoder.encode(frame, &mut buffer)?;
        self.ring.submit(buffer)?;
        Ok(encoded.sweep_complete)
    }

    /// Cancels every outstanding transfer. Calling it again does nothing.
    pub fn tear_down(&mut self) {
        if self.state == PipelineState::Streaming {
            self.state = PipelineState::TornDown;
            self.ring.cancel_all();
        }
    }

    /// All cancelled transfers have been handed back.
    pub fn is_drained(&self) -> bool {
        self.ring.pending() == 0
    }

    /// No completion arrived within `timeout` although transfers are queued.
    pub fn stalled_for(&self, now: Instant, timeout: Duration) -> Option<Duration> {
        let idle = now.saturating_duration_since(self.last_progress);
        (self.state == PipelineState::Streaming && self.ring.pending() > 0 && idle >= timeout).then_some(idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;
    use crate::definitions::{StrandLayout, TimingConfig};
    use crate::protocol::decode_data_packet;
    use crate::transport::mock::MockRing;

    fn layout() -> StrandLayout {
        StrandLayout { strands: 32, leds_per_strand: 7, leds_per_packet: 5, block_size: 512 }
    }

    fn pipeline() -> (TransferPipeline<MockRing>, crate::transport::mock::SharedRingLog, FrameBuffer) {
        let (ring, log) = MockRing::new();
        let layout = layout();
        let pipeline = TransferPipeline::new(ring, FrameEncoder::new(layout, TimingConfig::default()));
        (pipeline, log, FrameBuffer::new(layout.strands, layout.leds_per_strand))
    }

    fn poll(pipeline: &mut TransferPipeline<MockRing>) -> Poll<TransferCompletion> {
        pipeline.poll_complete(&mut Context::from_waker(noop_waker_ref()))
    }

    #[test]
    fn priming_fills_the_ring_starting_with_configuration() {
        let (mut pipeline, log, mut frame) = pipeline();
        let report = pipeline.prime(8, &mut frame).unwrap();

        assert_eq!(report.submitted, 8);
        // config, then 7 data packets covering 3 full sweeps of 2 packets and one extra
        assert_eq!(report.sweeps_completed, 3);
        let log = log.borrow();
        assert_eq!(log.in_flight.len(), 8);
        assert_eq!(log.in_flight[0].len(), 12);
        assert!(log.in_flight.iter().skip(1).all(|b| b.len() == 512));
    }

    #[test]
    fn completion_refills_and_resubmits_same_buffer() {
        let (mut pipeline, log, mut frame) = pipeline();
        pipeline.prime(4, &mut frame).unwrap();
        log.borrow_mut().ready = 1;

        let Poll::Ready(completion) = poll(&mut pipeline) else { panic!("expected completion") };
        let Completed::Ready { buffer, bytes } = pipeline.complete(completion) else { panic!("expected ready") };
        assert_eq!(bytes, 12);
        let sweep_complete = pipeline.refill(buffer, &mut frame).unwrap();

        // four primed packets: config, data 0, data 5 (terminal), data 0
        assert!(sweep_complete);
        {
            let log = log.borrow();
            assert_eq!(log.in_flight.len(), 4);
            let last = decode_data_packet(log.in_flight.back().unwrap(), 32).unwrap();
            assert!(last.header.terminal);
            assert_eq!(last.first_led(), 5);
        }
        assert!(poll(&mut pipeline).is_pending());
    }

    #[test]
    fn cancelled_completions_are_never_resubmitted() {
        let (mut pipeline, log, mut frame) = pipeline();
        pipeline.prime(8, &mut frame).unwrap();
        pipeline.tear_down();
        pipeline.tear_down();

        let mut suppressed = 0;
        while let Poll::Ready(completion) = poll(&mut pipeline) {
            assert!(matches!(pipeline.complete(completion), Completed::Suppressed));
            suppressed += 1;
        }
        assert_eq!(suppressed, 8);
        assert!(pipeline.is_drained());
        assert_eq!(log.borrow().submitted_after_cancel, 0);
        assert!(pipeline.refill(Vec::new(), &mut frame).is_err());
    }

    #[test]
    fn failed_transfer_reports_device_loss() {
        let (mut pipeline, log, mut frame) = pipeline();
        pipeline.prime(2, &mut frame).unwrap();
        {
            let mut log = log.borrow_mut();
            log.ready = 1;
            log.fail_next = Some(TransferError::Stall);
        }
        let Poll::Ready(completion) = poll(&mut pipeline) else { panic!("expected completion") };
        assert!(matches!(pipeline.complete(completion), Completed::Lost(TransferError::Stall)));
    }

    #[test]
    fn rejected_submission_fails_priming() {
        let (mut pipeline, log, mut frame) = pipeline();
        log.borrow_mut().reject_submit = true;
        assert!(matches!(
            pipeline.prime(8, &mut frame),
            Err(StreamError::Transfer(TransferError::Disconnected))
        ));
    }

    #[test]
    fn stall_detection_needs_queued_transfers() {
        let (mut pipeline, _log, mut frame) = pipeline();
        let timeout = Duration::from_millis(1024);
        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(pipeline.stalled_for(later, timeout), None);

        pipeline.prime(2, &mut frame).unwrap();
        assert!(pipeline.stalled_for(Instant::now(), timeout).is_none());
        assert!(pipeline.stalled_for(later, timeout).is_some());

        pipeline.tear_down();
        assert!(pipeline.stalled_for(later, timeout).is_none());
    }
}
