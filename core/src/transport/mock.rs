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

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::task::{Context, Poll};
use futures::channel::mpsc;
use futures::stream::LocalBoxStream;
use futures::{FutureExt, StreamExt};
use crate::transport::{ClaimFuture, ClaimedDevice, HotplugEvent, TransferCompletion, TransferRing, Transport};
use crate::usb::errors::{ArrivalError, TransferError};

/// What a [`MockRing`] saw and what it lets through.
#[derive(Debug, Default)]
pub(crate) struct RingLog {
    pub in_flight: VecDeque<Vec<u8>>,
    /// Payloads of transfers that completed successfully, in order.
    pub sent: Vec<Vec<u8>>,
    /// Number of in-flight transfers allowed to complete.
    pub ready: usize,
    pub cancelled: bool,
    pub submitted_after_cancel: usize,
    /// Status of the next completion instead of success.
    pub fail_next: Option<TransferError>,
    /// Makes `submit` itself fail.
    pub reject_submit: bool,
}

pub(crate) type SharedRingLog = Rc<RefCell<RingLog>>;

pub(crate) struct MockRing {
    log: SharedRingLog,
}

impl MockRing {
    pub fn new() -> (Self, SharedRingLog) {
        let log = SharedRingLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl TransferRing for MockRing {
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransferError> {
        let mut log = self.log.borrow_mut();
        if log.reject_submit {
            return Err(TransferError::Disconnected);
        }
        if log.cancelled {
            log.submitted_after_cancel += 1;
        }
        log.in_flight.push_back(buffer);
        Ok(())
    }

    fn poll_complete(&mut self, _cx: &mut Context<'_>) -> Poll<TransferCompletion> {
        let mut log = self.log.borrow_mut();
        assert!(!log.in_flight.is_empty(), "polled with nothing in flight");
        if log.cancelled {
            let buffer = log.in_flight.pop_front().unwrap_or_default();
            return Poll::Ready(TransferCompletion { buffer, actual_len: 0, status: Err(TransferError::Cancelled) });
        }
        if log.ready == 0 {
            return Poll::Pending;
        }
        log.ready -= 1;
        let buffer = log.in_flight.pop_front().unwrap_or_default();
        if let Some(error) = log.fail_next.take() {
            return Poll::Ready(TransferCompletion { buffer, actual_len: 0, status: Err(error) });
        }
        log.sent.push(buffer.clone());
        let actual_len = buffer.len();
        Poll::Ready(TransferCompletion { buffer, actual_len, status: Ok(()) })
    }

    fn pending(&self) -> usize {
        self.log.borrow().in_flight.len()
    }

    fn cancel_all(&mut self) {
        self.log.borrow_mut().cancelled = true;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockCandidate {
    pub key: u32,
    pub serial: String,
    pub claim_fails: bool,
    /// Completions the ring lets through right after the claim.
    pub ready: usize,
}

impl MockCandidate {
    pub fn new(key: u32, serial: &str) -> Self {
        Self { key, serial: serial.to_string(), claim_fails: false, ready: 0 }
    }
}

/// In-memory transport: candidates come from `existing` and from the sender
/// half returned by [`MockTransport::new`].
pub(crate) struct MockTransport {
    serials: Vec<String>,
    existing: Vec<MockCandidate>,
    events: RefCell<Option<mpsc::UnboundedReceiver<HotplugEvent<MockCandidate, u32>>>>,
    rings: Rc<RefCell<HashMap<u32, SharedRingLog>>>,
}

pub(crate) type MockEvents = mpsc::UnboundedSender<HotplugEvent<MockCandidate, u32>>;

impl MockTransport {
    pub fn new(serials: &[&str], existing: Vec<MockCandidate>) -> (Self, MockEvents) {
        let (sender, receiver) = mpsc::unbounded();
        let transport = Self {
            serials: serials.iter().map(|s| s.to_string()).collect(),
            existing,
            events: RefCell::new(Some(receiver)),
            rings: Rc::default(),
        };
        (transport, sender)
    }

    /// Ring log of the latest claim of `key`.
    pub fn rings(&self) -> Rc<RefCell<HashMap<u32, SharedRingLog>>> {
        self.rings.clone()
    }
}

impl Transport for MockTransport {
    type Key = u32;
    type Candidate = MockCandidate;
    type Ring = MockRing;

    fn candidate_key(&self, candidate: &MockCandidate) -> u32 {
        candidate.key
    }

    fn describe(&self, candidate: &MockCandidate) -> String {
        format!("mock #{} ({})", candidate.key, candidate.serial)
    }

    fn enumerate(&self) -> Result<Vec<MockCandidate>, io::Error> {
        Ok(self.existing.clone())
    }

    fn watch(&self) -> Result<LocalBoxStream<'static, HotplugEvent<MockCandidate, u32>>, io::Error> {
        self.events
            .borrow_mut()
            .take()
            .map(|receiver| receiver.boxed_local())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already watching"))
    }

    fn claim(&self, candidate: MockCandidate) -> ClaimFuture<u32, MockRing> {
        let result = if !self.serials.contains(&candidate.serial) {
            Err(ArrivalError::SerialNotListed(candidate.serial))
        } else if candidate.claim_fails {
            Err(ArrivalError::ClaimInterface {
                interface: 3,
                source: io::Error::new(io::ErrorKind::PermissionDenied, "interface busy"),
            })
        } else {
            let (ring, log) = MockRing::new();
            log.borrow_mut().ready = candidate.ready;
            self.rings.borrow_mut().insert(candidate.key, log);
            Ok(ClaimedDevice { key: candidate.key, serial: candidate.serial, ring })
        };
        async move { result }.boxed_local()
    }
}
