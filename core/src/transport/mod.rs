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

//! Capabilities the driver needs from a USB stack.
//!
//! The driver never talks to `nusb` directly; it goes through [`Transport`]
//! for device discovery and through [`TransferRing`] for the bulk stream of
//! one claimed board. `crate::usb` provides the production implementation.

use std::fmt::Debug;
use std::io;
use std::task::{Context, Poll};
use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use crate::usb::errors::{ArrivalError, TransferError};

#[cfg(test)]
pub(crate) mod mock;

/// A finished bulk transfer handed back with its buffer for reuse.
#[derive(Debug)]
pub struct TransferCompletion {
    pub buffer: Vec<u8>,
    pub actual_len: usize,
    pub status: Result<(), TransferError>,
}

/// Queue of in-flight bulk OUT transfers on one endpoint.
///
/// Completions are delivered in submission order.
pub trait TransferRing {
    /// Queues `buffer` for transmission. Failures may also be reported later
    /// through the completion status.
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransferError>;

    /// Polls for the oldest outstanding transfer. Must only be called while
    /// [`pending`](Self::pending) is non-zero.
    fn poll_complete(&mut self, cx: &mut Context<'_>) -> Poll<TransferCompletion>;

    /// Transfers submitted and not yet handed back.
    fn pending(&self) -> usize;

    /// Requests cancellation of every outstanding transfer. Cancelled
    /// transfers still complete, with [`TransferError::Cancelled`].
    fn cancel_all(&mut self);
}

/// Device attach or detach notification.
#[derive(Debug)]
pub enum HotplugEvent<C, K> {
    Arrived(C),
    Departed(K),
}

/// A board that passed identity checks and whose interface is claimed.
pub struct ClaimedDevice<K, R> {
    pub key: K,
    pub serial: String,
    pub ring: R,
}

pub type ClaimFuture<K, R> = LocalBoxFuture<'static, Result<ClaimedDevice<K, R>, ArrivalError>>;

/// Device discovery and claiming.
pub trait Transport {
    /// Identifies an attached device for as long as it stays attached.
    type Key: Copy + Eq + Debug + 'static;
    /// A device seen by enumeration or hotplug, not yet opened.
    type Candidate: 'static;
    type Ring: TransferRing + 'static;

    fn candidate_key(&self, candidate: &Self::Candidate) -> Self::Key;

    /// Human readable description for logs.
    fn describe(&self, candidate: &Self::Candidate) -> String;

    /// Devices already attached at start-up.
    fn enumerate(&self) -> Result<Vec<Self::Candidate>, io::Error>;

    fn watch(&self) -> Result<LocalBoxStream<'static, HotplugEvent<Self::Candidate, Self::Key>>, io::Error>;

    /// Filters, opens, identifies and claims a candidate.
    ///
    /// Serial number reads are retried with backoff inside the returned
    /// future; the control loop keeps servicing other boards meanwhile.
    fn claim(&self, candidate: Self::Candidate) -> ClaimFuture<Self::Key, Self::Ring>;
}
