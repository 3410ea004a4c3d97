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

use std::io;
use thiserror::Error;
use crate::protocol::ProtocolError;

/// Failure reported for a single bulk transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Hardware fault or protocol violation")]
    Fault,

    #[error("Transfer failed: {0}")]
    Other(String),
}

impl From<nusb::transfer::TransferError> for TransferError {
    fn from(error: nusb::transfer::TransferError) -> Self {
        match error {
            nusb::transfer::TransferError::Cancelled => TransferError::Cancelled,
            nusb::transfer::TransferError::Stall => TransferError::Stall,
            nusb::transfer::TransferError::Disconnected => TransferError::Disconnected,
            nusb::transfer::TransferError::Fault => TransferError::Fault,
            other => TransferError::Other(other.to_string()),
        }
    }
}

/// Reason a streaming device has to be dropped.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{0}")]
    Transfer(#[from] TransferError),

    #[error("Failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),

    #[error("No transfer completed for {0:?}")]
    Stalled(std::time::Duration),
}

/// Outcome of probing a hotplugged device that did not end with a claimed board.
#[derive(Error, Debug)]
pub enum ArrivalError {
    #[error("Not a breakout board ({vendor_id:04x}:{product_id:04x})")]
    NotBreakoutBoard {
        vendor_id: u16,
        product_id: u16,
    },

    #[error("Failed to open device: {0}")]
    Open(#[source] io::Error),

    #[error("Serial number not readable after {attempts} attempts: {reason}")]
    SerialUnavailable {
        attempts: u32,
        reason: String,
    },

    #[error("Serial {0} is not configured")]
    SerialNotListed(String),

    #[error("Failed to claim interface {interface}: {source}")]
    ClaimInterface {
        interface: u8,
        #[source]
        source: io::Error,
    },
}

impl ArrivalError {
    /// Mismatches are expected for every foreign device and are not failures.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, ArrivalError::NotBreakoutBoard { .. } | ArrivalError::SerialNotListed(_))
    }
}
