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
use nusb::transfer::Queue;
use nusb::Interface;
use crate::transport::{TransferCompletion, TransferRing};
use crate::usb::errors::TransferError;

/// Bulk OUT transfer queue of a claimed breakout board interface.
///
/// Dropping the ring cancels what is still queued, releases the interface
/// and closes the device once nothing else refers to it.
pub struct BulkOutRing {
    queue: Queue<Vec<u8>>,
    _interface: Interface,
}

impl BulkOutRing {
    pub fn new(interface: Interface, endpoint: u8) -> Self {
        let queue = interface.bulk_out_queue(endpoint);
        Self {
            queue,
            _interface: interface,
        }
    }
}

impl TransferRing for BulkOutRing {
    fn submit(&mut self, buffer: Vec<u8>) -> Result<(), TransferError> {
        // nusb reports submission failures through the completion
        self.queue.submit(buffer);
        Ok(())
    }

    fn poll_complete(&mut self, cx: &mut Context<'_>) -> Poll<TransferCompletion> {
        self.queue.poll_next(cx).map(|completion| {
            let actual_len = completion.data.actual_length();
            TransferCompletion {
                buffer: completion.data.reuse(),
                actual_len,
                status: completion.status.map_err(TransferError::from),
            }
        })
    }

    fn pending(&self) -> usize {
        self.queue.pending()
    }

    fn cancel_all(&mut self) {
        self.queue.cancel_all();
    }
}
