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
use std::sync::Arc;
use futures::stream::LocalBoxStream;
use futures::{FutureExt, StreamExt};
use nusb::hotplug::HotplugEvent as NusbHotplugEvent;
use nusb::{DeviceId, DeviceInfo};
use crate::config::DriverConfig;
use crate::transport::{ClaimFuture, HotplugEvent, Transport};

pub mod bulk_ring;
pub mod claim;
pub mod errors;

pub use bulk_ring::BulkOutRing;
pub use claim::ClaimPolicy;

/// [`Transport`] backed by the host USB stack through `nusb`.
pub struct NusbTransport {
    policy: Arc<ClaimPolicy>,
}

impl NusbTransport {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            policy: Arc::new(ClaimPolicy::from(config)),
        }
    }
}

impl Transport for NusbTransport {
    type Key = DeviceId;
    type Candidate = DeviceInfo;
    type Ring = BulkOutRing;

    fn candidate_key(&self, candidate: &DeviceInfo) -> DeviceId {
        candidate.id()
    }

    fn describe(&self, candidate: &DeviceInfo) -> String {
        format!("\"{}\" ({:04X}:{:04X})",
                candidate.product_string().unwrap_or("Unknown"),
                candidate.vendor_id(),
                candidate.product_id())
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, io::Error> {
        Ok(nusb::list_devices()?.collect())
    }

    fn watch(&self) -> Result<LocalBoxStream<'static, HotplugEvent<DeviceInfo, DeviceId>>, io::Error> {
        let events = nusb::watch_devices()?.map(|event| match event {
            NusbHotplugEvent::Connected(device_info) => HotplugEvent::Arrived(device_info),
            NusbHotplugEvent::Disconnected(device_id) => HotplugEvent::Departed(device_id),
        });
        Ok(events.boxed_local())
    }

    fn claim(&self, candidate: DeviceInfo) -> ClaimFuture<DeviceId, BulkOutRing> {
        claim::claim_breakout_board(candidate, self.policy.clone()).boxed_local()
    }
}
