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

use std::sync::Arc;
use std::time::Duration;
use log::debug;
use nusb::{list_devices, Device, DeviceId, DeviceInfo};
use crate::config::DriverConfig;
use crate::transport::ClaimedDevice;
use crate::usb::bulk_ring::BulkOutRing;
use crate::usb::errors::ArrivalError;

const DEVICE_DESCRIPTOR_TYPE: u8 = 0x01;
const STRING_DESCRIPTOR_TYPE: u8 = 0x03;
const DEVICE_DESCRIPTOR_SERIAL_INDEX_OFFSET: usize = 16;
const LANGUAGE_ID_EN_US: u16 = 0x0409;
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(100);

/// Identity and retry rules applied to every candidate device.
#[derive(Debug, Clone)]
pub struct ClaimPolicy {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serials: Vec<String>,
    pub interface: u8,
    pub endpoint: u8,
    pub serial_read_attempts: u32,
    pub serial_retry_initial: Duration,
    pub serial_retry_max: Duration,
}

impl From<&DriverConfig> for ClaimPolicy {
    fn from(config: &DriverConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            serials: config.serials.clone(),
            interface: config.interface,
            endpoint: config.endpoint,
            serial_read_attempts: config.serial_read_attempts,
            serial_retry_initial: Duration::from_millis(config.serial_retry_initial_ms),
            serial_retry_max: Duration::from_millis(config.serial_retry_max_ms),
        }
    }
}

impl ClaimPolicy {
    /// Backoff before attempt `attempt + 1`, doubling up to the maximum.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.serial_retry_initial
            .checked_mul(factor)
            .map_or(self.serial_retry_max, |delay| delay.min(self.serial_retry_max))
    }
}

/// Opens, identifies and claims a breakout board.
///
/// Every early return drops what was opened so far, which closes the device.
pub async fn claim_breakout_board(
    device_info: DeviceInfo,
    policy: Arc<ClaimPolicy>,
) -> Result<ClaimedDevice<DeviceId, BulkOutRing>, ArrivalError> {
    if device_info.vendor_id() != policy.vendor_id || device_info.product_id() != policy.product_id {
        return Err(ArrivalError::NotBreakoutBoard {
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
        });
    }

    let device = device_info.open().map_err(ArrivalError::Open)?;
    let serial = read_serial_with_retry(&device_info, &device, &policy).await?;
    if !policy.serials.contains(&serial) {
        return Err(ArrivalError::SerialNotListed(serial));
    }

    let interface = device
        .detach_and_claim_interface(policy.interface)
        .map_err(|source| ArrivalError::ClaimInterface { interface: policy.interface, source })?;
    Ok(ClaimedDevice {
        key: device_info.id(),
        serial,
        ring: BulkOutRing::new(interface, policy.endpoint),
    })
}

/// Fresh device info, the serial number cached by the OS may show up late.
fn get_device_info_by_id(device_id: DeviceId) -> Option<DeviceInfo> {
    list_devices().ok()?.find(|device| device.id() == device_id)
}

async fn read_serial_with_retry(
    device_info: &DeviceInfo,
    device: &Device,
    policy: &ClaimPolicy,
) -> Result<String, ArrivalError> {
    let mut reason = String::new();
    for attempt in 1..=policy.serial_read_attempts {
        let cached = if attempt == 1 {
            device_info.serial_number().map(str::to_string)
        } else {
            get_device_info_by_id(device_info.id()).and_then(|info| info.serial_number().map(str::to_string))
        };
        let result = match cached.filter(|serial| !serial.is_empty()) {
            Some(serial) => Ok(serial),
            None => {
                let device = device.clone();
                run_blocking(move || read_serial(&device)).await
            }
        };
        match result {
            Ok(serial) => return Ok(serial),
            Err(e) => {
                debug!("Serial of {:04x}:{:04x} not readable yet (attempt {}): {}",
                       device_info.vendor_id(), device_info.product_id(), attempt, e);
                reason = e;
            }
        }
        if attempt < policy.serial_read_attempts {
            tokio::time::sleep(policy.retry_delay(attempt)).await;
        }
    }
    Err(ArrivalError::SerialUnavailable { attempts: policy.serial_read_attempts, reason })
}

/// Runs a blocking USB request on the blocking pool so the streaming loop
/// keeps being polled meanwhile.
async fn run_blocking<T, F>(request: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(request)
        .await
        .unwrap_or_else(|e| Err(format!("descriptor read task failed: {}", e)))
}

fn read_serial(device: &Device) -> Result<String, String> {
    let descriptor = device
        .get_descriptor(DEVICE_DESCRIPTOR_TYPE, 0, 0, DESCRIPTOR_TIMEOUT)
        .map_err(|e| format!("device descriptor: {}", e))?;
    let index = *descriptor
        .get(DEVICE_DESCRIPTOR_SERIAL_INDEX_OFFSET)
        .ok_or_else(|| "device descriptor too short".to_string())?;
    if index == 0 {
        return Err("device has no serial number string".to_string());
    }
    let raw = device
        .get_descriptor(STRING_DESCRIPTOR_TYPE, index, LANGUAGE_ID_EN_US, DESCRIPTOR_TIMEOUT)
        .map_err(|e| format!("string descriptor {}: {}", index, e))?;
    decode_string_descriptor(&raw)
}

/// Decodes a USB string descriptor (UTF-16LE after a two byte header).
pub(crate) fn decode_string_descriptor(raw: &[u8]) -> Result<String, String> {
    if raw.len() < 2 || raw[1] != STRING_DESCRIPTOR_TYPE {
        return Err("not a string descriptor".to_string());
    }
    let length = (raw[0] as usize).min(raw.len());
    if length < 2 {
        return Err("string descriptor too short".to_string());
    }
    let units = raw[2..length]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| e.to_string())
}
