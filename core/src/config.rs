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

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::definitions::{
    StrandLayout, TimingConfig, BITS_PER_LED, BREAKOUT_BULK_OUT_ENDPOINT, BREAKOUT_INTERFACE,
    BREAKOUT_PRODUCT_ID, BREAKOUT_VENDOR_ID, MAX_DEVICES, MAX_STRANDS,
};
use crate::protocol::{CONFIG_PACKET_LEN, DATA_HEADER_LEN, MAX_BIT_OFFSET};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the driver needs to find, claim and feed its boards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Allow-list of board serial numbers; the position is the slot number.
    pub serials: Vec<String>,
    pub interface: u8,
    pub endpoint: u8,
    pub transfers_in_flight: usize,
    pub block_size: usize,
    pub strands: usize,
    pub leds_per_strand: usize,
    pub leds_per_packet: usize,
    pub timing: TimingConfig,
    /// A board whose ring makes no progress for this long is dropped.
    pub transfer_timeout_ms: u64,
    pub serial_read_attempts: u32,
    pub serial_retry_initial_ms: u64,
    pub serial_retry_max_ms: u64,
    pub telemetry_interval_ms: u64,
    /// Upper bound on waiting for cancelled transfers at shutdown.
    pub shutdown_drain_ms: u64,
    /// Exit instead of waiting for hotplug when no board is claimed at start-up.
    pub require_device: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            vendor_id: BREAKOUT_VENDOR_ID,
            product_id: BREAKOUT_PRODUCT_ID,
            serials: vec!["f38dabcd5b6ebc14".to_string(), "d3f9abcd3bdabc14".to_string()],
            interface: BREAKOUT_INTERFACE,
            endpoint: BREAKOUT_BULK_OUT_ENDPOINT,
            transfers_in_flight: 8,
            block_size: 512,
            strands: MAX_STRANDS,
            leds_per_strand: 215,
            leds_per_packet: 5,
            timing: TimingConfig::default(),
            transfer_timeout_ms: 1024,
            serial_read_attempts: 100,
            serial_retry_initial_ms: 5,
            serial_retry_max_ms: 100,
            telemetry_interval_ms: 1000,
            shutdown_drain_ms: 1000,
            require_device: false,
        }
    }
}

impl DriverConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn layout(&self) -> StrandLayout {
        StrandLayout {
            strands: self.strands,
            leds_per_strand: self.leds_per_strand,
            leds_per_packet: self.leds_per_packet,
            block_size: self.block_size,
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.serials.is_empty() || self.serials.len() > MAX_DEVICES {
            return invalid(format!("between 1 and {} serials required, got {}", MAX_DEVICES, self.serials.len()));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.serials.iter().find(|s| !seen.insert(s.as_str())) {
            return invalid(format!("serial {} listed twice", duplicate));
        }
        if self.strands == 0 || self.strands > MAX_STRANDS {
            return invalid(format!("strands must be between 1 and {}, got {}", MAX_STRANDS, self.strands));
        }
        if self.leds_per_strand == 0 || self.leds_per_packet == 0 {
            return invalid("leds_per_strand and leds_per_packet must be positive".to_string());
        }
        let frame_bits = self.leds_per_strand.checked_mul(BITS_PER_LED);
        if frame_bits.map_or(true, |bits| bits > MAX_BIT_OFFSET) {
            return invalid(format!(
                "{} LEDs per strand overflow the 15-bit offset field",
                self.leds_per_strand
            ));
        }
        if self.block_size < CONFIG_PACKET_LEN {
            return invalid(format!("block_size {} cannot hold the configuration packet", self.block_size));
        }
        let payload_len = self
            .leds_per_packet
            .checked_mul(BITS_PER_LED * 4)
            .and_then(|words| words.checked_add(DATA_HEADER_LEN));
        if payload_len.map_or(true, |len| len > self.block_size) {
            return invalid(format!(
                "{} LEDs per packet do not fit a {} byte block",
                self.leds_per_packet,
                self.block_size
            ));
        }
        if self.transfers_in_flight == 0 {
            return invalid("transfers_in_flight must be positive".to_string());
        }
        if self.serial_read_attempts == 0 {
            return invalid("serial_read_attempts must be positive".to_string());
        }
        if self.transfer_timeout_ms == 0 {
            return invalid("transfer_timeout_ms must be positive".to_string());
        }
        if self.telemetry_interval_ms == 0 {
            return invalid("telemetry_interval_ms must be positive".to_string());
        }
        Ok(())
    }
}
