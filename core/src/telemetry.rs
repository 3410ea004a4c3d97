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

use std::fmt;
use std::time::{Duration, Instant};

/// Byte and frame counters over one reporting window.
#[derive(Debug, Clone)]
pub struct Telemetry {
    bytes: u64,
    frames: u64,
    window_start: Instant,
}

/// Counters of a closed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReport {
    pub elapsed: Duration,
    pub bytes: u64,
    pub frames: u64,
}

impl TelemetryReport {
    pub fn mebibytes_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        self.bytes as f64 / (seconds * 1024.0 * 1024.0)
    }

    pub fn frames_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / seconds
    }
}

impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} MB/s TX ({:.0} FPS)", self.mebibytes_per_second(), self.frames_per_second())
    }
}

impl Telemetry {
    pub fn new(now: Instant) -> Self {
        Self { bytes: 0, frames: 0, window_start: now }
    }

    pub fn record_bytes(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    /// Closes the current window and starts a new one at `now`.
    pub fn take_report(&mut self, now: Instant) -> TelemetryReport {
        let report = TelemetryReport {
            elapsed: now.saturating_duration_since(self.window_start),
            bytes: self.bytes,
            frames: self.frames,
        };
        *self = Self::new(now);
        report
    }
}
