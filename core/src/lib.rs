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

pub mod config;
pub mod definitions;
pub mod driver;
pub mod encoder;
pub mod frame;
pub mod frame_sync;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod telemetry;
pub mod transport;
pub mod usb;

pub use config::{ConfigError, DriverConfig};
pub use definitions::{Color, StrandLayout, TimingConfig};
pub use driver::{Driver, DriverError, RunSummary};
pub use frame::{FrameSource, LedFrame};
pub use usb::NusbTransport;
