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

use std::path::PathBuf;
use clap::Parser;
use log::LevelFilter;
use breakout_core::DriverConfig;

/// Streams a demo animation to every attached breakout board.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file; built-in defaults are used without it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(short, long, value_name = "LEVEL", default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    /// Board serial number, in slot order; replaces the configured list
    #[arg(short, long = "serial", value_name = "SERIAL")]
    pub serials: Vec<String>,

    /// Exit unless a configured board is claimed at start-up
    #[arg(long)]
    pub require_device: bool,
}

impl Cli {
    /// Applies command line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut DriverConfig) {
        if !self.serials.is_empty() {
            config.serials = self.serials.clone();
        }
        if self.require_device {
            config.require_device = true;
        }
    }
}
