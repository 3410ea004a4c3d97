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

mod animation;
mod cli;

use std::process::ExitCode;
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use breakout_core::{Driver, DriverConfig, DriverError, NusbTransport};
use crate::animation::HueWheel;
use crate::cli::Cli;

const EXIT_STARTUP_FAILED: u8 = 1;
const EXIT_NO_MATCHING_DEVICE: u8 = 2;
const EXIT_CLAIM_FAILED: u8 = 3;

fn load_config(cli: &Cli) -> anyhow::Result<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DriverConfig::default(),
    };
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_STARTUP_FAILED);
        }
    };
    info!(
        "Driving {} board(s), {} strands x {} LEDs",
        config.serials.len(),
        config.strands,
        config.leds_per_strand
    );

    let transport = NusbTransport::new(&config);
    let mut driver = Driver::new(transport, config, Box::new(HueWheel));
    match driver.run(shutdown_signal()).await {
        Ok(summary) => {
            info!("Stopped after {} frames", summary.frames);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(match e {
                DriverError::NoMatchingDevice => EXIT_NO_MATCHING_DEVICE,
                DriverError::InterfaceClaimFailed(_) => EXIT_CLAIM_FAILED,
                DriverError::Transport(_) => EXIT_STARTUP_FAILED,
            })
        }
    }
}
