//! Command-line arguments shared by the headless runner and the TUI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::BridgeConfig;

#[derive(Parser, Debug, Default)]
#[command(about = "Drive a serial robot arm from a NeuroSky ThinkGear headset")]
#[command(version)]
pub struct Args {
    /// Simulated headset and a logging arm, no hardware
    #[arg(long)]
    pub simulate: bool,

    /// JSON configuration (missing keys keep their defaults)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Headset serial port, overrides the config file
    #[arg(long, value_name = "PORT")]
    pub sensor: Option<String>,

    /// Arm serial port, overrides the config file
    #[arg(long, value_name = "PORT")]
    pub actuator: Option<String>,
}

impl Args {
    /// Load the config file (or defaults) and apply the port overrides.
    /// A simulated arm needs no settle delay.
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(port) = &self.sensor {
            config.sensor.port = port.clone();
        }
        if let Some(port) = &self.actuator {
            config.actuator.port = port.clone();
        }
        if self.simulate {
            config.settle_delay_ms = 0;
        }
        Ok(config)
    }
}
