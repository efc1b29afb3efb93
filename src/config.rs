//! Runtime configuration.
//!
//! Every field has a default, so the binaries run with no config file at all
//! and a JSON file only needs the keys it wants to change:
//!
//! ```json
//! {
//!   "sensor":   { "port": "/dev/rfcomm0" },
//!   "actuator": { "port": "/dev/ttyACM0" },
//!   "mapping":  { "attention_threshold": 60, "move_period_ms": 400 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::protocol::{
    ACTUATOR_BAUD, BASE_JOINT, GRIPPER_JOINT, METRIC_MAX, POLL_INTERVAL, READ_TIMEOUT,
    SENSOR_BAUD, SETTLE_DELAY, SHOULDER_JOINT, SIGNAL_QUALITY_MAX, STOP_TIMEOUT,
};

/// The headset side: device, speed and per-read timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// OS device name, e.g. `/dev/rfcomm0` or `COM7`.
    pub port: String,
    pub baud: u32,
    /// Upper bound on one blocking read. Also bounds how late a stop request
    /// is noticed by the ingestion thread.
    pub read_timeout_ms: u64,
}

impl SensorSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into(), ..Self::default() }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            port: if cfg!(windows) { "COM7" } else { "/dev/rfcomm0" }.into(),
            baud: SENSOR_BAUD,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
        }
    }
}

/// The arm controller side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    pub port: String,
    pub baud: u32,
}

impl ActuatorSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into(), ..Self::default() }
    }
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            port: if cfg!(windows) { "COM5" } else { "/dev/ttyACM0" }.into(),
            baud: ACTUATOR_BAUD,
        }
    }
}

/// Thresholds, step sizes and timing of the metric → command mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Attention at or above this nudges the base.
    pub attention_threshold: u8,
    /// Meditation at or above this lifts the shoulder.
    pub meditation_threshold: u8,
    /// Blink strength at or above this toggles the gripper.
    pub blink_threshold: u8,
    /// Signal-quality values above this freeze the arm.
    pub quality_gate: u8,
    pub base_step: i32,
    pub shoulder_step: i32,
    pub grip_step: i32,
    /// Minimum time between two periodic (attention / meditation) moves.
    pub move_period_ms: u64,
    pub base_joint: u8,
    pub shoulder_joint: u8,
    pub gripper_joint: u8,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            attention_threshold: 70,
            meditation_threshold: 70,
            blink_threshold: 60,
            quality_gate: 50,
            base_step: 5,
            shoulder_step: 3,
            grip_step: 10,
            move_period_ms: 250,
            base_joint: BASE_JOINT,
            shoulder_joint: SHOULDER_JOINT,
            gripper_joint: GRIPPER_JOINT,
        }
    }
}

impl MappingConfig {
    pub fn move_period(&self) -> Duration {
        Duration::from_millis(self.move_period_ms)
    }

    /// Reject values the mapper cannot act on sensibly.
    pub fn validate(&self) -> Result<(), BridgeError> {
        for (name, v) in [
            ("attention_threshold", self.attention_threshold),
            ("meditation_threshold", self.meditation_threshold),
            ("blink_threshold", self.blink_threshold),
        ] {
            if v > METRIC_MAX {
                return Err(BridgeError::Config(format!(
                    "{name} = {v} is above the metric range (0–{METRIC_MAX})"
                )));
            }
        }
        if self.quality_gate > SIGNAL_QUALITY_MAX {
            return Err(BridgeError::Config(format!(
                "quality_gate = {} is above the signal range (0–{SIGNAL_QUALITY_MAX})",
                self.quality_gate
            )));
        }
        if self.move_period_ms == 0 {
            return Err(BridgeError::Config("move_period_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Top-level configuration for a [`crate::bridge::Bridge`] session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub sensor: SensorSettings,
    pub actuator: ActuatorSettings,
    pub mapping: MappingConfig,
    /// Wait after opening the actuator before the first command.
    pub settle_delay_ms: u64,
    /// Consumer tick cadence.
    pub poll_interval_ms: u64,
    /// How long `stop` waits for the ingestion thread.
    pub stop_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sensor: SensorSettings::default(),
            actuator: ActuatorSettings::default(),
            mapping: MappingConfig::default(),
            settle_delay_ms: SETTLE_DELAY.as_millis() as u64,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            stop_timeout_ms: STOP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        self.mapping.validate()?;
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Config("poll_interval_ms must be positive".into()));
        }
        if self.sensor.read_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "sensor.read_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
