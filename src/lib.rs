//! # thinkgear-arm
//!
//! Drive a serial robot arm from a NeuroSky ThinkGear headset (MindWave and
//! friends). The headset's text telemetry (attention, meditation, blink
//! strength, poor-signal level) is read on a background thread, mapped to
//! joint steps, and written to the arm controller as newline-terminated
//! commands.
//!
//! ## Control rules
//!
//! | Input | Condition | Command |
//! |---|---|---|
//! | poor signal | `> quality_gate` (50) | nothing moves until contact improves |
//! | blink | rises to `≥ 60` | gripper toggles, `S 5 ±10` |
//! | attention | `≥ 70`, at most every 250 ms | base nudge, `S 0 5` |
//! | meditation | `≥ 70`, at most every 250 ms | shoulder lift, `S 1 3` |
//! | E-STOP | any time | `HOME` |
//!
//! Every threshold, step and period is configurable; see
//! [`config::MappingConfig`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Instant;
//! use thinkgear_arm::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::default();
//!     let (sensor, actuator) = (config.sensor.clone(), config.actuator.clone());
//!     let mut bridge = Bridge::new(config);
//!     bridge.start(move || open_sensor(&sensor), || open_actuator(&actuator))?;
//!
//!     loop {
//!         bridge.poll(Instant::now());
//!         for notice in bridge.drain_notices() {
//!             println!("{notice}");
//!         }
//!         std::thread::sleep(bridge.config().poll_interval());
//!     }
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the commonly needed types |
//! | [`bridge`] | The consumer: owns the mapper, drains events, dispatches commands |
//! | [`ingest`] | Background reader thread for the sensor port |
//! | [`mapper`] | Metric → command state machine (gate, blink edge, throttled moves) |
//! | [`dispatcher`] | Actuator connection: open + settle, serialised writes, close |
//! | [`parse`] | Line reassembly and keyword decoding of the telemetry stream |
//! | [`protocol`] | Baud rates, timing constants, keywords and the command encoder |
//! | [`config`] | Serde-backed settings with defaults for every field |
//! | [`cli`] | `clap` arguments shared by both binaries |
//! | [`serial`] | `serialport`-backed openers for both channels |
//! | [`sim`] | Simulated headset and logging arm for running without hardware |
//! | [`types`] | Samples, commands, events and the presentation snapshot |
//! | [`error`] | [`error::BridgeError`] |

pub mod bridge;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod mapper;
pub mod parse;
pub mod protocol;
pub mod serial;
pub mod sim;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for the binaries and downstream crates.
pub mod prelude {
    // ── Pipeline ──────────────────────────────────────────────────────────────
    pub use crate::bridge::Bridge;
    pub use crate::dispatcher::{ActuatorPort, Dispatcher, LinkState};
    pub use crate::ingest::{spawn_ingest, IngestHandle, SensorPort};
    pub use crate::mapper::ControlMapper;
    pub use crate::parse::{parse_line, KeywordDecoder, LineAssembler, LineDecoder};

    // ── Configuration and ports ───────────────────────────────────────────────
    pub use crate::config::{ActuatorSettings, BridgeConfig, MappingConfig, SensorSettings};
    pub use crate::serial::{open_actuator, open_sensor};
    pub use crate::sim::{LogSink, SimulatedHeadset};

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::error::BridgeError;
    pub use crate::types::{
        ActuatorCommand, BridgeEvent, Metric, MetricSample, Notice, NoticeKind, SensorStatus,
        Snapshot,
    };
}
