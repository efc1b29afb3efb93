//! Wire-level constants and command framing for both serial channels.
//!
//! The sensor side speaks ThinkGear "text" output, one metric per line:
//!
//! ```text
//! attention: 65
//! meditation: 40
//! blinkStrength: 60
//! poorSignalLevel: 0
//! ```
//!
//! The actuator side accepts newline-terminated ASCII frames:
//!
//! | Frame | Meaning |
//! |---|---|
//! | `HOME\n` | move every joint to its home pose |
//! | `S <joint> <delta>\n` | step one joint by a signed number of degrees |

use std::time::Duration;

use crate::types::ActuatorCommand;

// ── Serial defaults ───────────────────────────────────────────────────────────

/// Baud rate of the MindWave Bluetooth serial profile.
pub const SENSOR_BAUD: u32 = 57_600;

/// Baud rate of the arm controller sketch.
pub const ACTUATOR_BAUD: u32 = 115_200;

/// Maximum number of bytes requested from the sensor per read.
pub const READ_CHUNK_SIZE: usize = 512;

/// Per-read timeout on the sensor channel. Bounds how long the ingestion
/// thread can go without checking its stop flag.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Time the controller needs after the port opens. Opening the port toggles
/// DTR, which resets the board; frames sent before the bootloader hands over
/// are lost.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Consumer tick cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `stop` waits for the ingestion thread before giving up on it.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(1500);

// ── Metric ranges ─────────────────────────────────────────────────────────────

/// Upper bound of the eSense attention / meditation scales and blink strength.
pub const METRIC_MAX: u8 = 100;

/// "No contact" value of the poor-signal metric. Also the value assumed before
/// the first reading arrives.
pub const SIGNAL_QUALITY_MAX: u8 = 200;

// ── Keywords ──────────────────────────────────────────────────────────────────

pub const ATTENTION_KEYWORDS: &[&str] = &["attention"];
pub const MEDITATION_KEYWORDS: &[&str] = &["meditation"];
pub const BLINK_KEYWORDS: &[&str] = &["blink"];
/// `poorSignalLevel` is covered by `poorsignal`.
pub const SIGNAL_KEYWORDS: &[&str] = &["poorsignal", "poor signal"];

// ── Joints ────────────────────────────────────────────────────────────────────

/// Base yaw servo.
pub const BASE_JOINT: u8 = 0;
/// Shoulder pitch servo.
pub const SHOULDER_JOINT: u8 = 1;
/// Gripper servo.
pub const GRIPPER_JOINT: u8 = 5;

// ── Command framing ───────────────────────────────────────────────────────────

/// Encode a command as the newline-terminated frame the controller expects.
///
/// ```
/// # use thinkgear_arm::protocol::encode_command;
/// # use thinkgear_arm::types::ActuatorCommand;
/// assert_eq!(encode_command(&ActuatorCommand::Home), b"HOME\n");
/// assert_eq!(
///     encode_command(&ActuatorCommand::Step { joint: 5, delta: -10 }),
///     b"S 5 -10\n"
/// );
/// ```
pub fn encode_command(cmd: &ActuatorCommand) -> Vec<u8> {
    format!("{cmd}\n").into_bytes()
}
