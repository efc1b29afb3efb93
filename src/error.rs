//! Error taxonomy for the sensor and actuator channels.
//!
//! Parse skips and gate suppression are deliberately absent: neither is an
//! error. Unparseable lines are counted in [`crate::ingest::IngestStats`] and
//! gated commands are simply never produced.

use std::fmt;
use std::io;

/// Which of the two serial channels an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The headset side (ThinkGear text stream).
    Sensor,
    /// The arm controller side (command frames).
    Actuator,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sensor => f.write_str("sensor"),
            Channel::Actuator => f.write_str("actuator"),
        }
    }
}

/// All errors produced by the library.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A channel could not be opened. Never retried automatically.
    #[error("failed to open {channel} channel on {port}: {source}")]
    OpenFailed {
        channel: Channel,
        port: String,
        #[source]
        source: io::Error,
    },

    /// A read on the sensor channel failed after it was opened.
    #[error("sensor read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// Writing a command frame to the actuator failed. The command is dropped.
    #[error("actuator write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// The actuator channel is closed (never opened, or closed since).
    #[error("actuator channel is not connected")]
    NotConnected,

    /// The actuator channel is still inside its settle delay.
    #[error("actuator channel is still settling after open")]
    NotReady,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// `true` when the underlying channel is gone and should be closed.
    pub fn is_disconnect(&self) -> bool {
        match self {
            BridgeError::WriteFailed(e) | BridgeError::ReadFailed(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            BridgeError::NotConnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_names_channel_and_port() {
        let err = BridgeError::OpenFailed {
            channel: Channel::Actuator,
            port: "/dev/ttyACM0".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        let msg = err.to_string();
        assert!(msg.contains("actuator"));
        assert!(msg.contains("/dev/ttyACM0"));
        assert!(msg.contains("no such device"));
    }

    #[test]
    fn broken_pipe_counts_as_disconnect() {
        let gone = BridgeError::WriteFailed(io::Error::from(io::ErrorKind::BrokenPipe));
        let busy = BridgeError::WriteFailed(io::Error::from(io::ErrorKind::TimedOut));
        assert!(gone.is_disconnect());
        assert!(!busy.is_disconnect());
    }
}
