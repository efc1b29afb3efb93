use std::fmt;

use crate::dispatcher::LinkState;

/// Which biosignal metric a telemetry line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// eSense attention, 0–100.
    Attention,
    /// eSense meditation, 0–100.
    Meditation,
    /// Blink strength, 0–100 (only reported when a blink is detected).
    Blink,
    /// Poor-signal level, 0 (perfect contact) – 200 (no contact).
    SignalQuality,
}

impl Metric {
    /// Largest value the metric can legitimately take.
    pub fn max(self) -> u8 {
        match self {
            Metric::SignalQuality => crate::protocol::SIGNAL_QUALITY_MAX,
            _ => crate::protocol::METRIC_MAX,
        }
    }
}

/// One decoded biosignal reading.
///
/// A sample is partial: the ThinkGear text stream reports one metric per
/// line, so [`crate::parse::parse_line`] produces samples with exactly one
/// field set. A field left `None` means "no fresh reading"; the previous
/// value stays in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSample {
    pub attention: Option<u8>,
    pub meditation: Option<u8>,
    pub blink_strength: Option<u8>,
    pub signal_quality: Option<u8>,
}

impl MetricSample {
    /// A sample carrying a single metric. Out-of-range values are clamped to
    /// the metric's maximum.
    pub fn single(metric: Metric, value: u32) -> Self {
        let value = value.min(u32::from(metric.max())) as u8;
        let mut s = Self::default();
        match metric {
            Metric::Attention => s.attention = Some(value),
            Metric::Meditation => s.meditation = Some(value),
            Metric::Blink => s.blink_strength = Some(value),
            Metric::SignalQuality => s.signal_quality = Some(value),
        }
        s
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A directive to the arm controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    /// Return every joint to its home pose.
    Home,
    /// Step one joint by `delta` degrees.
    Step { joint: u8, delta: i32 },
}

/// Renders the frame body without the trailing newline, e.g. `S 5 -10`.
impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Home => f.write_str("HOME"),
            ActuatorCommand::Step { joint, delta } => write!(f, "S {joint} {delta}"),
        }
    }
}

/// Everything the ingestion thread sends to the consumer.
///
/// Events are delivered in the order the ingestion thread produced them.
/// After [`BridgeEvent::OpenFailed`], [`BridgeEvent::ReadFailed`] or
/// [`BridgeEvent::Disconnected`] the producer has exited and no further
/// events arrive on that channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One parsed telemetry line.
    Metric(MetricSample),
    /// The sensor port is open. Carries the port name.
    Connected(String),
    /// The sensor port could not be opened. Carries the error text.
    OpenFailed(String),
    /// A read failed after the port was open. Carries the error text.
    ReadFailed(String),
    /// Ingestion stopped on request and the port is closed.
    Disconnected,
}

/// Connection status of the sensor side, as seen by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SensorStatus {
    /// Ingestion has not been started.
    #[default]
    Idle,
    /// Ingestion thread is running but the port is not open yet.
    Connecting,
    /// Streaming from the named port.
    Connected(String),
    /// Ingestion stopped on request.
    Disconnected,
    /// Ingestion terminated on an error. Carries the error text.
    Failed(String),
}

impl SensorStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, SensorStatus::Connected(_))
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorStatus::Idle => f.write_str("idle"),
            SensorStatus::Connecting => f.write_str("connecting"),
            SensorStatus::Connected(port) => write!(f, "streaming from {port}"),
            SensorStatus::Disconnected => f.write_str("disconnected"),
            SensorStatus::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Read-only view of the pipeline handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub attention: Option<u8>,
    pub meditation: Option<u8>,
    pub blink_strength: Option<u8>,
    pub signal_quality: u8,
    pub gripper_open: bool,
    /// `true` while the quality gate is withholding motion.
    pub gated: bool,
    pub sensor: SensorStatus,
    pub actuator: LinkState,
    pub commands_sent: u64,
    pub lines_parsed: u64,
    pub lines_skipped: u64,
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Lifecycle message ("Connected MindWave on …").
    Status,
    /// Failure message.
    Error,
    /// A command frame that was written to the arm.
    Command,
}

/// A human-readable notification for the presentation layer's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn status(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Status, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { kind: NoticeKind::Error, text: text.into() }
    }

    pub fn command(cmd: &ActuatorCommand) -> Self {
        Self { kind: NoticeKind::Command, text: cmd.to_string() }
    }
}

/// Log-style rendering: `* status`, `! error`, `> command`.
impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.kind {
            NoticeKind::Status => '*',
            NoticeKind::Error => '!',
            NoticeKind::Command => '>',
        };
        write!(f, "{marker} {}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_clamps_to_metric_range() {
        assert_eq!(MetricSample::single(Metric::Attention, 250).attention, Some(100));
        assert_eq!(
            MetricSample::single(Metric::SignalQuality, 250).signal_quality,
            Some(200)
        );
        assert_eq!(MetricSample::single(Metric::Blink, 75).blink_strength, Some(75));
    }

    #[test]
    fn notices_render_with_log_markers() {
        let step = ActuatorCommand::Step { joint: 0, delta: 5 };
        assert_eq!(Notice::command(&step).to_string(), "> S 0 5");
        assert_eq!(Notice::error("read failed").to_string(), "! read failed");
    }
}
