//! Metric → command state machine.
//!
//! Three rules act on the incoming samples, in this order:
//!
//! | Rule | Trigger | Evaluated |
//! |---|---|---|
//! | quality gate | last poor-signal value `> quality_gate` | every sample and every tick; short-circuits the rest |
//! | gripper toggle | blink strength rises from below to `≥ blink_threshold` | per sample (edge) |
//! | base / shoulder nudge | latest attention / meditation `≥` threshold | once per tick, at most once per `move_period` (level, throttled) |
//!
//! Gated commands are dropped, not deferred: nothing is replayed when contact
//! improves.

use std::time::{Duration, Instant};

use log::debug;

use crate::config::MappingConfig;
use crate::protocol::SIGNAL_QUALITY_MAX;
use crate::types::{ActuatorCommand, MetricSample};

/// Session state owned by the mapper. Copies of it are handed out for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub gripper_open: bool,
    pub last_periodic_move_at: Instant,
    /// Starts at 200 (no contact) until the headset proves otherwise.
    pub last_signal_quality: u8,
    pub attention: Option<u8>,
    pub meditation: Option<u8>,
    pub blink_strength: Option<u8>,
}

impl ControlState {
    fn new(now: Instant) -> Self {
        Self {
            gripper_open: true,
            last_periodic_move_at: now,
            last_signal_quality: SIGNAL_QUALITY_MAX,
            attention: None,
            meditation: None,
            blink_strength: None,
        }
    }
}

/// Turns metric samples into actuator commands.
pub struct ControlMapper {
    config: MappingConfig,
    move_period: Duration,
    state: ControlState,
}

impl ControlMapper {
    /// Start a session at `now`. The first periodic move can happen no earlier
    /// than `now + move_period`.
    pub fn new(config: MappingConfig, now: Instant) -> Self {
        let move_period = config.move_period();
        Self { config, move_period, state: ControlState::new(now) }
    }

    /// Forget everything and start a new session at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.state = ControlState::new(now);
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// `true` while poor contact withholds all metric-driven motion.
    pub fn is_gated(&self) -> bool {
        self.state.last_signal_quality > self.config.quality_gate
    }

    /// Apply one sample: update the remembered values, then run the gate and
    /// the blink edge detector. Returns the gripper step, if any.
    pub fn apply(&mut self, sample: &MetricSample) -> Vec<ActuatorCommand> {
        let st = &mut self.state;
        if let Some(q) = sample.signal_quality {
            st.last_signal_quality = q;
        }
        if let Some(a) = sample.attention {
            st.attention = Some(a);
        }
        if let Some(m) = sample.meditation {
            st.meditation = Some(m);
        }

        // The previous blink level is needed for edge detection even when
        // the sample itself is gated.
        let threshold = self.config.blink_threshold;
        let was_high = st.blink_strength.is_some_and(|b| b >= threshold);
        if let Some(b) = sample.blink_strength {
            st.blink_strength = Some(b);
        }

        if self.is_gated() {
            if !sample.is_empty() {
                debug!(
                    "gated (signal {} > {}): {sample:?}",
                    self.state.last_signal_quality, self.config.quality_gate
                );
            }
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(b) = sample.blink_strength {
            if b >= threshold && !was_high {
                out.push(self.toggle_gripper());
            }
        }
        out
    }

    /// Evaluate the throttled attention / meditation moves at `now`.
    ///
    /// Call once per consumer tick, after all pending samples were applied.
    pub fn tick(&mut self, now: Instant) -> Vec<ActuatorCommand> {
        let mut out = Vec::new();
        if self.is_gated() {
            return out;
        }
        if now.saturating_duration_since(self.state.last_periodic_move_at) < self.move_period {
            return out;
        }

        let cfg = &self.config;
        if self.state.attention.is_some_and(|a| a >= cfg.attention_threshold) {
            out.push(ActuatorCommand::Step { joint: cfg.base_joint, delta: cfg.base_step });
        }
        if self.state.meditation.is_some_and(|m| m >= cfg.meditation_threshold) {
            out.push(ActuatorCommand::Step {
                joint: cfg.shoulder_joint,
                delta: cfg.shoulder_step,
            });
        }
        // Advance even when nothing fired so the window does not drift and a
        // long quiet stretch cannot build up a burst.
        self.state.last_periodic_move_at = now;
        out
    }

    /// Apply a batch of samples, then tick once.
    pub fn process<'a, I>(&mut self, samples: I, now: Instant) -> Vec<ActuatorCommand>
    where
        I: IntoIterator<Item = &'a MetricSample>,
    {
        let mut out: Vec<ActuatorCommand> =
            samples.into_iter().flat_map(|s| self.apply(s)).collect();
        out.extend(self.tick(now));
        out
    }

    /// Record that a `HOME` was sent: the home pose has the gripper open.
    pub fn note_home(&mut self) {
        self.state.gripper_open = true;
    }

    fn toggle_gripper(&mut self) -> ActuatorCommand {
        let delta = if self.state.gripper_open {
            self.config.grip_step
        } else {
            -self.config.grip_step
        };
        self.state.gripper_open = !self.state.gripper_open;
        debug!(
            "blink: gripper {}",
            if self.state.gripper_open { "opening" } else { "closing" }
        );
        ActuatorCommand::Step { joint: self.config.gripper_joint, delta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;

    const MS: Duration = Duration::from_millis(1);

    fn sample(metric: Metric, v: u32) -> MetricSample {
        MetricSample::single(metric, v)
    }

    fn good_contact(t0: Instant) -> ControlMapper {
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        assert!(m.apply(&sample(Metric::SignalQuality, 0)).is_empty());
        m
    }

    #[test]
    fn starts_gated_until_contact_is_reported() {
        let t0 = Instant::now();
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        assert!(m.is_gated());
        assert!(m.apply(&sample(Metric::Blink, 90)).is_empty());
        assert!(m.state().gripper_open);
    }

    #[test]
    fn poor_signal_suppresses_everything() {
        let t0 = Instant::now();
        for q in [51, 80, 120, 200] {
            let mut m = ControlMapper::new(MappingConfig::default(), t0);
            let mut out = m.apply(&sample(Metric::SignalQuality, q));
            out.extend(m.apply(&sample(Metric::Attention, 100)));
            out.extend(m.apply(&sample(Metric::Meditation, 100)));
            out.extend(m.apply(&sample(Metric::Blink, 100)));
            for k in 1..=20 {
                out.extend(m.tick(t0 + 100 * k * MS));
            }
            assert!(out.is_empty(), "q = {q} produced {out:?}");
            assert!(m.state().gripper_open);
        }
    }

    #[test]
    fn gate_threshold_is_inclusive_of_fifty() {
        let t0 = Instant::now();
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        m.apply(&sample(Metric::SignalQuality, 50));
        assert!(!m.is_gated());
        assert_eq!(m.apply(&sample(Metric::Blink, 60)).len(), 1);
    }

    #[test]
    fn signal_quality_updates_even_while_gated() {
        let t0 = Instant::now();
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        m.apply(&sample(Metric::SignalQuality, 150));
        assert_eq!(m.state().last_signal_quality, 150);
        m.apply(&sample(Metric::SignalQuality, 10));
        assert_eq!(m.state().last_signal_quality, 10);
        assert!(!m.is_gated());
    }

    #[test]
    fn blink_toggles_once_per_rising_edge() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        let mut grips = 0;
        let crossings = 5;
        for _ in 0..crossings {
            grips += m.apply(&sample(Metric::Blink, 20)).len();
            // Sustained above threshold: only the first sample counts.
            for v in [75, 90, 61, 100] {
                grips += m.apply(&sample(Metric::Blink, v)).len();
            }
        }
        assert_eq!(grips, crossings);
        // Odd number of toggles from open leaves the gripper closed.
        assert!(!m.state().gripper_open);
    }

    #[test]
    fn gripper_alternates_close_then_open() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        let close = m.apply(&sample(Metric::Blink, 75));
        m.apply(&sample(Metric::Blink, 10));
        let open = m.apply(&sample(Metric::Blink, 75));
        assert_eq!(close, [ActuatorCommand::Step { joint: 5, delta: 10 }]);
        assert_eq!(open, [ActuatorCommand::Step { joint: 5, delta: -10 }]);
        assert!(m.state().gripper_open);
    }

    #[test]
    fn blink_edge_survives_periodic_ticks() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        assert_eq!(m.apply(&sample(Metric::Blink, 80)).len(), 1);
        for k in 1..=4 {
            m.tick(t0 + 300 * k * MS);
        }
        assert!(m.apply(&sample(Metric::Blink, 80)).is_empty());
    }

    #[test]
    fn blink_that_rose_under_the_gate_does_not_fire_later() {
        let t0 = Instant::now();
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        m.apply(&sample(Metric::SignalQuality, 100));
        m.apply(&sample(Metric::Blink, 80));
        m.apply(&sample(Metric::SignalQuality, 0));
        assert!(m.apply(&sample(Metric::Blink, 80)).is_empty());
        m.apply(&sample(Metric::Blink, 5));
        assert_eq!(m.apply(&sample(Metric::Blink, 80)).len(), 1);
    }

    #[test]
    fn periodic_moves_are_throttled_per_window() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        m.apply(&sample(Metric::Attention, 90));
        m.apply(&sample(Metric::Meditation, 90));

        let mut fired = Vec::new();
        // Tick every 10 ms for one second with qualifying samples in between.
        for k in 0..=100u32 {
            let now = t0 + 10 * k * MS;
            m.apply(&sample(Metric::Attention, 95));
            for cmd in m.tick(now) {
                fired.push((now, cmd));
            }
        }
        let base: Vec<_> = fired
            .iter()
            .filter(|(_, c)| matches!(c, ActuatorCommand::Step { joint: 0, .. }))
            .collect();
        let shoulder: Vec<_> = fired
            .iter()
            .filter(|(_, c)| matches!(c, ActuatorCommand::Step { joint: 1, .. }))
            .collect();
        assert_eq!(base.len(), 4);
        assert_eq!(shoulder.len(), 4);
        for pair in base.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(250));
        }
    }

    #[test]
    fn periodic_uses_most_recent_known_values() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        m.apply(&sample(Metric::Attention, 80));
        // Later samples carry other metrics only; attention 80 still counts.
        m.apply(&sample(Metric::Blink, 10));
        assert_eq!(
            m.tick(t0 + 260 * MS),
            [ActuatorCommand::Step { joint: 0, delta: 5 }]
        );
        m.apply(&sample(Metric::Attention, 30));
        assert!(m.tick(t0 + 520 * MS).is_empty());
    }

    #[test]
    fn idle_ticks_still_advance_the_window() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        assert!(m.tick(t0 + 300 * MS).is_empty());
        assert_eq!(m.state().last_periodic_move_at, t0 + 300 * MS);
        m.apply(&sample(Metric::Meditation, 70));
        assert!(m.tick(t0 + 400 * MS).is_empty());
        assert_eq!(
            m.tick(t0 + 550 * MS),
            [ActuatorCommand::Step { joint: 1, delta: 3 }]
        );
    }

    #[test]
    fn process_ticks_once_per_batch() {
        let t0 = Instant::now();
        let mut m = ControlMapper::new(MappingConfig::default(), t0);
        let batch = [
            sample(Metric::SignalQuality, 0),
            sample(Metric::Attention, 90),
            sample(Metric::Attention, 91),
            sample(Metric::Attention, 92),
        ];
        let out = m.process(&batch, t0 + 300 * MS);
        assert_eq!(out, [ActuatorCommand::Step { joint: 0, delta: 5 }]);
    }

    #[test]
    fn home_reopens_the_gripper() {
        let t0 = Instant::now();
        let mut m = good_contact(t0);
        m.apply(&sample(Metric::Blink, 99));
        assert!(!m.state().gripper_open);
        m.note_home();
        assert_eq!(
            m.apply(&sample(Metric::Blink, 10)).len() + m.apply(&sample(Metric::Blink, 99)).len(),
            1
        );
        assert!(!m.state().gripper_open);
    }
}
