//! Hardware-free stand-ins for both serial ports, used by `--simulate`.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::info;

use crate::parse::LineAssembler;

// ── Headset ───────────────────────────────────────────────────────────────────

/// Synthetic eSense values at time `t` (seconds).
///
/// | Line | Shape | Range |
/// |------|-------|-------|
/// | `attention` | 50 ± 40, 20 s period | 10–90 |
/// | `meditation` | 45 ± 35, 27 s period, out of phase with attention | 10–80 |
/// | `poorSignalLevel` | 0, except 3 s of lost contact every 30 s | 0 / 120 |
/// | `blinkStrength` | strong blink every ~3.5 s, weak ones in between | 20–95 |
///
/// Noise is a deterministic hash of `t`, so a run is reproducible.
pub fn sim_esense(t: f64) -> (u32, u32, u32) {
    let noise = |salt: f64| ((t * 1000.7 + salt).sin() * 9973.1).fract() - 0.5;
    let attention = 50.0 + 40.0 * (2.0 * PI * t / 20.0).sin() + 6.0 * noise(0.0);
    let meditation = 45.0 + 35.0 * (2.0 * PI * t / 27.0 + PI).sin() + 6.0 * noise(137.5);
    let poor = if t % 30.0 >= 25.0 && t % 30.0 < 28.0 { 120 } else { 0 };
    (
        attention.clamp(0.0, 100.0) as u32,
        meditation.clamp(0.0, 100.0) as u32,
        poor,
    )
}

/// Blink strength for frame `seq`, or `None` when there is no blink.
fn sim_blink(seq: u64) -> Option<u32> {
    match seq % 7 {
        0 => Some(80 + (seq * 37 % 16) as u32),
        3 => Some(20 + (seq * 53 % 25) as u32),
        _ => None,
    }
}

/// A `Read` source that speaks the ThinkGear text protocol.
///
/// One frame of lines is produced every `interval` of wall time. Frames are
/// handed out in ragged chunks of 1–24 bytes so lines regularly straddle
/// reads, the way they do on a Bluetooth serial link. When nothing is due,
/// `read` sleeps up to `read_timeout` and then fails with `TimedOut`, like a
/// real serial port with a timeout.
pub struct SimulatedHeadset {
    start: Instant,
    interval: Duration,
    read_timeout: Duration,
    seq: u64,
    pending: VecDeque<u8>,
}

impl SimulatedHeadset {
    pub fn new(interval: Duration, read_timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            interval,
            read_timeout,
            seq: 0,
            pending: VecDeque::new(),
        }
    }

    fn next_due(&self) -> Duration {
        self.interval * self.seq as u32
    }

    fn emit_frame(&mut self) {
        let t = self.next_due().as_secs_f64();
        let (attention, meditation, poor) = sim_esense(t);
        let mut frame = format!(
            "poorSignalLevel: {poor}\r\nattention: {attention}\r\nmeditation: {meditation}\r\n"
        );
        if let Some(b) = sim_blink(self.seq) {
            frame.push_str(&format!("blinkStrength: {b}\r\n"));
        }
        if self.seq.is_multiple_of(11) {
            frame.push_str("rawEeg: -47\r\n");
        }
        self.pending.extend(frame.into_bytes());
        self.seq += 1;
    }
}

impl Default for SimulatedHeadset {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), crate::protocol::READ_TIMEOUT)
    }
}

impl Read for SimulatedHeadset {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let due = self.next_due();
            let elapsed = self.start.elapsed();
            if elapsed < due {
                std::thread::sleep((due - elapsed).min(self.read_timeout));
                if self.start.elapsed() < due {
                    return Err(io::ErrorKind::TimedOut.into());
                }
            }
            self.emit_frame();
        }

        let mix = self.seq.wrapping_mul(2_654_435_761).wrapping_add(self.pending.len() as u64);
        let ragged = (mix % 24) as usize + 1;
        let n = ragged.min(buf.len()).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

// ── Arm ───────────────────────────────────────────────────────────────────────

/// A `Write` sink standing in for the arm controller: logs every complete
/// command frame at `info` level.
#[derive(Debug, Default)]
pub struct LogSink {
    assembler: LineAssembler,
    frames: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for frame in self.assembler.push(buf) {
            self.frames += 1;
            info!("sim arm #{}: {frame}", self.frames);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_line;

    #[test]
    fn esense_values_stay_in_range() {
        for i in 0..600 {
            let (a, m, p) = sim_esense(i as f64 * 0.1);
            assert!(a <= 100 && m <= 100);
            assert!(p == 0 || p == 120);
        }
        assert_eq!(sim_esense(26.0).2, 120);
        assert_eq!(sim_esense(10.0).2, 0);
    }

    #[test]
    fn headset_output_reassembles_into_known_lines() {
        let mut headset = SimulatedHeadset::new(Duration::ZERO, Duration::from_millis(10));
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        let mut buf = [0u8; 512];
        while lines.len() < 40 {
            let n = headset.read(&mut buf).unwrap();
            assert!((1..=24).contains(&n));
            lines.extend(assembler.push(&buf[..n]));
        }
        assert!(lines[0].starts_with("poorSignalLevel: "));
        assert!(lines.iter().any(|l| l.starts_with("blinkStrength: ")));
        let decoded = lines.iter().filter(|l| parse_line(l).is_some()).count();
        // Only the raw EEG lines are ignored.
        assert!(decoded >= lines.len() - lines.len() / 10 - 1);
    }

    #[test]
    fn headset_times_out_between_frames() {
        let mut headset = SimulatedHeadset::new(Duration::from_secs(60), Duration::from_millis(5));
        let mut buf = [0u8; 64];
        // Frame 0 is due immediately.
        while !headset.pending.is_empty() || headset.seq == 0 {
            headset.read(&mut buf).unwrap();
        }
        let err = headset.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn log_sink_accepts_split_frames() {
        let mut sink = LogSink::new();
        sink.write_all(b"S 0 ").unwrap();
        sink.write_all(b"5\nHOME\n").unwrap();
        assert_eq!(sink.frames, 2);
    }
}
