//! The sensor reader thread.
//!
//! [`spawn_ingest`] moves the sensor port onto a dedicated OS thread that
//! reads with a bounded timeout, reassembles lines, decodes them and pushes
//! one [`BridgeEvent::Metric`] per decoded line onto an unbounded
//! `tokio::sync::mpsc` channel. The consumer drains that channel with
//! `try_recv`, so sensor latency never reaches the control loop.
//!
//! Event sequence produced by one ingestion run:
//!
//! ```text
//! OpenFailed                                  (port could not be opened)
//! Connected, Metric*, ReadFailed              (read error)
//! Connected, Metric*, Disconnected            (stop requested)
//! ```

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::BridgeError;
use crate::parse::{LineAssembler, LineDecoder};
use crate::protocol::READ_CHUNK_SIZE;
use crate::types::BridgeEvent;

/// Anything telemetry bytes can be read from.
pub type SensorPort = Box<dyn Read + Send>;

/// Pause after a zero-length read. Serial ports report an idle line as a
/// `TimedOut` error, but pipes and files return `Ok(0)` immediately.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Counters shared between the reader thread and whoever displays them.
#[derive(Debug, Default)]
pub struct IngestStats {
    chunks: AtomicU64,
    bytes: AtomicU64,
    lines_parsed: AtomicU64,
    lines_skipped: AtomicU64,
}

impl IngestStats {
    /// Non-empty reads.
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Lines the decoder turned into a sample.
    pub fn lines_parsed(&self) -> u64 {
        self.lines_parsed.load(Ordering::Relaxed)
    }

    /// Lines the decoder rejected.
    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped.load(Ordering::Relaxed)
    }
}

/// Control handle for a running reader thread.
///
/// Dropping the handle raises the stop flag but does not wait.
pub struct IngestHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<IngestStats>,
}

impl IngestHandle {
    /// Ask the thread to exit. It notices within one read timeout.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Wait up to `timeout` for the thread to exit. Returns `true` once it
    /// has been joined; `false` leaves it running detached.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("sensor: reader thread panicked");
            }
        }
        true
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start reading the sensor on a new thread.
///
/// `opener` runs on the new thread, so a slow or failing open never blocks
/// the caller; a failure is reported as [`BridgeEvent::OpenFailed`] and the
/// thread exits without retrying. `port_name` is only used for the
/// [`BridgeEvent::Connected`] event and log lines.
pub fn spawn_ingest<F, D>(
    port_name: impl Into<String>,
    opener: F,
    decoder: D,
    tx: UnboundedSender<BridgeEvent>,
) -> Result<IngestHandle, BridgeError>
where
    F: FnOnce() -> Result<SensorPort, BridgeError> + Send + 'static,
    D: LineDecoder + 'static,
{
    let port_name = port_name.into();
    let stop = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(IngestStats::default());

    let reader = Reader {
        port_name,
        decoder,
        tx,
        stop: Arc::clone(&stop),
        stats: Arc::clone(&stats),
    };
    let thread = std::thread::Builder::new()
        .name("thinkgear-ingest".into())
        .spawn(move || reader.run(opener))?;

    Ok(IngestHandle { stop, thread: Some(thread), stats })
}

struct Reader<D> {
    port_name: String,
    decoder: D,
    tx: UnboundedSender<BridgeEvent>,
    stop: Arc<AtomicBool>,
    stats: Arc<IngestStats>,
}

impl<D: LineDecoder> Reader<D> {
    fn run<F>(mut self, opener: F)
    where
        F: FnOnce() -> Result<SensorPort, BridgeError>,
    {
        let mut port = match opener() {
            Ok(p) => p,
            Err(e) => {
                warn!("sensor: {e}");
                let _ = self.tx.send(BridgeEvent::OpenFailed(e.to_string()));
                return;
            }
        };
        info!("sensor: connected on {}", self.port_name);
        if self.tx.send(BridgeEvent::Connected(self.port_name.clone())).is_err() {
            return;
        }

        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        while !self.stop.load(Ordering::Relaxed) {
            let n = match port.read(&mut buf) {
                Ok(0) => {
                    std::thread::sleep(IDLE_BACKOFF);
                    continue;
                }
                Ok(n) => n,
                Err(e) if is_idle(&e) => continue,
                Err(e) => {
                    let err = BridgeError::ReadFailed(e);
                    warn!("sensor: {err}");
                    drop(port);
                    let _ = self.tx.send(BridgeEvent::ReadFailed(err.to_string()));
                    return;
                }
            };
            self.stats.chunks.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes.fetch_add(n as u64, Ordering::Relaxed);
            if self.stop.load(Ordering::Relaxed) {
                debug!("sensor: stop requested, dropping {n} byte(s) just read");
                break;
            }

            for line in assembler.push(&buf[..n]) {
                if !self.forward(&line) {
                    debug!("sensor: consumer went away, stopping");
                    return;
                }
            }
        }

        if let Some(rest) = assembler.flush() {
            debug!("sensor: discarding partial line {rest:?}");
        }
        drop(port);
        info!("sensor: disconnected from {}", self.port_name);
        let _ = self.tx.send(BridgeEvent::Disconnected);
    }

    /// Decode one line and send it on. Returns `false` once the receiver is gone.
    fn forward(&mut self, line: &str) -> bool {
        match self.decoder.decode(line) {
            Some(sample) => {
                self.stats.lines_parsed.fetch_add(1, Ordering::Relaxed);
                debug!("sensor: {line:?} -> {sample:?}");
                self.tx.send(BridgeEvent::Metric(sample)).is_ok()
            }
            None => {
                self.stats.lines_skipped.fetch_add(1, Ordering::Relaxed);
                debug!("sensor: skipped {line:?}");
                true
            }
        }
    }
}

/// Read errors that only mean "no data this time".
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parse::KeywordDecoder;
    use crate::types::MetricSample;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Scripted sensor: returns each queued step in order, then idles with
    /// `TimedOut` after a short sleep.
    pub(crate) struct Script {
        pub(crate) steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Script {
        pub(crate) fn chunks<I, B>(chunks: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: AsRef<[u8]>,
        {
            Self { steps: chunks.into_iter().map(|c| Ok(c.as_ref().to_vec())).collect() }
        }

        pub(crate) fn then_fail(mut self, kind: io::ErrorKind) -> Self {
            self.steps.push_back(Err(io::Error::from(kind)));
            self
        }

        pub(crate) fn port(self) -> Result<SensorPort, BridgeError> {
            Ok(Box::new(self))
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(chunk)) => {
                    assert!(chunk.len() <= buf.len());
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                }
            }
        }
    }

    fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.blocking_recv() {
            let terminal = matches!(
                ev,
                BridgeEvent::OpenFailed(_) | BridgeEvent::ReadFailed(_) | BridgeEvent::Disconnected
            );
            out.push(ev);
            if terminal {
                break;
            }
        }
        out
    }

    fn metrics(events: &[BridgeEvent]) -> Vec<MetricSample> {
        events
            .iter()
            .filter_map(|e| match e {
                BridgeEvent::Metric(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_failure_is_a_single_terminal_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = spawn_ingest(
            "/dev/missing",
            || {
                Err(BridgeError::OpenFailed {
                    channel: crate::error::Channel::Sensor,
                    port: "/dev/missing".into(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                })
            },
            KeywordDecoder,
            tx,
        )
        .unwrap();
        assert!(h.join_timeout(Duration::from_secs(2)));
        let events = collect_until_terminal(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BridgeEvent::OpenFailed(m) if m.contains("/dev/missing")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fragmented_lines_arrive_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let script = Script::chunks([
            "poorSig",
            "nalLevel: 0\r\nblinkStr",
            "ength: 75\r\nnoise\r\natt",
            "",
            "ention: 80\r\n",
        ])
        .then_fail(io::ErrorKind::BrokenPipe);
        let mut h = spawn_ingest("sim", move || script.port(), KeywordDecoder, tx).unwrap();

        let events = collect_until_terminal(&mut rx);
        assert_eq!(events.first(), Some(&BridgeEvent::Connected("sim".into())));
        assert!(matches!(events.last(), Some(BridgeEvent::ReadFailed(_))));
        assert_eq!(
            metrics(&events),
            [
                MetricSample { signal_quality: Some(0), ..Default::default() },
                MetricSample { blink_strength: Some(75), ..Default::default() },
                MetricSample { attention: Some(80), ..Default::default() },
            ]
        );

        assert!(h.join_timeout(Duration::from_secs(2)));
        let stats = h.stats();
        assert_eq!(stats.lines_parsed(), 3);
        assert_eq!(stats.lines_skipped(), 1);
        assert_eq!(stats.chunks(), 4);
    }

    #[test]
    fn stop_closes_port_and_reports_disconnect_last() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let script = Script::chunks(["attention: 10\n"]);
        let mut h = spawn_ingest("sim", move || script.port(), KeywordDecoder, tx).unwrap();

        // Wait for the one metric, then stop while the port idles.
        assert!(matches!(rx.blocking_recv(), Some(BridgeEvent::Connected(_))));
        assert!(matches!(rx.blocking_recv(), Some(BridgeEvent::Metric(_))));
        let asked = Instant::now();
        h.stop();
        assert!(h.join_timeout(Duration::from_secs(2)));
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert_eq!(rx.blocking_recv(), Some(BridgeEvent::Disconnected));
        assert_eq!(rx.blocking_recv(), None);
    }

    /// Sensor that blocks in `read` until the test hands it a chunk.
    struct Held(std::sync::mpsc::Receiver<Vec<u8>>);

    impl Read for Held {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let chunk = self.0.recv().map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn stop_during_read_drops_the_chunk() {
        let (feed, held) = std::sync::mpsc::channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port: SensorPort = Box::new(Held(held));
        let mut h = spawn_ingest("sim", move || Ok(port), KeywordDecoder, tx).unwrap();
        assert!(matches!(rx.blocking_recv(), Some(BridgeEvent::Connected(_))));

        // The reader is parked in `read`; stop lands before its bytes do.
        h.stop();
        let _ = feed.send(b"attention: 10\n".to_vec());
        assert!(h.join_timeout(Duration::from_secs(2)));
        assert_eq!(rx.blocking_recv(), Some(BridgeEvent::Disconnected));
        assert_eq!(rx.blocking_recv(), None);
        assert_eq!(h.stats().lines_parsed(), 0);
    }

    #[test]
    fn reader_exits_when_consumer_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let script = Script::chunks(["attention: 10\n"]);
        let mut h = spawn_ingest("sim", move || script.port(), KeywordDecoder, tx).unwrap();
        assert!(h.join_timeout(Duration::from_secs(2)));
    }
}
