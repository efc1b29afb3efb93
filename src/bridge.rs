//! The consumer side of the pipeline.
//!
//! A [`Bridge`] owns the control mapper, the receiving end of the ingestion
//! channel and a shared [`Dispatcher`]. A presentation layer (the CLI or the
//! TUI) drives it from a single timer:
//!
//! ```text
//! every poll_interval:
//!     bridge.poll(now)          drain events → mapper → dispatcher
//!     bridge.drain_notices()    append to the on-screen log
//!     bridge.snapshot()         redraw
//! ```
//!
//! `poll` never blocks: the channel is drained with `try_recv` and every
//! actuator write is a short, timeout-bounded serial write.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

use crate::config::BridgeConfig;
use crate::dispatcher::{ActuatorPort, Dispatcher};
use crate::error::BridgeError;
use crate::ingest::{spawn_ingest, IngestHandle, IngestStats, SensorPort};
use crate::mapper::ControlMapper;
use crate::parse::{KeywordDecoder, LineDecoder};
use crate::types::{ActuatorCommand, BridgeEvent, Notice, SensorStatus, Snapshot};

/// Oldest notices are dropped beyond this many undrained entries.
const MAX_NOTICES: usize = 256;

pub struct Bridge {
    config: BridgeConfig,
    mapper: ControlMapper,
    dispatcher: Arc<Dispatcher>,
    events: Option<UnboundedReceiver<BridgeEvent>>,
    ingest: Option<IngestHandle>,
    stats: Arc<IngestStats>,
    sensor: SensorStatus,
    notices: VecDeque<Notice>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let mapper = ControlMapper::new(config.mapping.clone(), Instant::now());
        Self {
            config,
            mapper,
            dispatcher: Arc::new(Dispatcher::new()),
            events: None,
            ingest: None,
            stats: Arc::new(IngestStats::default()),
            sensor: SensorStatus::Idle,
            notices: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared handle to the actuator connection.
    ///
    /// [`Dispatcher::open`] blocks for the settle delay; async callers run it
    /// on `tokio::task::spawn_blocking` with a clone of this handle and call
    /// [`Bridge::begin_session`] once it returns.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Whether an ingestion thread is attached and still running.
    pub fn is_ingesting(&self) -> bool {
        self.ingest.as_ref().is_some_and(|h| !h.is_finished())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Blocking start for synchronous callers: open the actuator (including
    /// the settle delay), then [`Bridge::begin_session`].
    ///
    /// When the actuator cannot be opened the sensor is left alone and the
    /// error is both returned and posted as a notice.
    pub fn start<S, A>(&mut self, sensor: S, actuator: A) -> Result<(), BridgeError>
    where
        S: FnOnce() -> Result<SensorPort, BridgeError> + Send + 'static,
        A: FnOnce() -> Result<ActuatorPort, BridgeError>,
    {
        self.notice(Notice::status(format!(
            "Opening arm on {}",
            self.config.actuator.port
        )));
        if let Err(e) = self.dispatcher.open(actuator, self.config.settle_delay()) {
            self.notice(Notice::error(format!("Arm open failed: {e}")));
            return Err(e);
        }
        self.begin_session(sensor)
    }

    /// Start a session on an actuator that is already open: reset the mapper,
    /// home the arm and start reading the sensor.
    pub fn begin_session<S>(&mut self, sensor: S) -> Result<(), BridgeError>
    where
        S: FnOnce() -> Result<SensorPort, BridgeError> + Send + 'static,
    {
        if !self.dispatcher.is_open() {
            return Err(BridgeError::NotConnected);
        }
        self.notice(Notice::status(format!(
            "Arm ready on {}",
            self.config.actuator.port
        )));
        self.mapper.reset(Instant::now());
        // A failed HOME is already reported as a notice; keep going.
        let _ = self.request_home();
        self.start_ingest(sensor, KeywordDecoder)
    }

    /// (Re)start sensor ingestion with `decoder`. Any running ingestion is
    /// stopped first. Mapper state is kept, so a restart after a read error
    /// carries on from the last known values.
    pub fn start_ingest<S, D>(&mut self, sensor: S, decoder: D) -> Result<(), BridgeError>
    where
        S: FnOnce() -> Result<SensorPort, BridgeError> + Send + 'static,
        D: LineDecoder + 'static,
    {
        self.stop_ingest();

        let (tx, rx) = mpsc::unbounded_channel();
        let port = self.config.sensor.port.clone();
        let handle = spawn_ingest(port.clone(), sensor, decoder, tx)?;
        self.stats = handle.stats();
        self.ingest = Some(handle);
        self.events = Some(rx);
        self.sensor = SensorStatus::Connecting;
        info!("bridge: ingesting from {port}");
        Ok(())
    }

    /// Stop ingestion (bounded wait), then close the actuator.
    pub fn stop(&mut self) {
        self.stop_ingest();
        self.dispatcher.close();
        self.notice(Notice::status("Stopped"));
    }

    fn stop_ingest(&mut self) {
        let Some(mut handle) = self.ingest.take() else {
            return;
        };
        handle.stop();
        let timeout = self.config.stop_timeout();
        if !handle.join_timeout(timeout) {
            warn!("bridge: reader did not exit within {timeout:?}, detaching it");
            self.notice(Notice::error(format!(
                "MindWave reader did not stop within {} ms",
                timeout.as_millis()
            )));
        }
        // Queued samples still reach the mapper only if their commands can be
        // written, so mapper state never runs ahead of the arm.
        if self.dispatcher.is_open() {
            for cmd in self.drain_events() {
                self.dispatch(&cmd);
            }
        } else {
            for ev in self.take_events() {
                self.on_status(ev);
            }
        }
        self.events = None;
    }

    // ── Tick ──────────────────────────────────────────────────────────────────

    /// One consumer tick: apply every queued event in arrival order, evaluate
    /// the periodic moves once, and dispatch the result.
    ///
    /// Returns the commands the mapper produced this tick. They are written
    /// only while the actuator is open; otherwise they are dropped.
    pub fn poll(&mut self, now: Instant) -> Vec<ActuatorCommand> {
        let mut cmds = self.drain_events();
        cmds.extend(self.mapper.tick(now));

        if self.ingest.as_ref().is_some_and(IngestHandle::is_finished) {
            if let Some(mut handle) = self.ingest.take() {
                handle.join_timeout(self.config.stop_timeout());
            }
        }

        if !cmds.is_empty() {
            if self.dispatcher.is_open() {
                for cmd in &cmds {
                    self.dispatch(cmd);
                }
            } else {
                debug!("bridge: arm not ready, dropping {} command(s)", cmds.len());
            }
        }
        cmds
    }

    fn drain_events(&mut self) -> Vec<ActuatorCommand> {
        let mut cmds = Vec::new();
        for ev in self.take_events() {
            match ev {
                BridgeEvent::Metric(sample) => cmds.extend(self.mapper.apply(&sample)),
                other => self.on_status(other),
            }
        }
        cmds
    }

    /// Everything queued on the ingest channel, in arrival order.
    fn take_events(&mut self) -> Vec<BridgeEvent> {
        let Some(rx) = self.events.as_mut() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        let closed = loop {
            match rx.try_recv() {
                Ok(ev) => pending.push(ev),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if closed {
            self.events = None;
        }
        pending
    }

    fn on_status(&mut self, ev: BridgeEvent) {
        let notice = match ev {
            BridgeEvent::Metric(_) => return,
            BridgeEvent::Connected(port) => {
                let n = Notice::status(format!("Connected MindWave on {port}"));
                self.sensor = SensorStatus::Connected(port);
                n
            }
            BridgeEvent::OpenFailed(msg) => {
                let n = Notice::error(format!("MindWave open failed: {msg}"));
                self.sensor = SensorStatus::Failed(msg);
                n
            }
            BridgeEvent::ReadFailed(msg) => {
                let n = Notice::error(format!("MindWave read error: {msg}"));
                self.sensor = SensorStatus::Failed(msg);
                n
            }
            BridgeEvent::Disconnected => {
                self.sensor = SensorStatus::Disconnected;
                Notice::status("MindWave disconnected")
            }
        };
        self.notice(notice);
    }

    fn dispatch(&mut self, cmd: &ActuatorCommand) {
        let notice = match self.dispatcher.send(cmd) {
            Ok(()) => Notice::command(cmd),
            Err(e) => Notice::error(format!("Send '{cmd}' failed: {e}")),
        };
        self.notice(notice);
    }

    /// Emergency stop: send `HOME` immediately, whatever the quality gate or
    /// move throttle say.
    pub fn request_home(&mut self) -> Result<(), BridgeError> {
        let cmd = ActuatorCommand::Home;
        match self.dispatcher.send(&cmd) {
            Ok(()) => {
                self.mapper.note_home();
                self.notice(Notice::command(&cmd));
                Ok(())
            }
            Err(e) => {
                self.notice(Notice::error(format!("HOME failed: {e}")));
                Err(e)
            }
        }
    }

    // ── Presentation ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        let state = self.mapper.state();
        Snapshot {
            attention: state.attention,
            meditation: state.meditation,
            blink_strength: state.blink_strength,
            signal_quality: state.last_signal_quality,
            gripper_open: state.gripper_open,
            gated: self.mapper.is_gated(),
            sensor: self.sensor.clone(),
            actuator: self.dispatcher.state(),
            commands_sent: self.dispatcher.sent_count(),
            lines_parsed: self.stats.lines_parsed(),
            lines_skipped: self.stats.lines_skipped(),
        }
    }

    /// Take every notice posted since the last call, oldest first.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Post a notice from outside the bridge, e.g. an actuator open that
    /// failed on a blocking task.
    pub fn notice(&mut self, notice: Notice) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(handle) = &self.ingest {
            handle.stop();
        }
        self.dispatcher.close();
    }
}
