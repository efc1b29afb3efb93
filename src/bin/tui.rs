//! Terminal control panel for the headset → arm bridge.
//!
//! Usage:
//!   cargo run --bin tui                          # default ports
//!   cargo run --bin tui -- --simulate            # simulated headset + logging arm
//!   cargo run --bin tui -- --config arm.json
//!
//! Keys
//! ----
//!   Enter / g  start: open the arm, home it, start reading the headset
//!   x          stop: close both ports
//!   h / Space  HOME (emergency stop), bypasses the signal gate
//!   r          restart headset ingestion only (after a read error)
//!   c          clear the command log
//!   q / Esc    quit

use std::collections::VecDeque;
use std::io;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::oneshot;

use thinkgear_arm::cli::Args;
use thinkgear_arm::prelude::*;
use thinkgear_arm::protocol::{METRIC_MAX, SIGNAL_QUALITY_MAX};
use thinkgear_arm::serial::{actuator_opener, sensor_opener};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of the attention / meditation history chart in seconds.
const HISTORY_SECS: f64 = 60.0;

/// Lines kept in the on-screen command log.
const LOG_CAPACITY: usize = 500;

/// Braille spinner frames, advanced every 100 ms while the arm is settling.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const ATTENTION_COLOR: Color = Color::Cyan;
const MEDITATION_COLOR: Color = Color::Magenta;

// ── App state ─────────────────────────────────────────────────────────────────

/// Everything the renderer needs besides the bridge snapshot.
struct App {
    started: Instant,
    simulate: bool,
    log: VecDeque<Notice>,
    attention: VecDeque<(f64, f64)>,
    meditation: VecDeque<(f64, f64)>,
    /// `true` between pressing start and the arm finishing its settle delay.
    opening: bool,
}

impl App {
    fn new(simulate: bool) -> Self {
        Self {
            started: Instant::now(),
            simulate,
            log: VecDeque::with_capacity(LOG_CAPACITY),
            attention: VecDeque::new(),
            meditation: VecDeque::new(),
            opening: false,
        }
    }

    fn now_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn push_notices(&mut self, notices: Vec<Notice>) {
        for n in notices {
            if self.log.len() == LOG_CAPACITY {
                self.log.pop_front();
            }
            self.log.push_back(n);
        }
    }

    /// Append the latest values to the history, dropping points that scrolled
    /// out of the chart window.
    fn record(&mut self, snap: &Snapshot) {
        let t = self.now_secs();
        for (buf, value) in [
            (&mut self.attention, snap.attention),
            (&mut self.meditation, snap.meditation),
        ] {
            if let Some(v) = value {
                buf.push_back((t, f64::from(v)));
            }
            while buf.front().is_some_and(|&(ts, _)| ts < t - HISTORY_SECS) {
                buf.pop_front();
            }
        }
    }
}

// ── Session helpers ───────────────────────────────────────────────────────────

/// Open the arm on a blocking task and return immediately. The receiver
/// resolves once the port is open and settled, or failed.
fn start_open(bridge: &mut Bridge, simulate: bool) -> oneshot::Receiver<Result<(), BridgeError>> {
    let (tx, rx) = oneshot::channel();
    let dispatcher = bridge.dispatcher();
    let opener = actuator_opener(&bridge.config().actuator, simulate);
    let settle = bridge.config().settle_delay();
    bridge.notice(Notice::status(format!(
        "Opening arm on {}",
        bridge.config().actuator.port
    )));
    tokio::task::spawn_blocking(move || {
        let _ = tx.send(dispatcher.open(opener, settle));
    });
    rx
}

fn restart_ingest(bridge: &mut Bridge, simulate: bool) {
    let sensor = sensor_opener(&bridge.config().sensor, simulate);
    if let Err(e) = bridge.start_ingest(sensor, KeywordDecoder) {
        bridge.notice(Notice::error(format!("Restart failed: {e}")));
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Header / body / footer; the body is gauges + chart on the left and the
/// command log on the right.
fn draw(frame: &mut Frame, app: &App, snap: &Snapshot, config: &BridgeConfig) {
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(frame.area());

    draw_header(frame, root[0], app, snap);

    let [left, right] =
        Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)])
            .areas(root[1]);
    let [gauges, chart] =
        Layout::vertical([Constraint::Length(12), Constraint::Min(0)]).areas(left);
    draw_gauges(frame, gauges, snap, config);
    draw_history(frame, chart, app, config);
    draw_log(frame, right, app);

    draw_footer(frame, root[2], snap);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Sensor and arm status, gate badge and counters.
fn draw_header(frame: &mut Frame, area: Rect, app: &App, snap: &Snapshot) {
    let (sensor_label, sensor_color) = match &snap.sensor {
        SensorStatus::Idle => ("Headset idle".to_owned(), Color::DarkGray),
        SensorStatus::Connecting => {
            (format!("{} Headset connecting…", spinner_str()), Color::Yellow)
        }
        SensorStatus::Connected(port) => (format!("● Headset {port}"), Color::Green),
        SensorStatus::Disconnected => ("Headset disconnected".to_owned(), Color::DarkGray),
        SensorStatus::Failed(msg) => (format!("✖ Headset: {msg}"), Color::Red),
    };
    let (arm_label, arm_color) = match snap.actuator {
        LinkState::Open => ("● Arm ready".to_owned(), Color::Green),
        LinkState::Opening => (format!("{} Arm settling…", spinner_str()), Color::Yellow),
        LinkState::Closed if app.opening => {
            (format!("{} Arm opening…", spinner_str()), Color::Yellow)
        }
        LinkState::Closed => ("Arm closed".to_owned(), Color::DarkGray),
    };

    let mut spans = vec![
        Span::styled(
            " ThinkGear Arm ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
    ];
    if app.simulate {
        spans.push(Span::styled("◆ Simulated ", Style::default().fg(Color::Cyan)));
    }
    spans.extend([
        sep(),
        Span::styled(sensor_label, Style::default().fg(sensor_color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(arm_label, Style::default().fg(arm_color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(
            format!("{} sent", snap.commands_sent),
            Style::default().fg(Color::White),
        ),
        sep(),
        Span::styled(
            format!("{} lines / {} skipped", snap.lines_parsed, snap.lines_skipped),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    if snap.gated {
        spans.push(sep());
        spans.push(Span::styled(
            "⏸ GATED",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

// ── Gauges ────────────────────────────────────────────────────────────────────

/// One gauge per metric. A bar turns bold once it reaches its threshold.
fn draw_gauges(frame: &mut Frame, area: Rect, snap: &Snapshot, config: &BridgeConfig) {
    let rows = Layout::vertical([Constraint::Length(3); 4]).split(area);
    let m = &config.mapping;

    metric_gauge(
        frame,
        rows[0],
        "Attention → base",
        snap.attention,
        m.attention_threshold,
        ATTENTION_COLOR,
    );
    metric_gauge(
        frame,
        rows[1],
        "Meditation → shoulder",
        snap.meditation,
        m.meditation_threshold,
        MEDITATION_COLOR,
    );
    let grip = if snap.gripper_open { "open" } else { "closed" };
    metric_gauge(
        frame,
        rows[2],
        &format!("Blink → gripper ({grip})"),
        snap.blink_strength,
        m.blink_threshold,
        Color::Yellow,
    );

    let q = snap.signal_quality;
    let color = if snap.gated { Color::Red } else { Color::Green };
    let title = if snap.gated {
        format!(" Poor signal (gate > {}) — motion held ", m.quality_gate)
    } else {
        format!(" Poor signal (gate > {}) ", m.quality_gate)
    };
    frame.render_widget(
        Gauge::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .gauge_style(Style::default().fg(color))
            .ratio(f64::from(q) / f64::from(SIGNAL_QUALITY_MAX))
            .label(format!("{q}")),
        rows[3],
    );
}

fn metric_gauge(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    value: Option<u8>,
    threshold: u8,
    color: Color,
) {
    let v = value.unwrap_or(0);
    let mut style = Style::default().fg(color);
    if value.is_some_and(|v| v >= threshold) {
        style = style.add_modifier(Modifier::BOLD);
    }
    let label = value.map_or_else(|| "--".to_owned(), |v| v.to_string());
    frame.render_widget(
        Gauge::default()
            .block(
                Block::default()
                    .title(format!(" {title}  ≥{threshold} "))
                    .borders(Borders::ALL),
            )
            .gauge_style(style)
            .ratio(f64::from(v) / f64::from(METRIC_MAX))
            .label(label),
        area,
    );
}

// ── History chart ─────────────────────────────────────────────────────────────

fn draw_history(frame: &mut Frame, area: Rect, app: &App, config: &BridgeConfig) {
    let origin = app.now_secs() - HISTORY_SECS;
    let shift = |buf: &VecDeque<(f64, f64)>| -> Vec<(f64, f64)> {
        buf.iter().map(|&(t, v)| (t - origin, v)).collect()
    };
    let attention = shift(&app.attention);
    let meditation = shift(&app.meditation);
    let threshold = f64::from(config.mapping.attention_threshold);
    let threshold_line = [(0.0, threshold), (HISTORY_SECS, threshold)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::DarkGray))
            .data(&threshold_line),
        Dataset::default()
            .name("attention")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(ATTENTION_COLOR))
            .data(&attention),
        Dataset::default()
            .name("meditation")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(MEDITATION_COLOR))
            .data(&meditation),
    ];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(Span::styled(
                    format!(" Last {HISTORY_SECS:.0} s "),
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .bounds([0.0, HISTORY_SECS])
                .labels(vec![format!("-{HISTORY_SECS:.0}s"), "now".to_string()])
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, f64::from(METRIC_MAX)])
                .labels(vec!["0".to_string(), "50".to_string(), "100".to_string()])
                .style(Style::default().fg(Color::DarkGray)),
        );
    frame.render_widget(chart, area);
}

// ── Command log ───────────────────────────────────────────────────────────────

/// Newest entries at the bottom; older ones scroll off the top.
fn draw_log(frame: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.log.len().saturating_sub(visible);
    let items: Vec<ListItem> = app
        .log
        .iter()
        .skip(skip)
        .map(|n| {
            let color = match n.kind {
                NoticeKind::Command => Color::White,
                NoticeKind::Status => Color::Green,
                NoticeKind::Error => Color::Red,
            };
            ListItem::new(Span::styled(n.to_string(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(
        List::new(items).block(
            Block::default()
                .title(format!(" Log ({}) ", app.log.len()))
                .borders(Borders::ALL),
        ),
        area,
    );
}

// ── Footer ────────────────────────────────────────────────────────────────────

fn draw_footer(frame: &mut Frame, area: Rect, snap: &Snapshot) {
    let start_label = if snap.actuator == LinkState::Closed { "Start  " } else { "Restart  " };
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[↵]"),
        Span::raw(start_label),
        key("[x]"),
        Span::raw("Stop  "),
        key("[h]"),
        Span::styled("HOME  ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        key("[r]"),
        Span::raw("Reconnect headset  "),
        key("[c]"),
        Span::raw("Clear log  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);
    frame.render_widget(
        Paragraph::new(keys).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Entry point ───────────────────────────────────────────────────────────────

const LOG_FILE: &str = "thinkgear-tui.log";

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    let args = Args::parse();
    if !io::stdout().is_terminal() {
        eprintln!("Error: the thinkgear-arm tui requires a real terminal (TTY).");
        eprintln!("Use the `thinkgear-arm` binary for headless runs.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to thinkgear-tui.log so they never draw over the UI.
    //   RUST_LOG=thinkgear_arm=debug cargo run --bin tui
    {
        use std::fs::File;
        match File::create(LOG_FILE) {
            Ok(file) => {
                env_logger::Builder::from_env(
                    env_logger::Env::default().default_filter_or("info"),
                )
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
            }
            // Still on the plain terminal here; the TUI runs without a log.
            Err(e) => {
                eprintln!("Warning: cannot create {LOG_FILE} ({e}); logging is disabled.");
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
    }

    let config = args.load_config()?;
    let simulate = args.simulate;
    let frame_interval = config.poll_interval();

    let mut bridge = Bridge::new(config);
    let mut app = App::new(simulate);

    // Oneshot for the arm open running on a blocking task. Start straight
    // away, like pressing Enter.
    let mut pending_open: Option<oneshot::Receiver<Result<(), BridgeError>>> =
        Some(start_open(&mut bridge, simulate));
    app.opening = true;

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    // ── Main loop ─────────────────────────────────────────────────────────────
    'main: loop {
        // ── 1. Collect a finished arm open ────────────────────────────────────
        if let Some(rx) = pending_open.as_mut() {
            match rx.try_recv() {
                Ok(Ok(())) => {
                    pending_open = None;
                    app.opening = false;
                    let sensor = sensor_opener(&bridge.config().sensor, simulate);
                    if let Err(e) = bridge.begin_session(sensor) {
                        bridge.notice(Notice::error(format!("Start failed: {e}")));
                    }
                }
                Ok(Err(e)) => {
                    pending_open = None;
                    app.opening = false;
                    bridge.notice(Notice::error(format!("Arm open failed: {e}")));
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    pending_open = None;
                    app.opening = false;
                    bridge.notice(Notice::error("Arm open task ended without a result"));
                }
            }
        }

        // ── 2. Consumer tick ──────────────────────────────────────────────────
        bridge.poll(Instant::now());
        app.push_notices(bridge.drain_notices());
        let snap = bridge.snapshot();
        app.record(&snap);

        terminal.draw(|f| draw(f, &app, &snap, bridge.config()))?;

        // ── 3. Keys (the poll timeout is the tick cadence) ────────────────────
        if !event::poll(frame_interval)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        // Raw mode delivers Ctrl+C as a key event, not SIGINT.
        let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
            && key.code == KeyCode::Char('c');
        if ctrl_c {
            break 'main;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break 'main,

            KeyCode::Enter | KeyCode::Char('g') => {
                if pending_open.is_none() {
                    bridge.stop();
                    pending_open = Some(start_open(&mut bridge, simulate));
                    app.opening = true;
                }
            }

            KeyCode::Char('x') => {
                // An in-flight open is discarded: close() invalidates it.
                pending_open = None;
                app.opening = false;
                bridge.stop();
            }

            KeyCode::Char('h') | KeyCode::Char(' ') => {
                // Failures land in the log.
                let _ = bridge.request_home();
            }

            KeyCode::Char('r') => restart_ingest(&mut bridge, simulate),

            KeyCode::Char('c') => app.log.clear(),

            _ => {}
        }
        app.push_notices(bridge.drain_notices());
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    bridge.stop();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
