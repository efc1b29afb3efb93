//! Headless runner: prints the command log and a periodic status line.
//!
//! Usage:
//!   cargo run                                  # default ports
//!   cargo run -- --simulate                    # no hardware needed
//!   cargo run -- --config arm.json --sensor COM7 --actuator COM5

use std::io::{self, BufRead};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::time::MissedTickBehavior;

use thinkgear_arm::cli::Args;
use thinkgear_arm::prelude::*;
use thinkgear_arm::serial::{actuator_opener, sensor_opener};

/// How often the status line is printed.
const STATUS_EVERY: Duration = Duration::from_secs(2);

// ── Session control ───────────────────────────────────────────────────────────

/// Open the arm on a blocking task (the settle delay sleeps), then home it and
/// start reading the headset.
async fn start_session(bridge: &mut Bridge, simulate: bool) {
    let dispatcher = bridge.dispatcher();
    let opener = actuator_opener(&bridge.config().actuator, simulate);
    let settle = bridge.config().settle_delay();
    bridge.notice(Notice::status(format!(
        "Opening arm on {}",
        bridge.config().actuator.port
    )));
    print_notices(bridge);

    match tokio::task::spawn_blocking(move || dispatcher.open(opener, settle)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            bridge.notice(Notice::error(format!("Arm open failed: {e}")));
            return;
        }
        Err(e) => {
            bridge.notice(Notice::error(format!("Arm open task failed: {e}")));
            return;
        }
    }

    let sensor = sensor_opener(&bridge.config().sensor, simulate);
    if let Err(e) = bridge.begin_session(sensor) {
        bridge.notice(Notice::error(format!("Start failed: {e}")));
    }
}

fn restart_ingest(bridge: &mut Bridge, simulate: bool) {
    let sensor = sensor_opener(&bridge.config().sensor, simulate);
    if let Err(e) = bridge.start_ingest(sensor, KeywordDecoder) {
        bridge.notice(Notice::error(format!("Restart failed: {e}")));
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_notices(bridge: &mut Bridge) {
    for notice in bridge.drain_notices() {
        println!("{notice}");
    }
}

fn fmt_metric(v: Option<u8>) -> String {
    v.map_or_else(|| "--".into(), |v| format!("{v:3}"))
}

fn print_status(s: &Snapshot) {
    println!(
        "[STATUS] att={} med={} blink={} signal={:3}{}  gripper={}  sensor: {}  arm: {} ({} sent)",
        fmt_metric(s.attention),
        fmt_metric(s.meditation),
        fmt_metric(s.blink_strength),
        s.signal_quality,
        if s.gated { " GATED" } else { "" },
        if s.gripper_open { "open" } else { "closed" },
        s.sensor,
        s.actuator,
        s.commands_sent,
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // RUST_LOG=thinkgear_arm=debug shows every parsed line and skipped frame.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.load_config()?;
    let simulate = args.simulate;
    let poll_interval = config.poll_interval();

    info!(
        "sensor {} @ {} baud, arm {} @ {} baud{}",
        config.sensor.port,
        config.sensor.baud,
        config.actuator.port,
        config.actuator.baud,
        if simulate { " (simulated)" } else { "" },
    );

    let mut bridge = Bridge::new(config);
    start_session(&mut bridge, simulate).await;
    print_notices(&mut bridge);

    info!("Commands (type + Enter):");
    info!("  h  – HOME (emergency stop)");
    info!("  s  – stop: close both ports");
    info!("  g  – go: reopen the arm and start a new session");
    info!("  r  – restart headset ingestion only");
    info!("  q  – quit");

    // ── Stdin command relay ───────────────────────────────────────────────────
    // Lines are read on a plain OS thread; the StdinLock must not be held
    // across await points.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line.trim().to_owned()).is_err() {
                break;
            }
        }
    });

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stdin_open = true;
    let mut last_status = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                bridge.poll(Instant::now());
                print_notices(&mut bridge);
                if last_status.elapsed() >= STATUS_EVERY {
                    print_status(&bridge.snapshot());
                    last_status = Instant::now();
                }
            }
            line = line_rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    // Detached from a terminal: keep running without commands.
                    stdin_open = false;
                    continue;
                };
                match line.as_str() {
                    "" => {}
                    "h" => {
                        // Failure is already in the notice log.
                        let _ = bridge.request_home();
                    }
                    "s" => bridge.stop(),
                    "g" => {
                        bridge.stop();
                        start_session(&mut bridge, simulate).await;
                    }
                    "r" => restart_ingest(&mut bridge, simulate),
                    "q" => break,
                    other => warn!("unknown command '{other}'"),
                }
                print_notices(&mut bridge);
            }
        }
    }

    info!("Quit requested.");
    bridge.stop();
    print_notices(&mut bridge);
    Ok(())
}
