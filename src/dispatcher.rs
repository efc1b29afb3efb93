//! Ownership of the actuator connection.
//!
//! [`Dispatcher`] is shared (`Arc`) between the consumer tick, which forwards
//! mapper output, and whatever triggers an emergency `HOME`. A single mutex
//! around the port serialises writers, so two frames can never interleave on
//! the wire.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::BridgeError;
use crate::protocol::encode_command;
use crate::types::ActuatorCommand;

/// Anything a command frame can be written to.
pub type ActuatorPort = Box<dyn Write + Send>;

/// Lifecycle of the actuator connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Closed,
    /// Port is being opened or is inside its settle delay.
    Opening,
    Open,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LinkState::Closed => "closed",
            LinkState::Opening => "settling",
            LinkState::Open => "ready",
        })
    }
}

struct Link {
    state: LinkState,
    port: Option<ActuatorPort>,
    /// Incremented on every open/close so a stale `open` cannot install its
    /// port after a `close` raced it.
    generation: u64,
}

/// Serialises commands onto the actuator channel.
pub struct Dispatcher {
    link: Mutex<Link>,
    sent: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(Link { state: LinkState::Closed, port: None, generation: 0 }),
            sent: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        // A panic while holding the lock cannot leave the link half-written
        // in a way later writers care about; keep going with the inner value.
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Frames written since the last successful [`Dispatcher::open`].
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Open the channel with `opener`, then block for `settle` before marking
    /// the connection ready.
    ///
    /// This call blocks for at least `settle`; run it somewhere that is
    /// allowed to block (a plain thread or `tokio::task::spawn_blocking`),
    /// never on the consumer tick. An already-open channel is closed first.
    /// Sends issued while this call is in progress fail with
    /// [`BridgeError::NotReady`].
    pub fn open<F>(&self, opener: F, settle: Duration) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Result<ActuatorPort, BridgeError>,
    {
        let generation = {
            let mut link = self.lock();
            if link.port.take().is_some() {
                info!("actuator: closing previous connection before reopening");
            }
            link.state = LinkState::Opening;
            link.generation += 1;
            link.generation
        };

        let port = match opener() {
            Ok(p) => p,
            Err(e) => {
                let mut link = self.lock();
                if link.generation == generation {
                    link.state = LinkState::Closed;
                }
                return Err(e);
            }
        };

        if !settle.is_zero() {
            debug!("actuator: waiting {settle:?} for the controller to reset");
            std::thread::sleep(settle);
        }

        let mut link = self.lock();
        if link.generation != generation {
            // Closed (or reopened) while we were settling. Drop our port.
            return Err(BridgeError::NotConnected);
        }
        link.port = Some(port);
        link.state = LinkState::Open;
        self.sent.store(0, Ordering::Relaxed);
        info!("actuator: ready");
        Ok(())
    }

    /// Write one command frame. Fire-and-forget: no reply is awaited.
    ///
    /// A failed write is reported and not retried. The connection stays open
    /// unless the error says the channel itself is gone.
    pub fn send(&self, cmd: &ActuatorCommand) -> Result<(), BridgeError> {
        let mut link = self.lock();
        match link.state {
            LinkState::Closed => return Err(BridgeError::NotConnected),
            LinkState::Opening => return Err(BridgeError::NotReady),
            LinkState::Open => {}
        }
        let Some(port) = link.port.as_mut() else {
            return Err(BridgeError::NotConnected);
        };

        let frame = encode_command(cmd);
        let result = port.write_all(&frame).and_then(|()| port.flush());
        match result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!("actuator: > {cmd}");
                Ok(())
            }
            Err(e) => {
                let err = BridgeError::WriteFailed(e);
                if err.is_disconnect() {
                    warn!("actuator: channel lost while writing '{cmd}': {err}");
                    link.port = None;
                    link.state = LinkState::Closed;
                    link.generation += 1;
                } else {
                    warn!("actuator: dropped '{cmd}': {err}");
                }
                Err(err)
            }
        }
    }

    /// Close the channel. Safe to call in any state, any number of times.
    pub fn close(&self) {
        let mut link = self.lock();
        let was = link.state;
        link.port = None;
        link.state = LinkState::Closed;
        link.generation += 1;
        if was != LinkState::Closed {
            info!("actuator: closed");
        }
    }
}
