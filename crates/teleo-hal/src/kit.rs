//! [`KitSession`] – peer session and device proxy for one MisBKit.
//!
//! The kit speaks the same OSC protocol as the agent but has no
//! acknowledgement beyond answering on the same addresses.  The session runs
//! a connection-style handshake on top of a [`Dispatcher`]:
//!
//! ```text
//! Unpaired ──/pair, /isPaired──▶ Pairing ──/paired {id} | /isPaired {bool}──▶ Paired
//!    Paired ──/get/kit/ids──▶ (reply with motor ids) ──▶ Inventoried
//! ```
//!
//! # Liveness
//!
//! There is no timeout and no retransmission.  A kit that never answers leaves
//! the session in the same phase forever, and [`KitSession::begin`] keeps
//! polling.  To an operator this looks like a hang at startup; it is the
//! expected behavior of this protocol.  The only way out is the shutdown flag,
//! which abandons the handshake without sending anything.
//!
//! All waits go through the injected [`Clock`], so tests can simulate a
//! stalled kit without wall-clock delay.

use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teleo_middleware::{Clock, Dispatcher, Link};
use teleo_types::{KitCommand, OscArg, PeerIdentity, TeleoError};
use tracing::{debug, info, warn};

/// Pause between `/pair` and the `/isPaired` query.
pub const PAIR_SETTLE: Duration = Duration::from_millis(500);

/// Sleep between polls while waiting for a reply.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where to find a kit and how to listen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    /// Kit number; also the id sent in `/pair` and `/isPaired`.
    pub kit_id: i32,
    /// Kit address.  Defaults to `192.168.0.(15 + kit_id)`.
    pub host: Option<String>,
    pub send_port: u16,
    pub recv_port: u16,
    /// Local interface to listen on.
    pub bind_host: String,
    /// Enable `SO_BROADCAST` on the outbound socket.
    pub broadcast: bool,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            kit_id: 0,
            host: None,
            send_port: 8888,
            recv_port: 8889,
            bind_host: "0.0.0.0".to_string(),
            broadcast: false,
        }
    }
}

impl KitConfig {
    pub fn for_kit(kit_id: i32) -> Self {
        Self {
            kit_id,
            ..Self::default()
        }
    }

    /// The kit's identity: configured host, or the kit-number convention.
    pub fn peer(&self) -> PeerIdentity {
        let host = self
            .host
            .clone()
            .unwrap_or_else(|| default_kit_host(self.kit_id));
        PeerIdentity::new(host, self.send_port)
    }

    /// # Errors
    ///
    /// Returns [`TeleoError::Config`] if `bind_host` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, TeleoError> {
        let ip: IpAddr = self
            .bind_host
            .parse()
            .map_err(|e| TeleoError::Config(format!("kit bind_host {:?}: {e}", self.bind_host)))?;
        Ok(SocketAddr::new(ip, self.recv_port))
    }

    /// Link name used in logs, e.g. `mbk-01`.
    pub fn link_name(&self) -> String {
        format!("mbk-{:02}", self.kit_id)
    }
}

/// Kits live at `192.168.0.16`, `.17`, … for kit numbers 1, 2, …
pub fn default_kit_host(kit_id: i32) -> String {
    format!("192.168.0.{}", 15 + kit_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Observable handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing sent yet.
    Unpaired,
    /// `/pair` and `/isPaired` sent; waiting for an answer.
    Pairing,
    /// The kit answered the pairing query (see
    /// [`KitSession::pairing_confirmed`]); `/get/kit/ids` sent.
    Paired,
    /// Motor inventory received.
    Inventoried,
}

/// Flags written by the dispatcher handlers.
#[derive(Debug, Default)]
struct KitStatus {
    paired: Option<bool>,
    motor_ids: Option<Vec<i32>>,
}

/// Handshake state machine and command proxy for one kit.
pub struct KitSession {
    kit_id: i32,
    dispatcher: Dispatcher,
    status: Rc<RefCell<KitStatus>>,
    phase: SessionPhase,
    clock: Rc<dyn Clock>,
}

impl KitSession {
    /// Build a session over `link` and register the reply handlers.
    pub fn new(kit_id: i32, link: Link, clock: Rc<dyn Clock>) -> Self {
        let status = Rc::new(RefCell::new(KitStatus::default()));
        let mut dispatcher = Dispatcher::new(link);

        let s = Rc::clone(&status);
        dispatcher.register("/paired", move |args| {
            if args.first().and_then(OscArg::as_i32) == Some(kit_id) {
                s.borrow_mut().paired = Some(true);
            }
        });

        let s = Rc::clone(&status);
        dispatcher.register("/isPaired", move |args| {
            if let Some(paired) = args.first().and_then(OscArg::as_bool) {
                s.borrow_mut().paired = Some(paired);
            }
        });

        let s = Rc::clone(&status);
        dispatcher.register("/get/kit/ids", move |args| {
            let ids = args.iter().filter_map(OscArg::as_i32).collect();
            s.borrow_mut().motor_ids = Some(ids);
        });

        Self {
            kit_id,
            dispatcher,
            status,
            phase: SessionPhase::Unpaired,
            clock,
        }
    }

    /// Bind a UDP link for `config` and build the session.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Bind`] / [`TeleoError::Config`] when the listening
    /// socket cannot be set up.
    pub fn connect(config: &KitConfig, clock: Rc<dyn Clock>) -> Result<Self, TeleoError> {
        let link = Link::udp(
            config.link_name(),
            config.peer(),
            config.listen_addr()?,
            config.broadcast,
        )?;
        info!(kit_id = config.kit_id, peer = %config.peer(), "kit link ready");
        Ok(Self::new(config.kit_id, link, clock))
    }

    pub fn kit_id(&self) -> i32 {
        self.kit_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// `None` until the kit answers; then whether it accepted the pairing.
    pub fn pairing_confirmed(&self) -> Option<bool> {
        self.status.borrow().paired
    }

    /// Motor ids reported by the kit, once known.
    pub fn motor_ids(&self) -> Option<Vec<i32>> {
        self.status.borrow().motor_ids.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process any queued replies without blocking.
    pub fn pump(&mut self) -> usize {
        self.dispatcher.pump()
    }

    /// Advance the handshake by one step.
    ///
    /// Pumps the dispatcher, then either sends the next request or sleeps
    /// [`POLL_INTERVAL`] while waiting.  Requests are sent exactly once.
    pub fn poll(&mut self) -> SessionPhase {
        self.dispatcher.pump();
        match self.phase {
            SessionPhase::Unpaired => {
                debug!(kit_id = self.kit_id, "sending pair request");
                self.send(KitCommand::Pair {
                    kit_id: self.kit_id,
                });
                self.clock.sleep(PAIR_SETTLE);
                self.send(KitCommand::IsPaired {
                    kit_id: self.kit_id,
                });
                self.phase = SessionPhase::Pairing;
            }
            SessionPhase::Pairing => match self.pairing_confirmed() {
                Some(confirmed) => {
                    if confirmed {
                        info!(kit_id = self.kit_id, "kit paired");
                    } else {
                        warn!(kit_id = self.kit_id, "kit reports it is not paired; continuing");
                    }
                    self.send(KitCommand::GetKitIds);
                    self.phase = SessionPhase::Paired;
                }
                None => self.clock.sleep(POLL_INTERVAL),
            },
            SessionPhase::Paired => match self.motor_ids() {
                Some(ids) => {
                    info!(kit_id = self.kit_id, motor_ids = ?ids, "kit inventory received");
                    self.phase = SessionPhase::Inventoried;
                }
                None => self.clock.sleep(POLL_INTERVAL),
            },
            SessionPhase::Inventoried => {}
        }
        self.phase
    }

    /// Busy-poll the handshake until the kit's inventory is known.
    ///
    /// Has no upper bound: a silent kit blocks here until `shutdown` is set,
    /// at which point the handshake is abandoned without a teardown message.
    pub fn begin(&mut self, shutdown: &AtomicBool) -> SessionPhase {
        info!(kit_id = self.kit_id, "starting kit handshake");
        loop {
            if shutdown.load(Ordering::SeqCst) {
                warn!(kit_id = self.kit_id, phase = ?self.phase, "kit handshake abandoned");
                return self.phase;
            }
            if self.poll() == SessionPhase::Inventoried {
                return SessionPhase::Inventoried;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Device commands (fire-and-forget)
    // -------------------------------------------------------------------------

    pub fn send(&mut self, command: KitCommand) {
        self.dispatcher.send(&command.to_envelope());
    }

    pub fn wheel(&mut self, motor_id: i32, speed: f32) {
        self.send(KitCommand::Wheel { motor_id, speed });
    }

    pub fn joint(&mut self, motor_id: i32, angle: f32) {
        self.send(KitCommand::Joint { motor_id, angle });
    }

    pub fn speed(&mut self, motor_id: i32, speed: f32) {
        self.send(KitCommand::Speed { motor_id, speed });
    }

    pub fn stop(&mut self, motor_id: i32) {
        self.send(KitCommand::Stop { motor_id });
    }

    pub fn scan(&mut self) {
        self.send(KitCommand::Scan);
    }

    pub fn stop_all(&mut self) {
        self.send(KitCommand::StopAll);
    }

    pub fn reboot(&mut self) {
        self.send(KitCommand::Reboot);
    }
}
