//! [`TeleoRuntime`] – top-level context owning everything that runs.
//!
//! There is no global state: the runtime holds the [`Agent`] (which in turn
//! owns its dispatcher, links and optional kit session), the
//! [`TickScheduler`], and the shutdown flag shared with the signal handler.
//! Dropping the runtime releases every socket.

use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use teleo_hal::{KitConfig, KitSession, SessionPhase};
use teleo_middleware::{Clock, Dispatcher, Link};
use teleo_types::{LOOPBACK_V4, PeerIdentity, TeleoError, hosts_match};
use tracing::info;

use crate::agent::{Agent, AgentConfig};
use crate::scheduler::TickScheduler;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where mirrored inbound traffic is sent.
///
/// Must not be the agent's own listener, or every mirrored message would be
/// received and mirrored again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9001,
        }
    }
}

/// The agent's own link: telemetry out, `/pleasure` in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Expected sender of `/pleasure` and destination of telemetry.
    pub host: String,
    pub send_port: u16,
    pub recv_port: u16,
    pub bind_host: String,
    pub broadcast: bool,
    /// Mirror every inbound message here, if set.
    pub redirect: Option<RedirectConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            send_port: 8000,
            recv_port: 8001,
            bind_host: "0.0.0.0".to_string(),
            broadcast: false,
            redirect: None,
        }
    }
}

impl LinkConfig {
    pub fn peer(&self) -> PeerIdentity {
        PeerIdentity::new(self.host.clone(), self.send_port)
    }

    /// # Errors
    ///
    /// Returns [`TeleoError::Config`] if `bind_host` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, TeleoError> {
        let ip: IpAddr = self
            .bind_host
            .parse()
            .map_err(|e| TeleoError::Config(format!("link bind_host {:?}: {e}", self.bind_host)))?;
        Ok(SocketAddr::new(ip, self.recv_port))
    }

    /// Check that the redirect does not point back at this link's listener
    /// on `listen_port`.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Config`] when the redirect host is loopback,
    /// unspecified or the bind host, and its port is `listen_port`.
    pub fn check_redirect(&self, listen_port: u16) -> Result<(), TeleoError> {
        let Some(redirect) = &self.redirect else {
            return Ok(());
        };
        if redirect.port != listen_port {
            return Ok(());
        }
        let local = hosts_match(&redirect.host, LOOPBACK_V4)
            || redirect.host == self.bind_host
            || redirect
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified());
        if local {
            return Err(TeleoError::Config(format!(
                "redirect {}:{} is the agent's own listener",
                redirect.host, redirect.port
            )));
        }
        Ok(())
    }
}

/// Everything needed to assemble a [`TeleoRuntime`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    pub agent: AgentConfig,
    pub link: LinkConfig,
    /// `None` runs the agent without a robot kit.
    pub kit: Option<KitConfig>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TeleoRuntime
// ─────────────────────────────────────────────────────────────────────────────

pub struct TeleoRuntime {
    agent: Agent,
    scheduler: TickScheduler,
    shutdown: Arc<AtomicBool>,
}

impl TeleoRuntime {
    pub fn new(agent: Agent, scheduler: TickScheduler, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            agent,
            scheduler,
            shutdown,
        }
    }

    /// Bind every socket described by `config` and assemble the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Bind`] if any listening socket cannot be bound,
    /// and [`TeleoError::Config`] for an invalid configuration.
    pub fn build(
        config: &RuntimeConfig,
        clock: Rc<dyn Clock>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, TeleoError> {
        config.agent.validate()?;

        let link = &config.link;
        let mut dispatcher = Dispatcher::new(Link::udp(
            "teleo-agent",
            link.peer(),
            link.listen_addr()?,
            link.broadcast,
        )?);
        let listen_port = dispatcher
            .link()
            .local_addr()
            .map_or(link.recv_port, |addr| addr.port());
        link.check_redirect(listen_port)?;
        if let Some(redirect) = &link.redirect {
            let tap = Link::udp(
                "teleo-redirect",
                PeerIdentity::new(redirect.host.clone(), redirect.port),
                SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 0),
                link.broadcast,
            )?;
            info!(target_peer = %tap.peer(), "mirroring inbound traffic");
            dispatcher = dispatcher.with_tap(tap);
        }

        let kit = match &config.kit {
            Some(kit) => Some(KitSession::connect(kit, Rc::clone(&clock))?),
            None => None,
        };

        let agent = Agent::new(config.agent.clone(), dispatcher, kit)?;
        let scheduler = TickScheduler::new(config.agent.steps_per_second, clock);
        info!(
            peer = %link.peer(),
            fps = config.agent.steps_per_second,
            kit = config.kit.is_some(),
            "runtime assembled"
        );
        Ok(Self::new(agent, scheduler, shutdown))
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run the kit handshake, if a kit is attached.
    ///
    /// Blocks until the kit is inventoried or shutdown is requested.
    pub fn begin(&mut self) -> Option<SessionPhase> {
        let shutdown = Arc::clone(&self.shutdown);
        self.agent.kit_mut().map(|kit| kit.begin(&shutdown))
    }

    /// Tick until shutdown is requested.  Returns the number of ticks run.
    pub fn run(&mut self) -> u64 {
        self.scheduler.run(&mut self.agent, &self.shutdown)
    }

    /// Release the sockets.  Nothing is sent to the peers.
    pub fn terminate(self) {
        info!(ticks = self.agent.ticks(), mode = %self.agent.mode(), "runtime terminated");
    }
}
