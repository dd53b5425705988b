//! [`Agent`] – the two-state decision engine.
//!
//! The agent is either CLOSED (guarded, paying an upkeep cost every tick) or
//! OPENED (exposed: a human's pleasure or displeasure moves its trust).  Each
//! call to [`Agent::step`]:
//!
//! 1. drains inbound messages and takes the latest `/pleasure` signal, if any;
//! 2. turns it into a reward and updates trust, happiness and the value of
//!    the current mode;
//! 3. scores STAY and CHANGE and applies the better one (STAY on a tie);
//! 4. publishes its affect state as one OSC bundle.
//!
//! Nothing in a step can fail.  Transport problems are logged by the link and
//! counted in [`Link::send_failures`](teleo_middleware::Link::send_failures).

use serde::{Deserialize, Serialize};
use teleo_hal::KitSession;
use teleo_middleware::{Dispatcher, Mailbox};
use teleo_types::{Action, AgentMode, Envelope, OscArg, TeleoError};
use tracing::{debug, trace, warn};

use crate::affect::{self, ActionValues, ActionWeights, Affect, ValueModel};

/// Inbound address carrying the human's instantaneous pleasure in `[-1, 1]`.
pub const PLEASURE_ADDRESS: &str = "/pleasure";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables of the decision engine.  Rates are per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub steps_per_second: u32,
    /// Learning rate of the state-value EMA.
    pub alpha: f64,
    /// Reward subtracted on every CLOSED tick.
    pub upkeep_cost: f64,
    /// Curiosity gained per second while staying.
    pub curiosity_rate: f64,
    /// Trust gained per second when OPENED and the signal is positive.
    pub trust_gain: f64,
    /// Trust lost per second when OPENED and the signal is negative.
    pub trust_loss: f64,
    pub weights: ActionWeights,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            steps_per_second: 5,
            alpha: 0.1,
            upkeep_cost: 0.1,
            curiosity_rate: 0.1,
            trust_gain: 0.1,
            trust_loss: 0.2,
            weights: ActionWeights::default(),
        }
    }
}

impl AgentConfig {
    /// # Errors
    ///
    /// Returns [`TeleoError::Config`] for a zero tick rate, a learning rate
    /// outside `(0, 1]`, or any non-finite tunable.
    pub fn validate(&self) -> Result<(), TeleoError> {
        if self.steps_per_second == 0 {
            return Err(TeleoError::Config(
                "steps_per_second must be at least 1".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(TeleoError::Config(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        let w = &self.weights;
        let tunables = [
            ("upkeep_cost", self.upkeep_cost),
            ("curiosity_rate", self.curiosity_rate),
            ("trust_gain", self.trust_gain),
            ("trust_loss", self.trust_loss),
            ("weights.w_state", w.w_state),
            ("weights.w_action", w.w_action),
            ("weights.w_trust", w.w_trust),
            ("weights.stay_bias", w.stay_bias),
            ("weights.close_curiosity_factor", w.close_curiosity_factor),
        ];
        if let Some((name, _)) = tunables.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TeleoError::Config(format!("{name} must be finite")));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TickReport
// ─────────────────────────────────────────────────────────────────────────────

/// What happened during one [`Agent::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// 1-based tick index.
    pub tick: u64,
    /// Clamped signal consumed this tick (0 when none arrived).
    pub signal: f64,
    pub reward: f64,
    pub action_values: ActionValues,
    pub action: Action,
    /// Mode after the action was applied.
    pub mode: AgentMode,
    /// Affect after the action was applied.
    pub affect: Affect,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// The decision engine.  Owns its dispatcher and, optionally, a kit session.
pub struct Agent {
    config: AgentConfig,
    dispatcher: Dispatcher,
    pleasure: Mailbox<f64>,
    kit: Option<KitSession>,
    mode: AgentMode,
    affect: Affect,
    values: ValueModel,
    ticks: u64,
}

impl Agent {
    /// Build an agent in CLOSED mode with all affect at zero, and register the
    /// `/pleasure` handler on `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Config`] if `config` does not validate.
    pub fn new(
        config: AgentConfig,
        mut dispatcher: Dispatcher,
        kit: Option<KitSession>,
    ) -> Result<Self, TeleoError> {
        config.validate()?;

        let pleasure = Mailbox::new();
        let slot = pleasure.clone();
        dispatcher.register(PLEASURE_ADDRESS, move |args| {
            match args.first().and_then(OscArg::as_f64) {
                Some(p) if p.is_finite() => slot.put(p.clamp(-1.0, 1.0)),
                _ => trace!(?args, "ignoring unusable pleasure value"),
            }
        });

        Ok(Self {
            values: ValueModel::new(config.alpha),
            config,
            dispatcher,
            pleasure,
            kit,
            mode: AgentMode::Closed,
            affect: Affect::default(),
            ticks: 0,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    #[cfg(test)]
    fn set_mode(&mut self, mode: AgentMode) {
        self.mode = mode;
    }

    pub fn affect(&self) -> Affect {
        self.affect
    }

    pub fn state_value(&self, mode: AgentMode) -> f64 {
        self.values.value(mode)
    }

    /// Signal waiting for the next tick, without consuming it.
    pub fn pending_signal(&self) -> Option<f64> {
        self.pleasure.peek()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn kit(&self) -> Option<&KitSession> {
        self.kit.as_ref()
    }

    pub fn kit_mut(&mut self) -> Option<&mut KitSession> {
        self.kit.as_mut()
    }

    /// Drain every inbound queue (agent link and kit link) without blocking.
    pub fn pump(&mut self) -> usize {
        let mut delivered = self.dispatcher.pump();
        if let Some(kit) = self.kit.as_mut() {
            delivered += kit.pump();
        }
        delivered
    }

    /// Run one decision tick.
    pub fn step(&mut self) -> TickReport {
        self.pump();

        let sps = f64::from(self.config.steps_per_second);
        let signal = self.pleasure.take().unwrap_or(0.0);

        let mut reward = signal;
        match self.mode {
            AgentMode::Closed => reward -= self.config.upkeep_cost,
            AgentMode::Opened => {
                if signal > 0.0 {
                    self.affect.add_trust(self.config.trust_gain, sps);
                } else if signal < 0.0 {
                    self.affect.add_trust(-self.config.trust_loss, sps);
                }
            }
        }
        self.affect.add_happiness(reward, sps);
        self.values.update(self.mode, reward);

        let action_values =
            affect::evaluate_actions(self.mode, &self.affect, &self.values, &self.config.weights);
        let action = action_values.best();
        match action {
            Action::Change => {
                self.mode = self.mode.opposite();
                self.affect.reset_curiosity();
            }
            Action::Stay => self.affect.add_curiosity(self.config.curiosity_rate, sps),
        }
        self.ticks += 1;

        debug!(
            tick = self.ticks,
            mode = %self.mode,
            trust = self.affect.trust,
            happiness = self.affect.happiness,
            curiosity = self.affect.curiosity,
            reward,
            ?action,
            "agent tick"
        );
        self.publish(&action_values);

        TickReport {
            tick: self.ticks,
            signal,
            reward,
            action_values,
            action,
            mode: self.mode,
            affect: self.affect,
        }
    }

    fn publish(&mut self, action_values: &ActionValues) {
        match self.telemetry(action_values) {
            Ok(envelopes) => self.dispatcher.send_bundle(&envelopes),
            Err(e) => warn!(error = %e, "could not build telemetry bundle"),
        }
    }

    fn telemetry(&self, action_values: &ActionValues) -> Result<Vec<Envelope>, TeleoError> {
        let a = &self.affect;
        Ok(vec![
            Envelope::new("/trust", vec![OscArg::Float(a.trust as f32)])?,
            Envelope::new("/happiness", vec![OscArg::Float(a.happiness as f32)])?,
            Envelope::new("/curiosity", vec![OscArg::Float(a.curiosity as f32)])?,
            Envelope::new("/state", vec![OscArg::Int(self.mode.wire_code())])?,
            Envelope::new(
                "/action-values",
                vec![
                    OscArg::Float(action_values.stay as f32),
                    OscArg::Float(action_values.change as f32),
                ],
            )?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use teleo_middleware::{Link, MemoryPeer, MemoryTransport, SimClock};
    use teleo_types::{Packet, PeerIdentity};

    const EPS: f64 = 1e-9;

    fn agent() -> (Agent, MemoryPeer) {
        let (transport, remote) = MemoryTransport::pair();
        let link = Link::new("teleo-agent", PeerIdentity::new("localhost", 8000), transport);
        let agent = Agent::new(AgentConfig::default(), Dispatcher::new(link), None).unwrap();
        (agent, remote)
    }

    fn pleasure(remote: &MemoryPeer, value: OscArg) {
        remote.inject_message("127.0.0.1", Envelope::new("/pleasure", vec![value]).unwrap());
    }

    #[test]
    fn starts_closed_with_zero_affect() {
        let (agent, _remote) = agent();
        assert_eq!(agent.mode(), AgentMode::Closed);
        assert_eq!(agent.affect(), Affect::default());
        assert_eq!(agent.state_value(AgentMode::Closed), 0.0);
        assert_eq!(agent.state_value(AgentMode::Opened), 0.0);
    }

    #[test]
    fn first_closed_tick_without_signal() {
        let (mut agent, _remote) = agent();
        let report = agent.step();
        assert!((report.reward + 0.1).abs() < EPS);
        assert_eq!(report.affect.happiness, 0.0);
        assert!((agent.state_value(AgentMode::Closed) + 0.01).abs() < EPS);
        assert_eq!(report.action, Action::Stay);
        assert_eq!(report.mode, AgentMode::Closed);
        assert!((report.affect.curiosity - 0.02).abs() < EPS);
        assert_eq!(report.tick, 1);
    }

    #[test]
    fn opened_with_positive_signal_builds_trust() {
        let (mut agent, remote) = agent();
        agent.set_mode(AgentMode::Opened);
        let mut previous_value = agent.state_value(AgentMode::Opened);
        for tick in 1..=5 {
            pleasure(&remote, OscArg::Float(1.0));
            let report = agent.step();
            assert_eq!(report.mode, AgentMode::Opened);
            assert!((report.affect.trust - 0.02 * tick as f64).abs() < EPS);
            let v = agent.state_value(AgentMode::Opened);
            assert!(v > previous_value);
            previous_value = v;
        }
        assert!((agent.affect().trust - 0.1).abs() < EPS);
    }

    #[test]
    fn negative_signal_when_opened_costs_trust() {
        let (mut agent, remote) = agent();
        agent.set_mode(AgentMode::Opened);
        for _ in 0..10 {
            pleasure(&remote, OscArg::Float(1.0));
            agent.step();
        }
        let before = agent.affect().trust;
        pleasure(&remote, OscArg::Float(-0.5));
        let report = agent.step();
        assert!((report.affect.trust - (before - 0.04)).abs() < EPS);
    }

    #[test]
    fn trust_ignores_signal_while_closed() {
        let (mut agent, remote) = agent();
        pleasure(&remote, OscArg::Float(1.0));
        let report = agent.step();
        assert_eq!(report.affect.trust, 0.0);
        assert!((report.reward - 0.9).abs() < EPS);
    }

    #[test]
    fn zero_signal_leaves_trust_alone_when_opened() {
        let (mut agent, remote) = agent();
        agent.set_mode(AgentMode::Opened);
        pleasure(&remote, OscArg::Int(0));
        let report = agent.step();
        assert_eq!(report.affect.trust, 0.0);
    }

    #[test]
    fn signal_is_consumed_once() {
        let (mut agent, remote) = agent();
        pleasure(&remote, OscArg::Float(0.5));
        assert_eq!(agent.step().signal, 0.5);
        assert_eq!(agent.step().signal, 0.0);
    }

    #[test]
    fn latest_signal_wins_within_a_tick() {
        let (mut agent, remote) = agent();
        pleasure(&remote, OscArg::Float(0.25));
        pleasure(&remote, OscArg::Float(-0.5));
        assert_eq!(agent.step().signal, -0.5);
    }

    #[test]
    fn pleasure_is_clamped_and_unusable_values_dropped() {
        let (mut agent, remote) = agent();
        pleasure(&remote, OscArg::Float(3.0));
        agent.pump();
        assert_eq!(agent.pending_signal(), Some(1.0));

        agent.step();
        pleasure(&remote, OscArg::Float(f32::NAN));
        pleasure(&remote, OscArg::Str("happy".into()));
        agent.pump();
        assert_eq!(agent.pending_signal(), None);
    }

    #[test]
    fn pleasure_from_foreign_host_is_ignored() {
        let (mut agent, remote) = agent();
        remote.inject_message(
            "10.0.0.7",
            Envelope::new("/pleasure", vec![OscArg::Float(1.0)]).unwrap(),
        );
        agent.pump();
        assert_eq!(agent.pending_signal(), None);
    }

    #[test]
    fn curiosity_eventually_opens_a_closed_agent() {
        let (mut agent, _remote) = agent();
        let opened = (0..200).map(|_| agent.step()).find(|r| r.action == Action::Change);
        let report = opened.expect("agent never changed mode");
        assert_eq!(report.mode, AgentMode::Opened);
        assert_eq!(report.affect.curiosity, 0.0);
    }

    #[test]
    fn affect_stays_bounded_under_random_signals() {
        let (mut agent, remote) = agent();
        let mut state: u64 = 7;
        for _ in 0..5_000 {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let r = ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0;
            pleasure(&remote, OscArg::Float(r as f32));
            let a = agent.step().affect;
            for v in [a.trust, a.happiness, a.curiosity] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn publishes_one_telemetry_bundle_per_tick() {
        let (mut agent, remote) = agent();
        let report = agent.step();

        let sent = remote.sent();
        assert_eq!(sent.len(), 1);
        let (to, packet) = &sent[0];
        assert_eq!(to, &PeerIdentity::new("localhost", 8000));
        assert!(matches!(packet, Packet::Bundle { timetag: 1, .. }));

        let envelopes = packet.clone().into_envelopes();
        let addresses: Vec<&str> = envelopes.iter().map(Envelope::address).collect();
        assert_eq!(
            addresses,
            vec!["/trust", "/happiness", "/curiosity", "/state", "/action-values"]
        );
        assert_eq!(envelopes[3].args(), &[OscArg::Int(2)]);
        assert_eq!(
            envelopes[4].args(),
            &[
                OscArg::Float(report.action_values.stay as f32),
                OscArg::Float(report.action_values.change as f32),
            ]
        );
    }

    #[test]
    fn send_failures_do_not_stop_the_tick() {
        let (mut agent, remote) = agent();
        remote.fail_sends(true);
        agent.step();
        agent.step();
        assert_eq!(agent.ticks(), 2);
        assert_eq!(agent.dispatcher().link().send_failures(), 2);
    }

    #[test]
    fn pump_also_drains_kit_replies() {
        let (transport, kit_remote) = MemoryTransport::pair();
        let kit_link = Link::new("mbk-01", PeerIdentity::new("192.168.0.16", 8888), transport);
        let kit = KitSession::new(1, kit_link, Rc::new(SimClock::new()));

        let (transport, _remote) = MemoryTransport::pair();
        let link = Link::new("teleo-agent", PeerIdentity::new("localhost", 8000), transport);
        let mut agent = Agent::new(AgentConfig::default(), Dispatcher::new(link), Some(kit)).unwrap();

        kit_remote.inject_message(
            "192.168.0.16",
            Envelope::new("/isPaired", vec![OscArg::Bool(true)]).unwrap(),
        );
        assert_eq!(agent.pump(), 1);
        assert_eq!(agent.kit().and_then(KitSession::pairing_confirmed), Some(true));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AgentConfig =
            toml::from_str("steps_per_second = 10\n\n[weights]\nw_trust = 0.8\n").unwrap();
        assert_eq!(config.steps_per_second, 10);
        assert_eq!(config.weights.w_trust, 0.8);
        assert_eq!(config.weights.w_state, 0.3);
        assert_eq!(config.alpha, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_config() {
        let (transport, _remote) = MemoryTransport::pair();
        let link = Link::new("teleo-agent", PeerIdentity::new("localhost", 8000), transport);
        let config = AgentConfig {
            steps_per_second: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            Agent::new(config, Dispatcher::new(link), None),
            Err(TeleoError::Config(_))
        ));

        let nan_weight = AgentConfig {
            weights: ActionWeights {
                w_trust: f64::NAN,
                ..ActionWeights::default()
            },
            ..AgentConfig::default()
        };
        assert!(nan_weight.validate().is_err());
        assert!(AgentConfig { alpha: 0.0, ..AgentConfig::default() }.validate().is_err());
    }
}
