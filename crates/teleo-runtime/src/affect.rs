//! Affect state, online state values, and action scoring.
//!
//! Everything here is pure arithmetic over plain values; the [`Agent`]
//! decides when to call it.
//!
//! # Rates
//!
//! All affect deltas are expressed *per second* and converted to a per-tick
//! change by [`bounded_update`], so the agent behaves the same at any tick
//! rate.
//!
//! [`Agent`]: crate::agent::Agent

use serde::{Deserialize, Serialize};
use teleo_types::{Action, AgentMode};

/// `clamp(value + delta_per_second / steps_per_second, 0, 1)`.
pub fn bounded_update(value: f64, delta_per_second: f64, steps_per_second: f64) -> f64 {
    (value + delta_per_second / steps_per_second).clamp(0.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Affect
// ─────────────────────────────────────────────────────────────────────────────

/// Trust, happiness and curiosity, each kept in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Affect {
    pub trust: f64,
    pub happiness: f64,
    pub curiosity: f64,
}

impl Affect {
    pub fn add_trust(&mut self, delta_per_second: f64, steps_per_second: f64) {
        self.trust = bounded_update(self.trust, delta_per_second, steps_per_second);
    }

    pub fn add_happiness(&mut self, delta_per_second: f64, steps_per_second: f64) {
        self.happiness = bounded_update(self.happiness, delta_per_second, steps_per_second);
    }

    pub fn add_curiosity(&mut self, delta_per_second: f64, steps_per_second: f64) {
        self.curiosity = bounded_update(self.curiosity, delta_per_second, steps_per_second);
    }

    pub fn reset_curiosity(&mut self) {
        self.curiosity = 0.0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ValueModel
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential moving average of the reward observed in each mode.
///
/// Unlike the affect scalars these values are not clamped; they track the
/// reward, which lies in `[-1 - upkeep, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueModel {
    alpha: f64,
    opened: f64,
    closed: f64,
}

impl ValueModel {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            opened: 0.0,
            closed: 0.0,
        }
    }

    pub fn value(&self, mode: AgentMode) -> f64 {
        match mode {
            AgentMode::Opened => self.opened,
            AgentMode::Closed => self.closed,
        }
    }

    /// `V[mode] += alpha * (reward - V[mode])`.
    pub fn update(&mut self, mode: AgentMode, reward: f64) {
        let alpha = self.alpha;
        let slot = match mode {
            AgentMode::Opened => &mut self.opened,
            AgentMode::Closed => &mut self.closed,
        };
        *slot += alpha * (reward - *slot);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action scoring
// ─────────────────────────────────────────────────────────────────────────────

/// Hand-tuned weights of the action utility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionWeights {
    /// Weight of the next mode's learned value.
    pub w_state: f64,
    /// Weight of the per-action bias.
    pub w_action: f64,
    /// Weight of trust; added when the next mode is OPENED, subtracted when
    /// it is CLOSED.
    pub w_trust: f64,
    /// Bias of STAY.
    pub stay_bias: f64,
    /// Curiosity multiplier for CHANGE when it leads to CLOSED.
    pub close_curiosity_factor: f64,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            w_state: 0.3,
            w_action: 0.1,
            w_trust: 0.6,
            stay_bias: 0.5,
            close_curiosity_factor: 0.6,
        }
    }
}

/// Utility of each action for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionValues {
    pub stay: f64,
    pub change: f64,
}

impl ActionValues {
    /// Argmax; STAY wins ties.
    pub fn best(&self) -> Action {
        if self.change > self.stay {
            Action::Change
        } else {
            Action::Stay
        }
    }
}

fn action_bias(action: Action, next: AgentMode, affect: &Affect, weights: &ActionWeights) -> f64 {
    match (action, next) {
        (Action::Stay, _) => weights.stay_bias,
        (Action::Change, AgentMode::Opened) => affect.curiosity,
        (Action::Change, AgentMode::Closed) => weights.close_curiosity_factor * affect.curiosity,
    }
}

/// Score one action taken from `mode`.
pub fn action_value(
    action: Action,
    mode: AgentMode,
    affect: &Affect,
    values: &ValueModel,
    weights: &ActionWeights,
) -> f64 {
    let next = action.next_mode(mode);
    let trust_term = match next {
        AgentMode::Closed => -weights.w_trust * affect.trust,
        AgentMode::Opened => weights.w_trust * affect.trust,
    };
    weights.w_state * values.value(next)
        + weights.w_action * action_bias(action, next, affect, weights)
        + trust_term
}

/// Score both actions taken from `mode`.
pub fn evaluate_actions(
    mode: AgentMode,
    affect: &Affect,
    values: &ValueModel,
    weights: &ActionWeights,
) -> ActionValues {
    ActionValues {
        stay: action_value(Action::Stay, mode, affect, values, weights),
        change: action_value(Action::Change, mode, affect, values, weights),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    /// Deterministic linear congruential generator yielding values in [-1, 1].
    struct Lcg(u64);

    impl Lcg {
        fn next_signal(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    #[test]
    fn bounded_update_scales_by_rate_and_clamps() {
        assert!((bounded_update(0.5, 0.1, 5.0) - 0.52).abs() < EPS);
        assert_eq!(bounded_update(0.0, -0.2, 5.0), 0.0);
        assert_eq!(bounded_update(0.99, 1.0, 5.0), 1.0);
        assert!((bounded_update(0.5, 0.1, 1.0) - 0.6).abs() < EPS);
    }

    #[test]
    fn affect_stays_bounded_for_random_rewards() {
        let mut affect = Affect::default();
        let mut rng = Lcg(42);
        for _ in 0..10_000 {
            let r = rng.next_signal();
            assert!((-1.0..=1.0).contains(&r));
            affect.add_trust(if r > 0.0 { 0.1 } else { -0.2 }, 5.0);
            affect.add_happiness(r - 0.1, 5.0);
            affect.add_curiosity(r, 5.0);
            for v in [affect.trust, affect.happiness, affect.curiosity] {
                assert!((0.0..=1.0).contains(&v), "affect escaped [0, 1]: {v}");
            }
        }
    }

    #[test]
    fn value_model_is_an_ema() {
        let mut model = ValueModel::new(0.1);
        model.update(AgentMode::Closed, -0.1);
        assert!((model.value(AgentMode::Closed) + 0.01).abs() < EPS);
        assert_eq!(model.value(AgentMode::Opened), 0.0);
    }

    #[test]
    fn constant_reward_raises_value_monotonically_toward_one() {
        let mut model = ValueModel::new(0.1);
        let mut previous = model.value(AgentMode::Opened);
        for _ in 0..200 {
            model.update(AgentMode::Opened, 1.0);
            let v = model.value(AgentMode::Opened);
            assert!(v > previous);
            assert!(v < 1.0);
            previous = v;
        }
        assert!(previous > 0.99);
    }

    #[test]
    fn initial_closed_state_prefers_stay() {
        let values = evaluate_actions(
            AgentMode::Closed,
            &Affect::default(),
            &ValueModel::new(0.1),
            &ActionWeights::default(),
        );
        assert!((values.stay - 0.05).abs() < EPS);
        assert_eq!(values.change, 0.0);
        assert_eq!(values.best(), Action::Stay);
    }

    #[test]
    fn trust_term_sign_follows_next_mode() {
        let affect = Affect {
            trust: 0.5,
            ..Affect::default()
        };
        let model = ValueModel::new(0.1);
        let w = ActionWeights::default();

        // From OPENED, STAY keeps it open (+trust), CHANGE closes (-trust).
        let from_open = evaluate_actions(AgentMode::Opened, &affect, &model, &w);
        assert!((from_open.stay - (0.05 + 0.3)).abs() < EPS);
        assert!((from_open.change - (-0.3)).abs() < EPS);

        // From CLOSED the signs swap.
        let from_closed = evaluate_actions(AgentMode::Closed, &affect, &model, &w);
        assert!((from_closed.stay - (0.05 - 0.3)).abs() < EPS);
        assert!((from_closed.change - 0.3).abs() < EPS);
    }

    #[test]
    fn curiosity_bias_is_discounted_toward_closed() {
        let affect = Affect {
            curiosity: 1.0,
            ..Affect::default()
        };
        let model = ValueModel::new(0.1);
        let w = ActionWeights::default();
        let toward_open = action_value(Action::Change, AgentMode::Closed, &affect, &model, &w);
        let toward_closed = action_value(Action::Change, AgentMode::Opened, &affect, &model, &w);
        assert!((toward_open - 0.1).abs() < EPS);
        assert!((toward_closed - 0.06).abs() < EPS);
    }

    #[test]
    fn ties_choose_stay() {
        let tied = ActionValues {
            stay: 0.25,
            change: 0.25,
        };
        assert_eq!(tied.best(), Action::Stay);
        assert_eq!(
            ActionValues {
                stay: 0.1,
                change: 0.2
            }
            .best(),
            Action::Change
        );
        assert_eq!(tied.change, 0.25);
    }
}
