//! `teleo-runtime` – The Mind
//!
//! The decision engine and the loop that drives it.
//!
//! # Modules
//!
//! - [`affect`] – bounded affect updates, the per-mode value model, and the
//!   hand-weighted utility that scores STAY against CHANGE.
//! - [`agent`] – [`Agent`][agent::Agent]: the two-state (CLOSED / OPENED)
//!   engine.  Owns the agent's dispatcher, reads `/pleasure`, updates trust,
//!   happiness and curiosity, and publishes them as one OSC bundle per tick.
//! - [`scheduler`] – [`TickScheduler`][scheduler::TickScheduler]: runs the
//!   agent at a fixed rate and keeps pumping inbound traffic between ticks.
//! - [`context`] – [`TeleoRuntime`][context::TeleoRuntime]: binds the links,
//!   attaches the optional kit, and owns the shutdown flag.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod affect;
pub mod agent;
pub mod context;
pub mod scheduler;
pub mod telemetry;

pub use affect::{ActionValues, ActionWeights, Affect, ValueModel, bounded_update};
pub use agent::{Agent, AgentConfig, TickReport};
pub use context::{LinkConfig, RedirectConfig, RuntimeConfig, TeleoRuntime};
pub use scheduler::TickScheduler;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
