//! `teleo-hal` – The Body
//!
//! Proxies for the physical robot kit the agent may be paired with.
//!
//! # Modules
//!
//! - [`kit`] – Peer session with a MisBKit: pairing handshake, motor
//!   inventory, and fire-and-forget motor commands over OSC.

pub mod kit;

pub use kit::{KitConfig, KitSession, SessionPhase, default_kit_host};
