//! `teleo-middleware` – The Nervous System
//!
//! Moves OSC messages between the agent and the outside world without
//! caring about their meaning.
//!
//! # Modules
//!
//! - [`codec`] – OSC 1.0 messages and bundles, framed by `rosc`.
//! - [`transport`] – [`Transport`] byte carriers ([`UdpTransport`],
//!   [`MemoryTransport`]) and the OSC-speaking [`Link`] that owns one.
//! - [`dispatcher`] – [`Dispatcher`]: exact-address routing with source
//!   filtering, an optional tap link, and the single-slot [`Mailbox`].
//! - [`clock`] – the [`Clock`] seam used for every wait, with a virtual
//!   [`SimClock`] for tests.

pub mod clock;
pub mod codec;
pub mod dispatcher;
pub mod transport;

pub use clock::{Clock, SimClock, SystemClock};
pub use dispatcher::{Dispatcher, Handler, Mailbox};
pub use transport::{Datagram, Link, MemoryPeer, MemoryTransport, Transport, UdpTransport};
