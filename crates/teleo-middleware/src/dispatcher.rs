//! Address-routed message dispatcher.
//!
//! A [`Dispatcher`] owns one [`Link`] and a table mapping OSC addresses to
//! [`Handler`]s.  [`Dispatcher::pump`] drains every queued datagram.  For each
//! decoded message it:
//!
//! 1. mirrors the message, unmodified, to the tap link (if one is set), even
//!    when nothing handles it;
//! 2. delivers it to the handler registered under its exact address, but only
//!    if the sender's host matches the link's peer.
//!
//! Everything else is dropped without error.  Handlers hand data back to their
//! owner through shared cells such as [`Mailbox`]; the dispatcher itself has
//! no knowledge of what the messages mean.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use teleo_types::{Envelope, OscArg};
use tracing::trace;

use crate::codec;
use crate::transport::Link;

/// A registered callback.
pub enum Handler {
    /// Called with the message arguments.
    Plain(Box<dyn FnMut(&[OscArg])>),
    /// Called with the message arguments and the context value given at
    /// registration.
    WithExtra(Box<dyn FnMut(&[OscArg], &OscArg)>, OscArg),
}

impl Handler {
    fn invoke(&mut self, args: &[OscArg]) {
        match self {
            Handler::Plain(f) => f(args),
            Handler::WithExtra(f, extra) => f(args, extra),
        }
    }
}

/// Routes inbound OSC messages from one link to per-address handlers.
pub struct Dispatcher {
    link: Link,
    tap: Option<Link>,
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    pub fn new(link: Link) -> Self {
        Self {
            link,
            tap: None,
            handlers: HashMap::new(),
        }
    }

    /// Mirror every inbound message to `tap` before dispatching it.
    pub fn with_tap(mut self, tap: Link) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Register `handler` for `address`, replacing any earlier registration.
    pub fn register(&mut self, address: impl Into<String>, handler: impl FnMut(&[OscArg]) + 'static) {
        self.handlers
            .insert(address.into(), Handler::Plain(Box::new(handler)));
    }

    /// Register a handler that also receives `extra` on every call.
    pub fn register_with(
        &mut self,
        address: impl Into<String>,
        handler: impl FnMut(&[OscArg], &OscArg) + 'static,
        extra: OscArg,
    ) {
        self.handlers
            .insert(address.into(), Handler::WithExtra(Box::new(handler), extra));
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn tap(&self) -> Option<&Link> {
        self.tap.as_ref()
    }

    /// Send one message to the link's peer.  Never fails; see [`Link::send`].
    pub fn send(&mut self, envelope: &Envelope) {
        self.link.send(envelope);
    }

    /// Send a bundle to the link's peer.  Never fails; see [`Link::send_bundle`].
    pub fn send_bundle(&mut self, envelopes: &[Envelope]) {
        self.link.send_bundle(envelopes);
    }

    /// Drain and dispatch every queued datagram without blocking.
    ///
    /// Returns the number of handler invocations.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(datagram) = self.link.receive() {
            let packet = match codec::decode_packet(&datagram.bytes) {
                Ok(packet) => packet,
                Err(e) => {
                    trace!(link = %self.link.name(), source = %datagram.source, error = %e, "dropping undecodable datagram");
                    continue;
                }
            };
            let from_peer = self.link.peer().accepts_source(&datagram.source.host);

            for envelope in packet.into_envelopes() {
                if let Some(tap) = self.tap.as_mut() {
                    tap.send(&envelope);
                }
                if !from_peer {
                    trace!(link = %self.link.name(), source = %datagram.source, address = envelope.address(), "dropping message from unexpected source");
                    continue;
                }
                match self.handlers.get_mut(envelope.address()) {
                    Some(handler) => {
                        handler.invoke(envelope.args());
                        delivered += 1;
                    }
                    None => {
                        trace!(link = %self.link.name(), address = envelope.address(), "no handler registered");
                    }
                }
            }
        }
        delivered
    }
}

/// Single-slot mailbox shared between a handler and its owner.
///
/// `put` overwrites whatever is there (last write wins); `take` empties it.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    pub fn put(&self, value: T) {
        *self.slot.borrow_mut() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.borrow().is_none()
    }
}

impl<T: Clone> Mailbox<T> {
    /// Read without consuming.
    pub fn peek(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
