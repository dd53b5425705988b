//! Datagram transports and the [`Link`] that sits on top of them.
//!
//! A [`Transport`] only moves bytes.  A [`Link`] binds a transport to one
//! configured peer and speaks OSC.  It encodes envelopes and bundles, and it
//! absorbs every transport fault so the caller's loop keeps running.
//!
//! # Implementations
//!
//! | Transport | Use |
//! |---|---|
//! | [`UdpTransport`] | Real sockets: one non-blocking listener plus one outbound socket (optionally broadcast). |
//! | [`MemoryTransport`] | In-process queues driven by a [`MemoryPeer`] handle, for tests and simulation. |

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use teleo_types::{Envelope, Packet, PeerIdentity, TeleoError};
use tracing::{debug, warn};

use crate::codec;

/// Largest datagram accepted by [`UdpTransport`].
const MAX_DATAGRAM: usize = 65_536;

/// One inbound datagram and the identity of its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub source: PeerIdentity,
    pub bytes: Vec<u8>,
}

/// Byte-level, connectionless transport.
///
/// # Contract
///
/// * `send_to` transmits one datagram.  It never blocks for long.
/// * `try_recv` never blocks: it returns `Ok(None)` when nothing is queued.
pub trait Transport {
    fn send_to(&mut self, peer: &PeerIdentity, bytes: &[u8]) -> Result<(), TeleoError>;

    fn try_recv(&mut self) -> Result<Option<Datagram>, TeleoError>;

    /// Local address of the listening socket, when there is one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UDP
// ─────────────────────────────────────────────────────────────────────────────

/// UDP transport: a non-blocking listening socket plus an outbound socket.
///
/// Both sockets are closed when the transport is dropped.
pub struct UdpTransport {
    inbound: UdpSocket,
    outbound: UdpSocket,
    resolved: HashMap<PeerIdentity, SocketAddr>,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind the listener on `listen` and an ephemeral outbound socket.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Bind`] if either socket cannot be bound or
    /// configured.  This is the only fatal transport error.
    pub fn bind(listen: SocketAddr, broadcast: bool) -> Result<Self, TeleoError> {
        let bind_err = |addr: String, e: std::io::Error| TeleoError::Bind {
            addr,
            details: e.to_string(),
        };

        let inbound = UdpSocket::bind(listen).map_err(|e| bind_err(listen.to_string(), e))?;
        inbound
            .set_nonblocking(true)
            .map_err(|e| bind_err(listen.to_string(), e))?;

        let out_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let outbound = UdpSocket::bind(out_addr).map_err(|e| bind_err(out_addr.to_string(), e))?;
        outbound
            .set_broadcast(broadcast)
            .map_err(|e| bind_err(out_addr.to_string(), e))?;

        debug!(%listen, broadcast, "udp transport bound");
        Ok(Self {
            inbound,
            outbound,
            resolved: HashMap::new(),
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    fn resolve(&mut self, peer: &PeerIdentity) -> Result<SocketAddr, TeleoError> {
        if let Some(addr) = self.resolved.get(peer) {
            return Ok(*addr);
        }
        let addr = (peer.host.as_str(), peer.port)
            .to_socket_addrs()
            .map_err(|e| TeleoError::Transport {
                link: peer.to_string(),
                details: format!("cannot resolve host: {e}"),
            })?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TeleoError::Transport {
                link: peer.to_string(),
                details: "host has no IPv4 address".to_string(),
            })?;
        self.resolved.insert(peer.clone(), addr);
        Ok(addr)
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, peer: &PeerIdentity, bytes: &[u8]) -> Result<(), TeleoError> {
        let addr = self.resolve(peer)?;
        self.outbound
            .send_to(bytes, addr)
            .map(|_| ())
            .map_err(|e| TeleoError::Transport {
                link: peer.to_string(),
                details: e.to_string(),
            })
    }

    fn try_recv(&mut self) -> Result<Option<Datagram>, TeleoError> {
        match self.inbound.recv_from(&mut self.buf) {
            Ok((n, src)) => Ok(Some(Datagram {
                source: PeerIdentity::new(src.ip().to_string(), src.port()),
                bytes: self.buf[..n].to_vec(),
            })),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TeleoError::Transport {
                link: self
                    .inbound
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unbound>".to_string()),
                details: e.to_string(),
            }),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inbound.local_addr().ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryQueues {
    inbox: VecDeque<Datagram>,
    outbox: Vec<(PeerIdentity, Vec<u8>)>,
    fail_sends: bool,
    auto_replies: HashMap<String, (String, Vec<u8>)>,
}

/// Transport backed by in-process queues.
///
/// The paired [`MemoryPeer`] plays the remote side: it injects inbound
/// datagrams and inspects what was sent.
pub struct MemoryTransport {
    queues: Rc<RefCell<MemoryQueues>>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryPeer) {
        let queues = Rc::new(RefCell::new(MemoryQueues::default()));
        (
            Self {
                queues: Rc::clone(&queues),
            },
            MemoryPeer { queues },
        )
    }
}

impl Transport for MemoryTransport {
    fn send_to(&mut self, peer: &PeerIdentity, bytes: &[u8]) -> Result<(), TeleoError> {
        let mut q = self.queues.borrow_mut();
        if q.fail_sends {
            return Err(TeleoError::Transport {
                link: peer.to_string(),
                details: "simulated send failure".to_string(),
            });
        }
        q.outbox.push((peer.clone(), bytes.to_vec()));

        // Scripted replies fire once per matching outbound message.
        let addresses: Vec<String> = codec::decode_packet(bytes)
            .map(|p| p.into_envelopes().iter().map(|e| e.address().to_string()).collect())
            .unwrap_or_default();
        for address in addresses {
            if let Some((host, reply)) = q.auto_replies.get(&address).cloned() {
                q.inbox.push_back(Datagram {
                    source: PeerIdentity::new(host, 0),
                    bytes: reply,
                });
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Datagram>, TeleoError> {
        Ok(self.queues.borrow_mut().inbox.pop_front())
    }
}

/// Remote end of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    queues: Rc<RefCell<MemoryQueues>>,
}

impl MemoryPeer {
    /// Queue `packet` as if it had arrived from `source_host`.
    ///
    /// A packet that cannot be encoded is queued as an empty datagram.
    pub fn inject(&self, source_host: &str, packet: &Packet) {
        self.inject_raw(source_host, codec::encode_packet(packet).unwrap_or_default());
    }

    /// Queue a single envelope from `source_host`.
    pub fn inject_message(&self, source_host: &str, envelope: Envelope) {
        self.inject(source_host, &Packet::Message(envelope));
    }

    /// Queue raw bytes, which need not be valid OSC.
    pub fn inject_raw(&self, source_host: &str, bytes: Vec<u8>) {
        self.queues.borrow_mut().inbox.push_back(Datagram {
            source: PeerIdentity::new(source_host, 0),
            bytes,
        });
    }

    /// Whenever a message on `address` is sent, queue `reply` from `source_host`.
    pub fn auto_reply(&self, address: &str, source_host: &str, reply: Envelope) {
        self.queues.borrow_mut().auto_replies.insert(
            address.to_string(),
            (
                source_host.to_string(),
                codec::encode_packet(&Packet::Message(reply)).unwrap_or_default(),
            ),
        );
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.queues.borrow_mut().fail_sends = fail;
    }

    /// Everything sent so far, decoded.  Undecodable datagrams are skipped.
    pub fn sent(&self) -> Vec<(PeerIdentity, Packet)> {
        self.queues
            .borrow()
            .outbox
            .iter()
            .filter_map(|(peer, bytes)| {
                codec::decode_packet(bytes)
                    .ok()
                    .map(|p| (peer.clone(), p))
            })
            .collect()
    }

    /// Addresses of every sent envelope, bundles flattened, in send order.
    pub fn sent_addresses(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .flat_map(|(_, p)| p.into_envelopes())
            .map(|e| e.address().to_string())
            .collect()
    }

    /// Number of inbound datagrams not yet received.
    pub fn pending_inbound(&self) -> usize {
        self.queues.borrow().inbox.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link
// ─────────────────────────────────────────────────────────────────────────────

/// An OSC link to one configured peer.
///
/// Outbound failures are logged and counted, never returned: a flaky network
/// must not stop the decision loop.
pub struct Link {
    name: String,
    peer: PeerIdentity,
    transport: Box<dyn Transport>,
    send_failures: u64,
}

impl Link {
    pub fn new(
        name: impl Into<String>,
        peer: PeerIdentity,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            peer,
            transport: Box::new(transport),
            send_failures: 0,
        }
    }

    /// Bind a UDP link listening on `listen` that talks to `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`TeleoError::Bind`] when the sockets cannot be acquired.
    pub fn udp(
        name: impl Into<String>,
        peer: PeerIdentity,
        listen: SocketAddr,
        broadcast: bool,
    ) -> Result<Self, TeleoError> {
        let name = name.into();
        let transport = UdpTransport::bind(listen, broadcast)?;
        debug!(link = %name, %peer, %listen, "link created");
        Ok(Self::new(name, peer, transport))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured peer: send target and expected source.
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Outbound datagrams that failed since the link was created.
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Send one message to the configured peer.
    pub fn send(&mut self, envelope: &Envelope) {
        self.transmit(None, &Packet::Message(envelope.clone()));
    }

    /// Send one message to an explicit peer.
    pub fn send_to(&mut self, peer: &PeerIdentity, envelope: &Envelope) {
        self.transmit(Some(peer), &Packet::Message(envelope.clone()));
    }

    /// Send `envelopes` as one immediate bundle.  An empty slice sends nothing.
    pub fn send_bundle(&mut self, envelopes: &[Envelope]) {
        if envelopes.is_empty() {
            return;
        }
        self.transmit(None, &Packet::bundle(envelopes.iter().cloned()));
    }

    /// Next inbound datagram, or `None` when nothing is queued.
    ///
    /// Receive faults are logged and reported as "nothing queued".
    pub fn receive(&mut self) -> Option<Datagram> {
        match self.transport.try_recv() {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(link = %self.name, error = %e, "receive failed");
                None
            }
        }
    }

    fn transmit(&mut self, to: Option<&PeerIdentity>, packet: &Packet) {
        let target = to.unwrap_or(&self.peer);
        let sent = codec::encode_packet(packet)
            .and_then(|bytes| self.transport.send_to(target, &bytes));
        if let Err(e) = sent {
            self.send_failures += 1;
            warn!(
                link = %self.name,
                peer = %target,
                failures = self.send_failures,
                error = %e,
                "send failed"
            );
        }
    }
}
