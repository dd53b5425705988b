use std::fmt;

use thiserror::Error;

/// OSC bundle timetag meaning "deliver immediately".
pub const TIMETAG_IMMEDIATELY: u64 = 1;

/// The symbolic loopback name accepted as an alias of [`LOOPBACK_V4`].
pub const LOCALHOST: &str = "localhost";
/// The IPv4 loopback address as it appears in a datagram's source.
pub const LOOPBACK_V4: &str = "127.0.0.1";

/// One typed argument of an OSC message.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    /// Encoded as the argument-less `T` / `F` type tags.
    Bool(bool),
}

impl OscArg {
    /// The OSC type-tag character for this argument.
    pub fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::Str(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Bool(true) => 'T',
            OscArg::Bool(false) => 'F',
        }
    }

    /// Numeric view of the argument. Booleans map to `0.0` / `1.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(i) => Some(f64::from(*i)),
            OscArg::Float(f) => Some(f64::from(*f)),
            OscArg::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            OscArg::Str(_) | OscArg::Blob(_) => None,
        }
    }

    /// Integer view of the argument. Floats are accepted only when integral.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            OscArg::Int(i) => Some(*i),
            OscArg::Float(f) if f.fract() == 0.0 => Some(*f as i32),
            OscArg::Bool(b) => Some(i32::from(*b)),
            _ => None,
        }
    }

    /// Truth view of the argument. Numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OscArg::Bool(b) => Some(*b),
            OscArg::Int(i) => Some(*i != 0),
            OscArg::Float(f) => Some(*f != 0.0),
            OscArg::Str(_) | OscArg::Blob(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        OscArg::Bool(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::Str(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::Str(v)
    }
}

impl From<Vec<u8>> for OscArg {
    fn from(v: Vec<u8>) -> Self {
        OscArg::Blob(v)
    }
}

/// One addressed, typed message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    address: String,
    args: Vec<OscArg>,
}

impl Envelope {
    /// Build an envelope, rejecting addresses that do not start with `/`.
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Result<Self, TeleoError> {
        let address = address.into();
        if !address.starts_with('/') {
            return Err(TeleoError::InvalidAddress(address));
        }
        Ok(Self { address, args })
    }

    // Only for the compile-time addresses owned by this crate.
    fn fixed(address: &'static str, args: Vec<OscArg>) -> Self {
        Self {
            address: address.to_string(),
            args,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[OscArg] {
        &self.args
    }

    /// First argument, if any.
    pub fn first(&self) -> Option<&OscArg> {
        self.args.first()
    }
}

/// A decoded datagram: a single message or a (possibly nested) bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Envelope),
    Bundle { timetag: u64, content: Vec<Packet> },
}

impl Packet {
    /// An immediate bundle of `envelopes`, in order.
    pub fn bundle(envelopes: impl IntoIterator<Item = Envelope>) -> Self {
        Packet::Bundle {
            timetag: TIMETAG_IMMEDIATELY,
            content: envelopes.into_iter().map(Packet::Message).collect(),
        }
    }

    /// Flatten into envelopes, depth-first, preserving packet order.
    pub fn into_envelopes(self) -> Vec<Envelope> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Envelope>) {
        match self {
            Packet::Message(env) => out.push(env),
            Packet::Bundle { content, .. } => {
                for p in content {
                    p.flatten_into(out);
                }
            }
        }
    }
}

/// `(host, port)` of a peer, used both as send target and as source filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub host: String,
    pub port: u16,
}

impl PeerIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `true` if a datagram whose source host is `source_host` comes from this
    /// peer. Ports are not compared; senders use ephemeral source ports.
    pub fn accepts_source(&self, source_host: &str) -> bool {
        hosts_match(&self.host, source_host)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Host equality with loopback aliasing: `127.0.0.1` and `localhost` are
/// interchangeable, in either direction.
pub fn hosts_match(a: &str, b: &str) -> bool {
    a == b || (a == LOOPBACK_V4 && b == LOCALHOST) || (a == LOCALHOST && b == LOOPBACK_V4)
}

/// Behavioral regime of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMode {
    Opened,
    Closed,
}

impl AgentMode {
    pub fn opposite(self) -> Self {
        match self {
            AgentMode::Opened => AgentMode::Closed,
            AgentMode::Closed => AgentMode::Opened,
        }
    }

    /// Integer sent on `/state`.
    pub fn wire_code(self) -> i32 {
        match self {
            AgentMode::Opened => 1,
            AgentMode::Closed => 2,
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Opened => write!(f, "opened"),
            AgentMode::Closed => write!(f, "closed"),
        }
    }
}

/// The two moves available to the agent on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Stay,
    Change,
}

impl Action {
    /// Evaluation order. Ties go to the first entry.
    pub const ALL: [Action; 2] = [Action::Stay, Action::Change];

    pub fn next_mode(self, current: AgentMode) -> AgentMode {
        match self {
            Action::Stay => current,
            Action::Change => current.opposite(),
        }
    }
}

/// Commands understood by the MisBKit firmware.
///
/// The connection commands expect a reply on the same address; the motor and
/// control commands are fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum KitCommand {
    Pair { kit_id: i32 },
    IsPaired { kit_id: i32 },
    GetKitIds,
    Wheel { motor_id: i32, speed: f32 },
    Joint { motor_id: i32, angle: f32 },
    Speed { motor_id: i32, speed: f32 },
    Stop { motor_id: i32 },
    Scan,
    StopAll,
    Reboot,
}

impl KitCommand {
    pub fn address(&self) -> &'static str {
        match self {
            KitCommand::Pair { .. } => "/pair",
            KitCommand::IsPaired { .. } => "/isPaired",
            KitCommand::GetKitIds => "/get/kit/ids",
            KitCommand::Wheel { .. } => "/set/motor/wheel",
            KitCommand::Joint { .. } => "/set/motor/joint",
            KitCommand::Speed { .. } => "/set/motor/speed",
            KitCommand::Stop { .. } => "/set/motor/stop",
            KitCommand::Scan => "/scan",
            KitCommand::StopAll => "/stop-all",
            KitCommand::Reboot => "/reboot",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let args = match self {
            KitCommand::Pair { kit_id } | KitCommand::IsPaired { kit_id } => {
                vec![OscArg::Int(*kit_id)]
            }
            KitCommand::Wheel { motor_id, speed } | KitCommand::Speed { motor_id, speed } => {
                vec![OscArg::Int(*motor_id), OscArg::Float(*speed)]
            }
            KitCommand::Joint { motor_id, angle } => {
                vec![OscArg::Int(*motor_id), OscArg::Float(*angle)]
            }
            KitCommand::Stop { motor_id } => vec![OscArg::Int(*motor_id)],
            KitCommand::GetKitIds | KitCommand::Scan | KitCommand::StopAll | KitCommand::Reboot => {
                Vec::new()
            }
        };
        Envelope::fixed(self.address(), args)
    }
}

/// Error type shared by every Teleo crate.
#[derive(Error, Debug)]
pub enum TeleoError {
    #[error("Bind failed on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("Transport fault on {link}: {details}")]
    Transport { link: String, details: String },

    #[error("Malformed packet: {0}")]
    Decode(String),

    #[error("Invalid OSC address {0:?}: must start with '/'")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
