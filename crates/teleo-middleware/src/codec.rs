//! OSC 1.0 wire codec.
//!
//! Converts [`Packet`] values to datagram bytes and back, using [`rosc`] for
//! the framing.  Only the argument types the agent and the kit exchange are
//! accepted:
//!
//! | Tag | Argument |
//! |---|---|
//! | `i` | [`OscArg::Int`] |
//! | `f` | [`OscArg::Float`] |
//! | `s` | [`OscArg::Str`] |
//! | `b` | [`OscArg::Blob`] |
//! | `T` / `F` | [`OscArg::Bool`] |
//!
//! Any other type tag is a decode error; the dispatcher treats that as a
//! dropped datagram.

use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};
use teleo_types::{Envelope, OscArg, Packet, TeleoError};

/// Nesting limit for bundles inside bundles.
const MAX_BUNDLE_DEPTH: usize = 8;

/// Encode a message or bundle into one datagram.
///
/// # Errors
///
/// Returns [`TeleoError::Decode`] if the packet cannot be framed.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, TeleoError> {
    rosc::encoder::encode(&to_osc(packet))
        .map_err(|e| TeleoError::Decode(format!("cannot encode packet: {e:?}")))
}

/// Decode one datagram.
///
/// # Errors
///
/// Returns [`TeleoError::Decode`] for malformed framing, trailing bytes,
/// unsupported type tags, addresses without a leading `/`, or bundles nested
/// too deep.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, TeleoError> {
    let (rest, packet) = rosc::decoder::decode_udp(bytes)
        .map_err(|e| TeleoError::Decode(format!("{e:?}")))?;
    if !rest.is_empty() {
        return Err(TeleoError::Decode(format!(
            "{} trailing bytes after packet",
            rest.len()
        )));
    }
    from_osc(packet, 0)
}

fn to_osc(packet: &Packet) -> OscPacket {
    match packet {
        Packet::Message(envelope) => OscPacket::Message(OscMessage {
            addr: envelope.address().to_string(),
            args: envelope.args().iter().map(arg_to_osc).collect(),
        }),
        Packet::Bundle { timetag, content } => OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: (timetag >> 32) as u32,
                fractional: *timetag as u32,
            },
            content: content.iter().map(to_osc).collect(),
        }),
    }
}

fn arg_to_osc(arg: &OscArg) -> OscType {
    match arg {
        OscArg::Int(v) => OscType::Int(*v),
        OscArg::Float(v) => OscType::Float(*v),
        OscArg::Str(s) => OscType::String(s.clone()),
        OscArg::Blob(bytes) => OscType::Blob(bytes.clone()),
        OscArg::Bool(b) => OscType::Bool(*b),
    }
}

fn from_osc(packet: OscPacket, depth: usize) -> Result<Packet, TeleoError> {
    match packet {
        OscPacket::Message(msg) => {
            let args = msg
                .args
                .into_iter()
                .map(arg_from_osc)
                .collect::<Result<Vec<_>, _>>()?;
            Envelope::new(msg.addr, args)
                .map(Packet::Message)
                .map_err(|e| TeleoError::Decode(e.to_string()))
        }
        OscPacket::Bundle(bundle) => {
            if depth >= MAX_BUNDLE_DEPTH {
                return Err(TeleoError::Decode("bundle nesting too deep".to_string()));
            }
            let timetag =
                (u64::from(bundle.timetag.seconds) << 32) | u64::from(bundle.timetag.fractional);
            let content = bundle
                .content
                .into_iter()
                .map(|element| from_osc(element, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Packet::Bundle { timetag, content })
        }
    }
}

fn arg_from_osc(arg: OscType) -> Result<OscArg, TeleoError> {
    match arg {
        OscType::Int(v) => Ok(OscArg::Int(v)),
        OscType::Float(v) => Ok(OscArg::Float(v)),
        OscType::String(s) => Ok(OscArg::Str(s)),
        OscType::Blob(bytes) => Ok(OscArg::Blob(bytes)),
        OscType::Bool(b) => Ok(OscArg::Bool(b)),
        other => Err(TeleoError::Decode(format!("unsupported argument {other:?}"))),
    }
}
