//! Packet framing.
//!
//! ```text
//! [u16 BE opcode] [u16 BE flags] [attribute]*
//! ```
//!
//! The control socket is `SOCK_SEQPACKET`, so one datagram is exactly one
//! packet and no length prefix is needed at this level.

use super::attribute::{decode_attributes, Attribute};
use super::types::{Id32, ResponseCode};
use crate::error::ProtocolError;

/// Size of the packet header.
pub const PACKET_HEADER_LEN: usize = 4;

/// Request opcodes. Replies carry the same value with [`opcode::RESPONSE`] set.
pub mod opcode {
    /// Persona lookup (with a persona id) or enumeration (without).
    pub const PERSONA_LOOKUP: u16 = 0x0100;
    /// Create a persona.
    pub const CREATE_PERSONA: u16 = 0x0101;
    /// Look up an installed application by URL.
    pub const APP_LOOKUP: u16 = 0x0200;
    /// Register (install) an application from a manifest URL.
    pub const REGISTER_APP: u16 = 0x0201;
    /// Look up the container behind a network address.
    pub const CONTAINER_LOOKUP: u16 = 0x0400;
    /// Update a container's credential.
    pub const UPDATE_CONTAINER: u16 = 0x0403;
    /// Spawn a process inside a container.
    pub const SPAWN_PROCESS: u16 = 0x0405;
    /// System information.
    pub const SYSTEM_INFO: u16 = 0x0500;

    /// Bit set on every reply opcode.
    pub const RESPONSE: u16 = 0x8000;

    /// Human-readable name for logs.
    pub fn name(op: u16) -> &'static str {
        match op & !RESPONSE {
            PERSONA_LOOKUP => "persona-lookup",
            CREATE_PERSONA => "create-persona",
            APP_LOOKUP => "app-lookup",
            REGISTER_APP => "register-app",
            CONTAINER_LOOKUP => "container-lookup",
            UPDATE_CONTAINER => "update-container",
            SPAWN_PROCESS => "spawn-process",
            SYSTEM_INFO => "system-info",
            _ => "unknown",
        }
    }
}

/// Packet flag bits.
pub mod flags {
    /// Final packet of a streamed multi-packet reply.
    pub const IS_LAST: u16 = 0x0002;
}

/// One framed protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Operation code.
    pub opcode: u16,
    /// Flag bits (see [`flags`]).
    pub flags: u16,
    /// Attributes in wire order.
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// A request with no flags.
    pub fn request(opcode: u16, attributes: Vec<Attribute>) -> Self {
        Self { opcode, flags: 0, attributes }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        frame(self.opcode, self.flags, &self.attributes)
    }

    /// Parse wire bytes into a packet.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < PACKET_HEADER_LEN {
            return Err(ProtocolError::Malformed(format!(
                "truncated packet header ({} bytes)",
                bytes.len()
            )));
        }
        let opcode = u16::from_be_bytes([bytes[0], bytes[1]]);
        let flags = u16::from_be_bytes([bytes[2], bytes[3]]);
        let attributes = decode_attributes(&bytes[PACKET_HEADER_LEN..])?;
        Ok(Self { opcode, flags, attributes })
    }

    /// Whether the opcode carries the response bit.
    pub fn is_response(&self) -> bool {
        self.opcode & opcode::RESPONSE != 0
    }

    /// Whether this is the final packet of a streamed reply.
    pub fn is_last(&self) -> bool {
        self.flags & flags::IS_LAST != 0
    }

    /// First attribute for which `f` returns `Some`.
    pub fn find<'a, T>(&'a self, f: impl FnMut(&'a Attribute) -> Option<T>) -> Option<T> {
        self.attributes.iter().find_map(f)
    }

    /// Whether any attribute satisfies `f`.
    pub fn has(&self, f: impl FnMut(&Attribute) -> bool) -> bool {
        self.attributes.iter().any(f)
    }

    /// The response code attribute, if present.
    pub fn response_code(&self) -> Option<ResponseCode> {
        self.find(|a| match a {
            Attribute::ResponseCode(code) => Some(*code),
            _ => None,
        })
    }

    /// The response code, or [`ProtocolError::MissingAttribute`].
    pub fn require_response_code(&self) -> Result<ResponseCode, ProtocolError> {
        self.response_code().ok_or(ProtocolError::MissingAttribute("response-code"))
    }

    /// The first persona id attribute.
    pub fn persona_id(&self) -> Option<Id32> {
        self.find(|a| match a {
            Attribute::PersonaId(id) => Some(*id),
            _ => None,
        })
    }
}

/// Frame `attrs` behind an `{opcode, flags}` header.
pub fn frame(opcode: u16, flags: u16, attrs: &[Attribute]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(PACKET_HEADER_LEN + attrs.len() * 8);
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(&flags.to_be_bytes());
    for attr in attrs {
        attr.encode_into(&mut buf)?;
    }
    Ok(buf)
}
