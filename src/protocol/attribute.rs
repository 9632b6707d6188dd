//! Attribute codec.
//!
//! Wire layout of one attribute (big-endian):
//!
//! ```text
//! [u16 type] [u16 length = payload_len + 4] [payload] [space padding to 4-byte boundary]
//! ```
//!
//! The set of attribute types is fixed by the daemon, so it is modelled as
//! a closed enum: [`Attribute::type_tag`] and [`Attribute::encode_into`]
//! cover the encode side, and [`Attribute::decode`] is the one static
//! mapping from type tag to decoder. Unknown tags decode to
//! [`Attribute::Unknown`] with the raw payload kept intact.

// Rust guideline compliant 2026-02

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::types::{ContainerKind, Id32, PersonaFlags, ResponseCode, SiteId};
use crate::error::ProtocolError;

/// Size of the `{type, length}` attribute header.
pub const ATTR_HEADER_LEN: usize = 4;

/// Largest payload an attribute can carry (length field is a u16 that
/// includes the header).
pub const MAX_ATTR_PAYLOAD: usize = u16::MAX as usize - ATTR_HEADER_LEN;

/// Fill byte for alignment padding. Never interpreted by the decoder.
const PAD_BYTE: u8 = b' ';

/// Attribute type tags.
pub mod attr_type {
    /// Response code (u16).
    pub const RESPONSE_CODE: u16 = 0x0000;
    /// Persona id (32 bytes).
    pub const PERSONA_ID: u16 = 0x0001;
    /// Application URL (ASCII).
    pub const APP_URL: u16 = 0x0002;
    /// Manifest URL (ASCII).
    pub const MANIFEST_URL: u16 = 0x0003;
    /// Persona display name (ASCII).
    pub const PERSONA_DISPLAY_NAME: u16 = 0x000D;
    /// Persona password (ASCII).
    pub const PERSONA_PASSWORD: u16 = 0x000E;
    /// Network address (4 or 16 raw bytes).
    pub const ADDRESS: u16 = 0x0010;
    /// Container type (u16).
    pub const CONTAINER_TYPE: u16 = 0x0011;
    /// Site id (`<type>:<hex>` ASCII).
    pub const SITE_ID: u16 = 0x0013;
    /// Manifest name (ASCII).
    pub const MANIFEST_NAME: u16 = 0x0014;
    /// Presence flag: signed / logged in.
    pub const SIGNED: u16 = 0x0015;
    /// Token id (32 bytes).
    pub const TOKEN_ID: u16 = 0x0016;
    /// Command argument (ASCII, repeatable).
    pub const ARGUMENT: u16 = 0x0017;
    /// Stdout descriptor index (u8).
    pub const STDOUT_INDEX: u16 = 0x0018;
    /// Stderr descriptor index (u8).
    pub const STDERR_INDEX: u16 = 0x0019;
    /// Stdin descriptor index (u8).
    pub const STDIN_INDEX: u16 = 0x001A;
    /// Process exit code (i32).
    pub const EXIT_CODE: u16 = 0x001C;
    /// Persona flags (two i32 masks).
    pub const PERSONA_FLAGS: u16 = 0x001D;
    /// System type (ASCII).
    pub const SYSTEM_TYPE: u16 = 0x001E;
    /// Signature URL (ASCII).
    pub const SIGNATURE_URL: u16 = 0x001F;
    /// Credential (ASCII).
    pub const CREDENTIAL: u16 = 0x0020;
    /// Presence flag: guest persona.
    pub const GUEST: u16 = 0x0021;
}

/// One typed protocol attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Response code of a reply.
    ResponseCode(ResponseCode),
    /// Persona identifier.
    PersonaId(Id32),
    /// Application URL (domain).
    AppUrl(String),
    /// Manifest URL for registration.
    ManifestUrl(String),
    /// Persona display name.
    PersonaDisplayName(String),
    /// Persona password.
    PersonaPassword(String),
    /// Container network address.
    Address(IpAddr),
    /// Kind of container.
    ContainerType(ContainerKind),
    /// Site fingerprint.
    SiteId(SiteId),
    /// Name of a stored manifest file.
    ManifestName(String),
    /// Presence flag: signed application / logged-in persona.
    Signed,
    /// Token identifier.
    TokenId(Id32),
    /// One command argument.
    Argument(String),
    /// Index of the stdout descriptor in the ancillary array.
    StdoutIndex(u8),
    /// Index of the stderr descriptor in the ancillary array.
    StderrIndex(u8),
    /// Index of the stdin descriptor in the ancillary array.
    StdinIndex(u8),
    /// Remote process exit code.
    ExitCode(i32),
    /// Persona flag masks.
    PersonaFlags(PersonaFlags),
    /// System (platform) type.
    SystemType(String),
    /// Signature URL for registration; empty means "infer".
    SignatureUrl(String),
    /// Container credential.
    Credential(String),
    /// Presence flag: guest persona.
    Guest,
    /// An attribute type this client does not know.
    Unknown {
        /// Type tag as received.
        ty: u16,
        /// Raw payload, padding excluded.
        data: Vec<u8>,
    },
}

impl Attribute {
    /// Wire type tag of this attribute.
    pub fn type_tag(&self) -> u16 {
        use attr_type as t;
        match self {
            Self::ResponseCode(_) => t::RESPONSE_CODE,
            Self::PersonaId(_) => t::PERSONA_ID,
            Self::AppUrl(_) => t::APP_URL,
            Self::ManifestUrl(_) => t::MANIFEST_URL,
            Self::PersonaDisplayName(_) => t::PERSONA_DISPLAY_NAME,
            Self::PersonaPassword(_) => t::PERSONA_PASSWORD,
            Self::Address(_) => t::ADDRESS,
            Self::ContainerType(_) => t::CONTAINER_TYPE,
            Self::SiteId(_) => t::SITE_ID,
            Self::ManifestName(_) => t::MANIFEST_NAME,
            Self::Signed => t::SIGNED,
            Self::TokenId(_) => t::TOKEN_ID,
            Self::Argument(_) => t::ARGUMENT,
            Self::StdoutIndex(_) => t::STDOUT_INDEX,
            Self::StderrIndex(_) => t::STDERR_INDEX,
            Self::StdinIndex(_) => t::STDIN_INDEX,
            Self::ExitCode(_) => t::EXIT_CODE,
            Self::PersonaFlags(_) => t::PERSONA_FLAGS,
            Self::SystemType(_) => t::SYSTEM_TYPE,
            Self::SignatureUrl(_) => t::SIGNATURE_URL,
            Self::Credential(_) => t::CREDENTIAL,
            Self::Guest => t::GUEST,
            Self::Unknown { ty, .. } => *ty,
        }
    }

    /// Unpadded payload bytes.
    fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = match self {
            Self::ResponseCode(code) => code.0.to_be_bytes().to_vec(),
            Self::PersonaId(id) | Self::TokenId(id) => id.0.to_vec(),
            Self::AppUrl(s)
            | Self::ManifestUrl(s)
            | Self::PersonaDisplayName(s)
            | Self::PersonaPassword(s)
            | Self::ManifestName(s)
            | Self::Argument(s)
            | Self::SystemType(s)
            | Self::SignatureUrl(s)
            | Self::Credential(s) => ascii_bytes(s)?,
            Self::SiteId(site) => ascii_bytes(&site.canonical())?,
            Self::Address(IpAddr::V4(v4)) => v4.octets().to_vec(),
            Self::Address(IpAddr::V6(v6)) => v6.octets().to_vec(),
            Self::ContainerType(kind) => u16::from(*kind).to_be_bytes().to_vec(),
            Self::Signed | Self::Guest => Vec::new(),
            Self::StdoutIndex(ix) | Self::StderrIndex(ix) | Self::StdinIndex(ix) => vec![*ix],
            Self::ExitCode(code) => code.to_be_bytes().to_vec(),
            Self::PersonaFlags(flags) => {
                let mut b = Vec::with_capacity(8);
                b.extend_from_slice(&flags.set.to_be_bytes());
                b.extend_from_slice(&flags.unset.to_be_bytes());
                b
            }
            Self::Unknown { data, .. } => data.clone(),
        };
        if bytes.len() > MAX_ATTR_PAYLOAD {
            return Err(ProtocolError::Encoding(format!(
                "attribute 0x{:04x} payload of {} bytes exceeds {MAX_ATTR_PAYLOAD}",
                self.type_tag(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Append header, payload and padding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let payload = self.payload()?;
        let length = (payload.len() + ATTR_HEADER_LEN) as u16;
        buf.extend_from_slice(&self.type_tag().to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&payload);
        let padded = align4(payload.len());
        buf.resize(buf.len() + (padded - payload.len()), PAD_BYTE);
        Ok(())
    }

    /// Encode to a standalone byte vector (always a multiple of 4 long).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode one attribute from its type tag and unpadded payload.
    pub fn decode(ty: u16, data: &[u8]) -> Result<Self, ProtocolError> {
        use attr_type as t;
        let attr = match ty {
            t::RESPONSE_CODE => Self::ResponseCode(ResponseCode(be_u16("response-code", data)?)),
            t::PERSONA_ID => Self::PersonaId(id32("persona-id", data)?),
            t::APP_URL => Self::AppUrl(ascii("app-url", data)?),
            t::MANIFEST_URL => Self::ManifestUrl(ascii("manifest-url", data)?),
            t::PERSONA_DISPLAY_NAME => {
                Self::PersonaDisplayName(ascii("persona-display-name", data)?)
            }
            t::PERSONA_PASSWORD => Self::PersonaPassword(ascii("persona-password", data)?),
            t::ADDRESS => Self::Address(address(data)?),
            t::CONTAINER_TYPE => {
                Self::ContainerType(ContainerKind::from(be_u16("container-type", data)?))
            }
            t::SITE_ID => Self::SiteId(ascii("site-id", data)?.parse()?),
            t::MANIFEST_NAME => Self::ManifestName(ascii("manifest-name", data)?),
            t::SIGNED => Self::Signed,
            t::TOKEN_ID => Self::TokenId(id32("token-id", data)?),
            t::ARGUMENT => Self::Argument(ascii("argument", data)?),
            t::STDOUT_INDEX => Self::StdoutIndex(fixed::<1>("stdout-index", data)?[0]),
            t::STDERR_INDEX => Self::StderrIndex(fixed::<1>("stderr-index", data)?[0]),
            t::STDIN_INDEX => Self::StdinIndex(fixed::<1>("stdin-index", data)?[0]),
            t::EXIT_CODE => Self::ExitCode(i32::from_be_bytes(fixed::<4>("exit-code", data)?)),
            t::PERSONA_FLAGS => {
                let raw = fixed::<8>("persona-flags", data)?;
                Self::PersonaFlags(PersonaFlags {
                    set: i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
                    unset: i32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
                })
            }
            t::SYSTEM_TYPE => Self::SystemType(ascii("system-type", data)?),
            t::SIGNATURE_URL => Self::SignatureUrl(ascii("signature-url", data)?),
            t::CREDENTIAL => Self::Credential(ascii("credential", data)?),
            t::GUEST => Self::Guest,
            _ => Self::Unknown {
                ty,
                data: data.to_vec(),
            },
        };
        Ok(attr)
    }
}

/// Decode a concatenation of padded attributes.
///
/// Any truncated header or declared length that overruns the buffer fails
/// the whole buffer; nothing partially parsed is returned.
pub fn decode_attributes(mut buf: &[u8]) -> Result<Vec<Attribute>, ProtocolError> {
    let mut attrs = Vec::new();
    while !buf.is_empty() {
        if buf.len() < ATTR_HEADER_LEN {
            return Err(ProtocolError::Malformed(format!(
                "truncated attribute header ({} bytes left)",
                buf.len()
            )));
        }
        let ty = u16::from_be_bytes([buf[0], buf[1]]);
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < ATTR_HEADER_LEN {
            return Err(ProtocolError::Malformed(format!(
                "attribute 0x{ty:04x} declares length {length}, shorter than its header"
            )));
        }
        if length > buf.len() {
            return Err(ProtocolError::Malformed(format!(
                "attribute 0x{ty:04x} declares length {length}, only {} bytes left",
                buf.len()
            )));
        }
        attrs.push(Attribute::decode(ty, &buf[ATTR_HEADER_LEN..length])?);
        // Padding of the final attribute may be absent.
        let advance = align4(length).min(buf.len());
        buf = &buf[advance..];
    }
    Ok(attrs)
}

/// Round `n` up to the next multiple of 4.
pub fn align4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

fn ascii_bytes(s: &str) -> Result<Vec<u8>, ProtocolError> {
    if !s.is_ascii() {
        return Err(ProtocolError::Encoding(format!("{s:?} is not ASCII")));
    }
    Ok(s.as_bytes().to_vec())
}

fn ascii(attr: &'static str, data: &[u8]) -> Result<String, ProtocolError> {
    if !data.is_ascii() {
        return Err(ProtocolError::Malformed(format!("{attr} is not ASCII")));
    }
    // ASCII is always valid UTF-8.
    Ok(String::from_utf8_lossy(data).into_owned())
}

fn fixed<const N: usize>(attr: &'static str, data: &[u8]) -> Result<[u8; N], ProtocolError> {
    data.try_into().map_err(|_| ProtocolError::WrongLength {
        attr,
        expected: N,
        actual: data.len(),
    })
}

fn be_u16(attr: &'static str, data: &[u8]) -> Result<u16, ProtocolError> {
    Ok(u16::from_be_bytes(fixed::<2>(attr, data)?))
}

fn id32(attr: &'static str, data: &[u8]) -> Result<Id32, ProtocolError> {
    Ok(Id32(fixed::<32>(attr, data)?))
}

fn address(data: &[u8]) -> Result<IpAddr, ProtocolError> {
    match data.len() {
        4 => Ok(IpAddr::V4(Ipv4Addr::from(fixed::<4>("address", data)?))),
        16 => Ok(IpAddr::V6(Ipv6Addr::from(fixed::<16>("address", data)?))),
        actual => Err(ProtocolError::Malformed(format!(
            "address has length {actual}, expected 4 (IPv4) or 16 (IPv6)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(attr: &Attribute) {
        let bytes = attr.encode().unwrap();
        assert_eq!(bytes.len() % 4, 0, "encoding of {attr:?} is not aligned");
        let decoded = decode_attributes(&bytes).unwrap();
        assert_eq!(decoded, vec![attr.clone()]);
    }

    #[test]
    fn known_attributes_round_trip() {
        let samples = vec![
            Attribute::ResponseCode(ResponseCode::NOT_FOUND),
            Attribute::PersonaId(Id32::ANONYMOUS),
            Attribute::PersonaId(Id32([0xFF; 32])),
            Attribute::TokenId(Id32([0x5A; 32])),
            Attribute::AppUrl("admin.flywithkite.com".into()),
            Attribute::ManifestUrl("https://photos.example/manifest.json".into()),
            Attribute::PersonaDisplayName("A".repeat(MAX_ATTR_PAYLOAD)),
            Attribute::PersonaPassword(String::new()),
            Attribute::Address("10.0.0.7".parse().unwrap()),
            Attribute::Address("fd00::1".parse().unwrap()),
            Attribute::ContainerType(ContainerKind::AppInstance),
            Attribute::SiteId("SHA256:00ff".parse().unwrap()),
            Attribute::ManifestName("photos-1.2.3".into()),
            Attribute::Signed,
            Attribute::Guest,
            Attribute::Argument("ls".into()),
            Attribute::StdoutIndex(0),
            Attribute::StderrIndex(255),
            Attribute::StdinIndex(2),
            Attribute::ExitCode(-1),
            Attribute::ExitCode(i32::MAX),
            Attribute::PersonaFlags(PersonaFlags { set: 0, unset: 0 }),
            Attribute::PersonaFlags(PersonaFlags { set: -1, unset: -1 }),
            Attribute::SystemType("x86_64-linux".into()),
            Attribute::SignatureUrl(String::new()),
            Attribute::Credential("hunter2".into()),
        ];
        for attr in &samples {
            round_trip(attr);
        }
    }

    #[test]
    fn padding_uses_spaces_and_length_excludes_it() {
        let bytes = Attribute::AppUrl("abcde".into()).encode().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[0x00, 0x02, 0x00, 0x09]);
        assert_eq!(&bytes[4..9], b"abcde");
        assert_eq!(&bytes[9..], b"   ");
    }

    #[test]
    fn padding_content_is_never_inspected() {
        let mut bytes = Attribute::StdoutIndex(3).encode().unwrap();
        bytes[5] = 0xFF;
        bytes[6] = 0x00;
        bytes[7] = 0x7F;
        assert_eq!(decode_attributes(&bytes).unwrap(), vec![Attribute::StdoutIndex(3)]);
    }

    #[test]
    fn unknown_type_is_preserved_and_parsing_continues() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x7E, 0x01, 0x00, 0x07, 0xDE, 0xAD, 0xBE, b' ']);
        Attribute::ExitCode(3).encode_into(&mut buf).unwrap();
        let attrs = decode_attributes(&buf).unwrap();
        assert_eq!(
            attrs,
            vec![
                Attribute::Unknown {
                    ty: 0x7E01,
                    data: vec![0xDE, 0xAD, 0xBE],
                },
                Attribute::ExitCode(3),
            ]
        );
    }

    #[test]
    fn truncated_header_is_malformed() {
        let mut buf = Attribute::Signed.encode().unwrap();
        buf.extend_from_slice(&[0x00, 0x01]);
        assert!(matches!(decode_attributes(&buf), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn overlong_declared_length_is_malformed() {
        let buf = [0x00, 0x02, 0x00, 0x40, b'a', b'b', b'c', b'd'];
        assert!(matches!(decode_attributes(&buf), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn length_shorter_than_header_is_malformed() {
        let buf = [0x00, 0x15, 0x00, 0x00];
        assert!(matches!(decode_attributes(&buf), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn fixed_size_attributes_reject_wrong_length() {
        let cases: [(u16, usize); 5] = [
            (attr_type::RESPONSE_CODE, 3),
            (attr_type::PERSONA_ID, 31),
            (attr_type::EXIT_CODE, 2),
            (attr_type::PERSONA_FLAGS, 4),
            (attr_type::STDIN_INDEX, 0),
        ];
        for (ty, len) in cases {
            let err = Attribute::decode(ty, &vec![0u8; len]).unwrap_err();
            assert!(matches!(err, ProtocolError::WrongLength { actual, .. } if actual == len));
        }
    }

    #[test]
    fn address_length_error_names_both_families() {
        for len in [3, 8, 17] {
            let err = Attribute::decode(attr_type::ADDRESS, &vec![1u8; len]).unwrap_err();
            let ProtocolError::Malformed(msg) = err else {
                panic!("expected a malformed address, got {err:?}");
            };
            assert!(msg.contains(&format!("length {len}")), "{msg}");
            assert!(msg.contains("4 (IPv4) or 16 (IPv6)"), "{msg}");
        }
    }

    #[test]
    fn odd_site_digest_is_rejected() {
        let err = Attribute::decode(attr_type::SITE_ID, b"SHA256:abc").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn non_ascii_strings_are_rejected_both_ways() {
        assert!(matches!(
            Attribute::Argument("héllo".into()).encode(),
            Err(ProtocolError::Encoding(_))
        ));
        assert!(matches!(
            Attribute::decode(attr_type::ARGUMENT, &[0xC3, 0xA9]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let attr = Attribute::Argument("x".repeat(MAX_ATTR_PAYLOAD + 1));
        assert!(matches!(attr.encode(), Err(ProtocolError::Encoding(_))));
    }
}
