//! Value types carried inside protocol attributes.

use std::fmt;
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Response code returned by the daemon in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    /// Operation succeeded.
    pub const SUCCESS: Self = Self(0);
    /// Daemon-side failure.
    pub const INTERNAL_ERROR: Self = Self(6);
    /// The addressed object does not exist.
    pub const NOT_FOUND: Self = Self(7);
    /// The caller may not perform this operation.
    pub const NOT_ALLOWED: Self = Self(8);

    /// `true` for code 0.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// `true` for code 6.
    pub fn is_internal_error(self) -> bool {
        self == Self::INTERNAL_ERROR
    }

    /// `true` for code 7.
    pub fn is_not_found(self) -> bool {
        self == Self::NOT_FOUND
    }

    /// `true` for code 8.
    pub fn is_not_allowed(self) -> bool {
        self == Self::NOT_ALLOWED
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "success",
            Self::INTERNAL_ERROR => "internal-error",
            Self::NOT_FOUND => "not-found",
            Self::NOT_ALLOWED => "not-allowed",
            _ => "unknown",
        };
        write!(f, "{name} ({})", self.0)
    }
}

/// Kind of container a network address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// A persona container (wire value 1).
    Persona,
    /// An application instance (wire value 2).
    AppInstance,
    /// A kind this client does not know about.
    Other(u16),
}

impl From<u16> for ContainerKind {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::Persona,
            2 => Self::AppInstance,
            other => Self::Other(other),
        }
    }
}

impl From<ContainerKind> for u16 {
    fn from(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Persona => 1,
            ContainerKind::AppInstance => 2,
            ContainerKind::Other(other) => other,
        }
    }
}

/// Persona flag masks: bits to set and bits to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersonaFlags {
    /// Bits set by this update.
    pub set: i32,
    /// Bits cleared by this update.
    pub unset: i32,
}

impl PersonaFlags {
    /// Bit 0: the persona is a superuser.
    pub const SUPERUSER: i32 = 0x1;

    /// Flags that only grant superuser.
    pub fn superuser() -> Self {
        Self {
            set: Self::SUPERUSER,
            unset: 0,
        }
    }

    /// `set & !unset`.
    pub fn effective(self) -> i32 {
        self.set & !self.unset
    }

    /// Whether the effective mask carries the superuser bit.
    pub fn is_superuser(self) -> bool {
        self.effective() & Self::SUPERUSER != 0
    }
}

/// A 32-byte identifier (persona ids, token ids), hex-encoded at the API
/// boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id32(pub [u8; 32]);

/// Persona identifier.
pub type PersonaId = Id32;
/// Token identifier.
pub type TokenId = Id32;

impl Id32 {
    /// Byte length on the wire.
    pub const LEN: usize = 32;

    /// The all-zero identity (`"0"` * 64): the anonymous persona.
    pub const ANONYMOUS: Self = Self([0; 32]);

    /// Build from a wire payload, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| ProtocolError::WrongLength {
            attr: "id",
            expected: Self::LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Whether this is [`Id32::ANONYMOUS`].
    pub fn is_anonymous(&self) -> bool {
        *self == Self::ANONYMOUS
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for Id32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Id32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id32({})", self.to_hex())
    }
}

impl FromStr for Id32 {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map_err(|e| ProtocolError::Encoding(format!("invalid hex identifier {s:?}: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Id32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of the remote site a persona is bound to:
/// `<hash-type>:<hex-digest>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteId {
    /// Hash algorithm name, e.g. `SHA256`.
    pub hash_type: String,
    /// Hex digest, even length.
    pub digest: String,
}

impl SiteId {
    /// Canonical `<type>:<hex>` form.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.hash_type, self.digest)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash_type, self.digest)
    }
}

impl FromStr for SiteId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [hash_type, digest] = parts.as_slice() else {
            return Err(ProtocolError::Malformed(format!(
                "expected site id in <hash-type>:<hex> form, got {s:?}"
            )));
        };
        if digest.len() % 2 != 0 {
            return Err(ProtocolError::Malformed(format!(
                "site digest {digest} has odd length (type {hash_type})"
            )));
        }
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::Malformed(format!(
                "site digest {digest:?} is not valid hex (type {hash_type})"
            )));
        }
        Ok(Self {
            hash_type: (*hash_type).to_owned(),
            digest: (*digest).to_owned(),
        })
    }
}

impl Serialize for SiteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_hex_round_trip_and_case() {
        let hex = "AB".repeat(32);
        let id: Id32 = hex.parse().unwrap();
        assert_eq!(id.0, [0xAB; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }

    #[test]
    fn anonymous_identity() {
        let id: Id32 = "0".repeat(64).parse().unwrap();
        assert!(id.is_anonymous());
        assert_eq!(id, Id32::ANONYMOUS);
    }

    #[test]
    fn id_rejects_short_and_non_hex() {
        assert!("abcd".parse::<Id32>().is_err());
        assert!("zz".repeat(32).parse::<Id32>().is_err());
        assert!(matches!(
            Id32::from_slice(&[0u8; 31]),
            Err(ProtocolError::WrongLength { expected: 32, actual: 31, .. })
        ));
    }

    #[test]
    fn flags_effective_value() {
        let flags = PersonaFlags {
            set: 0x3,
            unset: 0x1,
        };
        assert_eq!(flags.effective(), 0x2);
        assert!(!flags.is_superuser());
        assert!(PersonaFlags::superuser().is_superuser());
        let all = PersonaFlags { set: -1, unset: 0 };
        assert!(all.is_superuser());
        let none = PersonaFlags { set: -1, unset: -1 };
        assert_eq!(none.effective(), 0);
    }

    #[test]
    fn site_id_validation() {
        let site: SiteId = "SHA256:deadBEEF".parse().unwrap();
        assert_eq!(site.hash_type, "SHA256");
        assert_eq!(site.canonical(), "SHA256:deadBEEF");

        assert!("SHA256:abc".parse::<SiteId>().is_err(), "odd length");
        assert!("SHA256:zz".parse::<SiteId>().is_err(), "not hex");
        assert!("SHA256".parse::<SiteId>().is_err(), "no separator");
        assert!("a:b:cc".parse::<SiteId>().is_err(), "too many parts");
    }

    #[test]
    fn container_kind_mapping() {
        assert_eq!(ContainerKind::from(1), ContainerKind::Persona);
        assert_eq!(ContainerKind::from(2), ContainerKind::AppInstance);
        assert_eq!(ContainerKind::from(9), ContainerKind::Other(9));
        assert_eq!(u16::from(ContainerKind::AppInstance), 2);
    }

    #[test]
    fn response_code_predicates() {
        assert!(ResponseCode(0).is_success());
        assert!(ResponseCode(6).is_internal_error());
        assert!(ResponseCode(7).is_not_found());
        assert!(ResponseCode(8).is_not_allowed());
        assert_eq!(ResponseCode(7).to_string(), "not-found (7)");
    }
}
