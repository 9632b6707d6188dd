//! Binary attribute protocol spoken with the appliance daemon.
//!
//! Big-endian throughout. A request is one [`Packet`]; the reply is the
//! next packet on the sequenced control socket, or a stream of packets
//! terminated by [`flags::IS_LAST`] for enumerations.
//!
//! - [`attribute`] – typed, 4-byte aligned attributes and their decoder table
//! - [`packet`] – `{opcode, flags}` framing and the opcode catalogue
//! - [`types`] – value objects carried by attributes

pub mod attribute;
pub mod packet;
pub mod types;

pub use attribute::{attr_type, decode_attributes, Attribute};
pub use packet::{flags, frame, opcode, Packet};
pub use types::{ContainerKind, Id32, PersonaFlags, PersonaId, ResponseCode, SiteId, TokenId};
