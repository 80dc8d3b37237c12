//! Generic DHCP packet parsing and serialization library
//!
//! This library provides low-level DHCP packet manipulation without any
//! business logic dependencies: client identifiers, message types, typed
//! option values, the bounds-checked option area codec and the fixed header.

pub mod client_id;
pub mod codec;
pub mod message_type;
pub mod option;
pub mod packet;

pub use client_id::{ClientId, ClientIdParseError};
pub use codec::{encode, fill_requested, CodecError, OptionSet, OptionWriter, MAGIC_COOKIE};
pub use message_type::MessageType;
pub use option::DhcpOption;
pub use packet::{DhcpPacket, PacketError};
