//! Error taxonomy of the server.
//!
//! Every variant ends in the same place: the message being processed is
//! dropped and the reason is logged. Nothing here is retried; retransmission
//! is left to the client.

use std::net::Ipv4Addr;

use dhcp_proto::{CodecError, MessageType, PacketError};

use crate::lease::BindingStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket receive/send failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message of {0} bytes is shorter than the 300 byte minimum")]
    TooShort(usize),

    #[error("op code {0} is not BOOTREQUEST")]
    NotBootRequest(u8),

    /// Header too short, bad magic cookie or truncated option.
    #[error("malformed message: {0}")]
    Packet(#[from] PacketError),

    #[error("message carries no DHCP message type option")]
    MissingMessageType,

    #[error("unknown DHCP message type {0}")]
    UnknownMessageType(u8),

    #[error("{0} is not a client message")]
    UnexpectedMessageType(MessageType),

    /// An option the handler relies on has the wrong shape.
    #[error("malformed option: {0}")]
    Option(#[from] CodecError),

    #[error("{0} carries no usable address")]
    MissingAddress(MessageType),

    /// The reply does not fit in the client's buffer.
    #[error("reply does not fit: {0}")]
    ReplyTooLarge(CodecError),

    #[error("address {0} is already bound")]
    DuplicateAddress(Ipv4Addr),

    #[error("no binding for address {0}")]
    UnknownBinding(Ipv4Addr),

    /// Lease state machine contract violation. Indicates a logic bug.
    #[error("invalid transition of {address} from {from:?} to {to:?}")]
    InvalidTransition {
        address: Ipv4Addr,
        from: BindingStatus,
        to: BindingStatus,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, Error>;
