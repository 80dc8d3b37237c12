use std::net::{Ipv4Addr, SocketAddr};

use chrono::{DateTime, Utc};
use dhcp_proto::packet::{BOOTP_MIN_LEN, BOOTREQUEST};
use dhcp_proto::{DhcpPacket, MessageType};
use tracing::{debug, error, info, warn};

use super::handler::{
    handle_decline, handle_discover, handle_inform, handle_release, handle_request,
};
use super::reply::reply_capacity;
use crate::error::{Error, Result};
use crate::lease::LeaseState;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Encoded reply and where to send it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub message_type: MessageType,
    pub bytes: Vec<u8>,
    pub destination: SocketAddr,
}

/// Validate one datagram, run its handler and encode the reply
pub fn dispatch(
    state: &mut LeaseState,
    raw: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<Outgoing>> {
    if raw.len() < BOOTP_MIN_LEN {
        return Err(Error::TooShort(raw.len()));
    }

    let request = DhcpPacket::parse(raw)?;
    if request.op != BOOTREQUEST {
        return Err(Error::NotBootRequest(request.op));
    }

    let type_code = request
        .message_type_code()
        .ok_or(Error::MissingMessageType)?;
    let message_type =
        MessageType::from_u8(type_code).ok_or(Error::UnknownMessageType(type_code))?;

    info!("{} from {}", message_type, request.client_id());

    let reply = match message_type {
        MessageType::Discover => handle_discover(state, &request, now),
        MessageType::Request => handle_request(state, &request, now),
        MessageType::Decline => handle_decline(state, &request, now),
        MessageType::Release => handle_release(state, &request, now),
        MessageType::Inform => handle_inform(state, &request),
        MessageType::Offer | MessageType::Ack | MessageType::Nak => {
            Err(Error::UnexpectedMessageType(message_type))
        }
    }?;

    let Some(reply) = reply else {
        return Ok(None);
    };

    let capacity = reply_capacity(&request, state.max_message_size);
    let bytes = reply.encode(
        &request,
        state.pool.server_id,
        &state.pool.options,
        capacity,
    )?;
    Ok(Some(Outgoing {
        message_type: reply.message_type,
        bytes,
        destination: reply_destination(&request, reply.message_type),
    }))
}

/// [`dispatch`] with every failure logged and turned into "no reply"
pub fn process(
    state: &mut LeaseState,
    raw: &[u8],
    source: SocketAddr,
    now: DateTime<Utc>,
) -> Option<Outgoing> {
    match dispatch(state, raw, now) {
        Ok(outgoing) => outgoing,
        Err(e) => {
            let sender = DhcpPacket::parse(raw)
                .map(|packet| packet.client_id().to_string())
                .unwrap_or_else(|_| source.to_string());
            match e {
                Error::TooShort(_)
                | Error::NotBootRequest(_)
                | Error::Packet(_)
                | Error::InvalidTransition { .. }
                | Error::DuplicateAddress(_)
                | Error::UnknownBinding(_) => {
                    error!("Dropped message from {}: {}", sender, e)
                }
                Error::UnexpectedMessageType(_) => {
                    debug!("Dropped message from {}: {}", sender, e)
                }
                _ => warn!("Dropped message from {}: {}", sender, e),
            }
            None
        }
    }
}

/// Where a reply goes (RFC 2131 §4.1)
///
/// Relayed messages go back to the relay agent. NAKs, broadcast flagged
/// requests and clients without an address are answered by broadcast.
pub fn reply_destination(request: &DhcpPacket, message_type: MessageType) -> SocketAddr {
    if !request.giaddr.is_unspecified() {
        return SocketAddr::new(request.giaddr.into(), DHCP_SERVER_PORT);
    }
    if message_type == MessageType::Nak
        || request.is_broadcast()
        || request.ciaddr.is_unspecified()
    {
        return SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT);
    }
    SocketAddr::new(request.ciaddr.into(), DHCP_CLIENT_PORT)
}
