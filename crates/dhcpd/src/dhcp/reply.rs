use std::net::Ipv4Addr;

use dhcp_proto::option::code;
use dhcp_proto::packet::HEADER_LEN;
use dhcp_proto::{DhcpOption, DhcpPacket, MessageType, OptionSet, OptionWriter};

use crate::error::{Error, Result};

/// Largest reply we will build: Ethernet MTU minus IP and UDP headers
pub const MAX_REPLY_LEN: usize = 1472;

/// Options the reply writes itself; never copied from the catalog
const MANAGED_CODES: [u8; 5] = [
    code::MESSAGE_TYPE,
    code::SERVER_IDENTIFIER,
    code::LEASE_TIME,
    code::RENEWAL_TIME,
    code::REBINDING_TIME,
];

/// What the server answers to one client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_type: MessageType,
    /// Address placed in `yiaddr`
    pub address: Option<Ipv4Addr>,
    /// Lease granted; adds options 51, 58 and 59
    pub lease_time: Option<u32>,
    /// Option codes the client asked for, in its order
    pub requested: Vec<u8>,
}

impl Reply {
    pub fn offer(address: Ipv4Addr, lease_time: u32, requested: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Offer,
            address: Some(address),
            lease_time: Some(lease_time),
            requested,
        }
    }

    pub fn ack(address: Ipv4Addr, lease_time: u32, requested: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Ack,
            address: Some(address),
            lease_time: Some(lease_time),
            requested,
        }
    }

    /// Configuration only ACK answering an INFORM
    pub fn inform_ack(requested: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::Ack,
            address: None,
            lease_time: None,
            requested,
        }
    }

    pub fn nak() -> Self {
        Self {
            message_type: MessageType::Nak,
            address: None,
            lease_time: None,
            requested: Vec::new(),
        }
    }

    /// Serialize the reply to `request` in at most `capacity` bytes
    ///
    /// Mandatory options go first, then the `catalog` values the client
    /// asked for. Anything that does not fit fails the whole reply.
    pub fn encode(
        &self,
        request: &DhcpPacket,
        server_id: Ipv4Addr,
        catalog: &OptionSet,
        capacity: usize,
    ) -> Result<Vec<u8>> {
        let area = self
            .option_area(server_id, catalog, capacity.saturating_sub(HEADER_LEN))
            .map_err(Error::ReplyTooLarge)?;

        let mut packet = DhcpPacket::reply_to(request);
        packet.yiaddr = self.address.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if self.message_type != MessageType::Nak {
            packet.siaddr = server_id;
        }
        if self.message_type == MessageType::Ack {
            packet.ciaddr = request.ciaddr;
        }
        Ok(packet.assemble(&area))
    }

    fn option_area(
        &self,
        server_id: Ipv4Addr,
        catalog: &OptionSet,
        capacity: usize,
    ) -> std::result::Result<Vec<u8>, dhcp_proto::CodecError> {
        let mut writer = OptionWriter::new(capacity)?;
        writer.write_option(&DhcpOption::MessageType(self.message_type))?;
        writer.write_option(&DhcpOption::ServerIdentifier(server_id))?;

        if let Some(lease_time) = self.lease_time {
            writer.write_option(&DhcpOption::LeaseTime(lease_time))?;
            writer.write_option(&DhcpOption::RenewalTime(lease_time / 2))?;
            writer.write_option(&DhcpOption::RebindingTime(rebinding_time(lease_time)))?;
        }

        writer.fill_requested(&self.requested, catalog)?;
        writer.finish()
    }
}

/// T2 is 7/8 of the lease
fn rebinding_time(lease_time: u32) -> u32 {
    (u64::from(lease_time) * 7 / 8) as u32
}

/// Codes from the client's option 55, minus the ones the reply writes itself
pub fn parameter_request_list(request: &DhcpPacket) -> Vec<u8> {
    request
        .options
        .get(code::PARAMETER_REQUEST_LIST)
        .unwrap_or_default()
        .iter()
        .copied()
        .filter(|option_code| !MANAGED_CODES.contains(option_code))
        .collect()
}

/// Bytes available for the reply to `request`
///
/// Option 57 can only raise the configured size, up to [`MAX_REPLY_LEN`].
pub fn reply_capacity(request: &DhcpPacket, max_message_size: usize) -> usize {
    let asked = request
        .options
        .get_u16(code::MAX_MESSAGE_SIZE)
        .ok()
        .flatten()
        .map(usize::from)
        .unwrap_or(0);
    max_message_size.max(asked.min(MAX_REPLY_LEN))
}
