use crate::MessageType;
use std::net::Ipv4Addr;

/// Option codes used by the server (RFC 2132)
pub mod code {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const REQUESTED_IP_ADDRESS: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const CLIENT_IDENTIFIER: u8 = 61;
    pub const END: u8 = 255;
}

/// Typed view of the DHCP options the server reads or writes
#[derive(Debug, Clone, PartialEq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Vec<Ipv4Addr>),
    DnsServer(Vec<Ipv4Addr>),
    Hostname(String),
    DomainName(String),
    BroadcastAddress(Ipv4Addr),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    MaxMessageSize(u16),
    RenewalTime(u32),
    RebindingTime(u32),
    ClientIdentifier(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

fn ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn ipv4_list(data: &[u8]) -> Vec<Ipv4Addr> {
    data.chunks_exact(4).map(ipv4).collect()
}

fn u32_be(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

impl DhcpOption {
    /// Interpret an option payload
    ///
    /// Payloads whose length does not fit the typed variant fall back to
    /// `Unknown` so that nothing is lost.
    pub fn parse(code: u8, data: &[u8]) -> Self {
        match code {
            code::SUBNET_MASK if data.len() == 4 => Self::SubnetMask(ipv4(data)),
            code::ROUTER if !data.is_empty() && data.len() % 4 == 0 => {
                Self::Router(ipv4_list(data))
            }
            code::DNS_SERVER if !data.is_empty() && data.len() % 4 == 0 => {
                Self::DnsServer(ipv4_list(data))
            }
            code::HOSTNAME => Self::Hostname(String::from_utf8_lossy(data).to_string()),
            code::DOMAIN_NAME => Self::DomainName(String::from_utf8_lossy(data).to_string()),
            code::BROADCAST_ADDRESS if data.len() == 4 => Self::BroadcastAddress(ipv4(data)),
            code::REQUESTED_IP_ADDRESS if data.len() == 4 => {
                Self::RequestedIpAddress(ipv4(data))
            }
            code::LEASE_TIME if data.len() == 4 => Self::LeaseTime(u32_be(data)),
            code::MESSAGE_TYPE if data.len() == 1 => match MessageType::from_u8(data[0]) {
                Some(mt) => Self::MessageType(mt),
                None => Self::Unknown(code, data.to_vec()),
            },
            code::SERVER_IDENTIFIER if data.len() == 4 => Self::ServerIdentifier(ipv4(data)),
            code::PARAMETER_REQUEST_LIST => Self::ParameterRequestList(data.to_vec()),
            code::MAX_MESSAGE_SIZE if data.len() == 2 => {
                Self::MaxMessageSize(u16::from_be_bytes([data[0], data[1]]))
            }
            code::RENEWAL_TIME if data.len() == 4 => Self::RenewalTime(u32_be(data)),
            code::REBINDING_TIME if data.len() == 4 => Self::RebindingTime(u32_be(data)),
            code::CLIENT_IDENTIFIER => Self::ClientIdentifier(data.to_vec()),
            _ => Self::Unknown(code, data.to_vec()),
        }
    }

    /// Option code of this value
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => code::SUBNET_MASK,
            Self::Router(_) => code::ROUTER,
            Self::DnsServer(_) => code::DNS_SERVER,
            Self::Hostname(_) => code::HOSTNAME,
            Self::DomainName(_) => code::DOMAIN_NAME,
            Self::BroadcastAddress(_) => code::BROADCAST_ADDRESS,
            Self::RequestedIpAddress(_) => code::REQUESTED_IP_ADDRESS,
            Self::LeaseTime(_) => code::LEASE_TIME,
            Self::MessageType(_) => code::MESSAGE_TYPE,
            Self::ServerIdentifier(_) => code::SERVER_IDENTIFIER,
            Self::ParameterRequestList(_) => code::PARAMETER_REQUEST_LIST,
            Self::MaxMessageSize(_) => code::MAX_MESSAGE_SIZE,
            Self::RenewalTime(_) => code::RENEWAL_TIME,
            Self::RebindingTime(_) => code::REBINDING_TIME,
            Self::ClientIdentifier(_) => code::CLIENT_IDENTIFIER,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Serialize the value part of the option (no code, no length)
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr)
            | Self::BroadcastAddress(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => addr.octets().to_vec(),
            Self::Router(addrs) | Self::DnsServer(addrs) => {
                addrs.iter().flat_map(|addr| addr.octets()).collect()
            }
            Self::Hostname(name) | Self::DomainName(name) => name.as_bytes().to_vec(),
            Self::LeaseTime(secs) | Self::RenewalTime(secs) | Self::RebindingTime(secs) => {
                secs.to_be_bytes().to_vec()
            }
            Self::MessageType(mt) => vec![mt.to_u8()],
            Self::MaxMessageSize(size) => size.to_be_bytes().to_vec(),
            Self::ParameterRequestList(data)
            | Self::ClientIdentifier(data)
            | Self::Unknown(_, data) => data.clone(),
        }
    }
}
