use std::net::Ipv4Addr;

use chrono::{DateTime, TimeZone, Utc};
use dhcp_proto::{ClientId, DhcpOption, DhcpPacket, MessageType};

use crate::config::{Config, PoolRange};
use crate::lease::LeaseState;

pub const MAC: &str = "AA:BB:CC:DD:EE:FF";
pub const OTHER_MAC: &str = "02:00:00:00:00:02";
pub const SERVER_ID: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Pool 10.0.0.10-10.0.0.20 served by 10.0.0.1
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.dhcp.server_id = SERVER_ID;
    config.dhcp.pool = PoolRange {
        first: Ipv4Addr::new(10, 0, 0, 10),
        last: Ipv4Addr::new(10, 0, 0, 20),
    };
    config.dhcp.default_lease_time = 3600;
    config.dhcp.pending_time = 60;
    config.dhcp.decline_quarantine_time = 600;
    config.dhcp.options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
    config.dhcp.options.routers = vec![SERVER_ID];
    config.dhcp.options.dns_servers = vec![SERVER_ID];
    config
}

pub fn create_test_state() -> LeaseState {
    LeaseState::from_config(&create_test_config(), t0()).unwrap()
}

pub fn client_id(mac: &str) -> ClientId {
    mac.parse().unwrap()
}

fn base_packet(mac: &str, xid: u32, message_type: MessageType) -> DhcpPacket {
    let mut packet = DhcpPacket::new();
    packet.xid = xid;
    let id = client_id(mac);
    packet.chaddr[..id.len()].copy_from_slice(id.as_bytes());
    packet
        .options
        .set(&DhcpOption::MessageType(message_type))
        .unwrap();
    packet
}

/// Create a DHCP DISCOVER packet
pub fn discover_packet(mac: &str) -> DhcpPacket {
    base_packet(mac, 12345, MessageType::Discover)
}

/// Create a DHCP REQUEST packet
///
/// Selecting state when `server_id` is set, renewal otherwise.
pub fn request_packet(
    mac: &str,
    requested: Option<Ipv4Addr>,
    server_id: Option<Ipv4Addr>,
) -> DhcpPacket {
    let mut packet = base_packet(mac, 67890, MessageType::Request);
    if let Some(address) = requested {
        packet
            .options
            .set(&DhcpOption::RequestedIpAddress(address))
            .unwrap();
    }
    if let Some(server_id) = server_id {
        packet
            .options
            .set(&DhcpOption::ServerIdentifier(server_id))
            .unwrap();
    }
    packet
}

/// Create a DHCP DECLINE packet
pub fn decline_packet(mac: &str, address: Ipv4Addr) -> DhcpPacket {
    let mut packet = base_packet(mac, 22222, MessageType::Decline);
    packet
        .options
        .set(&DhcpOption::RequestedIpAddress(address))
        .unwrap();
    packet
        .options
        .set(&DhcpOption::ServerIdentifier(SERVER_ID))
        .unwrap();
    packet
}

/// Create a DHCP RELEASE packet
pub fn release_packet(mac: &str, address: Ipv4Addr) -> DhcpPacket {
    let mut packet = base_packet(mac, 11111, MessageType::Release);
    packet.ciaddr = address;
    packet
        .options
        .set(&DhcpOption::ServerIdentifier(SERVER_ID))
        .unwrap();
    packet
}

/// Create a DHCP INFORM packet
pub fn inform_packet(mac: &str) -> DhcpPacket {
    base_packet(mac, 99999, MessageType::Inform)
}

/// Serialize a client packet the way it would arrive on the wire
pub fn wire_bytes(packet: &DhcpPacket) -> Vec<u8> {
    packet.to_bytes(576).unwrap()
}
