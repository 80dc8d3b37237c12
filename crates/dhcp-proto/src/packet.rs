use crate::codec::{CodecError, OptionSet, OptionWriter, MAGIC_COOKIE};
use crate::option::code;
use crate::{ClientId, MessageType};
use std::net::Ipv4Addr;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Size of the fixed BOOTP header, up to and excluding the magic cookie
pub const HEADER_LEN: usize = 236;

/// Smallest message a BOOTP relay or client is required to accept
pub const BOOTP_MIN_LEN: usize = 300;

/// Broadcast bit of the `flags` field
pub const BROADCAST_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("message of {0} bytes is too short to hold a DHCP header")]
    TooShort(usize),
    #[error(transparent)]
    Options(#[from] CodecError),
}

/// DHCP packet structure as defined in RFC 2131
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,           // Message op code / message type
    pub htype: u8,        // Hardware address type
    pub hlen: u8,         // Hardware address length
    pub hops: u8,         // Client sets to zero
    pub xid: u32,         // Transaction ID
    pub secs: u16,        // Seconds elapsed
    pub flags: u16,       // Flags
    pub ciaddr: Ipv4Addr, // Client IP address
    pub yiaddr: Ipv4Addr, // 'Your' (client) IP address
    pub siaddr: Ipv4Addr, // Server IP address
    pub giaddr: Ipv4Addr, // Gateway IP address
    pub chaddr: [u8; 16], // Client hardware address
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: OptionSet,
}

fn ipv4_at(data: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[at], data[at + 1], data[at + 2], data[at + 3])
}

impl DhcpPacket {
    /// Create an empty BOOTREQUEST for an Ethernet client
    pub fn new() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 16],
            sname: [0; 64],
            file: [0; 128],
            options: OptionSet::new(),
        }
    }

    /// Start a BOOTREPLY answering `request`
    ///
    /// Transaction id, flags, relay address and client hardware address are
    /// carried over; everything else starts zeroed.
    pub fn reply_to(request: &DhcpPacket) -> Self {
        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            xid: request.xid,
            flags: request.flags,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            ..Self::new()
        }
    }

    /// Parse a DHCP packet from raw bytes
    ///
    /// Only the fixed header and the option area are validated here; policy
    /// checks (minimum size, op code) belong to the caller.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN + MAGIC_COOKIE.len() {
            return Err(PacketError::TooShort(data.len()));
        }

        let options = OptionSet::decode(&data[HEADER_LEN..])?;

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ipv4_at(data, 12),
            yiaddr: ipv4_at(data, 16),
            siaddr: ipv4_at(data, 20),
            giaddr: ipv4_at(data, 24),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Serialize the fixed header
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN];

        bytes[0] = self.op;
        bytes[1] = self.htype;
        bytes[2] = self.hlen;
        bytes[3] = self.hops;

        bytes[4..8].copy_from_slice(&self.xid.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.secs.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.flags.to_be_bytes());

        bytes[12..16].copy_from_slice(&self.ciaddr.octets());
        bytes[16..20].copy_from_slice(&self.yiaddr.octets());
        bytes[20..24].copy_from_slice(&self.siaddr.octets());
        bytes[24..28].copy_from_slice(&self.giaddr.octets());

        bytes[28..44].copy_from_slice(&self.chaddr);
        bytes[44..108].copy_from_slice(&self.sname);
        bytes[108..236].copy_from_slice(&self.file);

        bytes
    }

    /// Join the header with an already encoded option area
    ///
    /// The result is zero padded up to [`BOOTP_MIN_LEN`].
    pub fn assemble(&self, option_area: &[u8]) -> Vec<u8> {
        let mut bytes = self.header_bytes();
        bytes.extend_from_slice(option_area);
        if bytes.len() < BOOTP_MIN_LEN {
            bytes.resize(BOOTP_MIN_LEN, 0);
        }
        bytes
    }

    /// Serialize the packet into at most `capacity` bytes
    ///
    /// Padding up to [`BOOTP_MIN_LEN`] is not counted against the capacity.
    pub fn to_bytes(&self, capacity: usize) -> Result<Vec<u8>, CodecError> {
        let mut writer = OptionWriter::new(capacity.saturating_sub(HEADER_LEN))?;
        writer.write_set(&self.options)?;
        Ok(self.assemble(&writer.finish()?))
    }

    /// Hardware address as declared by `hlen`
    pub fn hardware_address(&self) -> &[u8] {
        let len = usize::from(self.hlen).min(self.chaddr.len());
        &self.chaddr[..len]
    }

    /// Identifier the client is known by: option 61 if sent, else `chaddr`
    pub fn client_id(&self) -> ClientId {
        match self.options.get(code::CLIENT_IDENTIFIER) {
            Some(id) if !id.is_empty() => ClientId::from(id),
            _ => ClientId::from_hardware(&self.chaddr, self.hlen),
        }
    }

    /// Raw option 53 value, if present and one byte long
    pub fn message_type_code(&self) -> Option<u8> {
        self.options.get_u8(code::MESSAGE_TYPE).ok().flatten()
    }

    /// Get the message type from the options
    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type_code().and_then(MessageType::from_u8)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }
}

impl Default for DhcpPacket {
    fn default() -> Self {
        Self::new()
    }
}
