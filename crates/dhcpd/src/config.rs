use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::net::Ipv4Addr;

use dhcp_proto::option::code;
use dhcp_proto::packet::BOOTP_MIN_LEN;
use dhcp_proto::{ClientId, DhcpOption, OptionSet};

use crate::dhcp::reply::MAX_REPLY_LEN;
use crate::error::{Error, Result};

/// Configuration structure loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listening addresses for the DHCP server
    #[serde(default = "default_listen_addresses")]
    pub listen_addresses: Vec<Ipv4Addr>,

    /// DHCP server configuration
    pub dhcp: DhcpConfig,
}

fn default_listen_addresses() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::UNSPECIFIED]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    /// Address of this server, sent as option 54
    pub server_id: Ipv4Addr,

    /// Contiguous range handed out to dynamic clients
    pub pool: PoolRange,

    /// Lease time granted on ACK, in seconds
    #[serde(default = "default_lease_time")]
    pub default_lease_time: u32,

    /// How long an offered address stays reserved, in seconds
    #[serde(default = "default_pending_time")]
    pub pending_time: u32,

    /// How long a declined address is kept out of the pool, in seconds
    #[serde(default = "default_decline_quarantine_time")]
    pub decline_quarantine_time: u32,

    /// Size of the reply buffer in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Operator assigned addresses
    #[serde(default)]
    pub static_bindings: Vec<StaticBinding>,

    /// Values served when a client asks for them
    #[serde(default)]
    pub options: OptionsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticBinding {
    /// Client identifier (format: XX:XX:XX:XX:XX:XX, any number of octets)
    pub client_id: String,

    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsConfig {
    pub subnet_mask: Option<Ipv4Addr>,

    #[serde(default)]
    pub routers: Vec<Ipv4Addr>,

    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,

    pub domain_name: Option<String>,

    pub broadcast_address: Option<Ipv4Addr>,

    /// Options without a dedicated field, payload given as hex
    #[serde(default)]
    pub raw: Vec<RawOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOption {
    pub code: u8,

    /// Payload bytes (format: "0a000001", case insensitive)
    #[serde(serialize_with = "to_hex", deserialize_with = "from_hex")]
    pub data: Vec<u8>,
}

fn to_hex<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let hex: String = data.iter().map(|byte| format!("{:02x}", byte)).collect();
    serializer.serialize_str(&hex)
}

fn from_hex<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex = String::deserialize(deserializer)?;
    if hex.len() % 2 != 0 {
        return Err(serde::de::Error::custom(format!(
            "hex data has odd length {}",
            hex.len()
        )));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| serde::de::Error::custom(format!("invalid hex data: {}", hex)))
        })
        .collect()
}

fn default_lease_time() -> u32 {
    86400 // 24 hours
}

fn default_pending_time() -> u32 {
    60
}

fn default_decline_quarantine_time() -> u32 {
    3600
}

fn default_max_message_size() -> usize {
    548 // fixed header + 312 byte option area
}

impl OptionsConfig {
    /// Build the option catalog consulted for parameter request lists
    pub fn catalog(&self) -> Result<OptionSet> {
        let mut typed = Vec::new();
        if let Some(mask) = self.subnet_mask {
            typed.push(DhcpOption::SubnetMask(mask));
        }
        if !self.routers.is_empty() {
            typed.push(DhcpOption::Router(self.routers.clone()));
        }
        if !self.dns_servers.is_empty() {
            typed.push(DhcpOption::DnsServer(self.dns_servers.clone()));
        }
        if let Some(domain) = &self.domain_name {
            typed.push(DhcpOption::DomainName(domain.clone()));
        }
        if let Some(broadcast) = self.broadcast_address {
            typed.push(DhcpOption::BroadcastAddress(broadcast));
        }

        let mut catalog = OptionSet::new();
        for option in &typed {
            catalog
                .set(option)
                .map_err(|e| Error::InvalidConfig(format!("option {}: {}", option.code(), e)))?;
        }

        for raw in &self.raw {
            if matches!(raw.code, code::MESSAGE_TYPE | code::SERVER_IDENTIFIER) {
                return Err(Error::InvalidConfig(format!(
                    "option {} is managed by the server",
                    raw.code
                )));
            }
            catalog
                .insert(raw.code, raw.data.clone())
                .map_err(|e| Error::InvalidConfig(format!("option {}: {}", raw.code, e)))?;
        }

        Ok(catalog)
    }
}

impl DhcpConfig {
    pub fn in_pool(&self, address: Ipv4Addr) -> bool {
        (self.pool.first..=self.pool.last).contains(&address)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Parse the configured static bindings
    pub fn static_bindings(&self) -> Result<Vec<(ClientId, Ipv4Addr)>> {
        self.dhcp
            .static_bindings
            .iter()
            .map(|binding| {
                let client_id = binding.client_id.parse::<ClientId>().map_err(|e| {
                    Error::InvalidConfig(format!(
                        "static binding for {}: {}",
                        binding.address, e
                    ))
                })?;
                Ok((client_id, binding.address))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let dhcp = &self.dhcp;

        if dhcp.pool.first > dhcp.pool.last {
            return Err(Error::InvalidConfig(
                "pool.first must be less than or equal to pool.last".to_string(),
            ));
        }

        if dhcp.in_pool(dhcp.server_id) {
            return Err(Error::InvalidConfig(
                "server_id must not be within the pool range".to_string(),
            ));
        }

        if dhcp.default_lease_time == 0 || dhcp.pending_time == 0 {
            return Err(Error::InvalidConfig(
                "default_lease_time and pending_time must be greater than 0".to_string(),
            ));
        }

        if !(BOOTP_MIN_LEN..=MAX_REPLY_LEN).contains(&dhcp.max_message_size) {
            return Err(Error::InvalidConfig(format!(
                "max_message_size must be between {} and {}",
                BOOTP_MIN_LEN, MAX_REPLY_LEN
            )));
        }

        let mut seen_ids = HashSet::new();
        let mut seen_addresses = HashSet::new();
        for (client_id, address) in self.static_bindings()? {
            if address == dhcp.server_id {
                return Err(Error::InvalidConfig(format!(
                    "static binding for {} uses the server address",
                    client_id
                )));
            }
            if !seen_addresses.insert(address) {
                return Err(Error::InvalidConfig(format!(
                    "address {} is bound statically more than once",
                    address
                )));
            }
            if !seen_ids.insert(client_id.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "client {} has more than one static binding",
                    client_id
                )));
            }
        }

        dhcp.options.catalog()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addresses: default_listen_addresses(),
            dhcp: DhcpConfig {
                server_id: Ipv4Addr::new(192, 168, 1, 1),
                pool: PoolRange {
                    first: Ipv4Addr::new(192, 168, 1, 100),
                    last: Ipv4Addr::new(192, 168, 1, 200),
                },
                default_lease_time: default_lease_time(),
                pending_time: default_pending_time(),
                decline_quarantine_time: default_decline_quarantine_time(),
                max_message_size: default_max_message_size(),
                static_bindings: Vec::new(),
                options: OptionsConfig {
                    subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
                    routers: vec![Ipv4Addr::new(192, 168, 1, 1)],
                    dns_servers: vec![Ipv4Addr::new(192, 168, 1, 1)],
                    ..Default::default()
                },
            },
        }
    }
}
