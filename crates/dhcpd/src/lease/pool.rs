use std::net::Ipv4Addr;

use dhcp_proto::OptionSet;

use crate::config::Config;
use crate::error::Result;

/// Allocatable range plus the server wide lease settings
#[derive(Debug, Clone)]
pub struct AddressPool {
    first: Ipv4Addr,
    last: Ipv4Addr,
    /// Next address to hand out, in host order. `None` once past `last`.
    cursor: Option<u32>,
    pub default_lease_time: u32,
    pub pending_time: u32,
    pub decline_quarantine_time: u32,
    pub server_id: Ipv4Addr,
    /// Default option values served on request
    pub options: OptionSet,
}

impl AddressPool {
    pub fn new(first: Ipv4Addr, last: Ipv4Addr, server_id: Ipv4Addr) -> Self {
        Self {
            first,
            last,
            cursor: (first <= last).then(|| u32::from(first)),
            default_lease_time: 86400,
            pending_time: 60,
            decline_quarantine_time: 3600,
            server_id,
            options: OptionSet::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let dhcp = &config.dhcp;
        let mut pool = Self::new(dhcp.pool.first, dhcp.pool.last, dhcp.server_id);
        pool.default_lease_time = dhcp.default_lease_time;
        pool.pending_time = dhcp.pending_time;
        pool.decline_quarantine_time = dhcp.decline_quarantine_time;
        pool.options = dhcp.options.catalog()?;
        Ok(pool)
    }

    pub fn first(&self) -> Ipv4Addr {
        self.first
    }

    pub fn last(&self) -> Ipv4Addr {
        self.last
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        (self.first..=self.last).contains(&address)
    }

    /// Number of addresses the range holds
    pub fn size(&self) -> u64 {
        if self.first > self.last {
            return 0;
        }
        u64::from(u32::from(self.last)) - u64::from(u32::from(self.first)) + 1
    }

    /// Next never-issued address of the range, `None` once exhausted
    ///
    /// The cursor advances in host order so that octet carries propagate
    /// (10.0.0.255 is followed by 10.0.1.0).
    pub fn take_free_address(&mut self) -> Option<Ipv4Addr> {
        let current = self.cursor?;
        self.cursor = current
            .checked_add(1)
            .filter(|next| *next <= u32::from(self.last));
        Some(Ipv4Addr::from(current))
    }
}
