//! Lease state: the address pool, the binding table and the allocator that
//! ties them together.
//!
//! `LeaseState` is the single owned context every message handler works on.
//! The server keeps it behind one mutex so that a whole lookup-then-mutate
//! sequence runs atomically.

mod allocator;
mod binding;
mod pool;

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use dhcp_proto::packet::BOOTP_MIN_LEN;
use tracing::info;

pub use allocator::Allocation;
pub use binding::{Binding, BindingFlags, BindingStatus, BindingTable};
pub use pool::AddressPool;

use crate::config::Config;
use crate::dhcp::reply::MAX_REPLY_LEN;
use crate::error::Result;

/// Reply buffer size when the configuration does not say otherwise
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 548;

#[derive(Debug)]
pub struct LeaseState {
    pub pool: AddressPool,
    pub bindings: BindingTable,
    /// Bytes available for a reply before the client's option 57 is applied
    pub max_message_size: usize,
}

impl LeaseState {
    pub fn new(pool: AddressPool) -> Self {
        Self {
            pool,
            bindings: BindingTable::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Build the context and register every configured static binding
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        let mut state = Self::new(AddressPool::from_config(config)?);
        state.max_message_size = config
            .dhcp
            .max_message_size
            .clamp(BOOTP_MIN_LEN, MAX_REPLY_LEN);

        for (client_id, address) in config.static_bindings()? {
            state.add_static(client_id, address, now)?;
        }
        info!(
            "Lease state ready: pool {}-{} ({} addresses), {} static binding(s)",
            state.pool.first(),
            state.pool.last(),
            state.pool.size(),
            state.bindings.len()
        );
        Ok(state)
    }

    /// Register a permanent client to address mapping, initially `Free`
    pub fn add_static(
        &mut self,
        client_id: dhcp_proto::ClientId,
        address: Ipv4Addr,
        now: DateTime<Utc>,
    ) -> Result<&Binding> {
        self.bindings.insert(
            address,
            client_id,
            BindingStatus::Free,
            BindingFlags::empty(),
            true,
            0,
            now,
        )
    }

    /// Bindings sorted by address, with lazy expiry applied
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Vec<Binding> {
        self.bindings.sweep(now);
        let mut bindings: Vec<Binding> = self.bindings.iter().cloned().collect();
        bindings.sort_by_key(|binding| u32::from(binding.address));
        bindings
    }
}
