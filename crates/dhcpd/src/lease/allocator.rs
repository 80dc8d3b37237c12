use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use dhcp_proto::ClientId;
use tracing::{debug, info};

use super::{BindingFlags, BindingStatus, LeaseState};
use crate::error::Result;

/// Outcome of an allocation, tagged with the preference step that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Client already holds a live binding
    Existing(Ipv4Addr),
    /// Client's own lapsed or released binding, revived
    Previous(Ipv4Addr),
    /// The address the client asked for
    Requested(Ipv4Addr),
    /// Next address from the pool cursor
    Fresh(Ipv4Addr),
    /// Oldest reusable binding of another client, taken over
    Reclaimed(Ipv4Addr),
    Exhausted,
}

impl Allocation {
    pub fn address(&self) -> Option<Ipv4Addr> {
        match *self {
            Allocation::Existing(address)
            | Allocation::Previous(address)
            | Allocation::Requested(address)
            | Allocation::Fresh(address)
            | Allocation::Reclaimed(address) => Some(address),
            Allocation::Exhausted => None,
        }
    }
}

impl LeaseState {
    /// Pick an address for a dynamic client
    ///
    /// Preference order: live binding, previous binding, requested address,
    /// pool cursor, oldest reusable binding. Every new or revived binding is
    /// `Pending` for `pending_time`.
    pub fn allocate(
        &mut self,
        client_id: &ClientId,
        requested: Option<Ipv4Addr>,
        now: DateTime<Utc>,
    ) -> Result<Allocation> {
        let pending_time = self.pool.pending_time;

        if let Some(binding) = self.bindings.find_dynamic(client_id, now) {
            let address = binding.address;
            if binding.status.is_live() {
                return Ok(Allocation::Existing(address));
            }
            if binding.is_reusable() {
                self.bindings
                    .reassign(address, client_id.clone(), pending_time, now)?;
                return Ok(Allocation::Previous(address));
            }
        }

        if let Some(address) = requested {
            if self.is_offerable(address) {
                match self.bindings.find_by_address(address, now).map(|b| b.is_reusable()) {
                    None => {
                        self.insert_pending(address, client_id, now)?;
                        return Ok(Allocation::Requested(address));
                    }
                    Some(true) => {
                        self.bindings
                            .reassign(address, client_id.clone(), pending_time, now)?;
                        return Ok(Allocation::Requested(address));
                    }
                    Some(false) => {
                        debug!("Requested address {} of {} is taken", address, client_id)
                    }
                }
            }
        }

        while let Some(address) = self.pool.take_free_address() {
            if address == self.pool.server_id {
                continue;
            }
            match self.bindings.find_by_address(address, now).map(|b| b.is_reusable()) {
                None => {
                    self.insert_pending(address, client_id, now)?;
                    return Ok(Allocation::Fresh(address));
                }
                Some(true) => {
                    self.bindings
                        .reassign(address, client_id.clone(), pending_time, now)?;
                    return Ok(Allocation::Fresh(address));
                }
                Some(false) => debug!("Pool address {} already bound, skipping", address),
            }
        }

        if let Some(address) = self.bindings.oldest_reusable(now) {
            self.bindings
                .reassign(address, client_id.clone(), pending_time, now)?;
            info!("Pool exhausted, reclaimed {} for {}", address, client_id);
            return Ok(Allocation::Reclaimed(address));
        }

        Ok(Allocation::Exhausted)
    }

    /// In range and not the server's own address
    fn is_offerable(&self, address: Ipv4Addr) -> bool {
        self.pool.contains(address) && address != self.pool.server_id
    }

    fn insert_pending(
        &mut self,
        address: Ipv4Addr,
        client_id: &ClientId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.bindings.insert(
            address,
            client_id.clone(),
            BindingStatus::Pending,
            BindingFlags::empty(),
            false,
            self.pool.pending_time,
            now,
        )?;
        Ok(())
    }
}
