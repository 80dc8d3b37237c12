//! Client to address associations.
//!
//! The table is keyed by address; two client indexes (static and dynamic)
//! point into it. Lookups apply lazy expiry to the binding they return, so
//! callers always see a status consistent with `now`.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use chrono::{DateTime, TimeDelta, Utc};
use dhcp_proto::ClientId;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingStatus {
    /// Configured but never offered (static bindings only)
    Free,
    /// Offered, waiting for the client's REQUEST
    Pending,
    /// Acknowledged and in use
    Associated,
    /// Lease ran out
    Expired,
    /// Given back by the client, or declined
    Released,
}

impl BindingStatus {
    /// Pending or Associated: the address is held by its client.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Associated)
    }

    /// Transitions accepted by [`BindingTable::transition`].
    ///
    /// Expiry and the static lapse back to `Free` are not in this list: they
    /// only happen through lazy expiry.
    pub fn can_become(self, to: BindingStatus) -> bool {
        use BindingStatus::*;
        matches!(
            (self, to),
            (Free | Expired | Released, Pending)
                | (Pending, Associated)
                | (Associated, Associated)
                | (Pending | Associated, Released)
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingFlags: u8 {
        /// Address was declined by a client and sits in quarantine.
        const DECLINED = 0b0000_0001;
        /// Binding was taken over from another client after pool exhaustion.
        const RECLAIMED = 0b0000_0010;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub address: Ipv4Addr,
    pub client_id: ClientId,
    pub status: BindingStatus,
    pub is_static: bool,
    /// When the current status was entered
    pub assoc_time: DateTime<Utc>,
    /// Seconds the current status is valid for
    pub lease_time: u32,
    pub flags: BindingFlags,
}

impl Binding {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.assoc_time + TimeDelta::seconds(i64::from(self.lease_time))
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Seconds left before the current status lapses
    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let left = (self.expires_at() - now).num_seconds().max(0);
        u32::try_from(left).unwrap_or(u32::MAX)
    }

    /// A dynamic binding whose address can be handed to a new owner.
    ///
    /// Declined bindings stay out until their quarantine lapses into
    /// `Expired`.
    pub fn is_reusable(&self) -> bool {
        if self.is_static {
            return false;
        }
        match self.status {
            BindingStatus::Expired => true,
            BindingStatus::Released => !self.flags.contains(BindingFlags::DECLINED),
            _ => false,
        }
    }

    /// Apply lazy expiry. Returns true when the status changed.
    ///
    /// Dynamic bindings become `Expired`; static bindings fall back to `Free`
    /// and keep their address.
    fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let lapsing = match self.status {
            BindingStatus::Pending | BindingStatus::Associated => true,
            BindingStatus::Released => !self.is_static,
            BindingStatus::Free | BindingStatus::Expired => false,
        };
        if !lapsing || !self.is_lapsed(now) {
            return false;
        }

        let expired_at = self.expires_at();
        debug!(
            "Binding {} of {} lapsed ({:?})",
            self.address, self.client_id, self.status
        );
        self.status = if self.is_static {
            BindingStatus::Free
        } else {
            BindingStatus::Expired
        };
        self.assoc_time = expired_at;
        self.lease_time = 0;
        true
    }
}

/// Authoritative set of bindings
#[derive(Debug, Default)]
pub struct BindingTable {
    by_address: HashMap<Ipv4Addr, Binding>,
    static_by_client: HashMap<ClientId, Ipv4Addr>,
    dynamic_by_client: HashMap<ClientId, Ipv4Addr>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn refreshed(&mut self, address: Ipv4Addr, now: DateTime<Utc>) -> Option<&Binding> {
        let binding = self.by_address.get_mut(&address)?;
        binding.refresh(now);
        Some(&*binding)
    }

    pub fn find_static(&mut self, client_id: &ClientId, now: DateTime<Utc>) -> Option<&Binding> {
        let address = *self.static_by_client.get(client_id)?;
        self.refreshed(address, now)
    }

    /// Most recent dynamic binding of a client, whatever its status
    pub fn find_dynamic(&mut self, client_id: &ClientId, now: DateTime<Utc>) -> Option<&Binding> {
        let address = *self.dynamic_by_client.get(client_id)?;
        self.refreshed(address, now)
    }

    /// Static binding of a client if any, else its dynamic one
    pub fn find_client(&mut self, client_id: &ClientId, now: DateTime<Utc>) -> Option<&Binding> {
        let address = *self
            .static_by_client
            .get(client_id)
            .or_else(|| self.dynamic_by_client.get(client_id))?;
        self.refreshed(address, now)
    }

    pub fn find_by_address(&mut self, address: Ipv4Addr, now: DateTime<Utc>) -> Option<&Binding> {
        self.refreshed(address, now)
    }

    /// Apply lazy expiry to every binding. Returns how many changed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.by_address
            .values_mut()
            .filter_map(|binding| binding.refresh(now).then_some(()))
            .count()
    }

    /// Store a new binding for `address`
    ///
    /// A reusable binding already sitting on the address is replaced. A live,
    /// static or quarantined one makes the insert fail.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        address: Ipv4Addr,
        client_id: ClientId,
        status: BindingStatus,
        flags: BindingFlags,
        is_static: bool,
        lease_time: u32,
        now: DateTime<Utc>,
    ) -> Result<&Binding> {
        if let Some(existing) = self.refreshed(address, now) {
            if !existing.is_reusable() {
                return Err(Error::DuplicateAddress(address));
            }
            self.forget(address);
        }

        let index = if is_static {
            &mut self.static_by_client
        } else {
            &mut self.dynamic_by_client
        };
        index.insert(client_id.clone(), address);

        let binding = Binding {
            address,
            client_id,
            status,
            is_static,
            assoc_time: now,
            lease_time,
            flags,
        };
        Ok(&*self.by_address.entry(address).or_insert(binding))
    }

    /// Move a binding to a new status and restart its clock
    pub fn transition(
        &mut self,
        address: Ipv4Addr,
        to: BindingStatus,
        lease_time: u32,
        now: DateTime<Utc>,
    ) -> Result<&Binding> {
        let binding = self
            .by_address
            .get_mut(&address)
            .ok_or(Error::UnknownBinding(address))?;
        binding.refresh(now);

        if !binding.status.can_become(to) {
            return Err(Error::InvalidTransition {
                address,
                from: binding.status,
                to,
            });
        }

        if to == BindingStatus::Pending {
            binding.flags.remove(BindingFlags::DECLINED);
        }
        binding.status = to;
        binding.assoc_time = now;
        binding.lease_time = lease_time;
        Ok(&*binding)
    }

    /// Mark a binding `Released`; its address becomes reusable at once
    pub fn release(&mut self, address: Ipv4Addr, now: DateTime<Utc>) -> Result<&Binding> {
        let lease_time = self
            .by_address
            .get(&address)
            .map(|binding| binding.lease_time)
            .ok_or(Error::UnknownBinding(address))?;
        self.transition(address, BindingStatus::Released, lease_time, now)
    }

    /// Release a live binding and keep its address out of the pool for
    /// `quarantine` seconds
    pub fn decline(
        &mut self,
        address: Ipv4Addr,
        quarantine: u32,
        now: DateTime<Utc>,
    ) -> Result<&Binding> {
        self.transition(address, BindingStatus::Released, quarantine, now)?;
        let binding = self
            .by_address
            .get_mut(&address)
            .ok_or(Error::UnknownBinding(address))?;
        binding.flags.insert(BindingFlags::DECLINED);
        Ok(&*binding)
    }

    /// Hand a reusable dynamic binding to `client_id` as a fresh `Pending`
    /// offer
    pub fn reassign(
        &mut self,
        address: Ipv4Addr,
        client_id: ClientId,
        lease_time: u32,
        now: DateTime<Utc>,
    ) -> Result<&Binding> {
        let binding = self
            .by_address
            .get_mut(&address)
            .ok_or(Error::UnknownBinding(address))?;
        binding.refresh(now);
        if !binding.is_reusable() {
            return Err(Error::InvalidTransition {
                address,
                from: binding.status,
                to: BindingStatus::Pending,
            });
        }

        let previous = std::mem::replace(&mut binding.client_id, client_id.clone());
        if previous != client_id {
            binding.flags.insert(BindingFlags::RECLAIMED);
            if self.dynamic_by_client.get(&previous) == Some(&address) {
                self.dynamic_by_client.remove(&previous);
            }
        }
        self.dynamic_by_client.insert(client_id, address);

        self.transition(address, BindingStatus::Pending, lease_time, now)
    }

    /// Reusable dynamic binding that has been idle the longest
    pub fn oldest_reusable(&mut self, now: DateTime<Utc>) -> Option<Ipv4Addr> {
        self.sweep(now);
        self.by_address
            .values()
            .filter(|binding| binding.is_reusable())
            .min_by_key(|binding| (binding.assoc_time, u32::from(binding.address)))
            .map(|binding| binding.address)
    }

    /// Drop a binding and its client index entry
    fn forget(&mut self, address: Ipv4Addr) -> Option<Binding> {
        let binding = self.by_address.remove(&address)?;
        let index = if binding.is_static {
            &mut self.static_by_client
        } else {
            &mut self.dynamic_by_client
        };
        if index.get(&binding.client_id) == Some(&address) {
            index.remove(&binding.client_id);
        }
        Some(binding)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.by_address.values()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
