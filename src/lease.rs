//! Lease allocation and tracking.
//!
//! This module decides which address a client receives. For a given hardware
//! address, [`LeaseAllocator::resolve`] applies, in order:
//!
//! - Reservations from the configuration (always win, never touch the pool)
//! - Reuse of the client's previous address, unless another client now holds it
//! - A sweep that returns expired leases' addresses to the pool
//! - A fresh address from the head of the pool
//!
//! # Thread Safety
//!
//! The pool and the lease table live behind one [`Mutex`]. Every operation
//! takes the lock once and never awaits while holding it, so concurrent
//! `resolve` calls cannot interleave and hand the same address out twice.
//!
//! Leases are kept in memory only; a restart starts from an empty table.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::hwaddr::HardwareAddr;
use crate::pool::AddressPool;

/// A binding between a client and an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip_address: Ipv4Addr,
    pub hardware_address: HardwareAddr,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        ip_address: Ipv4Addr,
        hardware_address: HardwareAddr,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ip_address,
            hardware_address,
            expires_at: now + TimeDelta::seconds(i64::from(duration_seconds)),
        }
    }

    /// A lease is active strictly before `expires_at` and expired from then on.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn renew(&mut self, duration_seconds: u32, now: DateTime<Utc>) {
        self.expires_at = now + TimeDelta::seconds(i64::from(duration_seconds));
    }

    /// Returns seconds remaining at `now`, or 0 if expired.
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Debug)]
struct AllocatorState {
    pool: AddressPool,
    leases: HashMap<HardwareAddr, Lease>,
}

impl AllocatorState {
    /// True if a client other than `owner` holds `ip` with an unexpired lease.
    fn held_by_other(&self, ip: Ipv4Addr, owner: &HardwareAddr, now: DateTime<Utc>) -> bool {
        self.leases.iter().any(|(client, lease)| {
            client != owner && lease.ip_address == ip && !lease.is_expired_at(now)
        })
    }
}

/// The lease allocation engine.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use leasekeeper::{Config, HardwareAddr, LeaseAllocator};
///
/// # async fn example() -> leasekeeper::Result<()> {
/// let allocator = LeaseAllocator::new(Arc::new(Config::default()));
///
/// let client = HardwareAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
/// let ip = allocator.resolve(&client).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LeaseAllocator {
    config: Arc<Config>,
    state: Mutex<AllocatorState>,
}

impl LeaseAllocator {
    /// Builds the allocator with every non-reserved address of the range in the pool.
    pub fn new(config: Arc<Config>) -> Self {
        let pool = AddressPool::from_range(config.range_start, config.range_end, |ip| {
            config.is_reserved_ip(ip)
        });

        Self {
            state: Mutex::new(AllocatorState {
                pool,
                leases: HashMap::new(),
            }),
            config,
        }
    }

    /// Resolves the address for a client at the current time.
    ///
    /// Called identically for DISCOVER and REQUEST. A REQUEST is not checked
    /// against the address previously offered; the client is simply resolved
    /// again, which yields the same address through lease reuse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`](crate::Error::PoolExhausted) when the
    /// client has no reservation, no reusable lease, and no address is free
    /// even after reclaiming expired leases.
    pub async fn resolve(&self, hardware_address: &HardwareAddr) -> Result<Ipv4Addr> {
        self.resolve_at(hardware_address, Utc::now()).await
    }

    /// [`resolve`](Self::resolve) against an explicit clock reading.
    pub async fn resolve_at(
        &self,
        hardware_address: &HardwareAddr,
        now: DateTime<Utc>,
    ) -> Result<Ipv4Addr> {
        let duration = self.config.lease_duration_seconds;
        let mut state = self.state.lock().await;

        if let Some(ip) = self.config.reserved_address(hardware_address) {
            state
                .leases
                .entry(hardware_address.clone())
                .and_modify(|lease| {
                    lease.ip_address = ip;
                    lease.renew(duration, now);
                })
                .or_insert_with(|| Lease::new(ip, hardware_address.clone(), duration, now));
            debug!("{} -> {} (reserved)", hardware_address, ip);
            return Ok(ip);
        }

        if let Some(ip) = state
            .leases
            .get(hardware_address)
            .map(|lease| lease.ip_address)
        {
            if state.held_by_other(ip, hardware_address, now) {
                warn!(
                    "{} is now held by another client, dropping stale lease of {}",
                    ip, hardware_address
                );
                state.leases.remove(hardware_address);
            } else if let Some(lease) = state.leases.get_mut(hardware_address) {
                let remaining = lease.remaining_seconds_at(now);
                lease.renew(duration, now);
                debug!(
                    "{} -> {} (renewed, {}s were left)",
                    hardware_address, ip, remaining
                );
                return Ok(ip);
            }
        }

        let reclaimed = self.reclaim_expired_locked(&mut state, now);
        if reclaimed > 0 {
            debug!("Reclaimed {} expired lease(s)", reclaimed);
        }

        let ip = state.pool.take()?;
        state.leases.insert(
            hardware_address.clone(),
            Lease::new(ip, hardware_address.clone(), duration, now),
        );
        debug!(
            "{} -> {} (new, {} free)",
            hardware_address,
            ip,
            state.pool.len()
        );

        Ok(ip)
    }

    /// Removes expired dynamic leases and returns their addresses to the pool.
    ///
    /// Reserved clients keep their records. An address goes back to the pool
    /// only if it is not reserved and no other unexpired lease holds it.
    /// Addresses are appended earliest-expiry first.
    ///
    /// Returns the number of lease records removed.
    fn reclaim_expired_locked(&self, state: &mut AllocatorState, now: DateTime<Utc>) -> usize {
        let mut expired: Vec<(DateTime<Utc>, Ipv4Addr, HardwareAddr)> = state
            .leases
            .iter()
            .filter(|(client, lease)| {
                lease.is_expired_at(now) && !self.config.is_reserved_client(client)
            })
            .map(|(client, lease)| (lease.expires_at, lease.ip_address, client.clone()))
            .collect();
        expired.sort();

        let count = expired.len();
        for (_, ip, client) in expired {
            state.leases.remove(&client);
            if self.config.is_reserved_ip(ip)
                || !self.config.ip_in_range(ip)
                || state.held_by_other(ip, &client, now)
            {
                continue;
            }
            state.pool.release(ip);
        }

        count
    }

    /// Runs the expiry sweep on its own. Returns the number of leases removed.
    pub async fn reclaim_expired(&self) -> usize {
        self.reclaim_expired_at(Utc::now()).await
    }

    pub async fn reclaim_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        self.reclaim_expired_locked(&mut state, now)
    }

    /// Ends a client's dynamic lease on `ip` and appends `ip` to the pool.
    ///
    /// Reservations are never released, and a mismatched address is ignored.
    /// Returns whether a lease was released.
    pub async fn release(&self, hardware_address: &HardwareAddr, ip: Ipv4Addr) -> bool {
        if self.config.is_reserved_client(hardware_address) {
            return false;
        }

        let mut state = self.state.lock().await;
        let matches = state
            .leases
            .get(hardware_address)
            .is_some_and(|lease| lease.ip_address == ip);
        if !matches {
            return false;
        }

        state.leases.remove(hardware_address);
        if self.config.ip_in_range(ip) && !self.config.is_reserved_ip(ip) {
            state.pool.release(ip);
        }
        true
    }

    /// Returns the lease record for a client, expired or not.
    pub async fn lease(&self, hardware_address: &HardwareAddr) -> Option<Lease> {
        let state = self.state.lock().await;
        state.leases.get(hardware_address).cloned()
    }

    /// Returns all lease records, including expired ones not yet swept.
    pub async fn leases(&self) -> Vec<Lease> {
        let state = self.state.lock().await;
        state.leases.values().cloned().collect()
    }

    pub async fn active_lease_count(&self) -> usize {
        let now = Utc::now();
        let state = self.state.lock().await;
        state
            .leases
            .values()
            .filter(|lease| !lease.is_expired_at(now))
            .count()
    }

    /// Free addresses in the order they will be handed out.
    pub async fn free_addresses(&self) -> Vec<Ipv4Addr> {
        let state = self.state.lock().await;
        state.pool.iter().collect()
    }

    pub async fn free_address_count(&self) -> usize {
        let state = self.state.lock().await;
        state.pool.len()
    }
}
