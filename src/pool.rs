//! The pool of unassigned dynamic addresses.
//!
//! Addresses are handed out from the head and released onto the tail, so the
//! address that has been free the longest is always offered next.

use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// FIFO queue of free addresses with O(1) membership checks.
#[derive(Debug, Default, Clone)]
pub struct AddressPool {
    queue: VecDeque<Ipv4Addr>,
    members: HashSet<Ipv4Addr>,
}

impl AddressPool {
    /// Builds the initial pool from an inclusive range, skipping excluded addresses.
    pub fn from_range<F>(start: Ipv4Addr, end: Ipv4Addr, is_excluded: F) -> Self
    where
        F: Fn(Ipv4Addr) -> bool,
    {
        (u32::from(start)..=u32::from(end))
            .map(Ipv4Addr::from)
            .filter(|ip| !is_excluded(*ip))
            .collect()
    }

    /// Removes and returns the address at the head of the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool is empty.
    pub fn take(&mut self) -> Result<Ipv4Addr> {
        let ip = self.queue.pop_front().ok_or(Error::PoolExhausted)?;
        self.members.remove(&ip);
        Ok(ip)
    }

    /// Appends an address to the tail of the pool.
    ///
    /// Returns `false` and leaves the pool untouched if the address is already free.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        if !self.members.insert(ip) {
            return false;
        }
        self.queue.push_back(ip);
        true
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Free addresses in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.queue.iter().copied()
    }
}

impl FromIterator<Ipv4Addr> for AddressPool {
    fn from_iter<I: IntoIterator<Item = Ipv4Addr>>(iter: I) -> Self {
        let mut pool = Self::default();
        for ip in iter {
            pool.release(ip);
        }
        pool
    }
}
