//! # leasekeeper
//!
//! A small DHCPv4 server built around a sticky, reservation-aware lease allocator.
//!
//! ## Features
//!
//! - DISCOVER/OFFER and REQUEST/ACK handling, plus RELEASE
//! - Static hardware-address-to-IP reservations
//! - Sticky leases: a returning client gets its previous address back
//! - Lazy reclamation of expired leases, with an optional periodic sweep
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use leasekeeper::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> leasekeeper::Result<()> {
//!     let config = Config::load("dhcp_config.yaml")?;
//!     let interface = config.interface_or(None).to_string();
//!     let server = DhcpServer::new(config, &interface)?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Validated server configuration (subnet, range, reservations, lease duration)
//! - [`LeaseAllocator`] - Decides which address each client gets
//! - [`AddressPool`] - FIFO queue of free dynamic addresses
//! - [`DhcpServer`] - Listens on UDP port 67 and answers clients
//!
//! Leases live in memory only. REQUEST is answered by resolving the client
//! again rather than checking the requested address, and no NAK is ever sent:
//! a client the server cannot serve simply gets no reply.

pub mod config;
pub mod error;
pub mod hwaddr;
pub mod lease;
pub mod pool;
pub mod server;

pub use config::{Config, ConfigFile};
pub use error::{Error, Result};
pub use hwaddr::HardwareAddr;
pub use lease::{Lease, LeaseAllocator};
pub use pool::AddressPool;
pub use server::{DhcpServer, RequestKind};
