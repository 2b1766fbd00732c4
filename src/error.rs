//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

/// Errors that can occur while loading configuration or serving clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (`show-config` output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file is not well-formed YAML or has the wrong shape.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid server configuration.
    ///
    /// Returned by [`ConfigFile::validate`](crate::ConfigFile::validate) for a
    /// malformed CIDR, range, hardware address or lease duration. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A reservation maps a hardware address to something that is not an IPv4 address.
    #[error("Reserved address {value:?} for {hardware_address} is not a valid IPv4 address")]
    ReservedAddressInvalid {
        hardware_address: String,
        value: String,
    },

    /// The dynamic address pool is exhausted.
    ///
    /// Every address in the range is reserved or bound to an unexpired lease.
    /// The request that hit this is dropped; the client retries on its own schedule.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// A decoded packet could not be handled.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without privileges,
    /// or when the requested network interface doesn't exist.
    #[error("Socket error: {0}")]
    Socket(String),

    /// Inbound octets did not decode as a DHCPv4 message.
    #[error("Decode error: {0}")]
    Decode(#[from] dhcproto::error::DecodeError),

    /// A reply could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] dhcproto::error::EncodeError),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
