//! Server configuration.
//!
//! [`ConfigFile`] mirrors the administrator-edited YAML file field for field.
//! [`ConfigFile::validate`] turns it into a typed [`Config`], which is what the
//! allocator and the server hold for the lifetime of the process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::hwaddr::HardwareAddr;

/// Interface used when neither the command line nor the file names one.
pub const DEFAULT_INTERFACE: &str = "eth0";

/// The configuration file as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    pub range: String,
    #[serde(default)]
    pub lease_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reserved_addresses: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<u64>,
}

/// Validated, immutable server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub interface: Option<String>,
    pub network: Ipv4Net,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub reserved_addresses: HashMap<HardwareAddr, Ipv4Addr>,
    pub lease_duration_seconds: u32,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub server_ip: Option<Ipv4Addr>,
    pub sweep_interval_seconds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            network: Ipv4Net::new(Ipv4Addr::new(192, 168, 1, 0), 24)
                .expect("24 is a valid IPv4 prefix length"),
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 200),
            reserved_addresses: HashMap::new(),
            lease_duration_seconds: 86400,
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            server_ip: None,
            sweep_interval_seconds: None,
        }
    }
}

fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        Error::ConfigInvalid(format!("{} {:?} is not a valid IPv4 address", field, value))
    })
}

fn parse_range(range: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let parts: Vec<&str> = range.split('-').collect();
    let [start, end] = parts.as_slice() else {
        return Err(Error::ConfigInvalid(format!(
            "range {:?} must be written as <start>-<end>",
            range
        )));
    };

    let start = parse_ipv4("range start", start)?;
    let end = parse_ipv4("range end", end)?;
    if u32::from(start) > u32::from(end) {
        return Err(Error::ConfigInvalid(format!(
            "range start {} must not be greater than range end {}",
            start, end
        )));
    }

    Ok((start, end))
}

impl ConfigFile {
    /// Reads and parses a configuration file. Does not validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks every field and produces the typed [`Config`].
    ///
    /// # Errors
    ///
    /// [`Error::ConfigInvalid`] for a malformed network, range, gateway, DNS
    /// server, hardware address, duplicate reservation or missing/zero lease
    /// duration; [`Error::ReservedAddressInvalid`] for a reservation whose
    /// value is not an IPv4 address.
    pub fn validate(&self) -> Result<Config> {
        if self.network.trim().is_empty() {
            return Err(Error::ConfigInvalid("no network configured".to_string()));
        }
        let network: Ipv4Net = self.network.trim().parse().map_err(|_| {
            Error::ConfigInvalid(format!("network {:?} is not a valid CIDR", self.network))
        })?;

        let (range_start, range_end) = parse_range(&self.range)?;
        if !network.contains(&range_start) || !network.contains(&range_end) {
            warn!(
                "Range {}-{} is not fully inside network {}",
                range_start, range_end, network
            );
        }

        let lease_duration_seconds = match self.lease_duration {
            Some(0) => {
                return Err(Error::ConfigInvalid(
                    "lease_duration must be greater than 0".to_string(),
                ));
            }
            Some(seconds) => seconds,
            None => {
                return Err(Error::ConfigInvalid(
                    "lease_duration is required".to_string(),
                ));
            }
        };

        let gateway = self
            .gateway
            .as_deref()
            .map(|gateway| parse_ipv4("gateway", gateway))
            .transpose()?;

        let server_ip = self
            .server_ip
            .as_deref()
            .map(|server_ip| parse_ipv4("server_ip", server_ip))
            .transpose()?;

        let dns_servers = self
            .dns_servers
            .iter()
            .map(|server| parse_ipv4("dns server", server))
            .collect::<Result<Vec<_>>>()?;

        let mut reserved_addresses = HashMap::new();
        let mut reserved_ips = HashSet::new();
        for (mac, value) in &self.reserved_addresses {
            let hardware_address: HardwareAddr = mac.parse().map_err(Error::ConfigInvalid)?;
            let ip: Ipv4Addr =
                value
                    .trim()
                    .parse()
                    .map_err(|_| Error::ReservedAddressInvalid {
                        hardware_address: mac.clone(),
                        value: value.clone(),
                    })?;

            if !reserved_ips.insert(ip) {
                return Err(Error::ConfigInvalid(format!(
                    "reserved address {} is assigned to more than one hardware address",
                    ip
                )));
            }
            if reserved_addresses
                .insert(hardware_address.clone(), ip)
                .is_some()
            {
                return Err(Error::ConfigInvalid(format!(
                    "hardware address {} is reserved more than once",
                    hardware_address
                )));
            }
        }

        if self.sweep_interval == Some(0) {
            return Err(Error::ConfigInvalid(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }

        Ok(Config {
            interface: self.interface.clone(),
            network,
            range_start,
            range_end,
            reserved_addresses,
            lease_duration_seconds,
            gateway,
            dns_servers,
            server_ip,
            sweep_interval_seconds: self.sweep_interval,
        })
    }
}

impl Config {
    /// Loads and validates a configuration file in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        ConfigFile::load(path)?.validate()
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.network.netmask()
    }

    pub fn ip_in_range(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        addr >= u32::from(self.range_start) && addr <= u32::from(self.range_end)
    }

    pub fn range_size(&self) -> u32 {
        u32::from(self.range_end) - u32::from(self.range_start) + 1
    }

    pub fn reserved_address(&self, hardware_address: &HardwareAddr) -> Option<Ipv4Addr> {
        self.reserved_addresses.get(hardware_address).copied()
    }

    pub fn is_reserved_client(&self, hardware_address: &HardwareAddr) -> bool {
        self.reserved_addresses.contains_key(hardware_address)
    }

    pub fn is_reserved_ip(&self, ip: Ipv4Addr) -> bool {
        self.reserved_addresses.values().any(|&reserved| reserved == ip)
    }

    /// Address clients should treat as the server: `server_ip`, else the gateway.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.server_ip.or(self.gateway)
    }

    /// Interface to bind, with a command-line override taking precedence.
    pub fn interface_or<'a>(&'a self, cli_override: Option<&'a str>) -> &'a str {
        cli_override
            .or(self.interface.as_deref())
            .unwrap_or(DEFAULT_INTERFACE)
    }
}
