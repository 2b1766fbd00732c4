//! Client hardware addresses.

use std::fmt;
use std::str::FromStr;

/// Longest hardware address a BOOTP `chaddr` field can carry.
pub const MAX_HARDWARE_ADDRESS_LEN: usize = 16;

/// A client hardware address, the key of the lease table.
///
/// Displayed in canonical form: lowercase hex octets joined by `:`.
/// Parsing also accepts `-` separators and uppercase digits, so
/// `AA-BB-CC-DD-EE-FF` and `aa:bb:cc:dd:ee:ff` name the same client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddr(Vec<u8>);

impl HardwareAddr {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for HardwareAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', ":");
        if normalized.is_empty() {
            return Err("empty hardware address".to_string());
        }

        let bytes = normalized
            .split(':')
            .map(|part| {
                if part.is_empty() || part.len() > 2 {
                    return Err(format!("invalid octet {:?} in hardware address {:?}", part, s));
                }
                u8::from_str_radix(part, 16)
                    .map_err(|_| format!("invalid octet {:?} in hardware address {:?}", part, s))
            })
            .collect::<Result<Vec<u8>, String>>()?;

        if bytes.len() > MAX_HARDWARE_ADDRESS_LEN {
            return Err(format!(
                "hardware address {:?} is longer than {} octets",
                s, MAX_HARDWARE_ADDRESS_LEN
            ));
        }

        Ok(Self(bytes))
    }
}
