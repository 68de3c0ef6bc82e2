//! BLE record types used throughout the driver.
//!
//! These describe module-side entities. The driver does not populate or
//! validate them itself; they give applications a typed vocabulary for the
//! values that travel in AT commands and notifications.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// BLE stack role passed to `AT+QBLEINIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// GAP peripheral / GATT server (advertises, accepts connections).
    Peripheral,
    /// GAP central / GATT client.
    Central,
}

impl Role {
    /// The numeric code the module expects on the wire.
    pub fn code(&self) -> i64 {
        match self {
            Role::Peripheral => 1,
            Role::Central => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Peripheral => write!(f, "peripheral"),
            Role::Central => write!(f, "central"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(String);

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown BLE role: {}", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "peripheral" | "server" | "1" => Ok(Role::Peripheral),
            "central" | "client" | "2" => Ok(Role::Central),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// GATT characteristic property bitmask.
///
/// Combine flags with `|`:
///
/// ```
/// use hcm_core::CharacteristicProperties;
///
/// let props = CharacteristicProperties::READ | CharacteristicProperties::NOTIFY;
/// assert_eq!(props.bits(), 0x12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    /// Build from a raw bitmask.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Return the raw bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// `true` if every flag in `other` is set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<u8> for CharacteristicProperties {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

/// A BLE connection as reported by the module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    /// Connection index used by commands such as `AT+QBLEGATTSNTFY`.
    pub conn_index: u8,
    /// Peer MAC address, `AA:BB:CC:DD:EE:FF`.
    pub mac: String,
    /// Peer device name, if advertised.
    pub name: String,
    pub connected: bool,
}

/// A GATT service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: String,
}

/// A GATT characteristic definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: String,
    pub properties: CharacteristicProperties,
    /// Attribute handle assigned by the module once the server is committed.
    pub handle: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_codes() {
        assert_eq!(Role::Peripheral.code(), 1);
        assert_eq!(Role::Central.code(), 2);
    }

    #[test]
    fn role_from_str() {
        assert_eq!("peripheral".parse::<Role>().unwrap(), Role::Peripheral);
        assert_eq!("Client".parse::<Role>().unwrap(), Role::Central);
        assert_eq!("1".parse::<Role>().unwrap(), Role::Peripheral);
        assert!("observer".parse::<Role>().is_err());
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Peripheral.to_string(), "peripheral");
    }

    #[test]
    fn properties_combine() {
        let props = CharacteristicProperties::WRITE | CharacteristicProperties::NOTIFY;
        assert_eq!(props.bits(), 0x18);
        assert!(props.contains(CharacteristicProperties::NOTIFY));
        assert!(!props.contains(CharacteristicProperties::READ));
    }

    #[test]
    fn properties_from_raw() {
        assert_eq!(
            CharacteristicProperties::from(0x10),
            CharacteristicProperties::NOTIFY
        );
        assert_eq!(CharacteristicProperties::default().bits(), 0);
    }
}
