//! Devices and the credentials used to reach them.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use secrecy::SecretString;

/// Username and password pair shared by every device in a run.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Login username.
    pub username: String,

    /// Login password (redacted in `Debug`).
    pub password: SecretString,
}

impl Credentials {
    /// Create a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// One switch in the inventory.
///
/// Identity is the address alone: two `Device`s with the same address are
/// the same device regardless of which credentials they carry.
#[derive(Debug, Clone)]
pub struct Device {
    address: String,
    credentials: Arc<Credentials>,
}

impl Device {
    /// Create a device entry.
    pub fn new(address: impl Into<String>, credentials: Arc<Credentials>) -> Self {
        Self {
            address: address.into(),
            credentials,
        }
    }

    /// Host identifier as listed in the inventory.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Credentials used to log in.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for Device {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Device {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
