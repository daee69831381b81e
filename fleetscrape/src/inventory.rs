//! Inventory and credential files.
//!
//! Both are plain text: the inventory lists one address per line, the
//! credentials file holds the username on its first non-empty line and
//! the password on the second. Any problem here is fatal to the run.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::device::{Credentials, Device};
use crate::error::{InventoryError, Result};

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| {
        InventoryError::Read {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// Addresses from inventory text: trimmed, blanks skipped, duplicates
/// dropped after their first occurrence.
pub fn parse_inventory(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let first = seen.insert(*line);
            if !first {
                warn!("duplicate inventory entry {} ignored", line);
            }
            first
        })
        .map(str::to_string)
        .collect()
}

/// Load the inventory at `path` as devices sharing `credentials`.
pub fn load_inventory(path: &Path, credentials: Arc<Credentials>) -> Result<Vec<Device>> {
    let addresses = parse_inventory(&read(path)?);
    if addresses.is_empty() {
        return Err(InventoryError::Empty(path.to_path_buf()).into());
    }

    debug!("loaded {} device(s) from {}", addresses.len(), path.display());
    Ok(addresses
        .into_iter()
        .map(|address| Device::new(address, credentials.clone()))
        .collect())
}

/// Load the username/password pair at `path`.
pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let text = read(path)?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    match (lines.next(), lines.next()) {
        (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
        _ => Err(InventoryError::Malformed {
            path: path.to_path_buf(),
            message: "expected a username line and a password line".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_inventory() {
        let text = "10.0.0.1\n\n  10.0.0.2  \r\n10.0.0.1\n\t\n10.0.0.3";
        assert_eq!(parse_inventory(text), ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_load_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iplist.txt");
        fs::write(&path, "10.0.0.1\n10.0.0.2\n").unwrap();

        let creds = Arc::new(Credentials::new("admin", "pw"));
        let devices = load_inventory(&path, creds).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].address(), "10.0.0.2");
        assert_eq!(devices[1].credentials().username, "admin");
    }

    #[test]
    fn test_empty_inventory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iplist.txt");
        fs::write(&path, "\n  \n").unwrap();

        let creds = Arc::new(Credentials::new("admin", "pw"));
        let err = load_inventory(&path, creds.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);

        let err = load_inventory(&dir.path().join("missing.txt"), creds).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_load_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.txt");
        fs::write(&path, "\nnetops\r\n s3cret \n").unwrap();

        let creds = load_credentials(&path).unwrap();
        assert_eq!(creds.username, "netops");
        assert_eq!(creds.password.expose_secret(), "s3cret");
    }

    #[test]
    fn test_credentials_need_two_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.txt");
        fs::write(&path, "netops\n").unwrap();

        let err = load_credentials(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("credentials.txt"));
    }
}
