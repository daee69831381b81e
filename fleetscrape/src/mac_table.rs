//! MAC address table extraction and the location CSV.
//!
//! Rows come from `show mac address-table dynamic | include Gi`. Each is
//! joined with an operator-maintained `interface_location.csv`
//! (`Device_name,interface,location`) and appended to a dated CSV.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{ArtifactError, InventoryError, Result};

/// Location used when the map has no entry.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Header of the output CSV.
pub const CSV_HEADER: &str = "Device_name,MAC_Address,Interface,Location,Check time";

/// Directory for MAC location tables, under the output root.
pub const MAC_DIR: &str = "Mac_location";

const BOM: &str = "\u{feff}";

/// One MAC address seen on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacRecord {
    pub device_name: String,
    pub mac: String,
    pub interface: String,
    pub location: String,
    pub checked_at: String,
}

impl MacRecord {
    fn csv_row(&self) -> String {
        [
            &self.device_name,
            &self.mac,
            &self.interface,
            &self.location,
            &self.checked_at,
        ]
        .map(|field| escape_csv_field(field))
        .join(",")
    }
}

/// Quote a CSV field if it contains a comma, quote or newline.
pub fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV line, honoring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Whether `token` looks like a dotted MAC: three groups of 1-4 characters.
fn is_dotted_mac(token: &str) -> bool {
    let groups: Vec<_> = token.split('.').collect();
    groups.len() == 3 && groups.iter().all(|g| (1..=4).contains(&g.len()))
}

/// MAC and gigabit interface from one table line.
///
/// The interface is the first token after the MAC containing `Gi`;
/// `GigabitEthernet` is shortened to `Gi`.
pub fn parse_mac_line(line: &str) -> Option<(String, String)> {
    let tokens: Vec<_> = line.split_whitespace().collect();

    tokens.iter().enumerate().find_map(|(i, token)| {
        if !is_dotted_mac(token) {
            return None;
        }
        tokens[i + 1..].iter().find_map(|candidate| {
            let candidate = candidate.trim_matches(',');
            if candidate.contains("GigabitEthernet") {
                Some((token.to_string(), candidate.replace("GigabitEthernet", "Gi")))
            } else if candidate.contains("Gi") {
                Some((token.to_string(), candidate.to_string()))
            } else {
                None
            }
        })
    })
}

/// Device name to interface to location.
#[derive(Debug, Clone, Default)]
pub struct LocationMap {
    entries: HashMap<String, HashMap<String, String>>,
}

impl LocationMap {
    /// Parse CSV text with a `Device_name,interface,location` header in
    /// any column order. A leading BOM is ignored.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let text = text.strip_prefix(BOM).unwrap_or(text);
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().map(split_csv_line).unwrap_or_default();
        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| InventoryError::Malformed {
                    path: path.to_path_buf(),
                    message: format!("missing column '{}'", name),
                })
        };
        let (dev_col, intf_col, loc_col) =
            (column("Device_name")?, column("interface")?, column("location")?);

        let mut map = Self::default();
        for (n, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            let field = |i: usize| fields.get(i).map(|f| f.trim());
            match (field(dev_col), field(intf_col), field(loc_col)) {
                (Some(device), Some(interface), Some(location)) => {
                    map.insert(device, interface, location);
                }
                _ => warn!("{}: row {} is short, skipped", path.display(), n + 2),
            }
        }
        Ok(map)
    }

    /// Load `path`; a missing file gives an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let map = Self::parse(&text, path)?;
                info!("loaded interface locations from {}", path.display());
                Ok(map)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "{} not found, locations will be '{}'",
                    path.display(),
                    UNKNOWN_LOCATION
                );
                Ok(Self::default())
            }
            Err(source) => Err(InventoryError::Read {
                path: path.to_path_buf(),
                source,
            }
            .into()),
        }
    }

    pub fn insert(&mut self, device: &str, interface: &str, location: &str) {
        self.entries
            .entry(device.to_string())
            .or_default()
            .insert(interface.to_string(), location.to_string());
    }

    /// Location of `interface` on `device`, or [`UNKNOWN_LOCATION`].
    pub fn lookup(&self, device: &str, interface: &str) -> &str {
        self.entries
            .get(device)
            .and_then(|interfaces| interfaces.get(interface))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LOCATION)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Records from one device's table output. Unparseable lines are logged
/// and skipped.
pub fn parse_mac_table(
    device_name: &str,
    output: &str,
    locations: &LocationMap,
    checked_at: &str,
) -> Vec<MacRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_mac_line(line) {
            Some((mac, interface)) => {
                let location = locations.lookup(device_name, &interface).to_string();
                debug!("{}: {} on {} at {}", device_name, mac, interface, location);
                Some(MacRecord {
                    device_name: device_name.to_string(),
                    mac,
                    interface,
                    location,
                    checked_at: checked_at.to_string(),
                })
            }
            None => {
                warn!("{}: could not parse '{}'", device_name, line);
                None
            }
        })
        .collect()
}

/// Append `records` to the CSV at `path`, writing the header (with a BOM)
/// only when the file is new.
pub fn append_csv(path: &Path, records: &[MacRecord]) -> Result<()> {
    let write_err = |source: io::Error| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let is_new = !path.exists();

    let mut contents = String::new();
    if is_new {
        contents.push_str(BOM);
        contents.push_str(CSV_HEADER);
        contents.push_str("\r\n");
    }
    for record in records {
        contents.push_str(&record.csv_row());
        contents.push_str("\r\n");
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(contents.as_bytes()).map_err(write_err)?;
    Ok(())
}
