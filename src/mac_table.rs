//! MAC address -> VM id table built from VM definition files

use crate::error::{Error, Result};
use crate::types::{MacAddr, VmId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Extension of VM definition files inside the definitions directory
pub const DEFINITION_EXTENSION: &str = "conf";

/// Immutable snapshot of MAC -> VM id assignments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MacTable(BTreeMap<MacAddr, VmId>);

impl MacTable {
    /// Build a table from `(mac, id)` records.
    ///
    /// When several VMs declare the same MAC the lowest VM id wins.
    pub fn from_records(records: impl IntoIterator<Item = (MacAddr, VmId)>) -> Self {
        let mut map = BTreeMap::new();
        for (mac, id) in records {
            map.entry(mac)
                .and_modify(|existing: &mut VmId| {
                    if id < *existing {
                        *existing = id;
                    }
                })
                .or_insert(id);
        }
        MacTable(map)
    }

    /// Get the VM that owns `mac`
    pub fn lookup(&self, mac: &MacAddr) -> Option<VmId> {
        self.0.get(mac).copied()
    }

    /// Number of mapped MAC addresses
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no MAC addresses are mapped
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in MAC order
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddr, &VmId)> {
        self.0.iter()
    }
}

/// Scan every `*.conf` file directly inside `dir` and build a fresh table.
///
/// Only failing to list `dir` is an error. Files that cannot be read, or whose
/// name is not a VM id, contribute nothing.
pub async fn build(dir: &Path) -> Result<MacTable> {
    let read_dir_err = |source| Error::ReadDir {
        dir: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(read_dir_err)?;
    let mut scans = JoinSet::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let path = entry.path();
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => {}
            _ => continue,
        }
        let Some(id) = definition_id(&path) else {
            continue;
        };
        scans.spawn(scan_definition(path, id));
    }

    let mut records = Vec::new();
    while let Some(joined) = scans.join_next().await {
        match joined {
            Ok(found) => records.extend(found),
            Err(e) => warn!(error = %e, "definition scan task failed"),
        }
    }

    Ok(MacTable::from_records(records))
}

/// VM id for a definition file path, or `None` if it is not a definition file.
fn definition_id(path: &Path) -> Option<VmId> {
    if path.extension()? != DEFINITION_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    match stem.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping definition with non-numeric name");
            None
        }
    }
}

async fn scan_definition(path: PathBuf, id: VmId) -> Vec<(MacAddr, VmId)> {
    let file = match fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open VM definition");
            return Vec::new();
        }
    };

    // Decode lossily: a stray Latin-1 byte in a comment must not hide the interfaces.
    let mut lines = BufReader::new(file).split(b'\n');
    let mut found = Vec::new();
    loop {
        let raw = match lines.next_segment().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read VM definition");
                return Vec::new();
            }
        };
        let decoded = String::from_utf8_lossy(&raw);
        let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
        // Snapshot and pending sections start with `[name]`; only the current config counts.
        if line.starts_with('[') {
            break;
        }
        if let Some(mac) = parse_interface_mac(line) {
            debug!(vm_id = %id, mac = %mac, "found interface");
            found.push((mac, id));
        }
    }
    found
}

/// Extract the MAC from a `net<N>: <model>=<mac>,...` line.
pub fn parse_interface_mac(line: &str) -> Option<MacAddr> {
    let rest = line.strip_prefix("net")?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let options = rest[digits..].strip_prefix(':')?.trim_start();

    options
        .split([',', ';'])
        .filter_map(|opt| opt.split_once('='))
        .find_map(|(_, value)| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        stdfs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn parses_interface_lines() {
        assert_eq!(
            parse_interface_mac("net0: virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0,firewall=1"),
            Some(mac("aa:bb:cc:dd:ee:ff"))
        );
        assert_eq!(
            parse_interface_mac("net12: bridge=vmbr1,e1000=02:00:00:00:00:01"),
            Some(mac("02:00:00:00:00:01"))
        );
        assert_eq!(parse_interface_mac("net0: bridge=vmbr0"), None);
        assert_eq!(parse_interface_mac("netx: virtio=AA:BB:CC:DD:EE:FF"), None);
        assert_eq!(parse_interface_mac("net: virtio=AA:BB:CC:DD:EE:FF"), None);
        assert_eq!(parse_interface_mac("ide2: none,media=cdrom"), None);
        assert_eq!(parse_interface_mac("#net0: virtio=AA:BB:CC:DD:EE:FF"), None);
    }

    #[tokio::test]
    async fn builds_table_from_directory() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "100.conf",
            "boot: order=scsi0\nnet0: virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0\nmemory: 2048\n",
        );
        write(&dir, "101.conf", "memory: 1024\nnet0: bridge=vmbr0\n");
        write(&dir, "102.txt", "net0: virtio=11:22:33:44:55:66\n");

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&mac("aa:bb:cc:dd:ee:ff")), Some(VmId::new(100)));
    }

    #[tokio::test]
    async fn stops_at_first_section_header() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "200.conf",
            "net0: virtio=02:00:00:00:00:01\n[snap1]\nnet1: virtio=02:00:00:00:00:02\n",
        );

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.lookup(&mac("02:00:00:00:00:01")), Some(VmId::new(200)));
        assert_eq!(table.lookup(&mac("02:00:00:00:00:02")), None);
    }

    #[tokio::test]
    async fn multiple_interfaces_per_vm() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "300.conf",
            "net0: virtio=02:00:00:00:03:00\nnet1: virtio=02:00:00:00:03:01\n",
        );

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(&mac("02:00:00:00:03:01")), Some(VmId::new(300)));
    }

    #[tokio::test]
    async fn lowest_id_wins_duplicate_mac() {
        let dir = TempDir::new().unwrap();
        write(&dir, "120.conf", "net0: virtio=02:00:00:00:00:aa\n");
        write(&dir, "110.conf", "net0: virtio=02:00:00:00:00:AA\n");
        write(&dir, "130.conf", "net0: virtio=02:00:00:00:00:aa\n");

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.lookup(&mac("02:00:00:00:00:aa")), Some(VmId::new(110)));
    }

    #[tokio::test]
    async fn skips_non_numeric_names_and_directories() {
        let dir = TempDir::new().unwrap();
        write(&dir, "template.conf", "net0: virtio=02:00:00:00:00:01\n");
        stdfs::create_dir(dir.path().join("400.conf")).unwrap();
        write(&dir, "401.conf", "net0: virtio=02:00:00:00:00:02\n");

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&mac("02:00:00:00:00:02")), Some(VmId::new(401)));
    }

    #[tokio::test]
    async fn non_utf8_bytes_do_not_hide_interfaces() {
        let dir = TempDir::new().unwrap();
        stdfs::write(
            dir.path().join("100.conf"),
            b"#caf\xe9 server\r\nnet0: virtio=02:00:00:00:00:01,bridge=vmbr0\r\n",
        )
        .unwrap();

        let table = build(dir.path()).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&mac("02:00:00:00:00:01")), Some(VmId::new(100)));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = build(&missing).await.unwrap_err();
        assert!(matches!(err, Error::ReadDir { .. }));
    }
}
