//! Core types for wol-trigger

use crate::error::Error;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Numeric VM identifier, taken from the definition file name (`100.conf` -> 100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct VmId(u32);

impl VmId {
    /// Create a VM id from its number
    pub const fn new(id: u32) -> Self {
        VmId(id)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(VmId)
            .map_err(|_| Error::InvalidVmId(s.to_string()))
    }
}

/// A 6-octet MAC address.
///
/// Displayed in canonical form: lowercase hex, colon separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Create a MAC address from raw octets
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// Get the raw octets
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    /// Parse `aa:bb:cc:dd:ee:ff`, case-insensitive. Any other shape is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidMac(s.to_string());

        let mut octets = [0u8; 6];
        let mut groups = s.split(':');
        for octet in octets.iter_mut() {
            let group = groups.next().ok_or_else(invalid)?;
            if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        if groups.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// Power state reported by the control program's `status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Stopped,
    Suspended,
    Running,
    /// Any status string we have no transition for (`paused`, `prelaunch`, ...)
    Other(String),
    Nonexistent,
}

impl PowerState {
    /// Interpret the text printed by `status <id>`.
    ///
    /// Returns `None` when the output matches neither `status: <state>` nor a
    /// "does not exist" report.
    pub fn from_status_output(output: &str) -> Option<PowerState> {
        let output = output.trim();
        if output.ends_with("does not exist") {
            return Some(PowerState::Nonexistent);
        }
        let state = output.strip_prefix("status: ")?.trim();
        Some(match state {
            "stopped" => PowerState::Stopped,
            "suspended" => PowerState::Suspended,
            "running" => PowerState::Running,
            other => PowerState::Other(other.to_string()),
        })
    }

    /// Get the state as reported by the control program
    pub fn as_str(&self) -> &str {
        match self {
            PowerState::Stopped => "stopped",
            PowerState::Suspended => "suspended",
            PowerState::Running => "running",
            PowerState::Other(s) => s,
            PowerState::Nonexistent => "nonexistent",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single activation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The VM was already inside its cooldown window; nothing was run
    Debounced,
    Started,
    Resumed,
    /// The VM was in a state with no transition; nothing was run
    Skipped(PowerState),
}
