//! Error types for wol-trigger

use crate::types::VmId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for wol-trigger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building tables or activating VMs
#[derive(Error, Debug)]
pub enum Error {
    #[error("VM {0} does not exist")]
    VmNotFound(VmId),

    #[error("Unexpected status output for VM {id}: {output}")]
    UnexpectedStatus { id: VmId, output: String },

    #[error("Failed to list VM definitions in {}: {source}", dir.display())]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("Invalid VM id '{0}'")]
    InvalidVmId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },
}
