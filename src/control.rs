//! External VM control program (`qm`) collaborator
//!
//! The daemon never manages VMs itself. It runs three commands of the control
//! program and interprets their output:
//!
//! - `status <id>` prints `status: <state>`, or a message ending in
//!   `does not exist`
//! - `start <id>`
//! - `resume <id>`

use crate::error::Result;
use crate::types::VmId;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;

/// Default location of the Proxmox VE control program
pub const DEFAULT_QM_PATH: &str = "/usr/sbin/qm";

/// Subcommands of the control program this daemon relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlVerb {
    Status,
    Start,
    Resume,
}

impl ControlVerb {
    /// Get the subcommand name
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlVerb::Status => "status",
            ControlVerb::Start => "start",
            ControlVerb::Resume => "resume",
        }
    }
}

impl fmt::Display for ControlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Captured result of one control program invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Trait abstracting the VM control program
///
/// Allows the activator to be driven by the real `qm` binary or by a
/// recording mock in tests.
pub trait VmControl: Send + Sync + 'static {
    /// Run `<verb> <id>` and capture its output.
    ///
    /// Errors only when the program could not be run at all; a non-zero exit
    /// is reported through [`CommandOutput::success`].
    fn run(&self, verb: ControlVerb, id: VmId) -> impl Future<Output = Result<CommandOutput>> + Send;

    /// Human-readable command line, for log and error messages
    fn describe(&self, verb: ControlVerb, id: VmId) -> String;
}

/// Control backed by the `qm` executable
#[derive(Debug, Clone)]
pub struct QmControl {
    program: PathBuf,
}

impl QmControl {
    /// Create a control backed by the program at `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for QmControl {
    fn default() -> Self {
        Self::new(DEFAULT_QM_PATH)
    }
}

impl VmControl for QmControl {
    async fn run(&self, verb: ControlVerb, id: VmId) -> Result<CommandOutput> {
        let output = Command::new(&self.program)
            .arg(verb.as_str())
            .arg(id.to_string())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn describe(&self, verb: ControlVerb, id: VmId) -> String {
        format!("{} {} {}", self.program.display(), verb, id)
    }
}
