//! wol-trigger: Wake-on-LAN for local virtual machines
//!
//! Listens for WoL magic packets, maps the target MAC to a VM through the
//! host's VM definition files, and starts or resumes that VM through the
//! control program (`qm` on Proxmox VE). The MAC table is rebuilt whenever
//! the definitions change or the process receives SIGHUP.

pub mod activator;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod listener;
pub mod mac_table;
pub mod packet;
pub mod reload;
pub mod types;

pub use activator::Activator;
pub use config::Config;
pub use control::{CommandOutput, ControlVerb, QmControl, VmControl};
pub use error::{Error, Result};
pub use listener::Listener;
pub use mac_table::MacTable;
pub use reload::{Reloader, TableSlot};
pub use types::{Activation, MacAddr, PowerState, VmId};
