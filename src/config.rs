//! Daemon configuration resolved from the environment and command line

use crate::activator::DEFAULT_COOLDOWN;
use crate::control::DEFAULT_QM_PATH;
use crate::listener::WOL_PORT;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the VM definitions directory
pub const CONFIG_DIR_ENV: &str = "VM_CONFIG_DIR";

/// Environment variable naming the control program
pub const QM_PATH_ENV: &str = "QM_PATH";

/// Where Proxmox VE keeps this node's QEMU VM definitions
pub const DEFAULT_CONFIG_DIR: &str = "/etc/pve/qemu-server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory of `<id>.conf` VM definitions
    pub config_dir: PathBuf,
    /// Control program used for `status`/`start`/`resume`
    pub qm_path: PathBuf,
    /// Address the magic packet socket binds to
    pub bind: SocketAddrV4,
    /// Debounce window per VM
    pub cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            qm_path: PathBuf::from(DEFAULT_QM_PATH),
            bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, WOL_PORT),
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl Config {
    /// Resolve paths from `env`, falling back to `config_dir_arg`, then defaults.
    ///
    /// The environment takes precedence over the positional argument. Empty
    /// variables count as unset.
    pub fn resolve<F>(config_dir_arg: Option<PathBuf>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let defaults = Self::default();

        Self {
            config_dir: var(CONFIG_DIR_ENV)
                .or(config_dir_arg)
                .unwrap_or(defaults.config_dir),
            qm_path: var(QM_PATH_ENV).unwrap_or(defaults.qm_path),
            ..defaults
        }
    }

    /// [`Config::resolve`] against the process environment.
    pub fn from_env(config_dir_arg: Option<PathBuf>) -> Self {
        Self::resolve(config_dir_arg, |key| std::env::var(key).ok())
    }
}
