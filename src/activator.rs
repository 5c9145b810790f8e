//! Debounced VM activation
//!
//! WoL senders retransmit the same packet several times, so every VM id gets a
//! cooldown window after a dispatch. Repeat requests inside the window are
//! dropped without touching the control program. The window always runs its
//! full length, whatever the outcome of the activation it guards.

use crate::control::{ControlVerb, VmControl};
use crate::error::{Error, Result};
use crate::types::{Activation, PowerState, VmId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default debounce window per VM id
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Debounces activation requests and drives the control program
pub struct Activator<C> {
    control: C,
    cooldown: Duration,
    /// VM id -> instant its cooldown ends; `None` never ends
    cooldowns: Mutex<HashMap<VmId, Option<Instant>>>,
}

impl<C: VmControl> Activator<C> {
    /// Create an activator with the default 5 second cooldown
    pub fn new(control: C) -> Self {
        Self::with_cooldown(control, DEFAULT_COOLDOWN)
    }

    /// Create an activator with a custom cooldown
    pub fn with_cooldown(control: C, cooldown: Duration) -> Self {
        Self {
            control,
            cooldown,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Get the control program collaborator
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Whether `id` is inside its debounce window. Does not modify any state.
    pub fn is_on_cooldown(&self, id: VmId) -> bool {
        let now = Instant::now();
        let cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        cooldowns.get(&id).is_some_and(|until| still_cooling(*until, now))
    }

    /// Atomically check and enter the cooldown window for `id`.
    ///
    /// Returns false if `id` was already cooling down.
    fn claim(&self, id: VmId) -> bool {
        let now = Instant::now();
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        cooldowns.retain(|_, until| still_cooling(*until, now));
        if cooldowns.contains_key(&id) {
            return false;
        }
        cooldowns.insert(id, now.checked_add(self.cooldown));
        true
    }

    /// Bring `id` towards running: `start` if stopped, `resume` if suspended.
    pub async fn activate(&self, id: VmId) -> Result<Activation> {
        if !self.claim(id) {
            return Ok(Activation::Debounced);
        }

        info!(vm_id = %id, "Starting VM");

        let verb = match self.query_state(id).await? {
            PowerState::Stopped => ControlVerb::Start,
            PowerState::Suspended => ControlVerb::Resume,
            PowerState::Nonexistent => return Err(Error::VmNotFound(id)),
            state => {
                info!(vm_id = %id, status = %state, "Tried to start VM with unknown status");
                return Ok(Activation::Skipped(state));
            }
        };

        self.run_checked(verb, id).await?;

        Ok(match verb {
            ControlVerb::Resume => Activation::Resumed,
            _ => Activation::Started,
        })
    }

    /// Activate `id`, logging instead of returning any failure.
    ///
    /// This is what the packet listener spawns for every matched packet.
    pub async fn trigger(self: Arc<Self>, id: VmId) {
        match self.activate(id).await {
            Ok(Activation::Debounced) => debug!(vm_id = %id, "VM on cooldown, ignoring"),
            Ok(Activation::Started) => info!(vm_id = %id, "VM started"),
            Ok(Activation::Resumed) => info!(vm_id = %id, "VM resumed"),
            Ok(Activation::Skipped(_)) => {}
            Err(Error::VmNotFound(_)) => warn!(vm_id = %id, "VM does not exist"),
            Err(e) => error!(vm_id = %id, error = %e, "Failed to start VM"),
        }
    }

    async fn query_state(&self, id: VmId) -> Result<PowerState> {
        let out = self.control.run(ControlVerb::Status, id).await?;

        // qm reports a missing VM on stderr and exits non-zero.
        let text = match out.stdout.trim() {
            "" => out.stderr.trim(),
            stdout => stdout,
        };

        match PowerState::from_status_output(text) {
            Some(PowerState::Nonexistent) => Err(Error::VmNotFound(id)),
            _ if !out.success => Err(Error::CommandFailed {
                command: self.control.describe(ControlVerb::Status, id),
                stderr: out.stderr.trim().to_string(),
            }),
            Some(state) => Ok(state),
            None => Err(Error::UnexpectedStatus {
                id,
                output: text.to_string(),
            }),
        }
    }

    /// Run `verb`, treating a non-zero exit or any diagnostic output as failure.
    async fn run_checked(&self, verb: ControlVerb, id: VmId) -> Result<()> {
        let out = self.control.run(verb, id).await?;
        let stderr = out.stderr.trim();

        if !out.success || !stderr.is_empty() {
            return Err(Error::CommandFailed {
                command: self.control.describe(verb, id),
                stderr: if stderr.is_empty() {
                    "exited with non-zero status".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }
        Ok(())
    }
}

fn still_cooling(until: Option<Instant>, now: Instant) -> bool {
    until.map_or(true, |until| until > now)
}
