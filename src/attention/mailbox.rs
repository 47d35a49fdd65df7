//! # Override Mailbox
//!
//! Single-slot inbox for operator commands. Any number of HTTP handlers may
//! post; only the arbiter takes. A post replaces whatever is still waiting,
//! so a burst of button presses only ever delivers the most recent one.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// An operator instruction. Every present field is applied unconditionally;
/// absent fields leave the robot untouched.
///
/// A command with no fields at all is the "nod" backchannel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideCommand {
    #[serde(default)]
    pub pan: Option<i32>,
    #[serde(default)]
    pub tilt: Option<i32>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl OverrideCommand {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.pan.is_none() && self.tilt.is_none() && self.image.is_none() && self.icon.is_none()
    }
}

/// Latest-wins container holding at most one pending [`OverrideCommand`].
#[derive(Debug, Default)]
pub struct OverrideMailbox {
    slot: Mutex<Option<OverrideCommand>>,
}

impl OverrideMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a command in the mailbox, discarding any unconsumed one.
    ///
    /// Returns `true` when an earlier command was replaced before the arbiter
    /// got to it.
    pub fn post(&self, command: OverrideCommand) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace(command).is_some()
    }

    /// Atomically read and clear the slot.
    pub fn take_if_present(&self) -> Option<OverrideCommand> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Whether a command is waiting (used by the health endpoint).
    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
