//! # Speaker Registry
//!
//! Shared map of channel id → "is speaking", one entry per configured channel.
//!
//! ## Concurrency Contract:
//! - **Single writer per entry**: only the detector that owns a channel calls `set`
//! - **Readers**: the arbiter (and the status endpoints) call `snapshot`
//! - **Per-key atomicity only**: a snapshot may mix values written at slightly
//!   different times across channels; the arbiter tolerates that skew
//!
//! The key set is fixed when the registry is built, so each entry can be a
//! plain `AtomicBool` and no lock is ever taken.

use crate::attention::ChannelId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Write to a channel that was never configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryError {
    pub channel: ChannelId,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel {} is not registered", self.channel)
    }
}

impl std::error::Error for RegistryError {}

/// Concurrency-safe channel → speaking map.
#[derive(Debug)]
pub struct SpeakerRegistry {
    entries: BTreeMap<ChannelId, AtomicBool>,
}

impl SpeakerRegistry {
    /// Create a registry with every channel initialised to "not speaking".
    pub fn new(channels: impl IntoIterator<Item = ChannelId>) -> Self {
        Self {
            entries: channels
                .into_iter()
                .map(|id| (id, AtomicBool::new(false)))
                .collect(),
        }
    }

    /// Record the latest speaking state for one channel.
    pub fn set(&self, channel: ChannelId, speaking: bool) -> Result<(), RegistryError> {
        let entry = self.entries.get(&channel).ok_or(RegistryError { channel })?;
        entry.store(speaking, Ordering::Release);
        Ok(())
    }

    /// Current value for one channel, `None` if it is not registered.
    #[cfg(test)]
    pub fn get(&self, channel: ChannelId) -> Option<bool> {
        self.entries.get(&channel).map(|e| e.load(Ordering::Acquire))
    }

    /// All channels in ascending id order with their latest value.
    pub fn snapshot(&self) -> Vec<(ChannelId, bool)> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.load(Ordering::Acquire)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of channels currently marked speaking.
    pub fn speaking_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.load(Ordering::Acquire))
            .count()
    }
}
