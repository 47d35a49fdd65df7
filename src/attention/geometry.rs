//! Static mapping from channel id to the pan/tilt pose that looks at it.

use crate::attention::ChannelId;
use crate::config::ChannelConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// A pan/tilt pose in the robot's motor angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub pan: i32,
    pub tilt: i32,
}

impl Position {
    pub fn new(pan: i32, tilt: i32) -> Self {
        Self { pan, tilt }
    }
}

/// Immutable channel → gaze target table. `None` marks a channel with no
/// target (the robot's own voice).
#[derive(Debug, Clone, Default)]
pub struct ChannelGeometry {
    targets: BTreeMap<ChannelId, Option<Position>>,
}

impl ChannelGeometry {
    pub fn from_channels(channels: &[ChannelConfig]) -> Self {
        Self {
            targets: channels
                .iter()
                .map(|c| (c.id, c.gaze().map(|(pan, tilt)| Position::new(pan, tilt))))
                .collect(),
        }
    }

    /// Gaze target of a channel. The outer `None` means the channel is unknown.
    pub fn target(&self, channel: ChannelId) -> Option<Option<Position>> {
        self.targets.get(&channel).copied()
    }
}
