//! # Attention Module
//!
//! Turns the per-channel "is speaking" signals into a single attention target
//! for the robot: where it looks, which icon it shows, and when it gives a
//! backchannel cue.
//!
//! ## Key Components:
//! - **SpeakerRegistry**: shared channel → speaking map written by the detectors
//! - **OverrideMailbox**: single-slot inbox for operator commands
//! - **AttentionArbiter**: the periodic decision loop
//! - **ActuationPort**: where the arbiter's intents go (pan, tilt, icon, image)
//!
//! ## Data Flow:
//! ```text
//! detectors ──set──▶ SpeakerRegistry ──snapshot──▶ AttentionArbiter ──▶ ActuationPort
//!                    OverrideMailbox ──take─────────▲
//! ```

pub mod actuation;
pub mod arbiter;
pub mod geometry;
pub mod mailbox;
pub mod registry;

/// Identifier of one microphone channel. Channel 0 is the robot itself.
pub type ChannelId = u8;

/// The robot's own voice channel.
pub const SELF_CHANNEL: ChannelId = 0;

pub use actuation::LoggingActuator;
pub use arbiter::{AttentionArbiter, FocusView};
pub use geometry::ChannelGeometry;
pub use mailbox::{OverrideCommand, OverrideMailbox};
pub use registry::SpeakerRegistry;
