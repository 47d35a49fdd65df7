//! # Configuration Management
//!
//! Loads the service configuration from multiple sources, highest priority first:
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables with the `APP_` prefix (`APP_ARBITER__CADENCE_MS=500`)
//! 3. `config.toml` in the working directory (optional)
//! 4. Built-in defaults from the `Default` impl
//!
//! ## Sections:
//! - **server**: where the command surface listens
//! - **audio**: detector windowing and hysteresis constants
//! - **arbiter**: cadence, dwell and settle timings, icon names
//! - **robot**: startup pose of the robot
//! - **channels**: one entry per microphone channel with its gaze geometry
//! - **commands**: named operator actions and the override each one posts
//!
//! ## Key Rust Concepts Used:
//! - **serde**: every section derives `Serialize`/`Deserialize`, so the same
//!   structs are read from TOML and env vars and written back out as JSON
//! - **Option**: a channel's `pan`/`tilt` are optional; the robot's own
//!   channel has none
//! - **BTreeMap**: ordered keys for the command table
//!
//! Channel geometry and the command table are read once at startup and never
//! change afterwards; the arbiter and the HTTP surface only receive copies.

use crate::attention::mailbox::OverrideCommand;
use crate::attention::ChannelId;
use anyhow::Result;              // Startup errors with context
use serde::{Deserialize, Serialize};  // TOML/env in, JSON out
use std::collections::{BTreeMap, HashSet};
use std::env;                    // HOST / PORT overrides

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioSettings,
    pub arbiter: ArbiterSettings,
    pub robot: RobotSettings,
    pub channels: Vec<ChannelConfig>,
    /// Named operator actions (`s1`, `listening`, `idle`, ...).
    ///
    /// A `BTreeMap` keeps `/api/v1/config` output stable between calls.
    pub commands: BTreeMap<String, OverrideCommand>,
}

/// HTTP listener settings for the command surface and audio ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,  // "127.0.0.1" for local only, "0.0.0.0" to accept the capture host
    pub port: u16,
}

/// Per-channel voice activity detection settings.
///
/// ## Hysteresis:
/// - `speech_threshold`: probability above which a window counts as speech
/// - `silence_frames_threshold`: consecutive sub-threshold frames needed to
///   flip a speaking channel back to silent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Sample rate of the incoming PCM (the bundled scorer needs 16kHz)
    pub sample_rate: u32,
    /// Samples handed to the scorer on every frame
    pub window_samples: usize,
    pub speech_threshold: f32,
    pub silence_frames_threshold: u32,
    /// Upper bound on the rolling accumulation buffer, in seconds of audio
    pub max_buffer_seconds: u32,
    /// Frames queued between the WebSocket ingress and one detector
    pub frame_queue_capacity: usize,
    /// Channel count of the interleaved capture device stream
    pub device_channels: usize,
}

/// Attention arbiter timings, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterSettings {
    pub cadence_ms: u64,
    /// Window after a gaze move during which no new-focus move is issued
    pub settle_ms: u64,
    /// Dwell on one speaker before a backchannel cue is emitted
    pub backchannel_dwell_ms: u64,
    /// How long the behaviour flag (or nod) is held before it is reverted
    pub backchannel_hold_ms: u64,
    /// Tilt offset used by the operator "nod" (empty override)
    pub nod_offset: i32,
    /// How long shutdown waits for tasks before reporting stragglers
    pub join_timeout_ms: u64,
    pub icons: IconSettings,
}

/// Icon asset names the arbiter shows for each conversational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconSettings {
    pub speaking: String,
    pub listening: String,
    pub idle: String,
}

/// Pose the robot takes before autonomous control begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotSettings {
    pub initial_image: String,
    pub initial_tilt: i32,
    pub startup_delay_ms: u64,
}

/// One microphone channel.
///
/// Channel 0 is the robot's own voice and must not carry geometry; every
/// other channel needs both `pan` and `tilt` so the robot can look at it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub id: ChannelId,
    /// Position of this channel inside the interleaved device frame
    pub input_index: usize,
    #[serde(default)]
    pub pan: Option<i32>,
    #[serde(default)]
    pub tilt: Option<i32>,
}

impl ChannelConfig {
    fn new(id: ChannelId, input_index: usize, gaze: Option<(i32, i32)>) -> Self {
        Self {
            id,
            input_index,
            pan: gaze.map(|(pan, _)| pan),
            tilt: gaze.map(|(_, tilt)| tilt),
        }
    }

    /// Gaze target for this channel, if both angles are configured.
    pub fn gaze(&self) -> Option<(i32, i32)> {
        match (self.pan, self.tilt) {
            (Some(pan), Some(tilt)) => Some((pan, tilt)),
            _ => None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            audio: AudioSettings {
                sample_rate: 16000,
                window_samples: 512,
                speech_threshold: 0.2,
                silence_frames_threshold: 30,
                max_buffer_seconds: 5,
                frame_queue_capacity: 64,
                device_channels: 6,
            },
            arbiter: ArbiterSettings {
                cadence_ms: 1000,
                settle_ms: 2000,
                backchannel_dwell_ms: 5000,
                backchannel_hold_ms: 2000,
                nod_offset: 10,
                join_timeout_ms: 5000,
                icons: IconSettings {
                    speaking: "speaking.png".to_string(),
                    listening: "listening.png".to_string(),
                    idle: "black.png".to_string(),
                },
            },
            robot: RobotSettings {
                initial_image: "blink.gif".to_string(),
                initial_tilt: -7,
                startup_delay_ms: 5000,
            },
            // The first two device inputs are the recorder's L/R pair
            channels: vec![
                ChannelConfig::new(0, 2, None),
                ChannelConfig::new(1, 3, Some((35, -7))),
                ChannelConfig::new(2, 4, Some((0, -7))),
                ChannelConfig::new(3, 5, Some((-35, -7))),
            ],
            commands: default_commands(),
        }
    }
}

/// The operator panel's action table.
fn default_commands() -> BTreeMap<String, OverrideCommand> {
    let gaze = |pan: i32| OverrideCommand {
        pan: Some(pan),
        tilt: Some(-7),
        ..OverrideCommand::default()
    };
    let icon = |name: &str| OverrideCommand {
        icon: Some(name.to_string()),
        ..OverrideCommand::default()
    };
    let image = |name: &str| OverrideCommand {
        image: Some(name.to_string()),
        ..OverrideCommand::default()
    };

    let mut commands = BTreeMap::new();
    commands.insert("s1".to_string(), gaze(40));
    commands.insert("s2".to_string(), gaze(0));
    commands.insert("s3".to_string(), gaze(-40));
    commands.insert("backchanneling".to_string(), OverrideCommand::default());
    commands.insert("listening".to_string(), icon("listening.png"));
    commands.insert("speaking".to_string(), icon("speaking.png"));
    for name in ["blush", "cry", "effort", "love", "sad", "star", "thinking"] {
        commands.insert(name.to_string(), image(&format!("{}.png", name)));
    }
    commands.insert("normal".to_string(), image("blink.gif"));
    commands.insert(
        "idle".to_string(),
        OverrideCommand {
            pan: Some(0),
            tilt: Some(-7),
            image: Some("blink.gif".to_string()),
            icon: Some("black.png".to_string()),
        },
    );
    commands
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`
    /// - `APP_AUDIO__SPEECH_THRESHOLD=0.35`
    /// - `HOST=0.0.0.0` / `PORT=9000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // APP_ then double underscores between nested keys
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the detectors or the arbiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let audio = &self.audio;
        if audio.sample_rate != 16000 {
            return Err(anyhow::anyhow!(
                "Sample rate must be 16000 Hz for the speech scorer, got {}",
                audio.sample_rate
            ));
        }
        if audio.window_samples == 0 {
            return Err(anyhow::anyhow!("Scoring window must hold at least one sample"));
        }
        if !(audio.speech_threshold > 0.0 && audio.speech_threshold < 1.0) {
            return Err(anyhow::anyhow!(
                "Speech threshold must be between 0 and 1, got {}",
                audio.speech_threshold
            ));
        }
        if audio.silence_frames_threshold == 0 {
            return Err(anyhow::anyhow!("Silence frame threshold must be greater than 0"));
        }
        if audio.frame_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Frame queue capacity must be greater than 0"));
        }
        if self.max_buffer_samples() < audio.window_samples {
            return Err(anyhow::anyhow!("Accumulation buffer is smaller than the scoring window"));
        }

        if self.arbiter.cadence_ms == 0 {
            return Err(anyhow::anyhow!("Arbiter cadence must be greater than 0"));
        }

        self.validate_channels()
    }

    fn validate_channels(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(anyhow::anyhow!("At least one channel must be configured"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id) {
                return Err(anyhow::anyhow!("Channel {} is configured twice", channel.id));
            }
            if channel.input_index >= self.audio.device_channels {
                return Err(anyhow::anyhow!(
                    "Channel {} reads input {} but the device only has {} inputs",
                    channel.id,
                    channel.input_index,
                    self.audio.device_channels
                ));
            }
            let has_any_angle = channel.pan.is_some() || channel.tilt.is_some();
            if channel.id == 0 && has_any_angle {
                return Err(anyhow::anyhow!("Channel 0 is the robot itself and cannot have a gaze target"));
            }
            if channel.id != 0 && channel.gaze().is_none() {
                return Err(anyhow::anyhow!("Channel {} needs both pan and tilt", channel.id));
            }
        }

        if !seen.contains(&0) {
            return Err(anyhow::anyhow!("Channel 0 (the robot's own voice) must be configured"));
        }

        Ok(())
    }

    /// Configured channel ids in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Upper bound on one detector's accumulation buffer.
    pub fn max_buffer_samples(&self) -> usize {
        self.audio.max_buffer_seconds as usize * self.audio.sample_rate as usize
    }

    /// Look up a named operator action.
    pub fn command(&self, name: &str) -> Option<&OverrideCommand> {
        self.commands.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.audio.window_samples, 512);
        assert_eq!(config.audio.silence_frames_threshold, 30);
        assert_eq!(config.channel_ids(), vec![0, 1, 2, 3]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_self_channel_has_no_gaze() {
        let config = AppConfig::default();
        let robot = config.channels.iter().find(|c| c.id == 0).unwrap();
        assert_eq!(robot.gaze(), None);
        let left = config.channels.iter().find(|c| c.id == 1).unwrap();
        assert_eq!(left.gaze(), Some((35, -7)));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.speech_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.sample_rate = 44100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_validation() {
        let mut config = AppConfig::default();
        config.channels.retain(|c| c.id != 0);
        assert!(config.validate().is_err(), "missing self channel");

        let mut config = AppConfig::default();
        config.channels[1].tilt = None;
        assert!(config.validate().is_err(), "half a gaze target");

        let mut config = AppConfig::default();
        config.channels[0].pan = Some(0);
        assert!(config.validate().is_err(), "self channel with geometry");

        let mut config = AppConfig::default();
        config.channels.push(config.channels[1].clone());
        assert!(config.validate().is_err(), "duplicate id");

        let mut config = AppConfig::default();
        config.channels[2].input_index = 6;
        assert!(config.validate().is_err(), "input index out of range");
    }

    #[test]
    fn test_load_reads_prefixed_environment() {
        env::set_var("APP_ARBITER__CADENCE_MS", "250");
        env::set_var("APP_AUDIO__SPEECH_THRESHOLD", "0.35");
        let loaded = AppConfig::load();
        env::remove_var("APP_ARBITER__CADENCE_MS");
        env::remove_var("APP_AUDIO__SPEECH_THRESHOLD");

        let config = loaded.unwrap();
        assert_eq!(config.arbiter.cadence_ms, 250);
        assert!((config.audio.speech_threshold - 0.35).abs() < 1e-6);
        // Untouched sections keep their defaults
        assert_eq!(config.audio.window_samples, 512);
        assert_eq!(config.channel_ids(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_default_command_table() {
        let config = AppConfig::default();
        let s1 = config.command("s1").unwrap();
        assert_eq!((s1.pan, s1.tilt), (Some(40), Some(-7)));
        assert!(config.command("backchanneling").unwrap().is_empty());
        assert_eq!(config.command("cry").unwrap().image.as_deref(), Some("cry.png"));
        let idle = config.command("idle").unwrap();
        assert_eq!(idle.icon.as_deref(), Some("black.png"));
        assert!(config.command("dance").is_none());
    }
}
