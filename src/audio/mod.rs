//! # Audio Processing Module
//!
//! Everything between raw PCM arriving on a WebSocket and a channel's
//! speaking flag landing in the [`SpeakerRegistry`](crate::attention::SpeakerRegistry).
//!
//! ## Key Components:
//! - **Audio Processor**: PCM decoding, de-interleaving, peak normalization
//! - **Frame Router**: bounded per-channel queues fed by the WebSocket handler
//! - **Sample Buffer**: rolling accumulation window, one per channel
//! - **Speech Scorer**: speech probability for one window (`earshot` by default)
//! - **Channel Detector**: hysteresis over the score stream
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Encoding**: little-endian signed 16-bit PCM, or 32-bit float
//! - **Channels**: mono per channel, or one interleaved capture-device stream

// WebSocket handler is in src/websocket.rs at the root level
pub mod buffer;       // Rolling sample window
pub mod detector;     // Per-channel hysteresis detector
pub mod processor;    // Decoding and preprocessing
pub mod router;       // Ingress → detector queues
pub mod scorer;       // Speech probability models

pub use detector::{ChannelDetector, DetectorConfig};
pub use router::FrameRouter;
pub use scorer::EarshotScorer;
