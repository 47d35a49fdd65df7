//! Speech-probability scoring for one audio window.
//!
//! The detector only needs "how likely is this window to be speech", as a
//! number in [0, 1]. Any model can sit behind [`SpeechScorer`]; the bundled
//! one is the pure-Rust WebRTC-style detector from `earshot`.

use anyhow::{anyhow, bail, Result};
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// A model producing a speech probability for a normalized window.
pub trait SpeechScorer: Send {
    fn score(&mut self, window: &[f32], sample_rate: u32) -> Result<f32>;
}

/// `earshot` voice activity detector scoring the newest 30 ms of each window.
///
/// Returns 1.0 for speech and 0.0 otherwise.
pub struct EarshotScorer {
    detector: VoiceActivityDetector,
    scratch: Vec<i16>,
}

/// 30 ms at 16 kHz, the longest frame the detector accepts.
const FRAME_SAMPLES: usize = 480;

impl EarshotScorer {
    pub fn new() -> Self {
        Self {
            detector: VoiceActivityDetector::new(VoiceActivityProfile::LBR),
            scratch: Vec::with_capacity(FRAME_SAMPLES),
        }
    }
}

impl Default for EarshotScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechScorer for EarshotScorer {
    fn score(&mut self, window: &[f32], sample_rate: u32) -> Result<f32> {
        if sample_rate != 16000 {
            bail!("earshot scorer needs 16 kHz audio, got {} Hz", sample_rate);
        }
        if window.is_empty() {
            bail!("cannot score an empty window");
        }

        let tail = &window[window.len().saturating_sub(FRAME_SAMPLES)..];
        self.scratch.clear();
        self.scratch
            .extend(tail.iter().map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16));
        self.scratch.resize(FRAME_SAMPLES, 0);

        let is_speech = self
            .detector
            .predict_16khz(&self.scratch)
            .map_err(|e| anyhow!("voice activity prediction failed: {:?}", e))?;
        Ok(if is_speech { 1.0 } else { 0.0 })
    }
}
