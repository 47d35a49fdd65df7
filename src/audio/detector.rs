//! # Per-Channel Speech Detection
//!
//! One [`ChannelDetector`] runs per microphone channel. Each incoming frame is
//! appended to a rolling buffer, the newest window is peak-normalized and
//! scored, and a hysteresis rule turns the score stream into a stable
//! speaking/silent flag that is written to the shared registry.
//!
//! ## Hysteresis:
//! - Onset is immediate: one window above `speech_threshold` sets speaking
//! - Offset needs `silence_frames_threshold` consecutive windows at or below
//!   the threshold; the count only advances while the channel is speaking
//! - On offset the buffer is cleared so the next utterance starts fresh

use crate::attention::{ChannelId, SpeakerRegistry};
use crate::audio::buffer::SampleWindow;
use crate::audio::processor::normalize_peak;
use crate::audio::scorer::SpeechScorer;
use crate::config::AppConfig;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Detector tuning, copied out of [`AppConfig`] so each task owns its own.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub sample_rate: u32,
    pub window_samples: usize,
    pub speech_threshold: f32,
    pub silence_frames_threshold: u32,
    pub max_buffer_samples: usize,
}

impl DetectorConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            window_samples: config.audio.window_samples,
            speech_threshold: config.audio.speech_threshold,
            silence_frames_threshold: config.audio.silence_frames_threshold,
            max_buffer_samples: config.max_buffer_samples(),
        }
    }
}

/// Speech detector for a single channel.
pub struct ChannelDetector {
    channel: ChannelId,
    config: DetectorConfig,
    buffer: SampleWindow,
    scorer: Box<dyn SpeechScorer>,
    registry: Arc<SpeakerRegistry>,
    speaking: bool,
    silence_frames: u32,
    frames: u64,
    scoring_errors: u64,
}

impl ChannelDetector {
    pub fn new(
        channel: ChannelId,
        config: DetectorConfig,
        scorer: Box<dyn SpeechScorer>,
        registry: Arc<SpeakerRegistry>,
    ) -> Self {
        let buffer = SampleWindow::new(config.max_buffer_samples);
        Self {
            channel,
            config,
            buffer,
            scorer,
            registry,
            speaking: false,
            silence_frames: 0,
            frames: 0,
            scoring_errors: 0,
        }
    }

    /// Feed one frame and publish the resulting flag. Returns the new flag.
    pub fn process_frame(&mut self, frame: &[f32]) -> bool {
        self.frames += 1;
        self.buffer.extend(frame);

        let probability = self.score_latest();
        if probability > self.config.speech_threshold {
            if !self.speaking {
                debug!(channel = self.channel, probability, "Speech onset");
            }
            self.speaking = true;
            self.silence_frames = 0;
        } else if self.speaking {
            self.silence_frames += 1;
            if self.silence_frames >= self.config.silence_frames_threshold {
                debug!(channel = self.channel, frames = self.silence_frames, "Speech offset");
                self.speaking = false;
                self.silence_frames = 0;
                self.buffer.clear();
            }
        }

        self.publish();
        self.speaking
    }

    /// Score the newest window. Too little audio or a scorer failure counts
    /// as silence.
    fn score_latest(&mut self) -> f32 {
        let Some(mut window) = self.buffer.latest(self.config.window_samples) else {
            return 0.0;
        };
        normalize_peak(&mut window);

        match self.scorer.score(&window, self.config.sample_rate) {
            Ok(probability) => probability,
            Err(e) => {
                self.scoring_errors += 1;
                warn!(
                    channel = self.channel,
                    errors = self.scoring_errors,
                    "Speech scoring failed, treating window as silence: {}",
                    e
                );
                0.0
            }
        }
    }

    fn publish(&self) {
        if let Err(e) = self.registry.set(self.channel, self.speaking) {
            warn!("Detector could not publish: {}", e);
        }
    }

    /// Consume frames until shutdown, then publish a final silent state.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Vec<f32>>, shutdown: ShutdownSignal) {
        info!(channel = self.channel, "Detector started");

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        self.process_frame(&frame);
                    }
                    None => {
                        debug!(channel = self.channel, "Frame source closed, waiting for shutdown");
                        shutdown.wait().await;
                        break;
                    }
                },
                _ = shutdown.wait() => break,
            }
        }

        frames.close();
        self.speaking = false;
        self.publish();
        info!(
            channel = self.channel,
            frames = self.frames,
            scoring_errors = self.scoring_errors,
            "Detector stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed list of scores; `None` entries fail.
    struct ScriptedScorer {
        script: VecDeque<Option<f32>>,
        peaks: Arc<Mutex<Vec<f32>>>,
    }

    impl ScriptedScorer {
        fn new(script: impl IntoIterator<Item = Option<f32>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                peaks: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl SpeechScorer for ScriptedScorer {
        fn score(&mut self, window: &[f32], _sample_rate: u32) -> Result<f32> {
            let peak = window.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            self.peaks.lock().unwrap().push(peak);
            match self.script.pop_front().flatten() {
                Some(p) => Ok(p),
                None => bail!("scripted failure"),
            }
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            sample_rate: 16000,
            window_samples: 4,
            speech_threshold: 0.2,
            silence_frames_threshold: 30,
            max_buffer_samples: 64,
        }
    }

    fn detector(script: Vec<Option<f32>>) -> (ChannelDetector, Arc<SpeakerRegistry>) {
        let registry = Arc::new(SpeakerRegistry::new([0, 1, 2, 3]));
        let detector = ChannelDetector::new(
            2,
            config(),
            Box::new(ScriptedScorer::new(script)),
            registry.clone(),
        );
        (detector, registry)
    }

    const FRAME: [f32; 4] = [0.1, -0.1, 0.05, 0.0];

    #[test]
    fn test_onset_is_immediate() {
        let (mut detector, registry) = detector(vec![Some(0.9)]);
        assert!(detector.process_frame(&FRAME));
        assert_eq!(registry.get(2), Some(true));
    }

    #[test]
    fn test_no_scoring_before_full_window() {
        let (mut detector, registry) = detector(vec![Some(0.9)]);
        // Two samples is less than one window, so the script isn't touched
        assert!(!detector.process_frame(&[0.5, 0.5]));
        assert_eq!(registry.get(2), Some(false));
        assert!(detector.process_frame(&[0.5, 0.5]));
    }

    #[test]
    fn test_short_pause_keeps_speaking() {
        let mut script = vec![Some(0.9)];
        script.extend(std::iter::repeat(Some(0.1)).take(29));
        script.push(Some(0.9));
        let (mut detector, _) = detector(script);

        for _ in 0..30 {
            assert!(detector.process_frame(&FRAME));
        }
        // 29 quiet windows then speech again: the count restarts
        assert!(detector.process_frame(&FRAME));
    }

    #[test]
    fn test_offset_after_silence_run() {
        let mut script = vec![Some(0.9)];
        script.extend(std::iter::repeat(Some(0.1)).take(30));
        let (mut detector, registry) = detector(script);

        assert!(detector.process_frame(&FRAME));
        for i in 1..30 {
            assert!(detector.process_frame(&FRAME), "flipped early at {}", i);
        }
        assert!(!detector.process_frame(&FRAME));
        assert_eq!(registry.get(2), Some(false));
        assert!(detector.buffer.is_empty());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let (mut detector, _) = detector(vec![Some(0.2)]);
        assert!(!detector.process_frame(&FRAME));
    }

    #[test]
    fn test_silence_frames_only_count_while_speaking() {
        let mut script: Vec<Option<f32>> = std::iter::repeat(Some(0.0)).take(40).collect();
        script.push(Some(0.9));
        let (mut detector, _) = detector(script);

        for _ in 0..40 {
            assert!(!detector.process_frame(&FRAME));
        }
        assert_eq!(detector.silence_frames, 0);
        assert!(detector.process_frame(&FRAME));
    }

    #[test]
    fn test_scoring_error_counts_as_silence() {
        let (mut detector, registry) = detector(vec![None, Some(0.9)]);
        assert!(!detector.process_frame(&FRAME));
        assert_eq!(detector.scoring_errors, 1);
        assert!(detector.process_frame(&FRAME));
        assert_eq!(registry.get(2), Some(true));
    }

    #[test]
    fn test_window_is_peak_normalized() {
        let scorer = ScriptedScorer::new(vec![Some(0.0)]);
        let peaks = scorer.peaks.clone();
        let registry = Arc::new(SpeakerRegistry::new([2]));
        let mut detector = ChannelDetector::new(2, config(), Box::new(scorer), registry);

        detector.process_frame(&FRAME);
        assert_eq!(*peaks.lock().unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_run_publishes_silence_on_shutdown() {
        let (detector, registry) = detector(vec![Some(0.9)]);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(detector.run(rx, shutdown.clone()));

        tx.send(FRAME.to_vec()).await.unwrap();
        for _ in 0..100 {
            if registry.get(2) == Some(true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registry.get(2), Some(true));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("detector did not stop")
            .unwrap();
        assert_eq!(registry.get(2), Some(false));
        assert!(tx.send(FRAME.to_vec()).await.is_err());
    }
}
