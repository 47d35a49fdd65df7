//! # Audio Decoding and Preprocessing
//!
//! Converts what the capture collaborator sends over the wire into the
//! normalized `f32` frames the detectors work with.
//!
//! ## Key Functions:
//! - **Format validation**: the declared stream must match the configured sample rate
//! - **PCM decoding**: little-endian `i16` or `f32` bytes → `f32` in [-1.0, 1.0]
//! - **De-interleaving**: pull one microphone out of a multi-input device frame
//! - **Peak normalization**: rescale a scoring window so input gain doesn't matter

use crate::config::AudioSettings;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Sample encoding of binary WebSocket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 16-bit signed little-endian PCM
    #[default]
    I16,
    /// 32-bit float little-endian
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Stream description a client declares before sending audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
    #[serde(default)]
    pub format: SampleFormat,
}

impl StreamFormat {
    /// Mono 16-bit stream at the configured rate.
    pub fn mono(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: 1,
            format: SampleFormat::I16,
        }
    }

    /// Interleaved 16-bit stream from the configured capture device.
    pub fn device(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.device_channels,
            format: SampleFormat::I16,
        }
    }

    /// Check a declared format against what the detectors expect.
    pub fn validate(&self, settings: &AudioSettings) -> Result<(), String> {
        if self.sample_rate != settings.sample_rate {
            return Err(format!(
                "Sample rate mismatch: expected {}, got {}",
                settings.sample_rate, self.sample_rate
            ));
        }
        if self.channels == 0 {
            return Err("Channel count must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Decode raw little-endian bytes into `f32` samples in [-1.0, 1.0].
pub fn decode_pcm(data: &[u8], format: SampleFormat) -> Result<Vec<f32>, String> {
    if data.is_empty() {
        return Err("Audio data is empty".to_string());
    }
    let width = format.bytes_per_sample();
    if data.len() % width != 0 {
        return Err(format!(
            "Audio data length {} is not a multiple of {} bytes",
            data.len(),
            width
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / width);
    match format {
        SampleFormat::I16 => {
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample as f32 / 32768.0);
            }
        }
        SampleFormat::F32 => {
            while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
                samples.push(sample.clamp(-1.0, 1.0));
            }
        }
    }
    Ok(samples)
}

/// Extract one input from an interleaved multi-channel frame.
///
/// Trailing samples that don't fill a whole device frame are ignored.
pub fn deinterleave(samples: &[f32], channels: usize, index: usize) -> Vec<f32> {
    if channels == 0 || index >= channels {
        return Vec::new();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame[index])
        .collect()
}

/// Divide a window by its peak absolute amplitude, if that peak is nonzero.
pub fn normalize_peak(window: &mut [f32]) {
    let peak = window.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for sample in window.iter_mut() {
            *sample /= peak;
        }
    }
}
