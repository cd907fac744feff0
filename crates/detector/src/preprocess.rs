//! Frame and audio preprocessing for model input
//!
//! Video frames are resized to the model's spatial resolution and
//! normalized channel-planar (CHW) with ImageNet statistics. Audio is
//! converted to mono f32, resampled, windowed, and padded or trimmed to
//! a fixed sample count.

use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use forgery_detect_common::{DetectError, Result};

/// Normalization and sizing parameters for model input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingParams {
    pub target_width: u32,
    pub target_height: u32,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub std: [f32; 3],
    /// Target sample rate for audio input
    pub audio_sample_rate: u32,
    /// Fixed sample count fed to the audio model
    pub audio_samples: usize,
    /// Apply a Hann window to the audio buffer
    pub audio_window: bool,
}

impl Default for PreprocessingParams {
    fn default() -> Self {
        Self {
            target_width: 224,
            target_height: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            audio_sample_rate: 16_000,
            audio_samples: 16_000,
            audio_window: true,
        }
    }
}

/// Convert a raw RGB24 frame into a normalized CHW tensor buffer
///
/// Output length is `3 * target_width * target_height`.
///
/// # Errors
///
/// Returns `InvalidInput` if `data.len() != width * height * 3`.
pub fn preprocess_video_frame(
    data: &[u8],
    width: u32,
    height: u32,
    params: &PreprocessingParams,
) -> Result<Vec<f32>> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(DetectError::InvalidInput(format!(
            "frame size mismatch: expected {expected} bytes for {width}x{height} RGB24, got {}",
            data.len()
        )));
    }

    let image = RgbImage::from_raw(width, height, data.to_vec()).ok_or_else(|| {
        DetectError::InvalidInput("failed to wrap frame buffer as RGB image".to_string())
    })?;

    let resized = if width == params.target_width && height == params.target_height {
        image
    } else {
        image::imageops::resize(
            &image,
            params.target_width,
            params.target_height,
            FilterType::Triangle,
        )
    };

    let (tw, th) = (params.target_width as usize, params.target_height as usize);
    let plane = tw * th;
    let mut tensor = vec![0.0f32; 3 * plane];

    // HWC u8 -> CHW f32, normalized per channel
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            tensor[c * plane + i] =
                (f32::from(pixel.0[c]) / 255.0 - params.mean[c]) / params.std[c];
        }
    }

    Ok(tensor)
}

/// Convert raw PCM s16le audio into a fixed-length mono f32 buffer
///
/// Downmixes to mono, linearly resamples to `params.audio_sample_rate`,
/// optionally applies a Hann window, clips to [-1, 1], and pads with
/// zeros or trims to `params.audio_samples`.
///
/// # Errors
///
/// Returns `InvalidInput` for zero channels or an odd byte count.
pub fn preprocess_audio(
    data: &[u8],
    sample_rate: u32,
    channels: u8,
    params: &PreprocessingParams,
) -> Result<Vec<f32>> {
    if channels == 0 || sample_rate == 0 {
        return Err(DetectError::InvalidInput(
            "audio must have at least one channel and a positive sample rate".to_string(),
        ));
    }
    if data.len() % 2 != 0 {
        return Err(DetectError::InvalidInput(format!(
            "s16le audio buffer must have even length, got {} bytes",
            data.len()
        )));
    }

    let channels = channels as usize;
    let samples: Vec<f32> = data
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / f32::from(i16::MAX))
        .collect();

    // Downmix interleaved channels to mono
    let mono: Vec<f32> = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    let resampled = if sample_rate == params.audio_sample_rate {
        mono
    } else {
        resample_linear(&mono, sample_rate, params.audio_sample_rate)
    };

    let mut out = resampled;
    out.truncate(params.audio_samples);

    if params.audio_window && !out.is_empty() {
        apply_hann_window(&mut out);
    }

    for s in &mut out {
        *s = s.clamp(-1.0, 1.0);
    }
    out.resize(params.audio_samples, 0.0);

    Ok(out)
}

/// Linear interpolation resampler
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() {
        return Vec::new();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// In-place Hann window over the whole buffer
fn apply_hann_window(samples: &mut [f32]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let denom = (n - 1) as f32;
    for (i, s) in samples.iter_mut().enumerate() {
        let w = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos());
        *s *= w;
    }
}
