/// Common types and utilities for forgery detection pipelines
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detection pipeline errors
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for detection operations
pub type Result<T> = std::result::Result<T, DetectError>;

/// Media modality for a frame or detection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Video,
    Audio,
}

/// Output of one inference + postprocess pass
///
/// Invariant: when `error` is set the verdict is never a positive
/// detection (`is_fake == false`, `confidence == 0.0`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub is_fake: bool,
    pub confidence: f32,
    pub risk_score: f32,
    pub raw_scores: Vec<f32>,
    pub processing_time_ms: i64,
    pub model_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionVerdict {
    /// Create a failed verdict carrying a diagnostic
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_fake: false,
            confidence: 0.0,
            risk_score: 0.0,
            raw_scores: Vec::new(),
            processing_time_ms: 0,
            model_version: String::new(),
            error: Some(message.into()),
        }
    }

    /// Check whether this verdict carries a diagnostic instead of scores
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Video codec identifier for encoding targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    /// Get `FFmpeg` encoder name for this codec
    #[must_use]
    pub fn encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }
}

/// Audio codec identifier for encoding targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
}

impl AudioCodec {
    /// Get `FFmpeg` encoder name for this codec
    #[must_use]
    pub fn encoder_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Mp3 => "libmp3lame",
        }
    }
}

/// Compression / transcoding target parameters
///
/// Pure value type, copied into each codec call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingParams {
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub video_bitrate: u32,
    pub video_codec: VideoCodec,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
    pub audio_bitrate: u32,
    pub audio_codec: AudioCodec,
    pub gop_size: u32,
    pub max_b_frames: u32,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            video_width: 640,
            video_height: 480,
            video_fps: 30,
            video_bitrate: 1_000_000,
            video_codec: VideoCodec::H264,
            audio_sample_rate: 44100,
            audio_channels: 2,
            audio_bitrate: 128_000,
            audio_codec: AudioCodec::Aac,
            gop_size: 30,
            max_b_frames: 2,
        }
    }
}

impl EncodingParams {
    /// Validate encoding parameters
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if any dimension, rate, or bitrate is zero.
    pub fn validate(&self) -> Result<()> {
        if self.video_width == 0 || self.video_height == 0 {
            return Err(DetectError::ConfigValidation(format!(
                "video dimensions must be positive, got {}x{}",
                self.video_width, self.video_height
            )));
        }
        if self.video_fps == 0 {
            return Err(DetectError::ConfigValidation(
                "video fps must be positive".to_string(),
            ));
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 {
            return Err(DetectError::ConfigValidation(
                "bitrates must be positive".to_string(),
            ));
        }
        if self.audio_sample_rate == 0 || self.audio_channels == 0 {
            return Err(DetectError::ConfigValidation(
                "audio sample rate and channels must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a compress/decompress/convert operation
///
/// Failures cross the public boundary as `success == false` plus a
/// populated `error`, never as a panic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionResult {
    pub success: bool,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f32,
    pub time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompressionResult {
    /// Pass-through result (compression disabled)
    #[must_use]
    pub fn passthrough(data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            success: true,
            data,
            original_size: size,
            compressed_size: size,
            ratio: 1.0,
            time_ms: 0,
            error: None,
        }
    }

    /// Failed result carrying a diagnostic
    #[must_use]
    pub fn failed(original_size: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            original_size,
            compressed_size: 0,
            ratio: 0.0,
            time_ms: 0,
            error: Some(message.into()),
        }
    }
}

/// Shape of a media frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Raw RGB24 video frame
    Video { width: u32, height: u32 },
    /// Raw PCM s16le audio buffer
    Audio { sample_rate: u32, channels: u8 },
}

/// A single raw media frame flowing through the real-time pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFrame {
    pub kind: FrameKind,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub timestamp_ms: i64,
    pub is_keyframe: bool,
}

impl MediaFrame {
    /// Modality of this frame
    #[must_use]
    pub fn modality(&self) -> Modality {
        match self.kind {
            FrameKind::Video { .. } => Modality::Video,
            FrameKind::Audio { .. } => Modality::Audio,
        }
    }

    /// Expected payload size in bytes, if the kind implies one
    #[must_use]
    pub fn expected_len(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Video { width, height } => Some(width as usize * height as usize * 3),
            FrameKind::Audio { .. } => None,
        }
    }
}

/// Compute the content fingerprint used to address the feature cache
#[must_use]
pub fn fingerprint(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
