//! Orchestrator configuration and integrated verdict types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use forgery_detect_common::{DetectError, DetectionVerdict, EncodingParams, Result};
use forgery_detect_detector::preprocess::PreprocessingParams;
use forgery_detect_detector::ModelConfig;

/// Tolerance for the modality weight sum check
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-2;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Compression targets for the optional pre-detection transcode
    pub encoding: EncodingParams,
    /// Video detection model
    pub video_model: ModelConfig,
    /// Audio detection model
    pub audio_model: ModelConfig,
    /// Shared preprocessing parameters
    pub preprocessing: PreprocessingParams,
    /// Video contribution to the fused verdict
    pub video_weight: f32,
    /// Audio contribution to the fused verdict
    pub audio_weight: f32,
    /// Fused confidence above this flags the media as fake
    pub confidence_threshold: f32,
    /// Fused risk above this flags the media as fake
    pub risk_threshold: f32,
    /// Largest batch processed in one call
    pub max_batch_size: usize,
    /// Run media through the codec before detection
    pub enable_compression: bool,
    /// Reuse feature vectors for identical content
    pub enable_feature_cache: bool,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    /// Cadence of the background TTL sweep
    pub sweep_interval_secs: u64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingParams::default(),
            video_model: ModelConfig::default(),
            audio_model: ModelConfig {
                input_shape: vec![1, 16_000],
                ..ModelConfig::default()
            },
            preprocessing: PreprocessingParams::default(),
            video_weight: 0.6,
            audio_weight: 0.4,
            confidence_threshold: 0.8,
            risk_threshold: 0.7,
            max_batch_size: 16,
            enable_compression: true,
            enable_feature_cache: true,
            cache_capacity: 1000,
            cache_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl IntegrationConfig {
    /// Validate weights, thresholds, and nested component configs
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.video_weight < 0.0 || self.audio_weight < 0.0 {
            return Err(DetectError::ConfigValidation(format!(
                "modality weights must be non-negative, got video={} audio={}",
                self.video_weight, self.audio_weight
            )));
        }
        let sum = self.video_weight + self.audio_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DetectError::ConfigValidation(format!(
                "modality weights must sum to 1.0 (±{WEIGHT_SUM_TOLERANCE}), got {sum}"
            )));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("risk_threshold", self.risk_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::ConfigValidation(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.max_batch_size == 0 {
            return Err(DetectError::ConfigValidation(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        self.encoding.validate()?;
        self.video_model.validate()?;
        self.audio_model.validate()?;
        Ok(())
    }
}

/// One video item for single-shot or batch detection
#[derive(Debug, Clone)]
pub struct VideoInput {
    /// Raw RGB24 pixels, `width * height * 3` bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One audio item for single-shot or batch detection
#[derive(Debug, Clone)]
pub struct AudioInput {
    /// Raw PCM s16le samples, interleaved
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Paired media for hybrid detection
#[derive(Debug, Clone)]
pub struct HybridInput {
    pub video: VideoInput,
    pub audio: AudioInput,
}

/// Fused result of one detection call
///
/// A failed call has the same shape as a success: zero scores plus a
/// non-empty `summary` diagnostic. Callers check `summary`, not a
/// separate error channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegratedVerdict {
    pub is_fake: bool,
    pub overall_confidence: f32,
    pub overall_risk_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<DetectionVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<DetectionVerdict>,
    pub compression_ratio: f32,
    pub total_processing_time_ms: i64,
    pub detailed_metrics: HashMap<String, f32>,
    pub summary: String,
}

impl IntegratedVerdict {
    /// Diagnostic verdict for a failed call
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            summary: message.into(),
            ..Self::default()
        }
    }

    /// Whether this verdict reports a failure rather than a detection
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.summary.is_empty() && self.overall_confidence == 0.0 && !self.is_fake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IntegrationConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.video_weight - 0.6).abs() < f32::EPSILON);
        assert!((config.audio_weight - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_weight_sum_rejected() {
        let config = IntegrationConfig {
            video_weight: 0.7,
            audio_weight: 0.7,
            ..IntegrationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DetectError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_weight_sum_tolerance() {
        let config = IntegrationConfig {
            video_weight: 0.605,
            audio_weight: 0.4,
            ..IntegrationConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = IntegrationConfig {
            video_weight: -0.2,
            audio_weight: 1.2,
            ..IntegrationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_range_enforced() {
        let config = IntegrationConfig {
            risk_threshold: 1.3,
            ..IntegrationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = IntegrationConfig {
            max_batch_size: 0,
            ..IntegrationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failed_verdict_shape() {
        let verdict = IntegratedVerdict::failed("codec unavailable");
        assert!(verdict.is_failure());
        assert!(!verdict.is_fake);
        assert_eq!(verdict.overall_confidence, 0.0);
        assert_eq!(verdict.summary, "codec unavailable");
    }
}
