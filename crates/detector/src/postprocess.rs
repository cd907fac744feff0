//! Deterministic conversion of raw model scores into verdicts
//!
//! Scores go through a numerically stable softmax; the max probability
//! is the verdict confidence and clearing the confidence threshold
//! flags the media. The detection kind selects how the risk score is
//! read out of the probability vector.

use serde::{Deserialize, Serialize};

use forgery_detect_common::{DetectionVerdict, Modality};

/// Forgery category a model's output vector is interpreted under
///
/// Classifier kinds expect `[authentic, manipulated]` logits and report
/// the manipulated-class probability as risk. Artifact kinds are
/// single-score anomaly models where risk equals confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    VideoDeepfake,
    FaceSwap,
    VideoArtifact,
    VoiceSpoofing,
    AudioArtifact,
}

impl DetectionKind {
    /// Modality this kind applies to
    #[must_use]
    pub fn modality(&self) -> Modality {
        match self {
            DetectionKind::VideoDeepfake
            | DetectionKind::FaceSwap
            | DetectionKind::VideoArtifact => Modality::Video,
            DetectionKind::VoiceSpoofing | DetectionKind::AudioArtifact => Modality::Audio,
        }
    }

    /// Whether the model output is a two-class `[authentic, fake]`
    /// distribution rather than a single anomaly score
    #[must_use]
    pub fn is_classifier(&self) -> bool {
        match self {
            DetectionKind::VideoDeepfake
            | DetectionKind::FaceSwap
            | DetectionKind::VoiceSpoofing => true,
            DetectionKind::VideoArtifact | DetectionKind::AudioArtifact => false,
        }
    }
}

/// Numerically stable softmax
///
/// Subtracts the max logit before exponentiating so large logits never
/// overflow.
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Convert raw model output into a verdict
///
/// `confidence` is the max softmax probability; `is_fake` is that
/// confidence clearing `confidence_threshold`. An empty output yields a
/// failed verdict rather than a panic.
#[must_use]
pub fn postprocess_output(
    kind: DetectionKind,
    raw_scores: &[f32],
    confidence_threshold: f32,
    model_version: &str,
) -> DetectionVerdict {
    if raw_scores.is_empty() {
        return DetectionVerdict::failed("empty model output");
    }

    let probs = softmax(raw_scores);
    let best_prob = probs.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let risk_score = if kind.is_classifier() && probs.len() >= 2 {
        probs[1]
    } else {
        best_prob
    };

    DetectionVerdict {
        is_fake: best_prob > confidence_threshold,
        confidence: best_prob,
        risk_score,
        raw_scores: raw_scores.to_vec(),
        processing_time_ms: 0,
        model_version: model_version.to_string(),
        error: None,
    }
}
