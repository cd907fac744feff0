//! End-to-end pipeline tests with stub inference backends
//!
//! Compression is disabled so no external ffmpeg binary is needed; the
//! rest of the pipeline (preprocess, cache, inference, postprocess,
//! fusion, modes) runs for real.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use forgery_detect_common::{FrameKind, MediaFrame, Result};
use forgery_detect_detector::postprocess::{postprocess_output, DetectionKind};
use forgery_detect_detector::{FeatureDetector, ModelConfig, ScoreBackend};
use forgery_detect_orchestrator::{
    AudioInput, IntegrationConfig, IntegrationOrchestrator, ServiceState, VideoInput,
};

/// Backend returning a fixed score vector, counting invocations
struct CountingBackend {
    scores: Vec<f32>,
    calls: Arc<AtomicUsize>,
}

impl ScoreBackend for CountingBackend {
    fn infer(&mut self, _input: &[f32], _shape: &[i64]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
    fn version(&self) -> &str {
        "stub:v1"
    }
}

fn detector(shape: Vec<i64>, scores: Vec<f32>, calls: Arc<AtomicUsize>) -> FeatureDetector {
    FeatureDetector::with_backend(
        ModelConfig {
            input_shape: shape,
            ..ModelConfig::default()
        },
        Box::new(CountingBackend { scores, calls }),
    )
    .unwrap()
}

fn base_config() -> IntegrationConfig {
    IntegrationConfig {
        enable_compression: false,
        ..IntegrationConfig::default()
    }
}

fn service(
    config: IntegrationConfig,
    video_scores: Vec<f32>,
    audio_scores: Vec<f32>,
) -> (IntegrationOrchestrator, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let video_calls = Arc::new(AtomicUsize::new(0));
    let audio_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = IntegrationOrchestrator::new();
    orchestrator
        .initialize_with_detectors(
            config,
            detector(vec![1, 3, 224, 224], video_scores, Arc::clone(&video_calls)),
            detector(vec![1, 16_000], audio_scores, Arc::clone(&audio_calls)),
        )
        .unwrap();
    (orchestrator, video_calls, audio_calls)
}

fn video_input(seed: u8) -> VideoInput {
    VideoInput {
        data: vec![seed; 64 * 48 * 3],
        width: 64,
        height: 48,
        fps: 30,
    }
}

/// One second of silent 16 kHz mono PCM
fn silent_audio() -> AudioInput {
    AudioInput {
        data: vec![0u8; 16_000 * 2],
        sample_rate: 16_000,
        channels: 1,
    }
}

#[test]
fn fusion_matches_weighted_sum_of_modalities() {
    let video_scores = vec![0.0f32, 2.0];
    let audio_scores = vec![1.0f32, 1.0];
    let config = base_config();
    let (orchestrator, _, _) = service(config.clone(), video_scores.clone(), audio_scores.clone());

    let verdict = orchestrator.detect_hybrid(&forgery_detect_orchestrator::HybridInput {
        video: video_input(7),
        audio: silent_audio(),
    });

    let expected_video = postprocess_output(
        DetectionKind::VideoDeepfake,
        &video_scores,
        config.confidence_threshold,
        "stub:v1",
    );
    let expected_audio = postprocess_output(
        DetectionKind::VoiceSpoofing,
        &audio_scores,
        config.confidence_threshold,
        "stub:v1",
    );
    let expected_confidence = config.video_weight * expected_video.confidence
        + config.audio_weight * expected_audio.confidence;
    let expected_risk = config.video_weight * expected_video.risk_score
        + config.audio_weight * expected_audio.risk_score;

    assert!((verdict.overall_confidence - expected_confidence).abs() < 1e-5);
    assert!((verdict.overall_risk_score - expected_risk).abs() < 1e-5);
    assert_eq!(
        verdict.detailed_metrics["video_confidence"],
        expected_video.confidence
    );
    assert_eq!(
        verdict.detailed_metrics["audio_confidence"],
        expected_audio.confidence
    );
    assert!(verdict.detailed_metrics.contains_key("compression_ratio"));
    assert!(verdict.detailed_metrics.contains_key("overall_risk_score"));
}

#[test]
fn uniform_scores_stay_below_threshold_end_to_end() {
    // Uniform logits softmax to 1/N = 0.5, below the 0.8 threshold
    let (orchestrator, _, audio_calls) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let input = silent_audio();
    let verdict = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);

    assert!(!verdict.is_fake);
    assert!((verdict.overall_confidence - 0.5).abs() < 1e-5);
    assert!(verdict.summary.contains("fake=false"));
    assert_eq!(audio_calls.load(Ordering::SeqCst), 1);
    assert_eq!(verdict.audio.as_ref().unwrap().model_version, "stub:v1");
}

#[test]
fn cache_skips_inference_for_identical_content() {
    let (orchestrator, _, audio_calls) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let input = silent_audio();
    let first = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    let second = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);

    // Identical bytes: one inference, identical scores
    assert_eq!(audio_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.overall_confidence, second.overall_confidence);

    // Different content misses the cache
    let other = AudioInput {
        data: vec![1u8; 16_000 * 2],
        ..silent_audio()
    };
    orchestrator.detect_audio(&other.data, other.sample_rate, other.channels);
    assert_eq!(audio_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn disabled_cache_runs_inference_every_time() {
    let config = IntegrationConfig {
        enable_feature_cache: false,
        ..base_config()
    };
    let (orchestrator, _, audio_calls) = service(config, vec![0.0, 0.0], vec![0.0, 0.0]);

    let input = silent_audio();
    orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert_eq!(audio_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn batch_continues_past_failed_items() {
    let (orchestrator, video_calls, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let bad = VideoInput {
        data: vec![0u8; 10],
        width: 64,
        height: 48,
        fps: 30,
    };
    let items = vec![video_input(1), bad, video_input(2)];

    let progress_calls = Arc::new(AtomicUsize::new(0));
    let progress_counter = Arc::clone(&progress_calls);
    let verdicts = orchestrator.batch_detect_video(&items, move |percent, status| {
        assert!(percent > 0.0 && percent <= 100.0);
        assert!(!status.is_empty());
        progress_counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(verdicts.len(), 3);
    assert!(!verdicts[0].is_failure());
    assert!(verdicts[1].is_failure());
    assert!(!verdicts[2].is_failure());
    assert_eq!(progress_calls.load(Ordering::SeqCst), 3);
    assert_eq!(video_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn batch_respects_max_size() {
    let config = IntegrationConfig {
        max_batch_size: 2,
        ..base_config()
    };
    let (orchestrator, _, _) = service(config, vec![0.0, 0.0], vec![0.0, 0.0]);

    let items = vec![video_input(1), video_input(2), video_input(3)];
    let percents = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&percents);
    let verdicts = orchestrator.batch_detect_video(&items, move |percent, _status| {
        sink.lock().unwrap().push(percent);
    });

    assert!(!verdicts[0].is_failure());
    assert!(!verdicts[1].is_failure());
    assert!(verdicts[2].is_failure());
    assert!(verdicts[2].summary.contains("maximum"));

    // Progress covers the rejected item too and ends at 100%
    let percents = percents.lock().unwrap();
    assert_eq!(percents.len(), 3);
    assert!((percents[2] - 100.0).abs() < f32::EPSILON);
}

#[test]
fn cancelled_batch_reports_full_progress() {
    let (orchestrator, video_calls, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let items = vec![video_input(1), video_input(2), video_input(3)];
    let percents = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&percents);
    let orch = &orchestrator;
    let verdicts = orchestrator.batch_detect_video(&items, |percent, _status| {
        let mut seen = sink.lock().unwrap();
        if seen.is_empty() {
            orch.cancel_batch();
        }
        seen.push(percent);
    });

    assert_eq!(verdicts.len(), 3);
    assert!(!verdicts[0].is_failure());
    assert!(verdicts[1].is_failure());
    assert!(verdicts[1].summary.contains("cancelled"));
    assert!(verdicts[2].is_failure());
    assert_eq!(video_calls.load(Ordering::SeqCst), 1);

    // Cancelled positions still report progress through 100%
    let percents = percents.lock().unwrap();
    assert_eq!(percents.len(), 3);
    assert!((percents[2] - 100.0).abs() < f32::EPSILON);
}

#[test]
fn rejected_config_leaves_previous_active() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let bad = IntegrationConfig {
        video_weight: 0.7,
        audio_weight: 0.7,
        ..base_config()
    };
    assert!(orchestrator.set_integration_config(bad).is_err());

    let active = orchestrator.get_current_config();
    assert!((active.video_weight - 0.6).abs() < f32::EPSILON);
    assert!((active.audio_weight - 0.4).abs() < f32::EPSILON);
}

#[test]
fn updated_thresholds_apply_to_next_call() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let input = silent_audio();
    let before = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert!(!before.is_fake);

    // The risk threshold only participates in hybrid fusion; a
    // single-modality call keeps the model verdict as-is
    let mut config = base_config();
    config.risk_threshold = 0.4;
    orchestrator.set_integration_config(config).unwrap();
    let risk_only = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert!(!risk_only.is_fake);

    // Confidence threshold below the uniform 0.5 flips the verdict
    let mut config = base_config();
    config.confidence_threshold = 0.4;
    orchestrator.set_integration_config(config).unwrap();
    let after = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert!(after.is_fake);
}

#[test]
fn stop_real_time_is_idempotent() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    // Stop before any start is a no-op
    orchestrator.stop_real_time_detection();
    assert_eq!(orchestrator.state(), ServiceState::Idle);

    orchestrator
        .start_real_time_detection(DetectionKind::VoiceSpoofing, |_verdict| {})
        .unwrap();
    assert_eq!(orchestrator.state(), ServiceState::RealTimeActive);

    orchestrator.stop_real_time_detection();
    orchestrator.stop_real_time_detection();
    assert_eq!(orchestrator.state(), ServiceState::Idle);
}

#[test]
fn real_time_delivers_verdicts_in_order() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let (tx, rx) = mpsc::channel();
    orchestrator
        .start_real_time_detection(DetectionKind::VoiceSpoofing, move |verdict| {
            tx.send(verdict).unwrap();
        })
        .unwrap();

    for ts in 0..3 {
        orchestrator
            .push_frame(MediaFrame {
                kind: FrameKind::Audio {
                    sample_rate: 16_000,
                    channels: 1,
                },
                data: vec![ts as u8; 3200],
                timestamp_ms: ts,
                is_keyframe: false,
            })
            .unwrap();
    }

    for _ in 0..3 {
        let verdict = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!verdict.is_failure());
        assert!((verdict.overall_confidence - 0.5).abs() < 1e-5);
    }

    orchestrator.stop_real_time_detection();
    assert_eq!(orchestrator.state(), ServiceState::Idle);
}

#[test]
fn real_time_rejects_mismatched_modality() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let (tx, rx) = mpsc::channel();
    orchestrator
        .start_real_time_detection(DetectionKind::VideoDeepfake, move |verdict| {
            tx.send(verdict).unwrap();
        })
        .unwrap();

    orchestrator
        .push_frame(MediaFrame {
            kind: FrameKind::Audio {
                sample_rate: 16_000,
                channels: 1,
            },
            data: vec![0u8; 3200],
            timestamp_ms: 0,
            is_keyframe: false,
        })
        .unwrap();

    let verdict = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(verdict.is_failure());
    assert!(verdict.summary.contains("modality"));

    orchestrator.stop_real_time_detection();
}

#[test]
fn second_mode_start_is_rejected_while_active() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    orchestrator
        .start_real_time_detection(DetectionKind::VoiceSpoofing, |_v| {})
        .unwrap();
    assert!(orchestrator
        .start_real_time_detection(DetectionKind::VoiceSpoofing, |_v| {})
        .is_err());
    assert!(orchestrator
        .start_streaming_detection("/nonexistent.mp4", DetectionKind::VideoDeepfake, |_v| {})
        .is_err());

    orchestrator.stop_real_time_detection();
}

#[test]
fn streaming_open_failure_leaves_idle() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    assert!(orchestrator
        .start_streaming_detection("/nonexistent/stream.mp4", DetectionKind::VideoDeepfake, |_v| {})
        .is_err());
    assert_eq!(orchestrator.state(), ServiceState::Idle);

    // Stop without a running stream is a no-op
    orchestrator.stop_streaming_detection();
    assert_eq!(orchestrator.state(), ServiceState::Idle);
}

#[test]
fn performance_stats_track_phases() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let input = silent_audio();
    orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);

    let stats = orchestrator.get_performance_stats();
    assert_eq!(stats["preprocessing_count"], 1.0);
    assert_eq!(stats["inference_count"], 1.0);
    assert_eq!(stats["postprocessing_count"], 1.0);
    assert!(stats["inference_min_ms"] <= stats["inference_max_ms"]);

    orchestrator.reset_performance_stats();
    assert!(orchestrator.get_performance_stats().is_empty());

    // Disabled monitoring records nothing
    orchestrator.enable_performance_monitoring(false);
    orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert!(orchestrator.get_performance_stats().is_empty());
}

#[test]
fn service_status_reports_components() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);

    let status = orchestrator.get_service_status();
    assert!(status.contains("state=Idle"));
    assert!(status.contains("video_model=ready"));
    assert!(status.contains("audio_model=ready"));

    orchestrator.cleanup();
    let status = orchestrator.get_service_status();
    assert!(status.contains("state=Cleaned"));
    assert!(status.contains("components=none"));
}

#[test]
fn detect_after_cleanup_fails_as_verdict() {
    let (orchestrator, _, _) = service(base_config(), vec![0.0, 0.0], vec![0.0, 0.0]);
    orchestrator.cleanup();

    let input = silent_audio();
    let verdict = orchestrator.detect_audio(&input.data, input.sample_rate, input.channels);
    assert!(verdict.is_failure());
    assert!(verdict.summary.contains("not initialized"));
}

#[test]
fn confident_fake_scores_flag_hybrid() {
    // Both modalities strongly fake: fused confidence must clear 0.8
    let (orchestrator, _, _) = service(base_config(), vec![-4.0, 4.0], vec![-4.0, 4.0]);

    let verdict = orchestrator.detect_hybrid(&forgery_detect_orchestrator::HybridInput {
        video: video_input(3),
        audio: silent_audio(),
    });

    assert!(verdict.is_fake);
    assert!(verdict.overall_confidence > 0.9);
    assert!(verdict.overall_risk_score > 0.9);
    assert!(verdict.video.is_some() && verdict.audio.is_some());
}
