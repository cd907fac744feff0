//! Integration orchestrator for multi-modal forgery detection
//!
//! Drives the codec adapter and the per-modality detectors, fuses their
//! verdicts with configurable weights, and exposes single-shot, batch,
//! real-time, and streaming entry points. Owns the feature cache, the
//! performance aggregator, and every background thread (cache sweeper,
//! real-time worker, streaming worker).
//!
//! Single-shot calls never return errors: any failure inside the
//! pipeline is folded into an [`IntegratedVerdict`] whose `summary`
//! carries the diagnostic.

pub mod config;
pub mod stats;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use forgery_detect_cache::FeatureCache;
use forgery_detect_codec::{MediaCodecAdapter, StreamSource};
use forgery_detect_common::{
    fingerprint, DetectError, DetectionVerdict, FrameKind, MediaFrame, Modality, Result,
};
use forgery_detect_detector::postprocess::postprocess_output;
use forgery_detect_detector::preprocess::{preprocess_audio, preprocess_video_frame};
use forgery_detect_detector::FeatureDetector;

pub use config::{
    AudioInput, HybridInput, IntegratedVerdict, IntegrationConfig, VideoInput,
};
pub use forgery_detect_detector::postprocess::DetectionKind;
pub use stats::PerformanceStats;

use stats::{PHASE_INFERENCE, PHASE_POSTPROCESSING, PHASE_PREPROCESSING};

/// Synthetic inferences run per detector after model load
const WARMUP_RUNS: usize = 3;

/// Service lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    /// Components built, no continuous mode running
    Idle,
    RealTimeActive,
    StreamingActive,
    /// Components released; `initialize` brings the service back
    Cleaned,
}

/// Initialized component set shared with worker threads
struct Components {
    codec: MediaCodecAdapter,
    video_detector: FeatureDetector,
    audio_detector: FeatureDetector,
    cache: Arc<FeatureCache>,
}

/// Stop flag plus join handle for one background thread
struct WorkerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    fn stop_and_join(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            warn!("background worker panicked");
        }
    }
}

/// Top-level detection service
pub struct IntegrationOrchestrator {
    state: Mutex<ServiceState>,
    config: RwLock<IntegrationConfig>,
    components: RwLock<Option<Arc<Components>>>,
    stats: Arc<PerformanceStats>,
    sweeper: Mutex<Option<WorkerHandle>>,
    streaming: Mutex<Option<WorkerHandle>>,
    batch_cancel: Arc<AtomicBool>,
}

impl Default for IntegrationOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationOrchestrator {
    /// Create an uninitialized service with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServiceState::Uninitialized),
            config: RwLock::new(IntegrationConfig::default()),
            components: RwLock::new(None),
            stats: Arc::new(PerformanceStats::new()),
            sweeper: Mutex::new(None),
            streaming: Mutex::new(None),
            batch_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    /// Build all components from the config and load both models
    ///
    /// Any sub-component failure rolls back completely: no component is
    /// retained and the state remains unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` for a bad config, `ModelLoad` when a
    /// model artifact cannot be loaded, or `Initialization` when the
    /// service is already initialized.
    pub fn initialize(&self, config: IntegrationConfig) -> Result<()> {
        config.validate()?;
        let video = FeatureDetector::new(config.video_model.clone())?;
        video.initialize()?;
        video.warmup(WARMUP_RUNS);
        let audio = FeatureDetector::new(config.audio_model.clone())?;
        audio.initialize()?;
        audio.warmup(WARMUP_RUNS);
        self.install_components(config, video, audio)
    }

    /// Initialize with pre-built detectors
    ///
    /// Used when detectors carry injected backends, e.g. in tests or
    /// when sharing a session across services.
    ///
    /// # Errors
    ///
    /// Same contract as [`initialize`](Self::initialize), minus model
    /// loading.
    pub fn initialize_with_detectors(
        &self,
        config: IntegrationConfig,
        video_detector: FeatureDetector,
        audio_detector: FeatureDetector,
    ) -> Result<()> {
        config.validate()?;
        self.install_components(config, video_detector, audio_detector)
    }

    fn install_components(
        &self,
        config: IntegrationConfig,
        video_detector: FeatureDetector,
        audio_detector: FeatureDetector,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            ServiceState::Uninitialized | ServiceState::Cleaned => {}
            current => {
                return Err(DetectError::Initialization(format!(
                    "cannot initialize from state {current:?}"
                )))
            }
        }

        let codec = MediaCodecAdapter::new(config.encoding.clone())?;
        let cache = Arc::new(if config.enable_feature_cache {
            FeatureCache::new(config.cache_capacity)
        } else {
            FeatureCache::disabled()
        });

        let components = Arc::new(Components {
            codec,
            video_detector,
            audio_detector,
            cache: Arc::clone(&cache),
        });

        *self.components.write().unwrap() = Some(components);
        *self.config.write().unwrap() = config.clone();
        self.start_sweeper(
            cache,
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_secs(config.sweep_interval_secs.max(1)),
        );

        *state = ServiceState::Idle;
        info!(
            video_weight = config.video_weight,
            audio_weight = config.audio_weight,
            compression = config.enable_compression,
            cache = config.enable_feature_cache,
            "detection service initialized"
        );
        Ok(())
    }

    fn start_sweeper(&self, cache: Arc<FeatureCache>, ttl: Duration, interval: Duration) {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            // Short sleep slices so cleanup joins promptly
            let slice = Duration::from_millis(200);
            'outer: loop {
                let mut waited = Duration::ZERO;
                while waited < interval {
                    if stop_worker.load(Ordering::SeqCst) {
                        break 'outer;
                    }
                    let nap = slice.min(interval - waited);
                    std::thread::sleep(nap);
                    waited += nap;
                }
                cache.sweep_expired(ttl);
            }
            debug!("cache sweeper stopped");
        });

        *self.sweeper.lock().unwrap() = Some(WorkerHandle { stop, handle });
    }

    fn components(&self) -> Result<Arc<Components>> {
        self.components.read().unwrap().clone().ok_or_else(|| {
            DetectError::Initialization("service not initialized".to_string())
        })
    }

    /// Detect forgery in one raw RGB24 video buffer
    #[must_use]
    pub fn detect_video(&self, data: &[u8], width: u32, height: u32, fps: u32) -> IntegratedVerdict {
        let start = Instant::now();
        let result = self.components().and_then(|comps| {
            let cfg = self.config.read().unwrap().clone();
            let (verdict, ratio) =
                run_video_pipeline(&comps, &cfg, &self.stats, data, width, height, fps)?;
            Ok(integrate_single(Modality::Video, verdict, ratio))
        });
        finish_single(result, start, "video")
    }

    /// Detect forgery in one raw PCM s16le audio buffer
    #[must_use]
    pub fn detect_audio(&self, data: &[u8], sample_rate: u32, channels: u8) -> IntegratedVerdict {
        let start = Instant::now();
        let result = self.components().and_then(|comps| {
            let cfg = self.config.read().unwrap().clone();
            let (verdict, ratio) =
                run_audio_pipeline(&comps, &cfg, &self.stats, data, sample_rate, channels)?;
            Ok(integrate_single(Modality::Audio, verdict, ratio))
        });
        finish_single(result, start, "audio")
    }

    /// Detect forgery across paired video and audio, fusing both
    /// verdicts with the configured weights
    ///
    /// A failure in one modality contributes zero scores instead of
    /// sinking the whole call.
    #[must_use]
    pub fn detect_hybrid(&self, input: &HybridInput) -> IntegratedVerdict {
        let start = Instant::now();
        let comps = match self.components() {
            Ok(comps) => comps,
            Err(e) => return IntegratedVerdict::failed(format!("hybrid detection failed: {e}")),
        };
        let cfg = self.config.read().unwrap().clone();

        let (video, video_ratio) = match run_video_pipeline(
            &comps,
            &cfg,
            &self.stats,
            &input.video.data,
            input.video.width,
            input.video.height,
            input.video.fps,
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "video pipeline failed during hybrid detection");
                (DetectionVerdict::failed(e.to_string()), 0.0)
            }
        };
        let (audio, audio_ratio) = match run_audio_pipeline(
            &comps,
            &cfg,
            &self.stats,
            &input.audio.data,
            input.audio.sample_rate,
            input.audio.channels,
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "audio pipeline failed during hybrid detection");
                (DetectionVerdict::failed(e.to_string()), 0.0)
            }
        };

        let overall_confidence =
            cfg.video_weight * video.confidence + cfg.audio_weight * audio.confidence;
        let overall_risk_score =
            cfg.video_weight * video.risk_score + cfg.audio_weight * audio.risk_score;
        let is_fake = overall_confidence > cfg.confidence_threshold
            || overall_risk_score > cfg.risk_threshold;
        let compression_ratio = if video.is_error() { audio_ratio } else { video_ratio };

        let mut detailed_metrics = HashMap::new();
        detailed_metrics.insert("video_confidence".to_string(), video.confidence);
        detailed_metrics.insert("video_risk_score".to_string(), video.risk_score);
        detailed_metrics.insert("audio_confidence".to_string(), audio.confidence);
        detailed_metrics.insert("audio_risk_score".to_string(), audio.risk_score);
        detailed_metrics.insert("compression_ratio".to_string(), compression_ratio);
        detailed_metrics.insert("overall_confidence".to_string(), overall_confidence);
        detailed_metrics.insert("overall_risk_score".to_string(), overall_risk_score);

        let mut summary = format!(
            "hybrid: fake={is_fake} confidence={overall_confidence:.3} risk={overall_risk_score:.3}"
        );
        for (name, verdict) in [("video", &video), ("audio", &audio)] {
            if let Some(err) = &verdict.error {
                summary.push_str(&format!("; {name} failed: {err}"));
            }
        }

        IntegratedVerdict {
            is_fake,
            overall_confidence,
            overall_risk_score,
            video: Some(video),
            audio: Some(audio),
            compression_ratio,
            total_processing_time_ms: start.elapsed().as_millis() as i64,
            detailed_metrics,
            summary,
        }
    }

    /// Run single-shot video detection over a batch
    ///
    /// `progress` is invoked after each item with percent complete and
    /// a status line. Per-item failures are recorded in place; the
    /// batch keeps going.
    pub fn batch_detect_video<G>(&self, items: &[VideoInput], progress: G) -> Vec<IntegratedVerdict>
    where
        G: FnMut(f32, &str),
    {
        self.run_batch(
            items,
            |it| self.detect_video(&it.data, it.width, it.height, it.fps),
            progress,
        )
    }

    /// Run single-shot audio detection over a batch
    pub fn batch_detect_audio<G>(&self, items: &[AudioInput], progress: G) -> Vec<IntegratedVerdict>
    where
        G: FnMut(f32, &str),
    {
        self.run_batch(
            items,
            |it| self.detect_audio(&it.data, it.sample_rate, it.channels),
            progress,
        )
    }

    /// Run hybrid detection over a batch
    pub fn batch_detect_hybrid<G>(&self, items: &[HybridInput], progress: G) -> Vec<IntegratedVerdict>
    where
        G: FnMut(f32, &str),
    {
        self.run_batch(items, |it| self.detect_hybrid(it), progress)
    }

    /// Request cooperative cancellation of the running batch
    ///
    /// Items not yet started come back as failed verdicts.
    pub fn cancel_batch(&self) {
        self.batch_cancel.store(true, Ordering::SeqCst);
    }

    fn run_batch<T, F, G>(&self, items: &[T], mut detect: F, mut progress: G) -> Vec<IntegratedVerdict>
    where
        F: FnMut(&T) -> IntegratedVerdict,
        G: FnMut(f32, &str),
    {
        self.batch_cancel.store(false, Ordering::SeqCst);
        let limit = self.config.read().unwrap().max_batch_size;
        let total = items.len();
        let mut out = Vec::with_capacity(total);

        for (i, item) in items.iter().enumerate() {
            let verdict = if self.batch_cancel.load(Ordering::SeqCst) {
                IntegratedVerdict::failed("batch cancelled")
            } else if i >= limit {
                IntegratedVerdict::failed(format!("batch size exceeds maximum of {limit}"))
            } else {
                detect(item)
            };
            out.push(verdict);
            // Progress covers skipped positions too so callers reach 100%
            let percent = (i + 1) as f32 / total.max(1) as f32 * 100.0;
            progress(percent, &format!("processed {}/{total}", i + 1));
        }
        out
    }

    /// Start continuous detection over push-fed frames
    ///
    /// Verdicts are delivered FIFO to `callback` on the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `Initialization` unless the service is `Idle`.
    pub fn start_real_time_detection<F>(&self, kind: DetectionKind, mut callback: F) -> Result<()>
    where
        F: FnMut(IntegratedVerdict) + Send + 'static,
    {
        let comps = self.components()?;
        let cfg = self.config.read().unwrap().clone();

        let mut state = self.state.lock().unwrap();
        if *state != ServiceState::Idle {
            return Err(DetectError::Initialization(format!(
                "cannot start real-time detection from state {:?}",
                *state
            )));
        }

        let worker_comps = Arc::clone(&comps);
        let worker_stats = Arc::clone(&self.stats);
        comps.codec.start_real_time_processing(move |frame| {
            callback(process_frame(&worker_comps, &cfg, &worker_stats, kind, &frame));
        })?;

        *state = ServiceState::RealTimeActive;
        info!(?kind, "real-time detection started");
        Ok(())
    }

    /// Queue a frame for real-time detection
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when real-time mode is not active or the
    /// queue is full.
    pub fn push_frame(&self, frame: MediaFrame) -> Result<()> {
        self.components()?.codec.push_frame(frame)
    }

    /// Stop real-time detection; idempotent, safe to call when never
    /// started
    pub fn stop_real_time_detection(&self) {
        let comps = self.components.read().unwrap().clone();
        if let Some(comps) = comps {
            comps.codec.stop_real_time_processing();
        }
        let mut state = self.state.lock().unwrap();
        if *state == ServiceState::RealTimeActive {
            *state = ServiceState::Idle;
            info!("real-time detection stopped");
        }
    }

    /// Start continuous detection over a stream URL
    ///
    /// The worker pulls frames from the source until the stream drains
    /// or [`stop_streaming_detection`](Self::stop_streaming_detection)
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns `Initialization` unless the service is `Idle`, or
    /// `Decode` when the URL cannot be opened; state is unchanged on
    /// failure.
    pub fn start_streaming_detection<F>(
        &self,
        url: &str,
        kind: DetectionKind,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(IntegratedVerdict) + Send + 'static,
    {
        let comps = self.components()?;
        let cfg = self.config.read().unwrap().clone();

        let mut state = self.state.lock().unwrap();
        if *state != ServiceState::Idle {
            return Err(DetectError::Initialization(format!(
                "cannot start streaming detection from state {:?}",
                *state
            )));
        }

        let mut source = StreamSource::open(
            url,
            cfg.preprocessing.target_width,
            cfg.preprocessing.target_height,
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);
        let worker_stats = Arc::clone(&self.stats);
        let url_owned = url.to_string();

        let handle = std::thread::spawn(move || {
            info!(url = %url_owned, "streaming worker started");
            while !stop_worker.load(Ordering::SeqCst) {
                match source.read_frame() {
                    Some(frame) => {
                        callback(process_frame(&comps, &cfg, &worker_stats, kind, &frame));
                    }
                    None => {
                        info!(url = %url_owned, "stream drained");
                        break;
                    }
                }
            }
            debug!("streaming worker stopped");
        });

        *self.streaming.lock().unwrap() = Some(WorkerHandle { stop, handle });
        *state = ServiceState::StreamingActive;
        Ok(())
    }

    /// Stop streaming detection; idempotent
    pub fn stop_streaming_detection(&self) {
        if let Some(worker) = self.streaming.lock().unwrap().take() {
            worker.stop_and_join();
        }
        let mut state = self.state.lock().unwrap();
        if *state == ServiceState::StreamingActive {
            *state = ServiceState::Idle;
            info!("streaming detection stopped");
        }
    }

    /// Replace the active configuration
    ///
    /// Weights and thresholds take effect on the next call; encoding
    /// and cache sizing apply on the next `initialize`. A rejected
    /// config leaves the previous one active.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` when the config is invalid.
    pub fn set_integration_config(&self, config: IntegrationConfig) -> Result<()> {
        config.validate()?;
        *self.config.write().unwrap() = config;
        Ok(())
    }

    /// Snapshot of the active configuration
    #[must_use]
    pub fn get_current_config(&self) -> IntegrationConfig {
        self.config.read().unwrap().clone()
    }

    /// Load a new video model artifact, replacing the current session
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` on failure; the previous model stays active.
    pub fn load_video_model(&self, path: impl Into<PathBuf>) -> Result<()> {
        let comps = self.components()?;
        let path = path.into();
        let mut cfg = self.config.write().unwrap();
        comps
            .video_detector
            .switch_model(path.clone(), cfg.video_model.clone())?;
        cfg.video_model.model_path = path;
        Ok(())
    }

    /// Load a new audio model artifact, replacing the current session
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` on failure; the previous model stays active.
    pub fn load_audio_model(&self, path: impl Into<PathBuf>) -> Result<()> {
        let comps = self.components()?;
        let path = path.into();
        let mut cfg = self.config.write().unwrap();
        comps
            .audio_detector
            .switch_model(path.clone(), cfg.audio_model.clone())?;
        cfg.audio_model.model_path = path;
        Ok(())
    }

    /// Reload both models from their configured artifacts
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` on the first failing reload.
    pub fn reload_models(&self) -> Result<()> {
        let comps = self.components()?;
        comps.video_detector.reload_model()?;
        comps.audio_detector.reload_model()?;
        info!("detection models reloaded");
        Ok(())
    }

    /// Per-phase performance aggregates
    #[must_use]
    pub fn get_performance_stats(&self) -> HashMap<String, f64> {
        self.stats.snapshot()
    }

    /// Clear all performance aggregates
    pub fn reset_performance_stats(&self) {
        self.stats.reset();
    }

    /// Toggle performance recording
    pub fn enable_performance_monitoring(&self, enabled: bool) {
        self.stats.set_enabled(enabled);
    }

    /// Human-readable state and component health summary
    #[must_use]
    pub fn get_service_status(&self) -> String {
        let state = *self.state.lock().unwrap();
        match self.components.read().unwrap().as_ref() {
            Some(comps) => {
                let cache = comps.cache.stats();
                format!(
                    "state={state:?} video_model={} audio_model={} realtime_active={} \
                     cache_entries={}/{} cache_enabled={} monitoring={}",
                    readiness(comps.video_detector.is_initialized()),
                    readiness(comps.audio_detector.is_initialized()),
                    comps.codec.is_real_time_active(),
                    cache.entries,
                    cache.capacity,
                    cache.enabled,
                    self.stats.is_enabled(),
                )
            }
            None => format!("state={state:?} components=none"),
        }
    }

    /// Stop every owned thread, release components, and move to
    /// `Cleaned`; idempotent from any state
    pub fn cleanup(&self) {
        self.stop_streaming_detection();
        let comps = self.components.read().unwrap().clone();
        if let Some(comps) = comps {
            comps.codec.stop_real_time_processing();
        }
        if let Some(worker) = self.sweeper.lock().unwrap().take() {
            worker.stop_and_join();
        }
        *self.components.write().unwrap() = None;
        *self.state.lock().unwrap() = ServiceState::Cleaned;
        info!("detection service cleaned up");
    }
}

impl Drop for IntegrationOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn readiness(initialized: bool) -> &'static str {
    if initialized {
        "ready"
    } else {
        "unloaded"
    }
}

fn finish_single(
    result: Result<IntegratedVerdict>,
    start: Instant,
    modality: &str,
) -> IntegratedVerdict {
    match result {
        Ok(mut verdict) => {
            verdict.total_processing_time_ms = start.elapsed().as_millis() as i64;
            verdict
        }
        Err(e) => {
            warn!(error = %e, "{modality} detection failed");
            IntegratedVerdict::failed(format!("{modality} detection failed: {e}"))
        }
    }
}

/// Look up cached features or run preprocess + inference
fn cached_features<F>(
    comps: &Components,
    stats: &PerformanceStats,
    detector: &FeatureDetector,
    shape: &[i64],
    cache_prefix: &str,
    raw: &[u8],
    preprocess: F,
) -> Result<Vec<f32>>
where
    F: FnOnce() -> Result<Vec<f32>>,
{
    let key = format!("{cache_prefix}:{}", fingerprint(raw));
    if let Some(features) = comps.cache.get(&key) {
        debug!(key = %key, "feature cache hit");
        return Ok(features);
    }

    let t = Instant::now();
    let tensor = preprocess()?;
    stats.record(PHASE_PREPROCESSING, t.elapsed());

    let t = Instant::now();
    let scores = detector.run_inference(&tensor, shape)?;
    stats.record(PHASE_INFERENCE, t.elapsed());

    comps.cache.put(key, scores.clone());
    Ok(scores)
}

fn run_video_pipeline(
    comps: &Components,
    cfg: &IntegrationConfig,
    stats: &PerformanceStats,
    data: &[u8],
    width: u32,
    height: u32,
    fps: u32,
) -> Result<(DetectionVerdict, f32)> {
    let start = Instant::now();

    let (raw, frame_width, frame_height, ratio) = if cfg.enable_compression {
        let compressed = comps.codec.compress_video(data, width, height, fps);
        if !compressed.success {
            return Err(DetectError::Encode(
                compressed.error.unwrap_or_else(|| "compression failed".to_string()),
            ));
        }
        let ratio = compressed.ratio;
        let frames = comps.codec.decode_video_frames(&compressed.data)?;
        let frame = frames
            .into_iter()
            .next()
            .ok_or_else(|| DetectError::Decode("no frames after round-trip".to_string()))?;
        match frame.kind {
            FrameKind::Video { width, height } => (frame.data, width, height, ratio),
            FrameKind::Audio { .. } => {
                return Err(DetectError::Decode(
                    "expected a video frame after decode".to_string(),
                ))
            }
        }
    } else {
        (data.to_vec(), width, height, 1.0)
    };

    let scores = cached_features(
        comps,
        stats,
        &comps.video_detector,
        &cfg.video_model.input_shape,
        "video",
        &raw,
        || preprocess_video_frame(&raw, frame_width, frame_height, &cfg.preprocessing),
    )?;

    let t = Instant::now();
    let mut verdict = postprocess_output(
        DetectionKind::VideoDeepfake,
        &scores,
        cfg.confidence_threshold,
        &comps.video_detector.model_version(),
    );
    stats.record(PHASE_POSTPROCESSING, t.elapsed());

    verdict.processing_time_ms = start.elapsed().as_millis() as i64;
    Ok((verdict, ratio))
}

fn run_audio_pipeline(
    comps: &Components,
    cfg: &IntegrationConfig,
    stats: &PerformanceStats,
    data: &[u8],
    sample_rate: u32,
    channels: u8,
) -> Result<(DetectionVerdict, f32)> {
    let start = Instant::now();

    let (raw, rate, ch, ratio) = if cfg.enable_compression {
        let compressed = comps.codec.compress_audio(data, sample_rate, channels);
        if !compressed.success {
            return Err(DetectError::Encode(
                compressed.error.unwrap_or_else(|| "compression failed".to_string()),
            ));
        }
        let ratio = compressed.ratio;
        let decompressed = comps.codec.decompress_audio(&compressed.data);
        if !decompressed.success {
            return Err(DetectError::Decode(
                decompressed.error.unwrap_or_else(|| "decode failed".to_string()),
            ));
        }
        (
            decompressed.data,
            cfg.encoding.audio_sample_rate,
            cfg.encoding.audio_channels,
            ratio,
        )
    } else {
        (data.to_vec(), sample_rate, channels, 1.0)
    };

    let scores = cached_features(
        comps,
        stats,
        &comps.audio_detector,
        &cfg.audio_model.input_shape,
        "audio",
        &raw,
        || preprocess_audio(&raw, rate, ch, &cfg.preprocessing),
    )?;

    let t = Instant::now();
    let mut verdict = postprocess_output(
        DetectionKind::VoiceSpoofing,
        &scores,
        cfg.confidence_threshold,
        &comps.audio_detector.model_version(),
    );
    stats.record(PHASE_POSTPROCESSING, t.elapsed());

    verdict.processing_time_ms = start.elapsed().as_millis() as i64;
    Ok((verdict, ratio))
}

/// Wrap one modality verdict into the integrated shape
///
/// The single-modality flag is the model verdict as-is; the combined
/// risk rule only applies when both modalities are fused.
fn integrate_single(modality: Modality, verdict: DetectionVerdict, ratio: f32) -> IntegratedVerdict {
    let is_fake = verdict.is_fake;

    let mut detailed_metrics = HashMap::new();
    let prefix = match modality {
        Modality::Video => "video",
        Modality::Audio => "audio",
    };
    detailed_metrics.insert(format!("{prefix}_confidence"), verdict.confidence);
    detailed_metrics.insert(format!("{prefix}_risk_score"), verdict.risk_score);
    detailed_metrics.insert("compression_ratio".to_string(), ratio);
    detailed_metrics.insert("overall_confidence".to_string(), verdict.confidence);
    detailed_metrics.insert("overall_risk_score".to_string(), verdict.risk_score);

    let summary = match &verdict.error {
        Some(err) => format!("{prefix} detection failed: {err}"),
        None => format!(
            "{prefix}: fake={is_fake} confidence={:.3} risk={:.3}",
            verdict.confidence, verdict.risk_score
        ),
    };

    let (video, audio) = match modality {
        Modality::Video => (Some(verdict.clone()), None),
        Modality::Audio => (None, Some(verdict.clone())),
    };

    if verdict.is_error() {
        let mut failed = IntegratedVerdict::failed(summary);
        failed.video = video;
        failed.audio = audio;
        failed.detailed_metrics = detailed_metrics;
        return failed;
    }

    IntegratedVerdict {
        is_fake,
        overall_confidence: verdict.confidence,
        overall_risk_score: verdict.risk_score,
        video,
        audio,
        compression_ratio: ratio,
        total_processing_time_ms: 0,
        detailed_metrics,
        summary,
    }
}

/// Process one pushed or pulled frame on a worker thread
fn process_frame(
    comps: &Components,
    cfg: &IntegrationConfig,
    stats: &PerformanceStats,
    kind: DetectionKind,
    frame: &MediaFrame,
) -> IntegratedVerdict {
    let start = Instant::now();

    if frame.modality() != kind.modality() {
        return IntegratedVerdict::failed(format!(
            "frame modality {:?} does not match detection kind {kind:?}",
            frame.modality()
        ));
    }

    let result = match frame.kind {
        FrameKind::Video { width, height } => cached_features(
            comps,
            stats,
            &comps.video_detector,
            &cfg.video_model.input_shape,
            "video",
            &frame.data,
            || preprocess_video_frame(&frame.data, width, height, &cfg.preprocessing),
        )
        .map(|scores| {
            postprocess_output(
                kind,
                &scores,
                cfg.confidence_threshold,
                &comps.video_detector.model_version(),
            )
        }),
        FrameKind::Audio {
            sample_rate,
            channels,
        } => cached_features(
            comps,
            stats,
            &comps.audio_detector,
            &cfg.audio_model.input_shape,
            "audio",
            &frame.data,
            || preprocess_audio(&frame.data, sample_rate, channels, &cfg.preprocessing),
        )
        .map(|scores| {
            postprocess_output(
                kind,
                &scores,
                cfg.confidence_threshold,
                &comps.audio_detector.model_version(),
            )
        }),
    };

    match result {
        Ok(mut verdict) => {
            verdict.processing_time_ms = start.elapsed().as_millis() as i64;
            let mut integrated = integrate_single(frame.modality(), verdict, 1.0);
            integrated.total_processing_time_ms = start.elapsed().as_millis() as i64;
            integrated
        }
        Err(e) => {
            warn!(error = %e, "frame processing failed");
            IntegratedVerdict::failed(format!("frame processing failed: {e}"))
        }
    }
}
