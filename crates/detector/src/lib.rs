//! Forgery feature detector over ONNX Runtime
//!
//! Wraps an `ort` session behind the [`ScoreBackend`] seam: the detector
//! owns model lifecycle (load, warmup, reload, switch) and serializes
//! inference on an internal lock because the underlying runtime session
//! is not assumed reentrant. Preprocessing helpers and the deterministic
//! postprocessor live in their own modules and share no state.

pub mod postprocess;
pub mod preprocess;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use forgery_detect_common::{DetectError, Result};

/// Immutable-per-load configuration for one detector instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX model artifact
    pub model_path: PathBuf,
    /// Expected input tensor shape, e.g. `[1, 3, 224, 224]`
    pub input_shape: Vec<i64>,
    /// Input tensor name (introspection/logging only; inputs are positional)
    pub input_name: String,
    /// Output tensor name
    pub output_name: String,
    /// Confidence threshold in [0, 1]
    pub confidence_threshold: f32,
    /// Risk threshold in [0, 1]
    pub risk_threshold: f32,
    /// Intra-op thread count hint for the runtime
    pub num_threads: usize,
    /// Register the CUDA execution provider before the CPU fallback
    pub enable_gpu: bool,
    /// CUDA device index when `enable_gpu` is set
    pub gpu_device_id: i32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            input_shape: vec![1, 3, 224, 224],
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            confidence_threshold: 0.8,
            risk_threshold: 0.7,
            num_threads: 4,
            enable_gpu: false,
            gpu_device_id: 0,
        }
    }
}

impl ModelConfig {
    /// Validate threshold and shape constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if a threshold is outside [0, 1] or
    /// the input shape is empty.
    pub fn validate(&self) -> Result<()> {
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
        if self.input_shape.is_empty() || self.input_shape.iter().any(|&d| d <= 0) {
            return Err(DetectError::ConfigValidation(format!(
                "input_shape must be non-empty and positive, got {:?}",
                self.input_shape
            )));
        }
        Ok(())
    }

    /// Number of elements an input tensor of this shape holds
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.input_shape.iter().product::<i64>() as usize
    }
}

/// Seam over the tensor runtime: flat f32 buffer in, flat f32 buffer out
///
/// The production implementation is [`OnnxBackend`]; tests substitute
/// fixed-score stubs so the full pipeline runs without model artifacts.
pub trait ScoreBackend: Send {
    /// Run one inference pass
    ///
    /// # Errors
    ///
    /// Returns `Inference` when the runtime rejects the input.
    fn infer(&mut self, input: &[f32], shape: &[i64]) -> Result<Vec<f32>>;

    /// Model version string stamped into verdicts
    fn version(&self) -> &str;
}

/// ONNX Runtime backed score source
pub struct OnnxBackend {
    session: Session,
    version: String,
}

impl OnnxBackend {
    /// Load a model artifact and build an optimized session
    ///
    /// Thread-count and execution-provider options are applied before
    /// the artifact is committed.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` if the path does not exist or the artifact
    /// is rejected by the runtime.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let path = &config.model_path;
        if !path.exists() {
            return Err(DetectError::ModelLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        info!(model = %path.display(), gpu = config.enable_gpu, "loading detection model");

        let builder = Session::builder()
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?
            .with_intra_threads(config.num_threads.max(1))
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?;

        let builder = if config.enable_gpu {
            builder
                .with_execution_providers([
                    CUDAExecutionProvider::default()
                        .with_device_id(config.gpu_device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| DetectError::ModelLoad(e.to_string()))?
        } else {
            builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .map_err(|e| DetectError::ModelLoad(e.to_string()))?
        };

        let session = builder.commit_from_file(path).map_err(|e| {
            DetectError::ModelLoad(format!("failed to load {}: {e}", path.display()))
        })?;

        let version = model_version_for(path);
        info!(model = %path.display(), version, "detection model loaded");

        Ok(Self { session, version })
    }
}

impl ScoreBackend for OnnxBackend {
    fn infer(&mut self, input: &[f32], shape: &[i64]) -> Result<Vec<f32>> {
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let array = ArrayD::from_shape_vec(IxDyn(&dims), input.to_vec())
            .map_err(|e| DetectError::Inference(format!("bad input shape: {e}")))?;

        // Zero-copy tensor: use view instead of clone
        let tensor = TensorRef::from_array_view(array.view())
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Inference(format!("failed to extract tensor: {e}")))?;

        Ok(data.to_vec())
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Derive the verdict model-version string from the artifact path
fn model_version_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    format!("onnx:{stem}")
}

struct DetectorState {
    backend: Option<Box<dyn ScoreBackend>>,
    config: ModelConfig,
}

/// Per-modality forgery detector
///
/// All operations go through one internal lock, so concurrent callers
/// are serialized and `reload_model`/`switch_model` never race an
/// in-flight inference.
pub struct FeatureDetector {
    state: Mutex<DetectorState>,
}

impl FeatureDetector {
    /// Create an uninitialized detector for the given config
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` for out-of-range thresholds or an
    /// empty input shape.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(DetectorState {
                backend: None,
                config,
            }),
        })
    }

    /// Create a detector with an injected backend (already initialized)
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` if the config is invalid.
    pub fn with_backend(config: ModelConfig, backend: Box<dyn ScoreBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(DetectorState {
                backend: Some(backend),
                config,
            }),
        })
    }

    /// Load the model artifact; idempotent if already initialized
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` if the artifact is missing or malformed.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.backend.is_some() {
            debug!("detector already initialized, skipping reload");
            return Ok(());
        }
        let backend = OnnxBackend::load(&state.config)?;
        state.backend = Some(Box::new(backend));
        Ok(())
    }

    /// Check whether a model is loaded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().backend.is_some()
    }

    /// Run one inference pass over a flat input buffer
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `input.len()` differs from the shape
    /// product, `Initialization` if no model is loaded, or `Inference`
    /// on runtime failure.
    pub fn run_inference(&self, input: &[f32], shape: &[i64]) -> Result<Vec<f32>> {
        let mut state = self.state.lock().unwrap();

        let expected = shape.iter().product::<i64>() as usize;
        if input.len() != expected {
            return Err(DetectError::ShapeMismatch {
                expected,
                actual: input.len(),
            });
        }

        let backend = state
            .backend
            .as_mut()
            .ok_or_else(|| DetectError::Initialization("detector not initialized".to_string()))?;

        backend.infer(input, shape)
    }

    /// Run inference over a batch of equally shaped inputs
    ///
    /// # Errors
    ///
    /// Fails on the first item whose inference fails.
    pub fn run_batch(&self, inputs: &[Vec<f32>], shape: &[i64]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.run_inference(input, shape)?);
        }
        Ok(results)
    }

    /// Force lazy runtime initialization with synthetic inferences
    ///
    /// Warmup failures are logged, never propagated.
    pub fn warmup(&self, runs: usize) {
        let shape = {
            let state = self.state.lock().unwrap();
            state.config.input_shape.clone()
        };
        let input = vec![0.0f32; shape.iter().product::<i64>() as usize];
        for i in 0..runs {
            if let Err(e) = self.run_inference(&input, &shape) {
                warn!(run = i, error = %e, "warmup inference failed");
                return;
            }
        }
        debug!(runs, "detector warmup complete");
    }

    /// Release and reload the current model
    ///
    /// The state lock is held across release + reload, so no inference
    /// can observe a half-swapped session.
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` on reload failure; the old session is gone
    /// either way and the detector is uninitialized on error.
    pub fn reload_model(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.backend = None;
        let backend = OnnxBackend::load(&state.config)?;
        state.backend = Some(Box::new(backend));
        Ok(())
    }

    /// Replace the model artifact and configuration wholesale
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` or `ModelLoad`; on failure the
    /// previous config is retained and the previous session kept.
    pub fn switch_model(&self, model_path: impl Into<PathBuf>, mut config: ModelConfig) -> Result<()> {
        config.model_path = model_path.into();
        config.validate()?;

        let mut state = self.state.lock().unwrap();
        let backend = OnnxBackend::load(&config)?;
        state.backend = Some(Box::new(backend));
        state.config = config;
        Ok(())
    }

    /// Replace the configuration without reloading the session
    ///
    /// Threshold changes take effect on the next postprocess; a new
    /// artifact path takes effect on the next `reload_model`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` for an invalid config.
    pub fn set_config(&self, config: ModelConfig) -> Result<()> {
        config.validate()?;
        self.state.lock().unwrap().config = config;
        Ok(())
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn config(&self) -> ModelConfig {
        self.state.lock().unwrap().config.clone()
    }

    /// Version string of the loaded model, empty when uninitialized
    #[must_use]
    pub fn model_version(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .backend
            .as_ref()
            .map(|b| b.version().to_string())
            .unwrap_or_default()
    }

    /// Release the session; `initialize` loads it again
    pub fn cleanup(&self) {
        self.state.lock().unwrap().backend = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stub backend returning a fixed score vector
    struct FixedBackend {
        scores: Vec<f32>,
    }

    impl ScoreBackend for FixedBackend {
        fn infer(&mut self, _input: &[f32], _shape: &[i64]) -> Result<Vec<f32>> {
            Ok(self.scores.clone())
        }

        fn version(&self) -> &str {
            "stub:v1"
        }
    }

    fn stub_detector(scores: Vec<f32>) -> FeatureDetector {
        let config = ModelConfig {
            input_shape: vec![1, 4],
            ..ModelConfig::default()
        };
        FeatureDetector::with_backend(config, Box::new(FixedBackend { scores })).unwrap()
    }

    #[test]
    fn test_config_validation_rejects_bad_thresholds() {
        let config = ModelConfig {
            confidence_threshold: 1.5,
            ..ModelConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DetectError::ConfigValidation(_))
        ));

        let config = ModelConfig {
            risk_threshold: -0.1,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_empty_shape() {
        let config = ModelConfig {
            input_shape: vec![],
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ModelConfig {
            input_shape: vec![1, -3],
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        let detector = stub_detector(vec![0.5, 0.5]);
        let err = detector.run_inference(&[0.0; 3], &[1, 4]).unwrap_err();
        assert!(matches!(
            err,
            DetectError::ShapeMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_inference_with_stub_backend() {
        let detector = stub_detector(vec![0.1, 0.9]);
        let out = detector.run_inference(&[0.0; 4], &[1, 4]).unwrap();
        assert_eq!(out, vec![0.1, 0.9]);
        assert_eq!(detector.model_version(), "stub:v1");
        assert!(detector.is_initialized());
    }

    #[test]
    fn test_batch_inference() {
        let detector = stub_detector(vec![0.3, 0.7]);
        let inputs = vec![vec![0.0; 4], vec![1.0; 4]];
        let outs = detector.run_batch(&inputs, &[1, 4]).unwrap();
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0], vec![0.3, 0.7]);
    }

    #[test]
    fn test_uninitialized_inference_fails() {
        let detector = FeatureDetector::new(ModelConfig {
            input_shape: vec![1, 4],
            ..ModelConfig::default()
        })
        .unwrap();
        let err = detector.run_inference(&[0.0; 4], &[1, 4]).unwrap_err();
        assert!(matches!(err, DetectError::Initialization(_)));
    }

    #[test]
    fn test_cleanup_releases_backend() {
        let detector = stub_detector(vec![0.5]);
        assert!(detector.is_initialized());
        detector.cleanup();
        assert!(!detector.is_initialized());
        assert_eq!(detector.model_version(), "");
    }

    #[test]
    fn test_initialize_missing_artifact_fails() {
        let detector = FeatureDetector::new(ModelConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..ModelConfig::default()
        })
        .unwrap();
        assert!(matches!(
            detector.initialize(),
            Err(DetectError::ModelLoad(_))
        ));
        assert!(!detector.is_initialized());
    }

    #[test]
    fn test_warmup_runs_requested_inferences() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingBackend(Arc<AtomicUsize>);

        impl ScoreBackend for CountingBackend {
            fn infer(&mut self, input: &[f32], _shape: &[i64]) -> Result<Vec<f32>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                assert_eq!(input.len(), 4);
                Ok(vec![0.0, 0.0])
            }

            fn version(&self) -> &str {
                "stub:v1"
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let config = ModelConfig {
            input_shape: vec![1, 4],
            ..ModelConfig::default()
        };
        let detector =
            FeatureDetector::with_backend(config, Box::new(CountingBackend(calls.clone())))
                .unwrap();
        detector.warmup(3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_warmup_failure_is_swallowed() {
        let detector = FeatureDetector::new(ModelConfig {
            input_shape: vec![1, 4],
            ..ModelConfig::default()
        })
        .unwrap();
        // Not initialized: warmup logs and returns instead of panicking
        detector.warmup(3);
        assert!(!detector.is_initialized());
    }

    #[test]
    fn test_model_version_for() {
        let v = model_version_for(Path::new("models/deepfake_v2.onnx"));
        assert_eq!(v, "onnx:deepfake_v2");
    }
}
