//! Detector engine.
//!
//! Owns the graph session and the per-call pipeline: ingress output →
//! preprocess → inference → decode → suppression → result. One call at
//! a time per detector; the host serializes concurrent callers.

use std::time::Instant;

use tracing::{debug, info};

use crate::decode;
use crate::error::{DetectError, Result};
use crate::ingress::{BgrFrame, YuvPlanes};
use crate::labels;
use crate::nms;
use crate::preprocess::{self, Preprocessed};
use crate::types::{Detection, DetectionResult, DetectorOptions, ModelFamily};

#[cfg(feature = "onnx")]
use parking_lot::Mutex;
#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
#[cfg(feature = "onnx")]
use std::fs;

/// Everything derived from one loaded model.
struct LoadedModel {
    family: ModelFamily,
    input_width: u32,
    input_height: u32,
    num_classes: usize,
    class_names: Vec<String>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    /// Input positions of the image and scale tensors (decoded family)
    image_input: usize,
    scale_input: usize,
    /// `(grid_x, grid_y, stride)` per output row, grid family only
    grids: Vec<(f32, f32, f32)>,
    /// Wrapped in Mutex because Session::run() requires &mut self
    #[cfg(feature = "onnx")]
    session: Mutex<Session>,
}

/// Object detector over one serialized graph.
///
/// Created uninitialized; [`Detector::init`] loads a model and freezes
/// its identification for the session's lifetime; [`Detector::release`]
/// returns to the uninitialized state and is safe to repeat.
pub struct Detector {
    options: DetectorOptions,
    model: Option<LoadedModel>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self::with_options(DetectorOptions::default())
    }

    pub fn with_options(options: DetectorOptions) -> Self {
        Self {
            options,
            model: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    /// Load a model, releasing any previously loaded one first.
    pub fn init(&mut self, model_path: &str) -> Result<()> {
        self.release();
        let model = load_model(model_path, &self.options)?;
        info!(
            family = %model.family,
            input = %format!("{}x{}", model.input_width, model.input_height),
            classes = model.num_classes,
            "model loaded"
        );
        debug!(
            inputs = ?model.input_names,
            outputs = ?model.output_names,
            "graph tensors"
        );
        self.model = Some(model);
        Ok(())
    }

    /// Drop the session and return to the uninitialized state. Safe to
    /// call repeatedly.
    pub fn release(&mut self) {
        if self.model.take().is_some() {
            info!("model released");
        }
    }

    /// Replace the class vocabulary. The class count follows the list
    /// length from here on; the graph-derived count is not consulted
    /// again.
    pub fn set_class_names(&mut self, list: &str) -> Result<()> {
        let model = self.model.as_mut().ok_or(DetectError::NotInitialized)?;
        let names = labels::parse_class_list(list);
        if names.is_empty() {
            return Err(DetectError::InvalidInput("empty class list".into()));
        }
        model.num_classes = names.len();
        model.class_names = names;
        Ok(())
    }

    /// Current vocabulary, if a model is loaded.
    pub fn class_names(&self) -> Option<&[String]> {
        self.model.as_ref().map(|m| m.class_names.as_slice())
    }

    /// Model input resolution, if a model is loaded.
    pub fn input_dimensions(&self) -> Option<(u32, u32)> {
        self.model.as_ref().map(|m| (m.input_width, m.input_height))
    }

    /// Decode an image file and run detection.
    pub fn detect_from_path(
        &self,
        path: &str,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        self.require_initialized()?;
        let frame = BgrFrame::from_path(path)?;
        self.run_pipeline(frame, conf_threshold, iou_threshold, started)
    }

    /// Convert a packed BGRA buffer and run detection. The buffer is
    /// borrowed for the duration of the call only.
    pub fn detect_from_bgra(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        self.require_initialized()?;
        let frame = BgrFrame::from_bgra(data, width, height, stride)?;
        self.run_pipeline(frame, conf_threshold, iou_threshold, started)
    }

    /// Assemble a tri-planar YUV frame, rotate, and run detection.
    /// Result dimensions are post-rotation.
    pub fn detect_from_yuv(
        &self,
        planes: &YuvPlanes<'_>,
        rotation: u32,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        self.require_initialized()?;
        let frame = BgrFrame::from_yuv(planes, rotation)?;
        self.run_pipeline(frame, conf_threshold, iou_threshold, started)
    }

    /// Run detection on an already-converted BGR frame.
    pub fn detect_frame(
        &self,
        frame: BgrFrame,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        self.require_initialized()?;
        self.run_pipeline(frame, conf_threshold, iou_threshold, started)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.model.is_none() {
            return Err(DetectError::NotInitialized);
        }
        Ok(())
    }

    fn run_pipeline(
        &self,
        frame: BgrFrame,
        conf_threshold: f32,
        iou_threshold: f32,
        started: Instant,
    ) -> Result<DetectionResult> {
        let model = self.model.as_ref().ok_or(DetectError::NotInitialized)?;
        let (frame_w, frame_h) = (frame.width, frame.height);

        let pre =
            preprocess::preprocess(&frame, model.input_width, model.input_height, model.family)?;
        let geometry = pre.geometry;

        let (dims, data) = run_session(model, pre, &frame)?;

        let candidates = match model.family {
            ModelFamily::YoloX => decode::decode_grid(
                &dims,
                &data,
                &model.grids,
                model.num_classes,
                conf_threshold,
                &geometry,
                frame_w,
                frame_h,
            )?,
            ModelFamily::YoloV8 => decode::decode_center_class(
                &dims,
                &data,
                conf_threshold,
                &geometry,
                frame_w,
                frame_h,
            )?,
            ModelFamily::PpYoloE => {
                decode::decode_prenms(&dims, &data, conf_threshold, frame_w, frame_h)?
            }
        };

        // The decoded family already suppressed in-graph
        let kept = match model.family {
            ModelFamily::PpYoloE => candidates,
            _ => nms::suppress(candidates, iou_threshold),
        };

        let detections: Vec<Detection> = kept
            .into_iter()
            .map(|c| Detection {
                class_name: labels::class_name(&model.class_names, c.class_id),
                class_id: c.class_id,
                confidence: c.confidence,
                bbox: c.bbox,
            })
            .collect();

        debug!(count = detections.len(), "detection complete");

        Ok(DetectionResult {
            inference_time_ms: started.elapsed().as_millis() as u64,
            detections,
            image_width: frame_w,
            image_height: frame_h,
        })
    }
}

#[cfg(feature = "onnx")]
fn load_model(model_path: &str, options: &DetectorOptions) -> Result<LoadedModel> {
    use crate::model::{identify, session_meta};

    let model_bytes = fs::read(model_path)
        .map_err(|e| DetectError::ModelLoad(format!("failed to read '{model_path}': {e}")))?;

    let session = build_session(&model_bytes, options)?;

    let inputs = session_meta::inputs(&session);
    let outputs = session_meta::outputs(&session);
    let signature = identify(&inputs, &outputs, options.input_width, options.input_height)?;

    let grids = match signature.family {
        ModelFamily::YoloX => decode::build_grids(signature.input_width, signature.input_height),
        _ => Vec::new(),
    };

    Ok(LoadedModel {
        family: signature.family,
        input_width: signature.input_width,
        input_height: signature.input_height,
        num_classes: signature.num_classes,
        class_names: labels::default_class_names(),
        input_names: inputs.into_iter().map(|t| t.name).collect(),
        output_names: outputs.into_iter().map(|t| t.name).collect(),
        image_input: signature.image_input,
        scale_input: signature.scale_input,
        grids,
        session: Mutex::new(session),
    })
}

#[cfg(not(feature = "onnx"))]
fn load_model(_model_path: &str, _options: &DetectorOptions) -> Result<LoadedModel> {
    Err(DetectError::Runtime(
        "built without the onnx feature; inference is unavailable".into(),
    ))
}

/// Build the session: maximum graph optimization, fixed thread pools,
/// and an accelerator provider when one is compiled in. Accelerator
/// failure is never fatal; the CPU provider always remains.
#[cfg(feature = "onnx")]
fn build_session(model_bytes: &[u8], options: &DetectorOptions) -> Result<Session> {
    let builder = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(options.intra_threads))
        .and_then(|b| b.with_inter_threads(options.inter_threads))
        .map_err(|e| DetectError::ModelLoad(format!("failed to configure session: {e}")))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        match builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .and_then(|b| b.commit_from_memory(model_bytes))
        {
            Ok(session) => {
                info!("using CUDA execution provider");
                return Ok(session);
            }
            Err(e) => tracing::warn!("CUDA provider unavailable, falling back to CPU: {e}"),
        }
    }

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        match builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
            .and_then(|b| b.commit_from_memory(model_bytes))
        {
            Ok(session) => {
                info!("using CoreML execution provider");
                return Ok(session);
            }
            Err(e) => tracing::warn!("CoreML provider unavailable, falling back to CPU: {e}"),
        }
    }

    builder
        .commit_from_memory(model_bytes)
        .map_err(|e| DetectError::ModelLoad(format!("failed to load model: {e}")))
}

/// Run inference and pull out the first output as shape + flat data.
#[cfg(feature = "onnx")]
fn run_session(
    model: &LoadedModel,
    pre: Preprocessed,
    frame: &BgrFrame,
) -> Result<(Vec<i64>, Vec<f32>)> {
    let shape = vec![
        1i64,
        3,
        model.input_height as i64,
        model.input_width as i64,
    ];
    let image = Value::from_array((shape.as_slice(), pre.tensor))
        .map_err(|e| DetectError::Runtime(format!("failed to build image tensor: {e}")))?;

    let mut session = model.session.lock();
    let outputs = if model.family == ModelFamily::PpYoloE {
        // The scale-factor storage is owned by its Value in this scope,
        // outliving the run call.
        let factor = preprocess::scale_factor(frame, model.input_width, model.input_height);
        let scale = Value::from_array(([1usize, 2].as_slice(), factor.to_vec()))
            .map_err(|e| DetectError::Runtime(format!("failed to build scale tensor: {e}")))?;
        if model.scale_input < model.image_input {
            session.run(ort::inputs![scale, image])
        } else {
            session.run(ort::inputs![image, scale])
        }
    } else {
        session.run(ort::inputs![image])
    }
    .map_err(|e| DetectError::Runtime(e.to_string()))?;

    let (out_shape, out_data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| DetectError::Runtime(format!("failed to read output tensor: {e}")))?;

    Ok((out_shape.iter().map(|&d| d as i64).collect(), out_data.to_vec()))
}

#[cfg(not(feature = "onnx"))]
fn run_session(
    _model: &LoadedModel,
    _pre: Preprocessed,
    _frame: &BgrFrame,
) -> Result<(Vec<i64>, Vec<f32>)> {
    Err(DetectError::Runtime(
        "built without the onnx feature; inference is unavailable".into(),
    ))
}
