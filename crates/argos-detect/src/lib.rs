//! Argos object detection core.
//!
//! Real-time object detection over serialized ONNX graphs, exposed
//! through a C-compatible ABI for host applications.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────┐     ┌───────────────┐
//! │ Image ingress│────▶│  Detector  │────▶│  JSON record  │
//! │ path/BGRA/YUV│     │ (Rust/ONNX)│     │ (C-compatible)│
//! └──────────────┘     └────────────┘     └───────────────┘
//! ```
//!
//! The pipeline: ingress converts any input shape into a packed BGR
//! frame; the preprocessor letterboxes or resizes it into a CHW tensor
//! per the model family identified at init; the session runs; the
//! family decoder maps raw outputs back to original-frame boxes; greedy
//! per-class suppression dedupes them; the serializer emits the wire
//! record.
//!
//! ## Usage from C
//!
//! ```c
//! if (argos_init("/path/to/model.onnx")) {
//!     char *record = argos_detect_from_path("/path/to/image.jpg", 0.5f, 0.45f);
//!     // ... parse JSON ...
//!     argos_string_free(record);
//! }
//! argos_release();
//! ```
//!
//! ## Memory Ownership
//!
//! - `argos_detector_new()` allocates on the Rust heap, caller owns the
//!   pointer; `argos_detector_free()` deallocates
//! - Returned records are owned C strings; release each one through
//!   `argos_string_free()`
//! - Input pixel buffers are borrowed for the duration of a single call

pub mod decode;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod ingress;
pub mod labels;
pub mod model;
pub mod nms;
pub mod preprocess;
pub mod report;
pub mod types;

// Re-export main types
pub use engine::Detector;
pub use error::{DetectError, Result};
pub use ingress::{BgrFrame, YuvPlanes};
pub use types::{BoundingBox, Detection, DetectionResult, DetectorOptions, ModelFamily};
