//! C-compatible FFI interface for the detector.
//!
//! Two layers share one implementation:
//!
//! - an opaque-handle API (`argos_detector_*`) where the caller owns a
//!   `*mut Detector` and frees it with `argos_detector_free`;
//! - the process-wide singleton layer (`argos_init`, `argos_detect_*`,
//!   ...) that typical hosts bind, a thin convenience over exactly one
//!   handle.
//!
//! # Memory Ownership Rules
//!
//! - `argos_detector_new()` allocates on the Rust heap, caller owns the
//!   pointer and must call `argos_detector_free()`
//! - Every record-returning call hands back an owned JSON C string;
//!   release it with `argos_string_free()`
//! - Input pixel buffers are borrowed for the duration of a single call;
//!   YUV planes are passed as pointer + byte-length pairs because on
//!   semi-planar camera buffers the two chroma views alias one
//!   allocation and end at different offsets
//!
//! # Safety
//!
//! All public FFI functions handle null pointer checks internally and
//! never unwind across the boundary; failures come back as JSON error
//! records. The caller is responsible for passing valid pointers and
//! accurate buffer lengths as documented.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_float, c_int};
use std::slice;

use parking_lot::Mutex;

use crate::engine::Detector;
use crate::error::DetectError;
use crate::ingress::YuvPlanes;
use crate::report;

// Safety limits to prevent runaway allocations from hostile inputs
const MAX_FRAME_BYTES: usize = 100_000_000;
const MAX_PATH_LEN: usize = 4096;
const MAX_CLASS_LIST_LEN: usize = 1_000_000;
const MAX_DIMENSION: c_int = 16_384;

/// The one detector typical hosts drive through the singleton layer.
static ACTIVE: Mutex<Option<Detector>> = Mutex::new(None);

/// Emitted in place of a record when the record itself cannot be turned
/// into a C string.
const BAD_RECORD: &str = "{\"error\":\"record allocation failed\",\"code\":\"RUNTIME_ERROR\"}";

/// Hand a finished JSON record to the caller as an owned C string.
/// Serialized records never contain interior NULs; if one sneaks in,
/// the caller gets a minimal runtime-error record instead.
fn record_cstring(json: String) -> *mut c_char {
    CString::new(json)
        .or_else(|_| CString::new(BAD_RECORD))
        .unwrap_or_default()
        .into_raw()
}

fn error_record(err: &DetectError) -> *mut c_char {
    record_cstring(report::serialize_error(err))
}

/// Borrow a NUL-terminated text argument. Null pointers, broken UTF-8,
/// and arguments past the length cap all come back as None.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn text_arg<'a>(ptr: *const c_char, max_len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().ok()?;
    (text.len() <= max_len).then_some(text)
}

// ============================================================================
// Handle lifecycle
// ============================================================================

/// Create an uninitialized detector handle.
///
/// Caller owns the pointer and must call `argos_detector_free`.
#[no_mangle]
pub extern "C" fn argos_detector_new() -> *mut Detector {
    Box::into_raw(Box::new(Detector::new()))
}

/// Destroy a detector handle created by `argos_detector_new`, dropping
/// any loaded model with it. Null is a no-op.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_free(detector: *mut Detector) {
    if !detector.is_null() {
        drop(unsafe { Box::from_raw(detector) });
    }
}

/// Load a model into the detector, releasing any previous one first.
///
/// Returns 1 on success, 0 on failure.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_init(
    detector: *mut Detector,
    model_path: *const c_char,
) -> c_int {
    if detector.is_null() {
        return 0;
    }
    let Some(path) = (unsafe { text_arg(model_path, MAX_PATH_LEN) }) else {
        return 0;
    };
    let detector = unsafe { &mut *detector };
    match detector.init(path) {
        Ok(()) => 1,
        Err(e) => {
            eprintln!("[argos] init failed: {e}");
            0
        }
    }
}

/// Drop the loaded model. Safe to call repeatedly.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_release(detector: *mut Detector) {
    if let Some(detector) = unsafe { detector.as_mut() } {
        detector.release();
    }
}

/// 1 when a model is loaded and usable, 0 otherwise.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_is_initialized(detector: *const Detector) -> c_int {
    match unsafe { detector.as_ref() } {
        Some(d) if d.is_initialized() => 1,
        _ => 0,
    }
}

/// Replace the class vocabulary (JSON array or newline-separated list).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_set_classes(detector: *mut Detector, class_list: *const c_char) {
    let Some(detector) = (unsafe { detector.as_mut() }) else {
        return;
    };
    let Some(list) = (unsafe { text_arg(class_list, MAX_CLASS_LIST_LEN) }) else {
        return;
    };
    if let Err(e) = detector.set_class_names(list) {
        eprintln!("[argos] set_classes failed: {e}");
    }
}

// ============================================================================
// Handle detection calls
// ============================================================================

/// Detect on an image file. Returns an owned JSON record; free with
/// `argos_string_free`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_detect_from_path(
    detector: *const Detector,
    image_path: *const c_char,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let Some(detector) = (unsafe { detector.as_ref() }) else {
        return error_record(&DetectError::NotInitialized);
    };
    detect_path_impl(detector, image_path, conf_threshold, iou_threshold)
}

/// Detect on a packed BGRA buffer with row stride. The buffer is
/// borrowed, never copied into the handle.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detector_detect_from_buffer(
    detector: *const Detector,
    bgra: *const u8,
    width: c_int,
    height: c_int,
    stride: c_int,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let Some(detector) = (unsafe { detector.as_ref() }) else {
        return error_record(&DetectError::NotInitialized);
    };
    detect_buffer_impl(
        detector,
        bgra,
        width,
        height,
        stride,
        conf_threshold,
        iou_threshold,
    )
}

/// Detect on a tri-planar YUV frame. Each plane is a pointer plus the
/// byte length of that view; output dimensions are post-rotation.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn argos_detector_detect_from_yuv(
    detector: *const Detector,
    y: *const u8,
    y_len: usize,
    u: *const u8,
    u_len: usize,
    v: *const u8,
    v_len: usize,
    y_row_stride: c_int,
    uv_row_stride: c_int,
    uv_pixel_stride: c_int,
    width: c_int,
    height: c_int,
    rotation: c_int,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let Some(detector) = (unsafe { detector.as_ref() }) else {
        return error_record(&DetectError::NotInitialized);
    };
    detect_yuv_impl(
        detector,
        y,
        y_len,
        u,
        u_len,
        v,
        v_len,
        y_row_stride,
        uv_row_stride,
        uv_pixel_stride,
        width,
        height,
        rotation,
        conf_threshold,
        iou_threshold,
    )
}

// ============================================================================
// Singleton layer
// ============================================================================

/// Load a model into the process-wide detector, creating it on first
/// use and releasing any previously loaded model. Returns 1 on success.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_init(model_path: *const c_char) -> c_int {
    let Some(path) = (unsafe { text_arg(model_path, MAX_PATH_LEN) }) else {
        return 0;
    };
    let path = path.to_string();
    let mut guard = ACTIVE.lock();
    let detector = guard.get_or_insert_with(Detector::new);
    match detector.init(&path) {
        Ok(()) => 1,
        Err(e) => {
            eprintln!("[argos] init failed: {e}");
            0
        }
    }
}

/// Detect on an image file with the process-wide detector.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detect_from_path(
    image_path: *const c_char,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let guard = ACTIVE.lock();
    match guard.as_ref() {
        Some(detector) => detect_path_impl(detector, image_path, conf_threshold, iou_threshold),
        None => error_record(&DetectError::NotInitialized),
    }
}

/// Detect on a packed BGRA buffer with the process-wide detector.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_detect_from_buffer(
    bgra: *const u8,
    width: c_int,
    height: c_int,
    stride: c_int,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let guard = ACTIVE.lock();
    match guard.as_ref() {
        Some(detector) => detect_buffer_impl(
            detector,
            bgra,
            width,
            height,
            stride,
            conf_threshold,
            iou_threshold,
        ),
        None => error_record(&DetectError::NotInitialized),
    }
}

/// Detect on a tri-planar YUV frame with the process-wide detector.
/// Each plane is a pointer plus the byte length of that view.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn argos_detect_from_yuv(
    y: *const u8,
    y_len: usize,
    u: *const u8,
    u_len: usize,
    v: *const u8,
    v_len: usize,
    y_row_stride: c_int,
    uv_row_stride: c_int,
    uv_pixel_stride: c_int,
    width: c_int,
    height: c_int,
    rotation: c_int,
    conf_threshold: c_float,
    iou_threshold: c_float,
) -> *mut c_char {
    let guard = ACTIVE.lock();
    match guard.as_ref() {
        Some(detector) => detect_yuv_impl(
            detector,
            y,
            y_len,
            u,
            u_len,
            v,
            v_len,
            y_row_stride,
            uv_row_stride,
            uv_pixel_stride,
            width,
            height,
            rotation,
            conf_threshold,
            iou_threshold,
        ),
        None => error_record(&DetectError::NotInitialized),
    }
}

/// Replace the process-wide detector's class vocabulary.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_set_classes(class_list: *const c_char) {
    let Some(list) = (unsafe { text_arg(class_list, MAX_CLASS_LIST_LEN) }) else {
        return;
    };
    let mut guard = ACTIVE.lock();
    match guard.as_mut() {
        Some(detector) => {
            if let Err(e) = detector.set_class_names(list) {
                eprintln!("[argos] set_classes failed: {e}");
            }
        }
        None => eprintln!("[argos] set_classes called before init"),
    }
}

/// Release the process-wide detector's model. Safe to call repeatedly.
#[no_mangle]
pub extern "C" fn argos_release() {
    if let Some(detector) = ACTIVE.lock().as_mut() {
        detector.release();
    }
}

/// 1 when the process-wide detector has a loaded model.
#[no_mangle]
pub extern "C" fn argos_is_initialized() -> c_int {
    match ACTIVE.lock().as_ref() {
        Some(d) if d.is_initialized() => 1,
        _ => 0,
    }
}

/// Crate version as a static NUL-terminated string. Never freed.
#[no_mangle]
pub extern "C" fn argos_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Release a record string returned by any record-returning call. Null
/// is a no-op.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn argos_string_free(record: *mut c_char) {
    if !record.is_null() {
        drop(unsafe { CString::from_raw(record) });
    }
}

// ============================================================================
// Shared implementation
// ============================================================================

fn detect_path_impl(
    detector: &Detector,
    image_path: *const c_char,
    conf_threshold: f32,
    iou_threshold: f32,
) -> *mut c_char {
    if !detector.is_initialized() {
        return error_record(&DetectError::NotInitialized);
    }
    let Some(path) = (unsafe { text_arg(image_path, MAX_PATH_LEN) }) else {
        return error_record(&DetectError::ImageLoad("invalid image path".into()));
    };
    let json = match detector.detect_from_path(path, conf_threshold, iou_threshold) {
        Ok(result) => report::serialize_result(&result),
        Err(e) => report::serialize_error(&e),
    };
    record_cstring(json)
}

fn detect_buffer_impl(
    detector: &Detector,
    bgra: *const u8,
    width: c_int,
    height: c_int,
    stride: c_int,
    conf_threshold: f32,
    iou_threshold: f32,
) -> *mut c_char {
    // Guards run before any pixel memory is touched
    if !detector.is_initialized() {
        return error_record(&DetectError::NotInitialized);
    }
    if bgra.is_null() {
        return error_record(&DetectError::InvalidInput("null pixel buffer".into()));
    }
    if width <= 0 || height <= 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return error_record(&DetectError::InvalidInput(format!(
            "invalid frame dimensions {width}x{height}"
        )));
    }
    if stride < width * 4 {
        return error_record(&DetectError::InvalidInput(format!(
            "stride {stride} shorter than a row of {width} pixels"
        )));
    }
    let len = stride as usize * (height as usize - 1) + width as usize * 4;
    if len > MAX_FRAME_BYTES {
        return error_record(&DetectError::InvalidInput("frame exceeds size limit".into()));
    }

    let data = unsafe { slice::from_raw_parts(bgra, len) };
    let json = match detector.detect_from_bgra(
        data,
        width as u32,
        height as u32,
        stride as usize,
        conf_threshold,
        iou_threshold,
    ) {
        Ok(result) => report::serialize_result(&result),
        Err(e) => report::serialize_error(&e),
    };
    record_cstring(json)
}

#[allow(clippy::too_many_arguments)]
fn detect_yuv_impl(
    detector: &Detector,
    y: *const u8,
    y_len: usize,
    u: *const u8,
    u_len: usize,
    v: *const u8,
    v_len: usize,
    y_row_stride: c_int,
    uv_row_stride: c_int,
    uv_pixel_stride: c_int,
    width: c_int,
    height: c_int,
    rotation: c_int,
    conf_threshold: f32,
    iou_threshold: f32,
) -> *mut c_char {
    if !detector.is_initialized() {
        return error_record(&DetectError::NotInitialized);
    }
    if y.is_null() || u.is_null() || v.is_null() {
        return error_record(&DetectError::InvalidInput("null plane pointer".into()));
    }
    if width <= 0 || height <= 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return error_record(&DetectError::InvalidInput(format!(
            "invalid frame dimensions {width}x{height}"
        )));
    }
    if y_row_stride < width || uv_row_stride <= 0 {
        return error_record(&DetectError::InvalidInput("invalid plane stride".into()));
    }
    if uv_pixel_stride != 1 && uv_pixel_stride != 2 {
        return error_record(&DetectError::InvalidInput(format!(
            "uv_pixel_stride must be 1 or 2, got {uv_pixel_stride}"
        )));
    }

    // Each view must reach its own last sample. The chroma views of a
    // semi-planar buffer alias one allocation offset by a byte, so their
    // lengths are the caller's to report, never derived from geometry.
    let (w, h) = (width as usize, height as usize);
    let y_needed = y_row_stride as usize * (h - 1) + w;
    let chroma_rows = h.div_ceil(2);
    let chroma_cols = w.div_ceil(2);
    let uv_needed = uv_row_stride as usize * (chroma_rows - 1)
        + (chroma_cols - 1) * uv_pixel_stride as usize
        + 1;
    if y_len < y_needed || u_len < uv_needed || v_len < uv_needed {
        return error_record(&DetectError::InvalidInput(
            "plane shorter than frame geometry".into(),
        ));
    }
    if y_len.saturating_add(u_len).saturating_add(v_len) > MAX_FRAME_BYTES {
        return error_record(&DetectError::InvalidInput("frame exceeds size limit".into()));
    }

    // In-memory plane order decides whether interleaved chroma is
    // already VU or needs swapping.
    let v_before_u = (v as usize) < (u as usize);

    let planes = YuvPlanes {
        y: unsafe { slice::from_raw_parts(y, y_len) },
        u: unsafe { slice::from_raw_parts(u, u_len) },
        v: unsafe { slice::from_raw_parts(v, v_len) },
        width: width as u32,
        height: height as u32,
        y_row_stride: y_row_stride as usize,
        uv_row_stride: uv_row_stride as usize,
        uv_pixel_stride: uv_pixel_stride as usize,
        v_before_u,
    };

    let rotation = if rotation > 0 { rotation as u32 } else { 0 };
    let json = match detector.detect_from_yuv(&planes, rotation, conf_threshold, iou_threshold) {
        Ok(result) => report::serialize_result(&result),
        Err(e) => report::serialize_error(&e),
    };
    record_cstring(json)
}
