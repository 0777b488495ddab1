//! Family-specific output decoding.
//!
//! Converts raw output tensors into candidate detections in
//! original-image pixel coordinates. Candidates with non-finite
//! coordinates or scores are dropped silently; they never abort the
//! call.

use ndarray::ArrayView2;
use tracing::warn;

use crate::error::{DetectError, Result};
use crate::preprocess::Geometry;
use crate::types::BoundingBox;

/// Decoder output, before suppression and naming.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Detection strides of the grid-decoded family.
const GRID_STRIDES: [u32; 3] = [8, 16, 32];

/// Precompute the `(grid_x, grid_y, stride)` table matching the
/// grid-decoded output row order: stride outer, grid row middle, grid
/// column inner. The table is rebuilt whenever the input resolution
/// changes; the enumeration order is load-bearing.
pub fn build_grids(input_w: u32, input_h: u32) -> Vec<(f32, f32, f32)> {
    let mut grids = Vec::new();
    for stride in GRID_STRIDES {
        let (gw, gh) = (input_w / stride, input_h / stride);
        for gy in 0..gh {
            for gx in 0..gw {
                grids.push((gx as f32, gy as f32, stride as f32));
            }
        }
    }
    grids
}

/// Undo the letterbox transform: box in input-tensor pixels, given as
/// center and size, to original-frame corner coordinates.
fn unletterbox(cx: f32, cy: f32, w: f32, h: f32, geom: &Geometry) -> BoundingBox {
    BoundingBox::new(
        (cx - w / 2.0 - geom.pad_x) / geom.scale,
        (cy - h / 2.0 - geom.pad_y) / geom.scale,
        (cx + w / 2.0 - geom.pad_x) / geom.scale,
        (cy + h / 2.0 - geom.pad_y) / geom.scale,
    )
}

fn push_candidate(
    out: &mut Vec<Candidate>,
    class_id: u32,
    confidence: f32,
    bbox: BoundingBox,
    frame_w: f32,
    frame_h: f32,
) {
    if !confidence.is_finite() || !bbox.is_finite() {
        return;
    }
    out.push(Candidate {
        class_id,
        confidence,
        bbox: bbox.clamp(frame_w, frame_h),
    });
}

/// Strip a leading batch axis of 1 and view the data as a 2-D tensor.
fn as_2d<'a>(dims: &[i64], data: &'a [f32]) -> Result<ArrayView2<'a, f32>> {
    let axes: Vec<usize> = match dims {
        [d1, d2] => vec![*d1 as usize, *d2 as usize],
        [1, d1, d2] => vec![*d1 as usize, *d2 as usize],
        _ => {
            return Err(DetectError::Runtime(format!(
                "unsupported output shape {dims:?}"
            )))
        }
    };
    ArrayView2::from_shape((axes[0], axes[1]), data)
        .map_err(|e| DetectError::Runtime(format!("output shape mismatch: {e}")))
}

/// Decode the grid family: each row is `(dx, dy, log w, log h,
/// objectness, class scores...)` relative to a precomputed grid cell.
#[allow(clippy::too_many_arguments)]
pub fn decode_grid(
    dims: &[i64],
    data: &[f32],
    grids: &[(f32, f32, f32)],
    num_classes: usize,
    conf_threshold: f32,
    geom: &Geometry,
    frame_w: u32,
    frame_h: u32,
) -> Result<Vec<Candidate>> {
    let view = as_2d(dims, data)?;
    let features = 5 + num_classes;
    if view.ncols() != features {
        return Err(DetectError::Runtime(format!(
            "expected {features} features per row, output has {}",
            view.ncols()
        )));
    }
    if view.nrows() != grids.len() {
        warn!(
            rows = view.nrows(),
            grid = grids.len(),
            "output row count does not match grid table"
        );
    }

    let mut out = Vec::new();
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    for (row, &(gx, gy, stride)) in view.outer_iter().zip(grids.iter()) {
        let objectness = row[4];
        if !(objectness >= conf_threshold) {
            continue;
        }

        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = row[5 + c];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        let confidence = objectness * best_score;
        if !(confidence >= conf_threshold) {
            continue;
        }

        let cx = (row[0] + gx) * stride;
        let cy = (row[1] + gy) * stride;
        let w = row[2].exp() * stride;
        let h = row[3].exp() * stride;
        let bbox = unletterbox(cx, cy, w, h, geom);
        push_candidate(&mut out, best_class as u32, confidence, bbox, fw, fh);
    }
    Ok(out)
}

/// Decode the objectness-free family: rows are `(cx, cy, w, h, class
/// scores...)` in input-tensor pixels, in either `(boxes, features)` or
/// `(features, boxes)` layout.
pub fn decode_center_class(
    dims: &[i64],
    data: &[f32],
    conf_threshold: f32,
    geom: &Geometry,
    frame_w: u32,
    frame_h: u32,
) -> Result<Vec<Candidate>> {
    let view = as_2d(dims, data)?;
    // Boxes outnumber features; orient rows as boxes.
    let view = if view.nrows() < view.ncols() {
        view.reversed_axes()
    } else {
        view
    };
    let features = view.ncols();
    if features < 5 {
        return Err(DetectError::Runtime(format!(
            "expected at least 5 features per row, output has {features}"
        )));
    }
    let num_classes = features - 4;

    let mut out = Vec::new();
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    for row in view.outer_iter() {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = row[4 + c];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if !(best_score >= conf_threshold) {
            continue;
        }

        let bbox = unletterbox(row[0], row[1], row[2], row[3], geom);
        push_candidate(&mut out, best_class as u32, best_score, bbox, fw, fh);
    }
    Ok(out)
}

/// Read the in-graph-decoded family: rows are `(class_id, score, x1,
/// y1, x2, y2)` already in original-frame pixels; the graph applied its
/// own suppression. Degenerate row counts are a valid empty result.
pub fn decode_prenms(
    dims: &[i64],
    data: &[f32],
    conf_threshold: f32,
    frame_w: u32,
    frame_h: u32,
) -> Result<Vec<Candidate>> {
    // The graph reports "no detections" as a zero or negative axis.
    if dims.iter().any(|&d| d <= 0) || data.is_empty() {
        return Ok(Vec::new());
    }

    let view = as_2d(dims, data)?;
    let view = if view.ncols() != 6 && view.nrows() == 6 {
        view.reversed_axes()
    } else {
        view
    };
    if view.ncols() != 6 {
        return Err(DetectError::Runtime(format!(
            "expected 6-wide decoded rows, output shape is {dims:?}"
        )));
    }

    let mut out = Vec::new();
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    for row in view.outer_iter() {
        let class = row[0];
        let score = row[1];
        if !(score >= conf_threshold) || class < 0.0 || !class.is_finite() {
            continue;
        }
        let bbox = BoundingBox::new(row[2], row[3], row[4], row[5]);
        push_candidate(&mut out, class as u32, score, bbox, fw, fh);
    }
    Ok(out)
}
