//! Family-aware preprocessing.
//!
//! Letterbox resize (uniform scale, centered gray padding) for the raw
//! YOLO families, direct resize for in-graph-decoded models. Output is
//! a planar CHW float tensor; channel order and normalization follow the
//! export convention of the family:
//!
//! - YoloX: BGR, unnormalized 0..255
//! - YoloV8: RGB, divided by 255
//! - PP-YOLOE: RGB, divided by 255, plus an auxiliary scale factor

use crate::error::Result;
use crate::ingress::BgrFrame;
use crate::types::ModelFamily;

/// Neutral gray used to pad the letterbox canvas.
const PAD_GRAY: f32 = 114.0;

/// Geometric transform applied by the preprocessor; the decoder inverts
/// it to land boxes back in the original frame.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    /// Uniform letterbox scale (1.0 for direct resize)
    pub scale: f32,
    /// Left padding in letterbox pixels (0 for direct resize)
    pub pad_x: f32,
    /// Top padding in letterbox pixels (0 for direct resize)
    pub pad_y: f32,
}

impl Geometry {
    pub const IDENTITY: Geometry = Geometry {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };
}

/// CHW tensor plus the geometry needed to map boxes back to the
/// original frame.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Planar CHW floats, length `3 * input_w * input_h`
    pub tensor: Vec<f32>,
    pub geometry: Geometry,
}

/// Auxiliary input for in-graph-decoded models, order (H-ratio, W-ratio).
pub fn scale_factor(frame: &BgrFrame, input_w: u32, input_h: u32) -> [f32; 2] {
    [
        input_h as f32 / frame.height as f32,
        input_w as f32 / frame.width as f32,
    ]
}

/// Run the family's preprocessing into a fresh CHW tensor.
pub fn preprocess(
    frame: &BgrFrame,
    input_w: u32,
    input_h: u32,
    family: ModelFamily,
) -> Result<Preprocessed> {
    match family {
        ModelFamily::YoloX | ModelFamily::YoloV8 => letterbox(frame, input_w, input_h, family),
        ModelFamily::PpYoloE => direct_resize(frame, input_w, input_h),
    }
}

fn letterbox(
    frame: &BgrFrame,
    input_w: u32,
    input_h: u32,
    family: ModelFamily,
) -> Result<Preprocessed> {
    let (iw, ih) = (input_w as usize, input_h as usize);
    let scale = (input_w as f32 / frame.width as f32).min(input_h as f32 / frame.height as f32);
    let new_w = ((frame.width as f32 * scale).round() as usize).max(1);
    let new_h = ((frame.height as f32 * scale).round() as usize).max(1);
    let pad_x = (iw - new_w.min(iw)) / 2;
    let pad_y = (ih - new_h.min(ih)) / 2;

    let plane = iw * ih;
    let pad_value = match family {
        ModelFamily::YoloX => PAD_GRAY,
        _ => PAD_GRAY / 255.0,
    };
    let mut tensor = vec![pad_value; plane * 3];

    // Map canvas pixels inside the letterboxed rectangle back to source
    // coordinates with half-pixel centers.
    let ratio_x = frame.width as f32 / new_w as f32;
    let ratio_y = frame.height as f32 / new_h as f32;
    for y in pad_y..(pad_y + new_h).min(ih) {
        let src_y = (y - pad_y) as f32;
        for x in pad_x..(pad_x + new_w).min(iw) {
            let src_x = (x - pad_x) as f32;
            let (b, g, r) = sample_bilinear(
                frame,
                (src_x + 0.5) * ratio_x - 0.5,
                (src_y + 0.5) * ratio_y - 0.5,
            );
            let at = y * iw + x;
            match family {
                ModelFamily::YoloX => {
                    tensor[at] = b;
                    tensor[plane + at] = g;
                    tensor[2 * plane + at] = r;
                }
                _ => {
                    tensor[at] = r / 255.0;
                    tensor[plane + at] = g / 255.0;
                    tensor[2 * plane + at] = b / 255.0;
                }
            }
        }
    }

    Ok(Preprocessed {
        tensor,
        geometry: Geometry {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    })
}

fn direct_resize(frame: &BgrFrame, input_w: u32, input_h: u32) -> Result<Preprocessed> {
    let (iw, ih) = (input_w as usize, input_h as usize);
    let plane = iw * ih;
    let mut tensor = vec![0.0f32; plane * 3];

    let ratio_x = frame.width as f32 / input_w as f32;
    let ratio_y = frame.height as f32 / input_h as f32;
    for y in 0..ih {
        for x in 0..iw {
            let (b, g, r) = sample_bilinear(
                frame,
                (x as f32 + 0.5) * ratio_x - 0.5,
                (y as f32 + 0.5) * ratio_y - 0.5,
            );
            let at = y * iw + x;
            tensor[at] = r / 255.0;
            tensor[plane + at] = g / 255.0;
            tensor[2 * plane + at] = b / 255.0;
        }
    }

    Ok(Preprocessed {
        tensor,
        geometry: Geometry::IDENTITY,
    })
}

/// Bilinear sample of the BGR frame at fractional coordinates; edges are
/// clamped.
fn sample_bilinear(frame: &BgrFrame, fx: f32, fy: f32) -> (f32, f32, f32) {
    let max_x = (frame.width - 1) as f32;
    let max_y = (frame.height - 1) as f32;
    let fx = fx.clamp(0.0, max_x);
    let fy = fy.clamp(0.0, max_y);

    let x0 = fx.floor() as usize;
    let y0 = fy.floor() as usize;
    let x1 = (x0 + 1).min(frame.width as usize - 1);
    let y1 = (y0 + 1).min(frame.height as usize - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let w = frame.width as usize;
    let px = |x: usize, y: usize, c: usize| frame.data[(y * w + x) * 3 + c] as f32;
    let lerp2 = |c: usize| {
        let top = px(x0, y0, c) * (1.0 - tx) + px(x1, y0, c) * tx;
        let bottom = px(x0, y1, c) * (1.0 - tx) + px(x1, y1, c) * tx;
        top * (1.0 - ty) + bottom * ty
    };

    (lerp2(0), lerp2(1), lerp2(2))
}
