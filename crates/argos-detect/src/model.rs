//! Model identification from graph metadata.
//!
//! Runs once at init: the input/output tensor shapes decide the model
//! family, the expected input resolution, and (for in-graph-decoded
//! models) which input positions carry the image and the scale factor.
//! The decision tree is a pure function over [`TensorMeta`] so it can be
//! exercised without a session.

use crate::error::{DetectError, Result};
use crate::types::ModelFamily;

/// Name and dimensions of one graph tensor. Dynamic dimensions are
/// negative.
#[derive(Debug, Clone)]
pub struct TensorMeta {
    pub name: String,
    pub dims: Vec<i64>,
}

impl TensorMeta {
    pub fn new(name: impl Into<String>, dims: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            dims,
        }
    }
}

/// Everything identification derives from the graph.
#[derive(Debug, Clone)]
pub struct ModelSignature {
    pub family: ModelFamily,
    pub input_width: u32,
    pub input_height: u32,
    pub num_classes: usize,
    /// Input position of the image tensor
    pub image_input: usize,
    /// Input position of the scale-factor tensor (in-graph-decoded only)
    pub scale_input: usize,
}

/// Classify the graph. `fallback_w`/`fallback_h` apply when the graph
/// does not expose fixed spatial dims.
pub fn identify(
    inputs: &[TensorMeta],
    outputs: &[TensorMeta],
    fallback_w: u32,
    fallback_h: u32,
) -> Result<ModelSignature> {
    if inputs.is_empty() {
        return Err(DetectError::ModelLoad("graph has no inputs".into()));
    }

    // A scale-factor input marks an in-graph-decoded model outright.
    let has_scale_input = inputs.iter().any(|t| t.name.to_lowercase().contains("scale"));

    let family = if has_scale_input {
        ModelFamily::PpYoloE
    } else {
        classify_by_output(outputs)?
    };

    let (image_input, scale_input) = if family == ModelFamily::PpYoloE {
        locate_decoded_inputs(inputs)
    } else {
        (
            inputs.iter().position(|t| t.dims.len() == 4).unwrap_or(0),
            0,
        )
    };

    let (input_width, input_height) = inputs
        .get(image_input)
        .and_then(|t| spatial_dims(&t.dims))
        .unwrap_or((fallback_w, fallback_h));

    let num_classes = match family {
        ModelFamily::YoloX => {
            if input_width % 32 != 0 || input_height % 32 != 0 {
                return Err(DetectError::ModelLoad(format!(
                    "grid-decoded model input {input_width}x{input_height} is not a multiple of 32"
                )));
            }
            output_features(outputs).map(|f| f - 5).unwrap_or(80)
        }
        ModelFamily::YoloV8 => output_features(outputs).map(|f| f - 4).unwrap_or(80),
        ModelFamily::PpYoloE => 80,
    };

    Ok(ModelSignature {
        family,
        input_width,
        input_height,
        num_classes,
        image_input,
        scale_input,
    })
}

/// Fixed H/W from an NCHW shape, if the graph pins them.
fn spatial_dims(dims: &[i64]) -> Option<(u32, u32)> {
    if dims.len() == 4 && dims[2] > 0 && dims[3] > 0 {
        Some((dims[3] as u32, dims[2] as u32))
    } else {
        None
    }
}

/// The two non-batch dims of the first output.
fn output_axes(outputs: &[TensorMeta]) -> Result<(i64, i64)> {
    let first = outputs
        .first()
        .ok_or_else(|| DetectError::ModelLoad("graph has no outputs".into()))?;
    match first.dims.len() {
        3 => Ok((first.dims[1], first.dims[2])),
        2 => Ok((first.dims[0], first.dims[1])),
        n => Err(DetectError::ModelLoad(format!(
            "unsupported output rank {n} (shape {:?})",
            first.dims
        ))),
    }
}

fn classify_by_output(outputs: &[TensorMeta]) -> Result<ModelFamily> {
    let (d1, d2) = output_axes(outputs)?;

    if d1 == 6 || d2 == 6 {
        return Ok(ModelFamily::PpYoloE);
    }
    if d1 == 85 || d2 == 85 {
        return Ok(ModelFamily::YoloX);
    }
    if d1 == 84 || d2 == 84 {
        return Ok(ModelFamily::YoloV8);
    }

    let features = d1.min(d2);
    if features > 5 {
        Ok(ModelFamily::YoloX)
    } else if features >= 4 {
        Ok(ModelFamily::YoloV8)
    } else {
        Err(DetectError::ModelLoad(format!(
            "cannot classify model from output axes ({d1}, {d2})"
        )))
    }
}

/// Feature width (the smaller non-batch output dim) for raw-output
/// families.
fn output_features(outputs: &[TensorMeta]) -> Option<usize> {
    output_axes(outputs).ok().map(|(d1, d2)| d1.min(d2) as usize)
}

/// Input positions of the image and scale tensors for in-graph-decoded
/// models, by substring match. Models that name neither get the export
/// tool's usual order: scale first, image second.
fn locate_decoded_inputs(inputs: &[TensorMeta]) -> (usize, usize) {
    let image = inputs
        .iter()
        .position(|t| t.name.to_lowercase().contains("image"));
    let scale = inputs
        .iter()
        .position(|t| t.name.to_lowercase().contains("scale"));
    match (image, scale) {
        (Some(i), Some(s)) => (i, s),
        _ => (1, 0),
    }
}

/// Recover the dimension list from a tensor type's textual form.
///
/// The runtime's type metadata prints its shape as the first bracketed
/// list; reading it from the rendered form stays stable across runtime
/// versions. Symbolic dimensions parse as -1.
pub fn parse_dims_repr(repr: &str) -> Vec<i64> {
    let Some(start) = repr.find('[') else {
        return Vec::new();
    };
    let Some(end) = repr[start..].find(']') else {
        return Vec::new();
    };
    let body = &repr[start + 1..start + end];
    if body.trim().is_empty() {
        return Vec::new();
    }
    body.split(',')
        .map(|d| d.trim().parse::<i64>().unwrap_or(-1))
        .collect()
}

#[cfg(feature = "onnx")]
pub(crate) mod session_meta {
    //! Tensor metadata extraction from a live session.

    use super::{parse_dims_repr, TensorMeta};
    use ort::session::Session;

    pub fn inputs(session: &Session) -> Vec<TensorMeta> {
        session
            .inputs
            .iter()
            .map(|i| TensorMeta::new(i.name.clone(), parse_dims_repr(&format!("{:?}", i.input_type))))
            .collect()
    }

    pub fn outputs(session: &Session) -> Vec<TensorMeta> {
        session
            .outputs
            .iter()
            .map(|o| {
                TensorMeta::new(o.name.clone(), parse_dims_repr(&format!("{:?}", o.output_type)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn image_input(w: i64, h: i64) -> Vec<TensorMeta> {
        vec![TensorMeta::new("images", vec![1, 3, h, w])]
    }

    #[test]
    fn test_identify_yolov8_by_84() {
        let sig = identify(
            &image_input(640, 640),
            &[TensorMeta::new("output0", vec![1, 84, 8400])],
            640,
            640,
        )
        .unwrap();
        assert_eq!(sig.family, ModelFamily::YoloV8);
        assert_eq!(sig.num_classes, 80);
        assert_eq!((sig.input_width, sig.input_height), (640, 640));
    }

    #[test]
    fn test_identify_yolox_by_85() {
        let sig = identify(
            &image_input(640, 640),
            &[TensorMeta::new("output", vec![1, 8400, 85])],
            640,
            640,
        )
        .unwrap();
        assert_eq!(sig.family, ModelFamily::YoloX);
        assert_eq!(sig.num_classes, 80);
    }

    #[test]
    fn test_identify_custom_class_counts() {
        // 25 features: objectness present, 20 classes
        let sig = identify(
            &image_input(640, 640),
            &[TensorMeta::new("out", vec![1, 8400, 25])],
            640,
            640,
        )
        .unwrap();
        assert_eq!(sig.family, ModelFamily::YoloX);
        assert_eq!(sig.num_classes, 20);

        // 5 features: no objectness, single class
        let sig = identify(
            &image_input(640, 640),
            &[TensorMeta::new("out", vec![1, 5, 2100])],
            640,
            640,
        )
        .unwrap();
        assert_eq!(sig.family, ModelFamily::YoloV8);
        assert_eq!(sig.num_classes, 1);
    }

    #[test]
    fn test_identify_decoded_by_scale_input() {
        let inputs = vec![
            TensorMeta::new("scale_factor", vec![1, 2]),
            TensorMeta::new("image", vec![1, 3, 640, 640]),
        ];
        let outputs = vec![TensorMeta::new("multiclass_nms3_0.tmp_0", vec![-1, 6])];
        let sig = identify(&inputs, &outputs, 640, 640).unwrap();
        assert_eq!(sig.family, ModelFamily::PpYoloE);
        assert_eq!(sig.image_input, 1);
        assert_eq!(sig.scale_input, 0);
        assert_eq!((sig.input_width, sig.input_height), (640, 640));
    }

    #[test]
    fn test_identify_decoded_by_output_six() {
        let inputs = vec![
            TensorMeta::new("x", vec![1, 3, 640, 640]),
            TensorMeta::new("factor", vec![1, 2]),
        ];
        let outputs = vec![TensorMeta::new("dets", vec![1, 100, 6])];
        let sig = identify(&inputs, &outputs, 640, 640).unwrap();
        assert_eq!(sig.family, ModelFamily::PpYoloE);
        // Neither input name matches; export-tool order is assumed
        assert_eq!((sig.image_input, sig.scale_input), (1, 0));
    }

    #[test]
    fn test_input_dims_override_resolution() {
        let sig = identify(
            &image_input(416, 416),
            &[TensorMeta::new("out", vec![1, 84, 3549])],
            640,
            640,
        )
        .unwrap();
        assert_eq!((sig.input_width, sig.input_height), (416, 416));
    }

    #[test]
    fn test_dynamic_dims_use_fallback() {
        let sig = identify(
            &[TensorMeta::new("images", vec![1, 3, -1, -1])],
            &[TensorMeta::new("out", vec![1, 84, 8400])],
            640,
            640,
        )
        .unwrap();
        assert_eq!((sig.input_width, sig.input_height), (640, 640));
    }

    #[test]
    fn test_grid_family_rejects_unaligned_input() {
        let err = identify(
            &image_input(100, 100),
            &[TensorMeta::new("out", vec![1, 8400, 85])],
            640,
            640,
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiple of 32"));
    }

    #[test]
    fn test_unclassifiable_output() {
        let err = identify(
            &image_input(640, 640),
            &[TensorMeta::new("out", vec![1, 3, 2])],
            640,
            640,
        )
        .unwrap_err();
        assert_eq!(err.code(), "RUNTIME_ERROR");
    }

    #[test]
    fn test_parse_dims_repr_named_shape() {
        assert_eq!(
            parse_dims_repr("Tensor { ty: Float32, dimensions: [1, 3, 640, 640], dimension_symbols: [None, None, None, None] }"),
            vec![1, 3, 640, 640]
        );
    }

    #[test]
    fn test_parse_dims_repr_symbolic_dims() {
        assert_eq!(
            parse_dims_repr("Tensor { ty: Float32, shape: [batch, 3, 640, 640] }"),
            vec![-1, 3, 640, 640]
        );
        assert_eq!(parse_dims_repr("Tensor { shape: [-1, 6] }"), vec![-1, 6]);
    }

    #[test]
    fn test_parse_dims_repr_no_brackets() {
        assert_eq!(parse_dims_repr("Sequence(..)"), Vec::<i64>::new());
    }
}
