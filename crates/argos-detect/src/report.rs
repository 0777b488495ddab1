//! Wire records.
//!
//! The detection result and the failure record are serialized to JSON
//! here; the FFI layer only turns the string into a C allocation.
//! Precision is trimmed before serialization: confidences to four
//! decimals, coordinates to two.

use serde::Serialize;

use crate::error::DetectError;
use crate::types::DetectionResult;

#[derive(Debug, Serialize)]
struct DetectionRecord {
    class_id: u32,
    class_name: String,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

#[derive(Debug, Serialize)]
struct ResultRecord {
    detections: Vec<DetectionRecord>,
    count: usize,
    inference_time_ms: u64,
    image_width: u32,
    image_height: u32,
}

#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    error: String,
    code: &'a str,
}

fn round_to(value: f32, places: i32) -> f32 {
    let factor = 10f32.powi(places);
    (value * factor).round() / factor
}

/// Serialize a successful result. A zero-detection result is a success
/// with `count = 0` and no error field.
pub fn serialize_result(result: &DetectionResult) -> String {
    let record = ResultRecord {
        detections: result
            .detections
            .iter()
            .map(|d| DetectionRecord {
                class_id: d.class_id,
                class_name: d.class_name.clone(),
                confidence: round_to(d.confidence, 4),
                x1: round_to(d.bbox.x1, 2),
                y1: round_to(d.bbox.y1, 2),
                x2: round_to(d.bbox.x2, 2),
                y2: round_to(d.bbox.y2, 2),
            })
            .collect(),
        count: result.detections.len(),
        inference_time_ms: result.inference_time_ms,
        image_width: result.image_width,
        image_height: result.image_height,
    };
    serde_json::to_string(&record).unwrap_or_else(|e| fallback_error(&e.to_string()))
}

/// Serialize a failure record carrying the symbolic code.
pub fn serialize_error(err: &DetectError) -> String {
    let record = ErrorRecord {
        error: err.to_string(),
        code: err.code(),
    };
    serde_json::to_string(&record).unwrap_or_else(|e| fallback_error(&e.to_string()))
}

/// Last-resort record when serialization itself fails; built by hand so
/// it cannot fail again.
fn fallback_error(msg: &str) -> String {
    format!(
        "{{\"error\":\"{}\",\"code\":\"RUNTIME_ERROR\"}}",
        msg.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Detection};
    use serde_json::Value;

    fn sample_result() -> DetectionResult {
        DetectionResult {
            detections: vec![Detection {
                class_id: 2,
                class_name: "car".to_string(),
                confidence: 0.876_543,
                bbox: BoundingBox::new(10.333, 20.666, 110.999, 220.004),
            }],
            inference_time_ms: 42,
            image_width: 1280,
            image_height: 720,
        }
    }

    #[test]
    fn test_result_record_fields() {
        let json = serialize_result(&sample_result());
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["count"], 1);
        assert_eq!(v["inference_time_ms"], 42);
        assert_eq!(v["image_width"], 1280);
        assert_eq!(v["image_height"], 720);
        assert!(v.get("error").is_none());

        let d = &v["detections"][0];
        assert_eq!(d["class_id"], 2);
        assert_eq!(d["class_name"], "car");
    }

    #[test]
    fn test_precision_trimming() {
        let json = serialize_result(&sample_result());
        let v: Value = serde_json::from_str(&json).unwrap();
        let d = &v["detections"][0];
        assert!((d["confidence"].as_f64().unwrap() - 0.8765).abs() < 1e-6);
        assert!((d["x1"].as_f64().unwrap() - 10.33).abs() < 1e-4);
        assert!((d["y1"].as_f64().unwrap() - 20.67).abs() < 1e-4);
        assert!((d["y2"].as_f64().unwrap() - 220.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let json = serialize_result(&DetectionResult {
            detections: Vec::new(),
            inference_time_ms: 7,
            image_width: 640,
            image_height: 480,
        });
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["count"], 0);
        assert_eq!(v["detections"].as_array().unwrap().len(), 0);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_error_record() {
        let json = serialize_error(&DetectError::NotInitialized);
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["code"], "NOT_INITIALIZED");
        assert!(v["error"].as_str().unwrap().contains("not initialized"));
        assert!(v.get("detections").is_none());
    }

    #[test]
    fn test_fallback_error_escapes_quotes() {
        let json = fallback_error("broken \"quote\"");
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["code"], "RUNTIME_ERROR");
        assert!(v["error"].as_str().unwrap().contains("quote"));
    }
}
