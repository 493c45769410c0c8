//! 検出結果を JSON で書き出すための構造体

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::SliceConfig;
use crate::sliced::SlicedResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportParameters {
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    pub slice_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDetection {
    /// `[x1, y1, x2, y2]` (小数点以下切り捨て)
    pub bbox: [i32; 4],
    pub confidence: f64,
    pub class_id: u8,
    pub class_name: String,
}

/// 1枚の画像の検出結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceReport {
    pub image: String,
    pub latency_ms: f64,
    pub detection_count: usize,
    pub parameters: ReportParameters,
    pub detections: Vec<ReportDetection>,
}

fn round_to(v: f64, digits: i32) -> f64 {
    let p = 10f64.powi(digits);
    (v * p).round() / p
}

impl SliceReport {
    /// # Args
    /// * `image` - 画像の名前 (パスなど)
    /// * `result` - スライス推論の結果
    /// * `config` - 推論に使った設定
    pub fn new(image: &str, result: &SlicedResult, config: &SliceConfig) -> Self {
        let detections: Vec<ReportDetection> = result
            .detections
            .iter()
            .map(|d| ReportDetection {
                bbox: [d.x1 as i32, d.y1 as i32, d.x2 as i32, d.y2 as i32],
                confidence: round_to(d.confidence as f64, 4),
                class_id: d.class,
                class_name: config.class_name(d.class).to_string(),
            })
            .collect();

        Self {
            image: image.to_string(),
            latency_ms: round_to(result.latency.as_secs_f64() * 1000., 2),
            detection_count: detections.len(),
            parameters: ReportParameters {
                conf_threshold: config.confidence_threshold,
                nms_threshold: config.iou_threshold,
                slice_size: config.tile_size,
            },
            detections,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report")
    }
}
