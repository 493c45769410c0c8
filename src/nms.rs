//! 重なったバウンディングボックスを間引く Non-Maximum Suppression (NMS)

use std::collections::BTreeMap;

use crate::detection_result::DetectionData;

/// 面積0のボックス同士でも0除算にならないように分母に足す値
const IOU_EPS: f32 = 1e-6;

/// 2つのボックスの Intersection over Union を計算します。
pub fn iou(a: &DetectionData, b: &DetectionData) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.) * (y2 - y1).max(0.);
    inter / (a.area() + b.area() - inter + IOU_EPS)
}

/// クラスを区別せずに NMS をかけます。
///
/// コンフィデンスの降順に安定ソートし，残っている中で最大のものを採用して
/// それとの IoU が `nms_threshold` 以上のものを捨てる，を繰り返します。
/// コンフィデンスが同じものは入力の順番を保ちます。
///
/// # Args
/// * `bb` - 検出結果
/// * `nms_threshold` - IoU の閾値
///
/// # Return
/// * 残った検出結果 (コンフィデンスの降順)
pub fn nms(bb: &[DetectionData], nms_threshold: f32) -> Vec<DetectionData> {
    let mut pending = bb.to_vec();
    pending.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep = Vec::new();
    while !pending.is_empty() {
        let best = pending.remove(0);
        pending.retain(|d| iou(&best, d) < nms_threshold);
        keep.push(best);
    }
    keep
}

/// クラスごとに NMS をかけます。
///
/// 異なるクラスのボックスは互いに抑制しません。
pub fn nms_process(bb: &[DetectionData], nms_threshold: f32) -> Vec<DetectionData> {
    // クラス別に分割
    let mut cls: BTreeMap<u8, Vec<DetectionData>> = BTreeMap::new();
    for &detection in bb {
        cls.entry(detection.class).or_default().push(detection);
    }

    let mut new_box: Vec<DetectionData> = cls
        .into_values()
        .flat_map(|d| nms(&d, nms_threshold))
        .collect();
    new_box.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    new_box
}
