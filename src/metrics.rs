//! 検出結果を正解データと照合して精度を求めるモジュール

use serde::{Deserialize, Serialize};

use crate::detection_result::DetectionData;
use crate::nms;

/// 正解のバウンディングボックス (角形式, 画像座標)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub class: u8,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl GroundTruth {
    fn as_detection(&self) -> DetectionData {
        DetectionData {
            class: self.class,
            x1: self.x1,
            y1: self.y1,
            x2: self.x2,
            y2: self.y2,
            confidence: 1.,
        }
    }
}

/// 照合の結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tp: usize,
    pub fp: usize,
    /// 見逃した正解の数
    pub fn_: usize,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.
    } else {
        num as f32 / den as f32
    }
}

/// 検出結果と正解を1対1で対応付け，適合率と再現率を求めます。
///
/// コンフィデンスの高い検出結果から順に，同じクラスでまだ対応していない正解のうち
/// IoU が最大のものを探し，それが `iou_threshold` 以上なら TP，そうでなければ FP とします。
/// 最後まで対応しなかった正解が FN です。
///
/// # Args
/// * `dets` - 検出結果
/// * `gt` - 正解
/// * `iou_threshold` - 一致とみなす IoU の下限
///
/// # Return
/// * TP, FP, FN と適合率, 再現率, F1 (分母が0のときは0)
pub fn evaluate(dets: &[DetectionData], gt: &[GroundTruth], iou_threshold: f32) -> Metrics {
    let mut order: Vec<&DetectionData> = dets.iter().collect();
    order.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let gt: Vec<DetectionData> = gt.iter().map(GroundTruth::as_detection).collect();
    let mut matched = vec![false; gt.len()];
    let mut tp = 0;
    for d in order {
        let best = gt
            .iter()
            .enumerate()
            .filter(|(i, g)| !matched[*i] && g.class == d.class)
            .map(|(i, g)| (i, nms::iou(d, g)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, v)) = best {
            if v >= iou_threshold {
                matched[i] = true;
                tp += 1;
            }
        }
    }

    let fp = dets.len() - tp;
    let fn_ = gt.len() - tp;
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0. {
        2. * precision * recall / (precision + recall)
    } else {
        0.
    };
    Metrics {
        tp,
        fp,
        fn_,
        precision,
        recall,
        f1,
    }
}
