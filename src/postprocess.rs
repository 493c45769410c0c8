//! 検出器の出力を検出結果に変換するモジュール

use anyhow::{ensure, Result};

use crate::detection_result::RawDetection;
use crate::detector::DetectorOutput;

/// ボックスの要素数 (cx, cy, w, h)
const BOX_ROWS: usize = 4;

/// `get_cls_id`関数は，候補 `idx` について最大のスコアを持つクラスとそのスコアを返します
///
/// # Args
/// * `out` - 検出器の出力
/// * `idx` - 候補のインデックス
///
/// # Return
/// * (クラスID, スコア)。スコアが同じ場合は小さいクラスIDが選ばれます
fn get_cls_id(out: &DetectorOutput, idx: usize) -> (u8, f32) {
    let mut best = (0u8, f32::NEG_INFINITY);
    for cls in 0..out.num_classes() {
        let score = out.at(BOX_ROWS + cls, idx);
        if score > best.1 {
            best = (cls as u8, score);
        }
    }
    best
}

/// `post_process`関数は，検出器の出力から検出結果を取り出します
///
/// 出力は `[4 + クラス数, 候補数]` の行優先配列で，0〜3行目が中心形式のボックス，
/// 4行目以降がクラスごとのスコアです。
///
/// # Args
/// * `out` - 検出器の出力
/// * `obj_threshold` - コンフィデンスの閾値 (これより大きいものだけ残す)
/// * `scale` - 検出器の入力座標からタイル座標への倍率 (x, y)
///
/// # Return
/// * タイル内座標の検出結果 (候補の順番のまま)
pub fn post_process(
    out: &DetectorOutput,
    obj_threshold: f32,
    scale: (f32, f32),
) -> Result<Vec<RawDetection>> {
    ensure!(
        out.rows > BOX_ROWS,
        "detector output needs at least {} rows, got {}",
        BOX_ROWS + 1,
        out.rows
    );
    ensure!(
        out.num_classes() <= u8::MAX as usize + 1,
        "too many classes: {}",
        out.num_classes()
    );
    ensure!(
        out.data.len() == out.rows * out.cols,
        "detector output has {} values, expected {}x{}",
        out.data.len(),
        out.rows,
        out.cols
    );

    let objs = (0..out.cols)
        .filter_map(|idx| {
            let (class, confidence) = get_cls_id(out, idx);
            if confidence > obj_threshold {
                Some(RawDetection {
                    cx: out.at(0, idx) * scale.0,
                    cy: out.at(1, idx) * scale.1,
                    w: out.at(2, idx) * scale.0,
                    h: out.at(3, idx) * scale.1,
                    confidence,
                    class,
                })
            } else {
                None
            }
        })
        .collect();
    Ok(objs)
}
