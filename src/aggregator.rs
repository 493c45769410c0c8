//! タイルごとの検出結果を1枚の画像分にまとめるモジュール

use log::warn;

use crate::detection_result::{DetectionData, RawDetection};
use crate::error::{MalformedDetection, TileFailure};

/// 1つのワーカが集めた結果
///
/// 重複除去はせず，追加するだけです。
#[derive(Debug, Default)]
pub struct DetectionAggregator {
    image_size: (u32, u32),
    /// (タイル番号, 検出結果)
    detections: Vec<(usize, DetectionData)>,
    malformed: Vec<MalformedDetection>,
    failures: Vec<(usize, TileFailure)>,
    tiles_done: usize,
}

impl DetectionAggregator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image_size: (width, height),
            ..Default::default()
        }
    }

    /// 1タイル分の検出結果を画像座標に移して追加します。
    ///
    /// # Args
    /// * `tile_idx` - タイルの番号 (行優先)
    /// * `origin` - タイル左上の座標
    /// * `raws` - タイル内の検出結果
    pub fn push_tile(&mut self, tile_idx: usize, origin: (u32, u32), raws: &[RawDetection]) {
        let (w, h) = self.image_size;
        for raw in raws {
            match DetectionData::new_from_raw(raw, origin) {
                Ok(d) => {
                    if let Some(d) = d.clip(w, h) {
                        self.detections.push((tile_idx, d));
                    }
                }
                Err(m) => {
                    warn!(
                        "dropped malformed detection from tile ({}, {}): w={}, h={}",
                        m.tile.0, m.tile.1, m.w, m.h
                    );
                    self.malformed.push(m);
                }
            }
        }
        self.tiles_done += 1;
    }

    /// 検出器が失敗したタイルを記録します。
    pub fn push_failure(&mut self, tile_idx: usize, failure: TileFailure) {
        self.failures.push((tile_idx, failure));
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// 他のワーカの結果を取り込みます。
    pub fn merge(&mut self, other: DetectionAggregator) {
        self.detections.extend(other.detections);
        self.malformed.extend(other.malformed);
        self.failures.extend(other.failures);
        self.tiles_done += other.tiles_done;
    }

    /// 集めた結果をタイル番号順に並べて取り出します。
    ///
    /// 同じタイル内では検出器が出した順番を保ちます。
    pub fn finish(mut self) -> Aggregated {
        self.detections.sort_by_key(|(idx, _)| *idx);
        self.failures.sort_by_key(|(idx, _)| *idx);
        Aggregated {
            detections: self.detections.into_iter().map(|(_, d)| d).collect(),
            malformed: self.malformed,
            failures: self.failures.into_iter().map(|(_, f)| f).collect(),
            tiles_done: self.tiles_done,
        }
    }
}

/// まとめ終わった結果
#[derive(Debug)]
pub struct Aggregated {
    pub detections: Vec<DetectionData>,
    pub malformed: Vec<MalformedDetection>,
    pub failures: Vec<TileFailure>,
    /// 検出器が成功したタイルの数
    pub tiles_done: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cx: f32, w: f32, confidence: f32) -> RawDetection {
        RawDetection {
            cx,
            cy: 50.,
            w,
            h: 10.,
            confidence,
            class: 0,
        }
    }

    #[test]
    fn empty_tile_adds_nothing() {
        let mut agg = DetectionAggregator::new(1000, 1000);
        agg.push_tile(0, (0, 0), &[raw(50., 10., 0.9)]);
        agg.push_tile(1, (300, 0), &[]);
        assert_eq!(agg.len(), 1);
        let done = agg.finish();
        assert_eq!(done.tiles_done, 2);
        assert_eq!(done.detections.len(), 1);
    }

    #[test]
    fn zero_width_is_recorded_not_kept() {
        let mut agg = DetectionAggregator::new(1000, 1000);
        agg.push_tile(3, (354, 0), &[raw(50., 0., 0.9), raw(60., 10., 0.8)]);
        let done = agg.finish();
        assert_eq!(done.detections.len(), 1);
        assert_eq!(done.malformed.len(), 1);
        assert_eq!(done.malformed[0].tile, (354, 0));
    }

    #[test]
    fn merge_orders_by_tile() {
        let mut a = DetectionAggregator::new(1000, 1000);
        let mut b = DetectionAggregator::new(1000, 1000);
        b.push_tile(2, (200, 0), &[raw(10., 4., 0.3)]);
        a.push_tile(0, (0, 0), &[raw(10., 4., 0.1), raw(20., 4., 0.2)]);
        b.push_failure(
            1,
            TileFailure {
                x: 100,
                y: 0,
                message: "fault".into(),
            },
        );
        a.merge(b);
        let done = a.finish();
        let confs: Vec<f32> = done.detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.1, 0.2, 0.3]);
        assert_eq!(done.failures.len(), 1);
        assert_eq!(done.tiles_done, 2);
    }
}
