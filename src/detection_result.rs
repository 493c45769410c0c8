//! 物体検出の結果を処理するモジュール

use crate::error::MalformedDetection;

/// 検出器が1タイルについて出力した検出結果 (タイル内座標, 中心形式)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// 中心のx
    pub cx: f32,
    /// 中心のy
    pub cy: f32,
    /// 幅
    pub w: f32,
    /// 高さ
    pub h: f32,
    /// コンフィデンス
    pub confidence: f32,
    /// クラス
    pub class: u8,
}

/// 画像全体の座標系に変換した検出結果 (角形式)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionData {
    /// クラス
    pub class: u8,
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
    /// コンフィデンス
    pub confidence: f32,
}

impl DetectionData {
    /// タイル内の検出結果を画像全体の座標系に移します。
    ///
    /// # Args
    ///
    /// * `raw` - タイル内の検出結果
    /// * `origin` - タイル左上の座標
    ///
    /// # Return
    /// * 幅か高さが0以下の場合は `MalformedDetection`
    pub fn new_from_raw(
        raw: &RawDetection,
        origin: (u32, u32),
    ) -> Result<Self, MalformedDetection> {
        // NaN もここで弾く
        if !(raw.w > 0. && raw.h > 0.) {
            return Err(MalformedDetection {
                tile: origin,
                cx: raw.cx,
                cy: raw.cy,
                w: raw.w,
                h: raw.h,
            });
        }
        let x1 = (raw.cx - raw.w / 2.) + origin.0 as f32;
        let y1 = (raw.cy - raw.h / 2.) + origin.1 as f32;
        Ok(Self {
            class: raw.class,
            x1,
            y1,
            x2: x1 + raw.w,
            y2: y1 + raw.h,
            confidence: raw.confidence,
        })
    }

    /// 座標を `[0, width] x [0, height]` に切り詰めます。
    ///
    /// 座標は画素の境界を表す連続値で，`x2`, `y2` は含まない側の端です。
    /// そのため `x2 = width` は右端の画素 `width - 1` まで覆うボックスになり，
    /// ボックスの中身は常に画素 `[0, width) x [0, height)` に収まります。
    ///
    /// # Return
    /// * 切り詰めた結果面積が0になった (画像の完全に外側だった) 場合は `None`
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as f32, height as f32);
        let clipped = Self {
            x1: self.x1.clamp(0., w),
            y1: self.y1.clamp(0., h),
            x2: self.x2.clamp(0., w),
            y2: self.y2.clamp(0., h),
            ..*self
        };
        if clipped.is_degenerate() {
            None
        } else {
            Some(clipped)
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x1 < self.x2 && self.y1 < self.y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cx: f32, cy: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            cx,
            cy,
            w,
            h,
            confidence: 0.8,
            class: 1,
        }
    }

    #[test]
    fn remap_adds_tile_origin() {
        let d = DetectionData::new_from_raw(&raw(208., 208., 50., 50.), (354, 0)).unwrap();
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (537., 183., 587., 233.));
        assert_eq!(d.class, 1);
        assert_eq!(d.confidence, 0.8);
    }

    #[test]
    fn remap_at_origin_is_center_to_corner() {
        let d = DetectionData::new_from_raw(&raw(30., 40., 10., 20.), (0, 0)).unwrap();
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (25., 30., 35., 50.));
    }

    #[test]
    fn non_positive_size_is_malformed() {
        let m = DetectionData::new_from_raw(&raw(10., 10., 0., 5.), (708, 354)).unwrap_err();
        assert_eq!(m.tile, (708, 354));
        assert_eq!(m.w, 0.);
        assert!(DetectionData::new_from_raw(&raw(10., 10., 5., -1.), (0, 0)).is_err());
        assert!(DetectionData::new_from_raw(&raw(10., 10., f32::NAN, 5.), (0, 0)).is_err());
    }

    #[test]
    fn clip_clamps_to_image() {
        let d = DetectionData::new_from_raw(&raw(5., 1070., 20., 30.), (0, 0)).unwrap();
        let c = d.clip(1920, 1080).unwrap();
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (0., 1055., 15., 1080.));
    }

    #[test]
    fn clip_keeps_right_edge_exclusive() {
        let d = DetectionData {
            class: 0,
            x1: 1900.,
            y1: 1060.,
            x2: 1940.,
            y2: 1100.,
            confidence: 0.9,
        };
        let c = d.clip(1920, 1080).unwrap();
        assert_eq!((c.x2, c.y2), (1920., 1080.));
        // 最後に覆う画素は (1919, 1079)
        assert_eq!((c.x2 as u32 - 1, c.y2 as u32 - 1), (1919, 1079));
        assert_eq!(c.area(), 400.);
    }

    #[test]
    fn clip_drops_box_entirely_outside() {
        let d = DetectionData {
            class: 0,
            x1: 1930.,
            y1: 10.,
            x2: 1950.,
            y2: 30.,
            confidence: 0.9,
        };
        assert!(d.clip(1920, 1080).is_none());
    }
}
