//! 検出器とのインターフェースと，1タイル分の推論を行うアダプタ

use anyhow::{ensure, Result};
use image::RgbImage;
use log::debug;

use crate::detection_result::RawDetection;
use crate::img_proc;
use crate::postprocess;
use crate::tile::Tile;

/// 検出器への入力 (NCHW, RGB, 0〜1 に正規化済み)
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

/// 検出器の生の出力
///
/// `[rows, cols]` の行優先配列。`rows = 4 + クラス数`, `cols` は候補数です。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl DetectorOutput {
    pub fn num_classes(&self) -> usize {
        self.rows.saturating_sub(4)
    }

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }
}

/// 固定サイズのテンソルを受け取ってボックスとクラススコアを返す検出器
///
/// 推論ランタイムやアクセラレータごとにこのトレイトを実装します。
pub trait Detector {
    /// 入力画像の一辺 (ピクセル)
    fn input_size(&self) -> u32;

    /// 推論を1回実行します。
    fn infer(&mut self, tensor: &Tensor) -> Result<DetectorOutput>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<DetectorOutput> {
        (**self).infer(tensor)
    }
}

impl<D: Detector + ?Sized> Detector for &mut D {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<DetectorOutput> {
        (**self).infer(tensor)
    }
}

/// 1タイルを検出器にかけて，タイル内座標の検出結果を返します。
///
/// タイルの画素とテンソルはこの関数を抜ける前に解放されます。
///
/// # Args
/// * `detector` - 検出器
/// * `img` - 元画像
/// * `tile` - 対象のタイル
/// * `obj_threshold` - コンフィデンスの閾値
pub fn detect_tile<D: Detector + ?Sized>(
    detector: &mut D,
    img: &RgbImage,
    tile: &Tile,
    obj_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let input_size = detector.input_size();
    ensure!(input_size > 0, "detector input size must be positive");

    let tensor = img_proc::tile_tensor(img, tile, input_size);
    let out = detector.infer(&tensor)?;
    drop(tensor);

    let scale = (
        tile.width as f32 / input_size as f32,
        tile.height as f32 / input_size as f32,
    );
    let objs = postprocess::post_process(&out, obj_threshold, scale)?;
    debug!(
        "tile ({}, {}): {} candidates, {} above threshold",
        tile.x,
        tile.y,
        out.cols,
        objs.len()
    );
    Ok(objs)
}
