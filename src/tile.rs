//! 画像をタイルに分割する位置を決めるモジュール

use crate::config::EdgePolicy;
use crate::error::SliceError;

/// 画像上のタイル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// 左上のx
    pub x: u32,
    /// 左上のy
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    /// 画像全体を1枚で覆うタイル
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn origin(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn is_in(&self, p: (u32, u32)) -> bool {
        p.0 >= self.x && p.1 >= self.y && p.0 < self.x + self.width && p.1 < self.y + self.height
    }
}

/// 1枚の画像に対するタイルの並び
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_size: u32,
    pub stride: u32,
    /// 行優先 (外側がy, 内側がx) のタイル
    pub tiles: Vec<Tile>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// どのタイルにも含まれない右端と下端の帯の幅 (right, bottom)
    pub fn uncovered_strip(&self) -> (u32, u32) {
        let right = self.tiles.iter().map(|t| t.x + t.width).max().unwrap_or(0);
        let bottom = self.tiles.iter().map(|t| t.y + t.height).max().unwrap_or(0);
        (
            self.image_width.saturating_sub(right),
            self.image_height.saturating_sub(bottom),
        )
    }
}

/// `tile_size * (1 - overlap)` を丸めたストライドを返します。
pub fn stride(tile_size: u32, overlap: f32) -> Result<u32, SliceError> {
    if !(0.0..1.0).contains(&overlap) {
        return Err(SliceError::config(format!(
            "overlap must be in [0, 1), got {}",
            overlap
        )));
    }
    let s = (tile_size as f64 * (1.0 - overlap as f64)).round();
    if s < 1.0 {
        return Err(SliceError::config(format!(
            "stride for tile_size {} and overlap {} is {}, must be at least 1",
            tile_size, overlap, s
        )));
    }
    Ok(s as u32)
}

/// 1軸分のタイル開始位置
fn axis_origins(dim: u32, tile_size: u32, stride: u32, edge_policy: EdgePolicy) -> Vec<u32> {
    let last = dim - tile_size;
    let mut origins: Vec<u32> = (0..=last).step_by(stride as usize).collect();
    if edge_policy == EdgePolicy::AnchorLast && origins.last() != Some(&last) {
        origins.push(last);
    }
    origins
}

/// 画像を覆うタイルの位置を計算します。
///
/// # Args
/// * `width`, `height` - 画像の大きさ
/// * `tile_size` - タイルの一辺
/// * `overlap` - 重なり率
/// * `edge_policy` - 割り切れない端の扱い
///
/// # Return
/// * 行優先に並んだタイル。タイルが画像に収まらない場合は `SliceError::Configuration`
pub fn plan_tiles(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: f32,
    edge_policy: EdgePolicy,
) -> Result<TilePlan, SliceError> {
    if tile_size == 0 {
        return Err(SliceError::config("tile_size must be positive"));
    }
    if tile_size > width || tile_size > height {
        return Err(SliceError::config(format!(
            "tile_size {} does not fit in a {}x{} image",
            tile_size, width, height
        )));
    }
    let stride = stride(tile_size, overlap)?;

    let xs = axis_origins(width, tile_size, stride, edge_policy);
    let ys = axis_origins(height, tile_size, stride, edge_policy);

    let tiles = ys
        .iter()
        .flat_map(|&y| {
            xs.iter().map(move |&x| Tile {
                x,
                y,
                width: tile_size,
                height: tile_size,
            })
        })
        .collect();

    Ok(TilePlan {
        image_width: width,
        image_height: height,
        tile_size,
        stride,
        tiles,
    })
}
