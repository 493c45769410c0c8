//! タイルの切り出しと検出結果の描画に関する画像処理モジュール

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::detection_result::DetectionData;
use crate::detector::Tensor;
use crate::tile::Tile;

/// タイルを切り出し，検出器に入力するテンソルを作ります。
///
/// # Args
///
/// * `img` - 元画像
/// * `tile` - 切り出すタイル
/// * `size` - 検出器の入力サイズ
///
/// # Return
///
/// * `[1, 3, size, size]` の，0〜1に正規化したRGBテンソル
pub fn tile_tensor(img: &RgbImage, tile: &Tile, size: u32) -> Tensor {
    let crop = imageops::crop_imm(img, tile.x, tile.y, tile.width, tile.height).to_image();
    // 同じ画素からは必ず同じテンソルになるように最近傍で縮小する
    let resized = if crop.dimensions() == (size, size) {
        crop
    } else {
        imageops::resize(&crop, size, size, FilterType::Nearest)
    };

    let plane = (size * size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let base_addr = (x + y * size) as usize;
        data[base_addr] = f32::from(pixel[0]) / 255.;
        data[plane + base_addr] = f32::from(pixel[1]) / 255.;
        data[2 * plane + base_addr] = f32::from(pixel[2]) / 255.;
    }
    Tensor {
        shape: [1, 3, size as usize, size as usize],
        data,
    }
}

const COLORS: [[u8; 3]; 10] = [
    [255, 0, 0],
    [255, 255, 0],
    [0, 0, 255],
    [14, 23, 50],
    [28, 105, 80],
    [190, 159, 53],
    [46, 194, 148],
    [242, 30, 131],
    [97, 101, 198],
    [115, 11, 87],
];

/// 画像上に水平または垂直の線を描画します。
fn draw_line(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    thickness: f32,
    color: Rgb<u8>,
) {
    let (bx, by) = (x1 - (thickness / 2.).floor(), y1 - (thickness / 2.).floor());

    let (w, h) = if x1 == x2 {
        (thickness, (y2 - y1).abs() + thickness)
    } else {
        ((x2 - x1).abs() + thickness, thickness)
    };

    let rect = Rect::at(bx as i32, by as i32).of_size(w as u32, h as u32);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形を描画します。
fn draw_rect(img: &mut RgbImage, d: &DetectionData, thickness: f32, color: Rgb<u8>) {
    let x1 = d.x1.round();
    let y1 = d.y1.round();
    let x2 = d.x2.round();
    let y2 = d.y2.round();

    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// ラベルの描画に使う設定
///
/// フォントはクレートに同梱していないので呼び出し元が読み込んで渡します。
pub struct LabelStyle<'a> {
    pub font: &'a Font<'a>,
    pub font_size: f32,
    /// クラスIDに対応する名前
    pub class_names: &'a [String],
}

/// ラベルに表示するテキスト (`クラス名 コンフィデンス`)
pub fn label_text(d: &DetectionData, class_names: &[String]) -> String {
    let name = class_names
        .get(d.class as usize)
        .map(String::as_str)
        .unwrap_or("Unknown");
    format!("{} {:.2}", name, d.confidence)
}

/// ラベルの上端のy。ボックスの上に入らない場合はボックスの内側に置く
fn label_top(y1: f32, label_h: f32) -> f32 {
    if y1 >= label_h {
        y1 - label_h
    } else {
        y1.max(0.)
    }
}

/// 画像上にラベルを描画します。
///
/// # Args
///
/// * `img` - ラベルを描画する画像 (in-place)
/// * `x1`, `y1` - ボックスの左上の座標
/// * `line_thickness` - ボックスの線の太さ
/// * `bg_color` - ラベルの背景色
/// * `style` - フォントとクラス名
/// * `text` - ラベルに表示するテキスト
fn draw_label(
    img: &mut RgbImage,
    x1: f32,
    y1: f32,
    line_thickness: f32,
    bg_color: Rgb<u8>,
    style: &LabelStyle,
    text: &str,
) {
    let label_h = style.font_size;
    let dx1 = x1 - (line_thickness / 2.).floor();
    let label_y = label_top(y1, label_h);

    let pad = 6.;
    let scale = Scale::uniform(label_h);
    let (text_w, _) = text_size(scale, style.font, text);
    let v_metrics = style.font.v_metrics(scale);
    let text_h = v_metrics.ascent - v_metrics.descent + v_metrics.line_gap;

    let rect = Rect::at(dx1 as i32, label_y as i32)
        .of_size((text_w as f32 + pad * 2.) as u32, label_h.max(1.) as u32);
    draw_filled_rect_mut(img, rect, bg_color);

    let text_y = label_y + (label_h - text_h) / 2.;
    let text_color = if (bg_color[0] as i32 + bg_color[1] as i32 + bg_color[2] as i32) < 382 {
        Rgb([255u8, 255, 255])
    } else {
        Rgb([0u8, 0, 0])
    };
    draw_text_mut(
        img,
        text_color,
        (dx1 + pad) as i32,
        text_y as i32,
        scale,
        style.font,
        text,
    );
}

/// 画像上にバウンディングボックスを描画します。
///
/// コンフィデンスの高いボックスが上に来るように，低い順に描きます。
/// `label` を渡すと各ボックスの左上に `クラス名 コンフィデンス` を描きます。
///
/// # Args
///
/// * `img` - 描画先の画像 (in-place)
/// * `d_result` - 検出結果
/// * `line_thickness` - 線の太さ
/// * `label` - ラベルのフォントとクラス名
pub fn draw_bbox(
    img: &mut RgbImage,
    d_result: &[DetectionData],
    line_thickness: f32,
    label: Option<&LabelStyle>,
) {
    let thickness = line_thickness.max(1.);
    let mut sorted = d_result.to_vec();
    sorted.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    for d in sorted.iter() {
        let color = Rgb(COLORS[d.class as usize % COLORS.len()]);
        draw_rect(img, d, thickness, color);
        if let Some(style) = label {
            let text = label_text(d, style.class_names);
            draw_label(img, d.x1.round(), d.y1.round(), thickness, color, style, &text);
        }
    }
}
