//! スライス推論の設定

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SliceError;

/// 画像端でストライドが割り切れないときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// 最後のタイルの外側の帯はどのタイルにも含めない (従来の挙動)
    #[default]
    Truncate,
    /// 帯が残る場合は `dim - tile_size` に最後のタイルを追加して画像全体を覆う
    AnchorLast,
}

/// タイルで検出器が失敗したときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileErrorPolicy {
    /// 最初の失敗で画像全体をエラーにする
    FailImage,
    /// 失敗したタイルを記録して残りのタイルを続ける
    #[default]
    SkipTile,
}

/// スライス推論の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// タイルの一辺 (ピクセル)
    pub tile_size: u32,
    /// 隣り合うタイルの重なり率 `[0, 1)`
    pub overlap: f32,
    /// コンフィデンスの閾値
    pub confidence_threshold: f32,
    /// NMSのIoU閾値
    pub iou_threshold: f32,
    /// 実行デバイス (検出器バックエンドにそのまま渡す)
    pub device: String,
    pub edge_policy: EdgePolicy,
    pub tile_error_policy: TileErrorPolicy,
    /// 同時に推論するタイル数の上限
    pub workers: usize,
    /// 1画像あたりの締め切り (ms)。超えたら残りのタイルを捨ててNMSに進む
    pub deadline_ms: Option<u64>,
    /// クラスごとにNMSをかけるか
    pub class_aware_nms: bool,
    /// タイルの結果に画像全体を1回推論した結果も加えてからNMSをかけるか
    pub full_image_pass: bool,
    /// クラスIDに対応する名前
    pub class_names: Vec<String>,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            tile_size: 416,
            overlap: 0.15,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            device: "cpu".into(),
            edge_policy: EdgePolicy::Truncate,
            tile_error_policy: TileErrorPolicy::SkipTile,
            workers: 1,
            deadline_ms: None,
            class_aware_nms: false,
            full_image_pass: false,
            class_names: vec!["Bolt".into(), "Bottle".into(), "Washer".into()],
        }
    }
}

impl SliceConfig {
    /// JSON文字列から設定を読み込みます。書かれていない項目はデフォルト値になります。
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).context("failed to parse slice config")?;
        config.validate()?;
        Ok(config)
    }

    /// JSONファイルから設定を読み込みます。
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&s)
    }

    /// 値の範囲を検査します。
    ///
    /// タイルと画像の大きさの関係は画像ごとに [`crate::tile::plan_tiles`] が検査します。
    pub fn validate(&self) -> Result<(), SliceError> {
        if self.tile_size == 0 {
            return Err(SliceError::config("tile_size must be positive"));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(SliceError::config(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SliceError::config(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(SliceError::config(format!(
                "iou_threshold must be in [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if self.workers == 0 {
            return Err(SliceError::config("workers must be at least 1"));
        }
        Ok(())
    }

    /// クラスIDから名前を引きます。
    pub fn class_name(&self, class: u8) -> &str {
        self.class_names
            .get(class as usize)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"tile_size": 640, "overlap": 0.2, "edge_policy": "anchor_last"}"#;
        let c = SliceConfig::from_json_str(json).unwrap();
        assert_eq!(c.tile_size, 640);
        assert_eq!(c.edge_policy, EdgePolicy::AnchorLast);
        assert_eq!(c.iou_threshold, 0.45);
        assert_eq!(c.workers, 1);
        assert_eq!(c.tile_error_policy, TileErrorPolicy::SkipTile);
        assert!(!c.full_image_pass);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut c = SliceConfig::default();
        c.overlap = 1.0;
        assert!(matches!(c.validate(), Err(SliceError::Configuration(_))));

        let mut c = SliceConfig::default();
        c.workers = 0;
        assert!(c.validate().is_err());

        assert!(SliceConfig::from_json_str(r#"{"iou_threshold": 1.5}"#).is_err());
    }

    #[test]
    fn unknown_class_name() {
        let c = SliceConfig::default();
        assert_eq!(c.class_name(2), "Washer");
        assert_eq!(c.class_name(9), "Unknown");
    }
}
