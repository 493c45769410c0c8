//! スライス推論のエラーと警告を定義するモジュール

use thiserror::Error;

/// スライス推論で呼び出し元に返されるエラー
#[derive(Debug, Error)]
pub enum SliceError {
    /// タイルの設定が不正 (ストライドが0以下, タイルが画像より大きい など)
    ///
    /// タイルの処理を始める前に返されます。
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 検出器があるタイルで失敗した
    #[error("detector failed on tile at ({x}, {y}): {source}")]
    DetectorInvocation {
        x: u32,
        y: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl SliceError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SliceError::Configuration(msg.into())
    }
}

/// スキップしたタイルの記録
#[derive(Debug, Clone, PartialEq)]
pub struct TileFailure {
    /// タイル左上のx
    pub x: u32,
    /// タイル左上のy
    pub y: u32,
    /// 失敗の原因
    pub message: String,
}

/// 幅または高さが0以下だったため捨てた検出結果の記録
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MalformedDetection {
    /// 検出元タイルの左上座標
    pub tile: (u32, u32),
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}
