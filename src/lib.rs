//! # スライス推論による小物体検出ライブラリ
//!
//! 高解像度の画像を重なりのあるタイルに分割してタイルごとに検出器をかけ，
//! 結果を画像全体の座標に戻して NMS で重複を除くクレートです。
//! ボルトやワッシャーのように，検出器の入力解像度に縮小すると消えてしまう小さな物体を対象にしています。
//!
//! ## 主な機能
//!
//! 1. **タイル分割**: 画像の大きさ，タイルサイズ，重なり率からタイルの位置を決めます。
//! 2. **タイルごとの推論**: [`detector::Detector`] を実装した任意の検出器でタイルを推論します。
//! 3. **座標変換**: タイル内の中心形式のボックスを画像全体の角形式に変換します。
//! 4. **NMS**: タイルの境界で重複した検出結果を IoU で間引きます。
//! 5. **評価**: 検出結果を正解データと照合して適合率と再現率を求めます。
//!
//! タイルは1つずつ処理するので，画像全体のテンソルを一度にメモリに置くことはありません。
//!
//! ## Example
//! ```ignore
//! let config = SliceConfig::from_json_file("slice.json")?;
//! let mut sd = SlicedDetector::new(my_detector, config)?;
//! let result = sd.detect(&image::open("sample1.jpg")?.to_rgb8())?;
//! ```

pub mod aggregator;
pub mod config;
pub mod detection_result;
pub mod detector;
pub mod error;
pub mod img_proc;
pub mod metrics;
pub mod nms;
pub mod postprocess;
pub mod report;
pub mod sliced;
pub mod tile;

pub use config::{EdgePolicy, SliceConfig, TileErrorPolicy};
pub use detection_result::{DetectionData, RawDetection};
pub use detector::{Detector, DetectorOutput, Tensor};
pub use error::SliceError;
pub use metrics::{evaluate, GroundTruth, Metrics};
pub use sliced::{sliced_prediction, SlicedDetector, SlicedResult};
