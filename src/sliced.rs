//! 画像をタイルに分けて検出し，結果を1つにまとめるモジュール

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use log::{info, warn};

use crate::aggregator::{Aggregated, DetectionAggregator};
use crate::config::{EdgePolicy, SliceConfig, TileErrorPolicy};
use crate::detection_result::DetectionData;
use crate::detector::{self, Detector};
use crate::error::{MalformedDetection, SliceError, TileFailure};
use crate::nms;
use crate::tile::{self, Tile, TilePlan};

/// 1枚の画像に対するスライス推論の結果
#[derive(Debug)]
pub struct SlicedResult {
    /// NMS 後の検出結果 (コンフィデンスの降順)
    pub detections: Vec<DetectionData>,
    /// タイル計画から NMS までの処理時間
    pub latency: Duration,
    pub tiles_total: usize,
    /// 検出器が成功したタイルの数
    pub tiles_processed: usize,
    /// 締め切りを過ぎたため処理しなかったタイルの数
    pub tiles_abandoned: usize,
    /// 検出器が失敗してスキップしたタイル
    pub failures: Vec<TileFailure>,
    /// 幅か高さが0以下で捨てた検出結果
    pub malformed: Vec<MalformedDetection>,
    /// どのタイルにも含まれない右端と下端の帯の幅
    pub uncovered_strip: (u32, u32),
}

impl SlicedResult {
    pub fn tiles_skipped(&self) -> usize {
        self.failures.len()
    }
}

/// ワーカ間で共有する状態
struct Shared {
    next: AtomicUsize,
    abort: AtomicBool,
    expired: AtomicBool,
    deadline: Option<Instant>,
}

/// 検出器を持ち，画像ごとにスライス推論を行う構造体
///
/// 検出器は1ワーカにつき1つです。同時に動くワーカの数は
/// `min(config.workers, 検出器の数)` になります。
pub struct SlicedDetector<D> {
    detectors: Vec<D>,
    config: SliceConfig,
}

impl<D: Detector> SlicedDetector<D> {
    /// 検出器1つで (逐次処理で) 初期化します。
    pub fn new(detector: D, config: SliceConfig) -> Result<Self, SliceError> {
        Self::with_detectors(vec![detector], config)
    }

    /// ワーカごとの検出器を渡して初期化します。
    pub fn with_detectors(detectors: Vec<D>, config: SliceConfig) -> Result<Self, SliceError> {
        config.validate()?;
        if detectors.is_empty() {
            return Err(SliceError::config("at least one detector is required"));
        }
        if let Some(d) = detectors.iter().find(|d| d.input_size() == 0) {
            return Err(SliceError::config(format!(
                "detector input size must be positive, got {}",
                d.input_size()
            )));
        }
        info!(
            "sliced detector on '{}': {} detector(s), tile {} overlap {}",
            config.device,
            detectors.len(),
            config.tile_size,
            config.overlap
        );
        Ok(Self { detectors, config })
    }

    pub fn config(&self) -> &SliceConfig {
        &self.config
    }

    /// 検出器を返して終了します。
    pub fn into_detectors(self) -> Vec<D> {
        self.detectors
    }

    /// 1つ目の検出器だけを使い，呼び出し元のスレッドでタイルを順に処理します。
    ///
    /// `workers` の設定は無視します。検出器が `Send` でなくても使えます。
    pub fn detect_sequential(&mut self, img: &RgbImage) -> Result<SlicedResult, SliceError> {
        let start = Instant::now();
        let (plan, shared) = self.prepare(img, start)?;
        let result = run_worker(&mut self.detectors[0], img, &plan, &self.config, &shared);
        self.finish(img, &plan, &shared, vec![result], start)
    }

    /// タイルに分けずに画像全体を1回だけ検出器にかけます。
    ///
    /// 画像は縦横別々に検出器の入力サイズへ縮小されます。比較用のベースラインです。
    pub fn detect_full(&mut self, img: &RgbImage) -> Result<SlicedResult, SliceError> {
        let start = Instant::now();
        let aggregated = self.full_image_detections(img)?;
        let detections = run_nms(&self.config, &aggregated.detections);
        let latency = start.elapsed();
        info!(
            "full image {}x{}: {} detections in {:.1}ms",
            img.width(),
            img.height(),
            detections.len(),
            latency.as_secs_f64() * 1000.
        );

        Ok(SlicedResult {
            detections,
            latency,
            tiles_total: 1,
            tiles_processed: aggregated.tiles_done,
            tiles_abandoned: 0,
            failures: vec![],
            malformed: aggregated.malformed,
            uncovered_strip: (0, 0),
        })
    }

    /// 画像全体を1枚のタイルとして推論し，NMS 前の検出結果を返します。
    fn full_image_detections(&mut self, img: &RgbImage) -> Result<Aggregated, SliceError> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(SliceError::config(format!(
                "image must not be empty, got {}x{}",
                w, h
            )));
        }
        let full = Tile::full(w, h);
        let threshold = self.config.confidence_threshold;
        let raws = detector::detect_tile(&mut self.detectors[0], img, &full, threshold)
            .map_err(|e| SliceError::DetectorInvocation {
                x: 0,
                y: 0,
                source: e,
            })?;
        let mut agg = DetectionAggregator::new(w, h);
        agg.push_tile(0, full.origin(), &raws);
        Ok(agg.finish())
    }

    /// タイル計画を立て，ワーカ間で共有する状態を作ります。
    fn prepare(&self, img: &RgbImage, start: Instant) -> Result<(TilePlan, Shared), SliceError> {
        let cfg = &self.config;
        let plan = tile::plan_tiles(
            img.width(),
            img.height(),
            cfg.tile_size,
            cfg.overlap,
            cfg.edge_policy,
        )?;
        let uncovered_strip = plan.uncovered_strip();
        info!(
            "{}x{} image: {} tiles, stride {}",
            img.width(),
            img.height(),
            plan.len(),
            plan.stride
        );
        if cfg.edge_policy == EdgePolicy::Truncate && uncovered_strip != (0, 0) {
            info!(
                "uncovered strip: {}px right, {}px bottom",
                uncovered_strip.0, uncovered_strip.1
            );
        }

        let shared = Shared {
            next: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            deadline: cfg.deadline_ms.map(|ms| start + Duration::from_millis(ms)),
        };
        Ok((plan, shared))
    }

    /// ワーカの結果をまとめて NMS をかけます。
    fn finish(
        &mut self,
        img: &RgbImage,
        plan: &TilePlan,
        shared: &Shared,
        results: Vec<Result<DetectionAggregator, SliceError>>,
        start: Instant,
    ) -> Result<SlicedResult, SliceError> {
        let mut agg = DetectionAggregator::new(img.width(), img.height());
        for r in results {
            agg.merge(r?);
        }
        let mut aggregated = agg.finish();

        let skipped = aggregated.failures.len();
        let tiles_abandoned = plan.len() - aggregated.tiles_done - skipped;
        if skipped > 0 {
            warn!("{} of {} tiles skipped due to detector errors", skipped, plan.len());
        }
        if shared.expired.load(Ordering::Relaxed) {
            warn!(
                "deadline of {}ms expired, {} tiles abandoned",
                self.config.deadline_ms.unwrap_or_default(),
                tiles_abandoned
            );
        }

        let past_deadline = shared.deadline.is_some_and(|d| Instant::now() >= d);
        if self.config.full_image_pass && past_deadline {
            warn!("deadline expired, skipping full image pass");
        } else if self.config.full_image_pass {
            // 画像全体の検出結果はどのタイルよりも後ろに並べる
            match self.full_image_detections(img) {
                Ok(full) => {
                    aggregated.detections.extend(full.detections);
                    aggregated.malformed.extend(full.malformed);
                }
                Err(e) if self.config.tile_error_policy == TileErrorPolicy::SkipTile => {
                    warn!("skipping full image pass: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        let n_aggregated = aggregated.detections.len();
        let detections = run_nms(&self.config, &aggregated.detections);
        let latency = start.elapsed();
        info!(
            "{} detections ({} before NMS) in {:.1}ms",
            detections.len(),
            n_aggregated,
            latency.as_secs_f64() * 1000.
        );

        Ok(SlicedResult {
            detections,
            latency,
            tiles_total: plan.len(),
            tiles_processed: aggregated.tiles_done,
            tiles_abandoned,
            failures: aggregated.failures,
            malformed: aggregated.malformed,
            uncovered_strip: plan.uncovered_strip(),
        })
    }
}

impl<D: Detector + Send> SlicedDetector<D> {
    /// 画像に対して物体検出を行います。
    ///
    /// ワーカが1つのときはスレッドを作らずに [`SlicedDetector::detect_sequential`] と同じ処理をします。
    ///
    /// # Args
    /// * `img` - 入力画像
    ///
    /// # Return
    /// * NMS 後の検出結果と処理の記録
    pub fn detect(&mut self, img: &RgbImage) -> Result<SlicedResult, SliceError> {
        let start = Instant::now();
        let (plan, shared) = self.prepare(img, start)?;
        let cfg = &self.config;

        let n_workers = cfg.workers.min(self.detectors.len()).min(plan.len()).max(1);
        let (first, rest) = self.detectors[..n_workers]
            .split_first_mut()
            .ok_or_else(|| SliceError::config("at least one detector is required"))?;

        let results: Vec<Result<DetectionAggregator, SliceError>> = thread::scope(|s| {
            let mut handles = Vec::new();
            for (i, det) in rest.iter_mut().enumerate() {
                let (plan, shared) = (&plan, &shared);
                let spawned = thread::Builder::new()
                    .name(format!("tile-worker-{}", i + 1))
                    .spawn_scoped(s, move || run_worker(det, img, plan, cfg, shared));
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        // 残りのタイルは呼び出し元のスレッドが処理する
                        warn!(
                            "failed to spawn tile worker, continuing with {} worker(s): {}",
                            handles.len() + 1,
                            e
                        );
                        break;
                    }
                }
            }

            let mut results = vec![run_worker(first, img, &plan, cfg, &shared)];
            for h in handles {
                match h.join() {
                    Ok(r) => results.push(r),
                    Err(p) => std::panic::resume_unwind(p),
                }
            }
            results
        });

        self.finish(img, &plan, &shared, results, start)
    }
}

fn run_nms(cfg: &SliceConfig, detections: &[DetectionData]) -> Vec<DetectionData> {
    if cfg.class_aware_nms {
        nms::nms_process(detections, cfg.iou_threshold)
    } else {
        nms::nms(detections, cfg.iou_threshold)
    }
}

/// 共有カウンタからタイルを取り出しては処理するワーカ
fn run_worker<D: Detector + ?Sized>(
    detector: &mut D,
    img: &RgbImage,
    plan: &TilePlan,
    cfg: &SliceConfig,
    shared: &Shared,
) -> Result<DetectionAggregator, SliceError> {
    let mut agg = DetectionAggregator::new(img.width(), img.height());
    loop {
        if shared.abort.load(Ordering::Relaxed) {
            break;
        }
        if let Some(deadline) = shared.deadline {
            if Instant::now() >= deadline {
                shared.expired.store(true, Ordering::Relaxed);
                break;
            }
        }
        let idx = shared.next.fetch_add(1, Ordering::Relaxed);
        let Some(t) = plan.tiles.get(idx) else {
            break;
        };

        match detector::detect_tile(detector, img, t, cfg.confidence_threshold) {
            Ok(raws) => agg.push_tile(idx, t.origin(), &raws),
            Err(e) => match cfg.tile_error_policy {
                TileErrorPolicy::FailImage => {
                    shared.abort.store(true, Ordering::Relaxed);
                    return Err(SliceError::DetectorInvocation {
                        x: t.x,
                        y: t.y,
                        source: e,
                    });
                }
                TileErrorPolicy::SkipTile => {
                    warn!("skipping tile ({}, {}): {:#}", t.x, t.y, e);
                    agg.push_failure(
                        idx,
                        TileFailure {
                            x: t.x,
                            y: t.y,
                            message: format!("{:#}", e),
                        },
                    );
                }
            },
        }
    }
    Ok(agg)
}

/// 1つの検出器で画像をスライス推論し，検出結果と処理時間を返します。
///
/// その他の設定はデフォルト値 (逐次処理, 端の帯は覆わない, クラスを区別しない NMS) です。
pub fn sliced_prediction<D: Detector + ?Sized>(
    detector: &mut D,
    img: &RgbImage,
    tile_size: u32,
    overlap: f32,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<(Vec<DetectionData>, Duration), SliceError> {
    let config = SliceConfig {
        tile_size,
        overlap,
        confidence_threshold,
        iou_threshold,
        ..Default::default()
    };
    let mut sd = SlicedDetector::new(detector, config)?;
    let result = sd.detect_sequential(img)?;
    Ok((result.detections, result.latency))
}
