use super::filter_builder::{build_filter, build_trim_args};
use super::index_store::{IndexRecord, IndexStore, ReuseMode, Thumbnail};
use super::sampling_policy::SamplingRequest;
use super::thumbnail_generator::ThumbnailGenerator;
use crate::config::Settings;
use crate::error::{GenerationError, IndexError, PathError, PreviewError};
use crate::signal::Cancellation;
use crate::tools::{MediaProbe, PathResolver, RunLock, ThumbDir, VideoInfo, absolute_path};
use log::{info, warn};
use rayon::prelude::*;
use std::path::PathBuf;

/// 單一影片的預覽請求
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub video_path: PathBuf,
    pub sampling: SamplingRequest,
    /// 忽略既有索引，一律重新產生
    pub force: bool,
    pub reuse: ReuseMode,
}

impl PreviewRequest {
    #[must_use]
    pub fn new(video_path: impl Into<PathBuf>, sampling: SamplingRequest) -> Self {
        Self {
            video_path: video_path.into(),
            sampling,
            force: false,
            reuse: ReuseMode::Exact,
        }
    }
}

/// 預覽結果：依播放順序排列的縮圖
#[derive(Debug, Clone)]
pub struct Preview {
    pub video: VideoInfo,
    pub thumb_dir: ThumbDir,
    pub thumbnails: Vec<Thumbnail>,
    pub record: IndexRecord,
    /// 是否直接沿用既有縮圖
    pub reused: bool,
}

impl Preview {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.record.is_complete()
    }
}

/// 縮圖預覽服務
///
/// 流程：
/// 1. 解析縮圖目錄
/// 2. 探測影片（比對快取需要長度）
/// 3. 索引可沿用時直接回傳
/// 4. 否則取得目錄鎖、清除舊縮圖、執行 ffmpeg、寫入新索引
#[derive(Debug, Clone)]
pub struct PreviewService {
    resolver: PathResolver,
    probe: MediaProbe,
    generator: ThumbnailGenerator,
}

impl PreviewService {
    #[must_use]
    pub const fn new(
        resolver: PathResolver,
        probe: MediaProbe,
        generator: ThumbnailGenerator,
    ) -> Self {
        Self {
            resolver,
            probe,
            generator,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PathError> {
        let resolver = PathResolver::new(settings.outdir.as_deref())?;
        Ok(Self::new(
            resolver,
            MediaProbe::new(&settings.ffprobe, &settings.ffmpeg),
            ThumbnailGenerator::new(&settings.ffmpeg),
        ))
    }

    #[must_use]
    pub const fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn preview<F>(
        &self,
        request: &PreviewRequest,
        cancel: &Cancellation,
        on_progress: F,
    ) -> Result<Preview, PreviewError>
    where
        F: FnMut(f64, f64),
    {
        let thumb_dir = self.resolver.resolve(&request.video_path)?;
        let source = absolute_path(&request.video_path)?;
        let video = self.probe.probe(&source)?;
        let sampling = normalize_subtitle(&request.sampling, &video);
        let store = IndexStore::new(thumb_dir.clone());

        if !request.force
            && let Some(existing) = store.load_valid()
            && store.is_reusable_with(&existing, &video, &sampling, request.reuse)
        {
            info!("沿用既有縮圖: {}", thumb_dir.dir.display());
            return Ok(Preview {
                thumbnails: existing.thumbnails(&thumb_dir.dir),
                video,
                thumb_dir,
                record: existing,
                reused: true,
            });
        }

        // 參數錯誤時保留舊快取
        build_trim_args(&sampling)?;
        build_filter(&sampling, video.frame_rate, &video.path)?;

        thumb_dir.ensure_exists()?;
        let lock = RunLock::acquire(&thumb_dir)?;
        if lock.recovered_stale() {
            warn!("接手中斷過的縮圖目錄: {}", thumb_dir.dir.display());
        }

        store.clear().map_err(index_failure)?;
        let record = self
            .generator
            .generate(&video, &sampling, &thumb_dir, cancel, on_progress)?;
        if let Err(e) = store.save(&record) {
            // 沒有索引的縮圖不能留下
            if let Err(cleanup) = store.clear() {
                warn!("無法清除未寫入索引的縮圖: {cleanup}");
            }
            return Err(index_failure(e).into());
        }
        drop(lock);

        Ok(Preview {
            thumbnails: record.thumbnails(&thumb_dir.dir),
            video,
            thumb_dir,
            record,
            reused: false,
        })
    }

    /// 以 `jobs` 個執行緒平行處理多個請求，結果順序與輸入相同；
    /// 進度回呼的第一個參數是請求在 `requests` 中的位置
    pub fn preview_batch<F>(
        &self,
        requests: &[PreviewRequest],
        jobs: usize,
        cancel: &Cancellation,
        on_progress: F,
    ) -> Vec<Result<Preview, PreviewError>>
    where
        F: Fn(usize, f64, f64) + Sync,
    {
        let run = || {
            requests
                .par_iter()
                .enumerate()
                .map(|(position, request)| {
                    self.preview(request, cancel, |current, total| {
                        on_progress(position, current, total);
                    })
                })
                .collect::<Vec<_>>()
        };

        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("無法建立執行緒池，改用預設設定: {e}");
                run()
            }
        }
    }
}

/// 產生流程中的索引讀寫失敗歸類為目錄操作失敗
fn index_failure(error: IndexError) -> GenerationError {
    match error {
        IndexError::Io { path, reason } | IndexError::Malformed { path, reason } => {
            GenerationError::Io { path, reason }
        }
    }
}

/// 影片沒有該字幕串流時不燒字幕
fn normalize_subtitle(request: &SamplingRequest, video: &VideoInfo) -> SamplingRequest {
    let mut request = request.clone();
    if let Some(stream) = request.subtitle_stream
        && stream >= video.subtitle_streams.len()
    {
        warn!(
            "影片只有 {} 個字幕串流，忽略字幕 #{stream}: {}",
            video.subtitle_streams.len(),
            video.path.display()
        );
        request.subtitle_stream = None;
    }
    request
}
