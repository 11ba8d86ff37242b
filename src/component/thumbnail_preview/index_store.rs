//! 縮圖索引檔
//!
//! 每個縮圖目錄有一份 `ffpreview.idx`，以格式化 JSON 記錄來源影片、
//! 產生時的取樣設定，以及依播放順序排列的 (時間, 檔名) 清單。

use super::sampling_policy::SamplingRequest;
use crate::error::IndexError;
use crate::tools::{SourceFingerprint, ThumbDir, VideoInfo};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// 索引檔格式版本，不相符時視為需要重建
pub const INDEX_FORMAT: u32 = 2;

/// 影片長度比對容許誤差（秒）
pub const DURATION_EPSILON: f64 = 0.01;

/// 起訖時間比對容許誤差（秒）
const TRIM_EPSILON: f64 = 1e-6;

/// 縮圖檔名的數字位數，對應 ffmpeg 的 `%08d.png`
const IMAGE_DIGITS: usize = 8;

pub const IMAGE_PATTERN: &str = "%08d.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailEntry {
    pub index: usize,
    pub timestamp: f64,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    /// ffmpeg 非正常結束但已產生部分縮圖
    Partial { exit_code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub format: u32,
    pub version: String,
    pub source_path: PathBuf,
    pub source_duration: f64,
    pub frame_rate: f64,
    pub subtitle_streams: Vec<usize>,
    pub fingerprint: Option<SourceFingerprint>,
    pub request: SamplingRequest,
    pub status: RunStatus,
    pub generated_at: u64,
    pub entries: Vec<ThumbnailEntry>,
}

/// 交給顯示層的單張縮圖
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub index: usize,
    pub timestamp: f64,
    pub path: PathBuf,
}

impl IndexRecord {
    #[must_use]
    pub fn new(video: &VideoInfo, request: &SamplingRequest) -> Self {
        Self {
            format: INDEX_FORMAT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            source_path: video.path.clone(),
            source_duration: video.duration,
            frame_rate: video.frame_rate,
            subtitle_streams: video.subtitle_streams.clone(),
            fingerprint: video.fingerprint,
            request: request.clone(),
            status: RunStatus::Complete,
            generated_at: 0,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, RunStatus::Complete)
    }

    #[must_use]
    pub fn thumbnails(&self, dir: &Path) -> Vec<Thumbnail> {
        self.entries
            .iter()
            .map(|entry| Thumbnail {
                index: entry.index,
                timestamp: entry.timestamp,
                path: dir.join(&entry.file_name),
            })
            .collect()
    }
}

/// 快取比對模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReuseMode {
    /// 所有取樣設定都必須相同
    #[default]
    Exact,
    /// 只要來源、長度與起訖時間相符就沿用，忽略寬度、取樣方式與字幕
    KeepSettings,
}

/// ffmpeg 以 1 起算為輸出檔編號
#[must_use]
pub fn image_file_name(sequence: u64) -> String {
    format!("{sequence:0width$}.png", width = IMAGE_DIGITS)
}

#[must_use]
pub fn is_image_file_name(name: &str) -> bool {
    name.strip_suffix(".png")
        .is_some_and(|stem| stem.len() == IMAGE_DIGITS && stem.bytes().all(|b| b.is_ascii_digit()))
}

pub fn load_index(path: &Path) -> Result<Option<IndexRecord>, IndexError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, &e)),
    };

    let record: IndexRecord =
        serde_json::from_str(&content).map_err(|e| IndexError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if record.format != INDEX_FORMAT {
        return Err(IndexError::Malformed {
            path: path.to_path_buf(),
            reason: format!("不支援的索引格式版本 {}", record.format),
        });
    }

    validate_entries(&record).map_err(|reason| IndexError::Malformed {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(Some(record))
}

/// 先寫入暫存檔再改名，避免留下寫到一半的索引
pub fn save_index(record: &IndexRecord, path: &Path) -> Result<(), IndexError> {
    let content = serde_json::to_string_pretty(record).map_err(|e| io_error(path, &e))?;
    let tmp_path = temp_index_path(path);

    fs::write(&tmp_path, content).map_err(|e| io_error(&tmp_path, &e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_error(path, &e)
    })?;

    Ok(())
}

fn temp_index_path(path: &Path) -> PathBuf {
    path.with_extension("idx.tmp")
}

fn io_error(path: &Path, reason: &dyn std::fmt::Display) -> IndexError {
    IndexError::Io {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// 順序編號連續、時間不遞減、檔名不可跳出目錄
fn validate_entries(record: &IndexRecord) -> Result<(), String> {
    let mut previous = f64::NEG_INFINITY;
    for (position, entry) in record.entries.iter().enumerate() {
        if entry.index != position {
            return Err(format!("第 {position} 筆縮圖編號錯誤: {}", entry.index));
        }
        if !entry.timestamp.is_finite() || entry.timestamp < previous {
            return Err(format!("第 {position} 筆縮圖時間錯誤: {}", entry.timestamp));
        }
        let name = Path::new(&entry.file_name);
        if entry.file_name.is_empty() || name.components().count() != 1 || name.is_absolute() {
            return Err(format!("第 {position} 筆縮圖檔名錯誤: {}", entry.file_name));
        }
        previous = entry.timestamp;
    }
    Ok(())
}

/// 單一縮圖目錄的索引存取
#[derive(Debug, Clone)]
pub struct IndexStore {
    thumb_dir: ThumbDir,
}

impl IndexStore {
    #[must_use]
    pub const fn new(thumb_dir: ThumbDir) -> Self {
        Self { thumb_dir }
    }

    #[must_use]
    pub const fn thumb_dir(&self) -> &ThumbDir {
        &self.thumb_dir
    }

    pub fn load(&self) -> Result<Option<IndexRecord>, IndexError> {
        load_index(&self.thumb_dir.index_path)
    }

    /// 讀取索引；損毀的索引視同不存在
    #[must_use]
    pub fn load_valid(&self) -> Option<IndexRecord> {
        match self.load() {
            Ok(record) => record,
            Err(e) => {
                warn!("忽略無法使用的索引檔: {e}");
                None
            }
        }
    }

    pub fn save(&self, record: &IndexRecord) -> Result<(), IndexError> {
        save_index(record, &self.thumb_dir.index_path)
    }

    #[must_use]
    pub fn is_reusable(
        &self,
        existing: &IndexRecord,
        video: &VideoInfo,
        request: &SamplingRequest,
    ) -> bool {
        self.is_reusable_with(existing, video, request, ReuseMode::Exact)
    }

    #[must_use]
    pub fn is_reusable_with(
        &self,
        existing: &IndexRecord,
        video: &VideoInfo,
        request: &SamplingRequest,
        mode: ReuseMode,
    ) -> bool {
        match self.reuse_mismatch(existing, video, request, mode) {
            Some(reason) => {
                debug!("索引不可沿用 ({reason}): {}", self.thumb_dir.index_path.display());
                false
            }
            None => true,
        }
    }

    fn reuse_mismatch(
        &self,
        existing: &IndexRecord,
        video: &VideoInfo,
        request: &SamplingRequest,
        mode: ReuseMode,
    ) -> Option<&'static str> {
        if existing.source_path != video.path {
            return Some("來源路徑不同");
        }
        if (existing.source_duration - video.duration).abs() > DURATION_EPSILON {
            return Some("影片長度不同");
        }
        if let (Some(stored), Some(current)) = (existing.fingerprint, video.fingerprint)
            && stored != current
        {
            return Some("來源檔案已變更");
        }

        let stored = &existing.request;
        if (stored.start_offset() - request.start_offset()).abs() > TRIM_EPSILON {
            return Some("起始時間不同");
        }
        if !trim_end_eq(stored.end, request.end) {
            return Some("結束時間不同");
        }

        if mode == ReuseMode::Exact {
            if stored.width != request.width {
                return Some("縮圖寬度不同");
            }
            if stored.subtitle_stream != request.subtitle_stream {
                return Some("字幕串流不同");
            }
            if stored.method != request.method {
                return Some("取樣方式或參數不同");
            }
        }

        let missing = existing
            .entries
            .iter()
            .any(|entry| !self.thumb_dir.dir.join(&entry.file_name).is_file());
        if missing {
            return Some("縮圖檔案遺失");
        }

        None
    }

    /// 刪除索引與所有縮圖檔
    pub fn clear(&self) -> Result<(), IndexError> {
        let dir = &self.thumb_dir.dir;

        match fs::remove_file(&self.thumb_dir.index_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&self.thumb_dir.index_path, &e)),
        }

        // 中斷的寫入留下的暫存檔
        let tmp_path = temp_index_path(&self.thumb_dir.index_path);
        if tmp_path.is_file() {
            fs::remove_file(&tmp_path).map_err(|e| io_error(&tmp_path, &e))?;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(dir, &e)),
        };

        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name();
            if name.to_str().is_some_and(is_image_file_name) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| io_error(&path, &e))?;
            }
        }

        debug!("已清除縮圖目錄: {}", dir.display());
        Ok(())
    }
}

fn trim_end_eq(a: Option<f64>, b: Option<f64>) -> bool {
    let norm = |v: Option<f64>| v.filter(|e| *e > 0.0);
    match (norm(a), norm(b)) {
        (None, None) => true,
        (Some(x), Some(y)) => (x - y).abs() <= TRIM_EPSILON,
        _ => false,
    }
}
