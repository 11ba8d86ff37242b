use crate::error::PathError;
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 輸出根目錄的固定子目錄名稱
pub const THUMBS_DIR_SUFFIX: &str = "ffpreview_thumbs";

/// 每個縮圖目錄中的索引檔名
pub const INDEX_FILE_NAME: &str = "ffpreview.idx";

/// 產生中標記檔
pub const LOCK_FILE_NAME: &str = ".ffpreview.lock";

/// 接手殘留鎖時使用的根目錄鎖檔
pub const TAKEOVER_FILE_NAME: &str = ".ffpreview.takeover";

/// 目錄名稱中保留的檔名長度上限（字元數）
const MAX_BASENAME_CHARS: usize = 100;

/// 單一影片對應的縮圖目錄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbDir {
    pub dir: PathBuf,
    pub index_path: PathBuf,
    pub lock_path: PathBuf,
    /// 放在上層目錄，刪除縮圖目錄時不受影響
    pub takeover_path: PathBuf,
}

impl ThumbDir {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        let takeover_path = dir
            .parent()
            .map_or_else(|| dir.join(TAKEOVER_FILE_NAME), |p| p.join(TAKEOVER_FILE_NAME));
        Self {
            index_path: dir.join(INDEX_FILE_NAME),
            lock_path: dir.join(LOCK_FILE_NAME),
            takeover_path,
            dir,
        }
    }

    pub fn ensure_exists(&self) -> Result<(), PathError> {
        ensure_directory_exists(&self.dir)
    }
}

/// 由影片路徑與輸出根目錄推導縮圖目錄
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// 建立解析器；未指定根目錄時使用系統暫存目錄
    pub fn new(root: Option<&Path>) -> Result<Self, PathError> {
        let base = root.map_or_else(std::env::temp_dir, Path::to_path_buf);
        let root = if base.file_name().is_some_and(|n| n == THUMBS_DIR_SUFFIX) {
            base
        } else {
            base.join(THUMBS_DIR_SUFFIX)
        };

        ensure_directory_exists(&root)?;
        validate_writable(&root)?;
        debug!("縮圖輸出根目錄: {}", root.display());

        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/<清理後檔名>-<完整路徑雜湊>`，相同的 (檔案, 根目錄) 永遠得到相同結果
    pub fn resolve(&self, video_path: &Path) -> Result<ThumbDir, PathError> {
        let absolute = absolute_path(video_path)?;
        Ok(ThumbDir::new(self.root.join(thumb_dir_name(&absolute))))
    }

    /// 確認路徑是根目錄的直接子目錄（刪除前的保護）
    #[must_use]
    pub fn owns(&self, dir: &Path) -> bool {
        dir.parent() == Some(self.root.as_path())
    }
}

/// 取得影片的絕對路徑；檔案存在時使用正規化路徑
pub fn absolute_path(path: &Path) -> Result<PathBuf, PathError> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }
    std::path::absolute(path).map_err(|e| PathError::BadSource {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn thumb_dir_name(absolute: &Path) -> String {
    let basename = absolute
        .file_name()
        .map_or_else(|| "video".to_string(), |n| n.to_string_lossy().to_string());
    let digest = blake3::hash(absolute.as_os_str().as_encoded_bytes()).to_hex();
    format!("{}-{}", sanitize_basename(&basename), &digest[..8])
}

/// 將檔名中的路徑分隔符、控制字元與保留字元替換為底線
fn sanitize_basename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_BASENAME_CHARS)
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn ensure_directory_exists(path: &Path) -> Result<(), PathError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| PathError::Uncreatable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    if !path.is_dir() {
        return Err(PathError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// 實際建立並刪除一個檔案，權限位元無法反映擁有者與 ACL
fn validate_writable(path: &Path) -> Result<(), PathError> {
    let check = path.join(format!(".ffpreview-write-{}", Uuid::new_v4()));
    let created = OpenOptions::new().write(true).create_new(true).open(&check);
    if let Err(e) = created {
        debug!("輸出目錄寫入測試失敗 {}: {e}", path.display());
        return Err(PathError::NotWritable {
            path: path.to_path_buf(),
        });
    }
    if let Err(e) = fs::remove_file(&check) {
        warn!("無法移除寫入測試檔 {}: {e}", check.display());
    }
    Ok(())
}
