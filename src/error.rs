//! 錯誤分類
//!
//! 底層的 I/O 與解析錯誤不會原樣往外丟，而是先歸類成下列其中一種，
//! 並保留原始診斷文字供顯示。

use std::path::PathBuf;
use thiserror::Error;

/// 輸出位置無法使用
#[derive(Debug, Error)]
pub enum PathError {
    #[error("無法建立輸出目錄 {path}: {reason}")]
    Uncreatable { path: PathBuf, reason: String },

    #[error("輸出目錄不可寫入: {path}")]
    NotWritable { path: PathBuf },

    #[error("路徑不是資料夾: {path}")]
    NotADirectory { path: PathBuf },

    #[error("無法解析影片路徑 {path}: {reason}")]
    BadSource { path: PathBuf, reason: String },
}

/// 兩種探測方式都失敗，或回傳不合理的資料
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("無法讀取影片資訊 {path}: {diagnostic}")]
    Unreadable { path: PathBuf, diagnostic: String },

    #[error("影片資訊不完整 {path}: {missing}")]
    Incomplete { path: PathBuf, missing: String },
}

/// 取樣參數不合法，在啟動任何子程序之前回報
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("取樣參數不合法 ({method}): {reason}")]
    InvalidParam {
        method: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("ffmpeg 執行失敗 ({status})，未產生任何縮圖:\n{diagnostic}")]
    ToolFailed { status: String, diagnostic: String },

    #[error("縮圖產生已取消")]
    Cancelled,

    #[error("縮圖目錄正由其他工作使用中: {dir}")]
    Busy { dir: PathBuf },

    #[error("縮圖目錄操作失敗 {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// 索引檔損毀或無法讀寫；讀取時當作快取未命中，寫入時歸類為 `GenerationError::Io`
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("索引檔讀寫失敗 {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("索引檔格式錯誤 {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// 單一預覽請求可能回報給呼叫端的錯誤
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl PreviewError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Generation(GenerationError::Cancelled))
    }
}
