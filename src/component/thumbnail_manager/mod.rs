//! 縮圖庫管理元件
//!
//! 列出輸出根目錄下的所有縮圖目錄，並清理來源影片已不存在或索引損毀的目錄。

mod main;

pub use main::{CatalogEntry, PruneSummary, ThumbnailManager, format_size};
