use crate::component::thumbnail_preview::{IndexRecord, IndexStore, is_image_file_name, load_index};
use crate::tools::{PathResolver, RunLock, ThumbDir, format_timestamp};
use anyhow::{Context, Result, bail};
use console::style;
use log::{debug, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// 輸出根目錄下的一個縮圖目錄
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub dir_name: String,
    pub path: PathBuf,
    pub record: Option<IndexRecord>,
    /// 來源影片仍存在時為其路徑
    pub source: Option<PathBuf>,
    pub image_count: usize,
    pub total_size: u64,
    pub modified: u64,
}

impl CatalogEntry {
    /// 索引損毀或來源影片已不存在
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.record.is_none() || self.source.is_none()
    }
}

#[derive(Debug, Default)]
pub struct PruneSummary {
    pub removed: usize,
    pub failed: usize,
    pub freed_bytes: u64,
}

/// 縮圖庫管理：列出、刪除、清理失效目錄
pub struct ThumbnailManager {
    resolver: PathResolver,
}

impl ThumbnailManager {
    #[must_use]
    pub const fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// 依目錄名稱排序
    pub fn scan(&self) -> Result<Vec<CatalogEntry>> {
        let root = self.resolver.root();
        let mut entries = Vec::new();

        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("無法讀取縮圖庫: {}", root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            entries.push(Self::inspect(entry.path())?);
        }

        entries.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        debug!("縮圖庫共 {} 個目錄", entries.len());
        Ok(entries)
    }

    fn inspect(dir: &Path) -> Result<CatalogEntry> {
        let thumb_dir = ThumbDir::new(dir.to_path_buf());
        let record = match load_index(&thumb_dir.index_path) {
            Ok(record) => record,
            Err(e) => {
                debug!("{e}");
                None
            }
        };
        let source = record
            .as_ref()
            .map(|r| r.source_path.clone())
            .filter(|p| p.is_file());

        let mut image_count = 0;
        let mut total_size = 0;
        for entry in fs::read_dir(dir).with_context(|| format!("無法讀取目錄: {}", dir.display()))? {
            let Ok(entry) = entry else { continue };
            if entry.file_name().to_str().is_some_and(is_image_file_name) {
                image_count += 1;
                total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        let modified = record.as_ref().map_or_else(
            || {
                fs::metadata(dir)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs())
            },
            |r| r.generated_at,
        );

        Ok(CatalogEntry {
            dir_name: dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: dir.to_path_buf(),
            record,
            source,
            image_count,
            total_size,
            modified,
        })
    }

    /// 刪除一個縮圖目錄；只接受根目錄下的直接子目錄名稱
    pub fn remove(&self, dir_name: &str) -> Result<()> {
        let mut components = Path::new(dir_name).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        let dir = self.resolver.root().join(dir_name);
        if !single_normal || !self.resolver.owns(&dir) {
            bail!("拒絕刪除縮圖庫以外的目錄: {dir_name}");
        }
        if !dir.is_dir() {
            bail!("縮圖目錄不存在: {}", dir.display());
        }

        let thumb_dir = ThumbDir::new(dir.clone());
        let lock = RunLock::acquire(&thumb_dir)?;
        IndexStore::new(thumb_dir).clear()?;
        drop(lock);

        // 只移除空目錄，保留使用者自行放入的檔案
        fs::remove_dir(&dir).with_context(|| format!("無法移除目錄: {}", dir.display()))?;
        info!("已移除縮圖目錄: {}", dir.display());
        Ok(())
    }

    /// 移除所有失效的縮圖目錄
    pub fn prune(&self) -> Result<PruneSummary> {
        let mut summary = PruneSummary::default();
        for entry in self.scan()?.into_iter().filter(CatalogEntry::is_broken) {
            match self.remove(&entry.dir_name) {
                Ok(()) => {
                    summary.removed += 1;
                    summary.freed_bytes += entry.total_size;
                }
                Err(e) => {
                    warn!("無法移除 {}: {e:#}", entry.dir_name);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    pub fn print_listing(&self, entries: &[CatalogEntry], filter: Option<&str>) {
        let filter = filter.map(str::to_lowercase).filter(|f| !f.is_empty());
        println!(
            "{}",
            style(format!("縮圖庫: {}", self.resolver.root().display()))
                .cyan()
                .bold()
        );

        let mut total_size = 0;
        let mut broken = 0;
        for entry in entries {
            if let Some(filter) = &filter
                && !entry.dir_name.to_lowercase().contains(filter)
            {
                continue;
            }
            total_size += entry.total_size;

            let count = entry
                .record
                .as_ref()
                .map_or(entry.image_count, |r| r.entries.len());
            let line = format!(
                "{:>6}  {:>10}  {}  {}",
                count,
                format_size(entry.total_size),
                format_timestamp(entry.modified),
                entry.dir_name
            );
            if entry.is_broken() {
                broken += 1;
                println!("{} {}", style("✗").red(), style(line).red().italic());
            } else {
                println!("{} {line}", style("✓").green());
            }
        }

        println!(
            "{}",
            style(format!("合計約 {}，失效 {broken} 個", format_size(total_size))).dim()
        );
    }
}

/// 以 1024 為單位的容量字串
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
