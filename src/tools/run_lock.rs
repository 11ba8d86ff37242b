//! 縮圖目錄的「產生中」標記
//!
//! 鎖檔以 `create_new` 建立，內容為持有者 pid 與一組隨機 token。
//! 持有者已不存在時視為殘留鎖；接手時先取得根目錄接手鎖的獨占檔案鎖，
//! 檢查與移除殘留鎖之間不會有其他接手者插入。

use super::path_resolver::ThumbDir;
use crate::error::GenerationError;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessesToUpdate, System};
use uuid::Uuid;

/// 內容無法解析的鎖檔在這段時間內仍視為寫入中
const UNREADABLE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
    recovered_stale: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Holder {
    Alive,
    Gone,
}

impl RunLock {
    pub fn acquire(thumb_dir: &ThumbDir) -> Result<Self, GenerationError> {
        let path = &thumb_dir.lock_path;
        let token = Uuid::new_v4().to_string();

        match create_lock(path, &token) {
            Ok(()) => return Ok(Self::held(path, token, false)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_error(path, &e)),
        }

        // 只有接手流程會刪除別人的鎖檔，整段在接手鎖內完成
        let takeover = lock_takeover(&thumb_dir.takeover_path)?;
        if inspect_holder(path) == Holder::Alive {
            return Err(busy(thumb_dir));
        }

        warn!("移除殘留的縮圖目錄鎖: {}", path.display());
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(path, &e)),
        }

        let result = match create_lock(path, &token) {
            Ok(()) => Ok(Self::held(path, token, true)),
            // 移除後已有其他工作直接建立新鎖
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(busy(thumb_dir)),
            Err(e) => Err(io_error(path, &e)),
        };
        drop(takeover);
        result
    }

    fn held(path: &Path, token: String, recovered_stale: bool) -> Self {
        debug!("取得縮圖目錄鎖: {}", path.display());
        Self {
            path: path.to_path_buf(),
            token,
            recovered_stale,
        }
    }

    /// 是否接手了前一次中斷留下的目錄
    #[must_use]
    pub const fn recovered_stale(&self) -> bool {
        self.recovered_stale
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // 只刪除自己建立的鎖
        let owned = fs::read_to_string(&self.path)
            .is_ok_and(|content| content.lines().nth(1) == Some(self.token.as_str()));
        if owned && let Err(e) = fs::remove_file(&self.path) {
            warn!("無法移除縮圖目錄鎖 {}: {e}", self.path.display());
        }
    }
}

fn create_lock(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = writeln!(file, "{}\n{token}", std::process::id()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// 接手鎖檔本身不刪除，關閉檔案即釋放
fn lock_takeover(path: &Path) -> Result<File, GenerationError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_error(path, &e))?;
    file.lock().map_err(|e| io_error(path, &e))?;
    Ok(file)
}

fn inspect_holder(path: &Path) -> Holder {
    let Ok(content) = fs::read_to_string(path) else {
        // 讀取當下已被釋放
        return Holder::Gone;
    };

    match content.lines().next().and_then(|l| l.trim().parse::<u32>().ok()) {
        Some(pid) if pid == std::process::id() => Holder::Alive,
        Some(pid) if process_alive(pid) => Holder::Alive,
        Some(_) => Holder::Gone,
        None => {
            let recent = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .is_some_and(|age| age < UNREADABLE_GRACE);
            if recent { Holder::Alive } else { Holder::Gone }
        }
    }
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

fn busy(thumb_dir: &ThumbDir) -> GenerationError {
    GenerationError::Busy {
        dir: thumb_dir.dir.clone(),
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> GenerationError {
    GenerationError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
