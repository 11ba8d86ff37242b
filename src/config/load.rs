use crate::config::types::{SETTINGS_FILE_NAME, Settings};
use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::Path;

impl Settings {
    /// 讀取設定；未指定路徑時使用工作目錄下的設定檔，檔案不存在時使用預設值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(SETTINGS_FILE_NAME);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("無法讀取設定檔: {}", path.display()))?;

        let settings = serde_json::from_str(&content)
            .with_context(|| format!("無法解析設定檔: {}", path.display()))?;
        debug!("已載入設定檔: {}", path.display());
        Ok(settings)
    }
}
