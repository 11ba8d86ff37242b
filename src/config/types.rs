use crate::component::thumbnail_preview::{MethodFlags, SamplingMethod};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// 設定檔名稱，位於目前工作目錄
pub const SETTINGS_FILE_NAME: &str = "ffpreview.json";

/// 未指定取樣選項時使用的方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultMethod {
    #[default]
    IFrame,
    Scene,
    Skip,
    Time,
    CustomVf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// 縮圖輸出根目錄，未設定時使用系統暫存目錄
    pub outdir: Option<PathBuf>,
    pub thumb_width: u32,
    pub method: DefaultMethod,
    pub frame_skip: u32,
    pub time_skip: f64,
    pub scene_thresh: f64,
    pub customvf: String,
    /// 沿用既有縮圖時忽略寬度與取樣方式
    pub reuse: bool,
    /// 批次處理的平行數
    pub jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            outdir: None,
            thumb_width: 192,
            method: DefaultMethod::IFrame,
            frame_skip: 200,
            time_skip: 60.0,
            scene_thresh: 0.2,
            customvf: "scdet=s=1:t=12".to_string(),
            reuse: false,
            jobs: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl Settings {
    /// 命令列沒有指定取樣選項時，由設定檔決定
    #[must_use]
    pub fn default_flags(&self) -> MethodFlags {
        MethodFlags::from(&self.default_method())
    }

    #[must_use]
    pub fn default_method(&self) -> SamplingMethod {
        match self.method {
            DefaultMethod::IFrame => SamplingMethod::IFrame,
            DefaultMethod::Scene => SamplingMethod::Scene {
                threshold: self.scene_thresh,
            },
            DefaultMethod::Skip => SamplingMethod::Skip {
                frames: self.frame_skip,
            },
            DefaultMethod::Time => SamplingMethod::Time {
                seconds: self.time_skip,
            },
            DefaultMethod::CustomVf => SamplingMethod::CustomVf {
                filter: self.customvf.clone(),
            },
        }
    }
}
