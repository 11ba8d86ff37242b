//! 取樣方式與優先順序
//!
//! 使用者可能同時給出多個互斥的取樣選項，這裡是唯一決定勝出者的地方：
//! 自訂濾鏡 > I-frame > 每 N 秒 > 每 N 幀 > 場景變換門檻，都沒有時使用 I-frame。

use serde::{Deserialize, Serialize};

/// 取樣方式與其參數
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SamplingMethod {
    #[default]
    #[serde(rename = "iframe")]
    IFrame,
    Scene {
        threshold: f64,
    },
    Skip {
        frames: u32,
    },
    Time {
        seconds: f64,
    },
    #[serde(rename = "customvf")]
    CustomVf {
        filter: String,
    },
}

impl SamplingMethod {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::IFrame => "iframe",
            Self::Scene { .. } => "scene",
            Self::Skip { .. } => "skip",
            Self::Time { .. } => "time",
            Self::CustomVf { .. } => "customvf",
        }
    }
}

/// 一次產生縮圖所使用的完整設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingRequest {
    pub method: SamplingMethod,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub width: u32,
    /// 燒入字幕所用的字幕串流序號（第 N 個字幕串流）
    pub subtitle_stream: Option<usize>,
}

impl SamplingRequest {
    #[must_use]
    pub fn new(method: SamplingMethod, width: u32) -> Self {
        Self {
            method,
            start: None,
            end: None,
            width,
            subtitle_stream: None,
        }
    }

    /// 起始時間；0 視同未指定
    #[must_use]
    pub fn start_offset(&self) -> f64 {
        self.start.filter(|s| *s > 0.0).unwrap_or(0.0)
    }
}

/// 使用者提供的取樣選項，可能同時出現多個
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodFlags {
    pub custom_filter: Option<String>,
    pub iframe: bool,
    pub per_seconds: Option<f64>,
    pub per_frame_count: Option<u32>,
    pub scene_threshold: Option<f64>,
}

impl MethodFlags {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.custom_filter.is_none()
            && !self.iframe
            && self.per_seconds.is_none()
            && self.per_frame_count.is_none()
            && self.scene_threshold.is_none()
    }
}

impl From<&SamplingMethod> for MethodFlags {
    fn from(method: &SamplingMethod) -> Self {
        let mut flags = Self::default();
        match method {
            SamplingMethod::IFrame => flags.iframe = true,
            SamplingMethod::Scene { threshold } => flags.scene_threshold = Some(*threshold),
            SamplingMethod::Skip { frames } => flags.per_frame_count = Some(*frames),
            SamplingMethod::Time { seconds } => flags.per_seconds = Some(*seconds),
            SamplingMethod::CustomVf { filter } => flags.custom_filter = Some(filter.clone()),
        }
        flags
    }
}

/// 依固定優先順序決定唯一的取樣方式；不會失敗
#[must_use]
pub fn resolve(flags: &MethodFlags) -> SamplingMethod {
    if let Some(filter) = &flags.custom_filter {
        return SamplingMethod::CustomVf {
            filter: filter.clone(),
        };
    }
    if flags.iframe {
        return SamplingMethod::IFrame;
    }
    if let Some(seconds) = flags.per_seconds {
        return SamplingMethod::Time { seconds };
    }
    if let Some(frames) = flags.per_frame_count {
        return SamplingMethod::Skip { frames };
    }
    if let Some(threshold) = flags.scene_threshold {
        return SamplingMethod::Scene { threshold };
    }
    SamplingMethod::IFrame
}
