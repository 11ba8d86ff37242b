use crate::error::ProbeError;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

/// 來源檔案的變更偵測資訊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub size: u64,
    pub modified: Option<u64>,
}

impl SourceFingerprint {
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        Some(Self {
            size: metadata.len(),
            modified,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub duration: f64,
    pub frame_rate: f64,
    /// 字幕串流的串流編號（依出現順序）
    pub subtitle_streams: Vec<usize>,
    pub frame_count: Option<u64>,
    pub fingerprint: Option<SourceFingerprint>,
}

/// 單一探測方式的失敗原因
#[derive(Debug)]
enum Attempt {
    Unreadable(String),
    Incomplete(String),
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FormatInfo>,
    streams: Option<Vec<StreamInfo>>,
}

#[derive(Deserialize)]
struct FormatInfo {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct StreamInfo {
    index: Option<usize>,
    codec_type: Option<String>,
    duration: Option<String>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("Invalid regex")
});

static FPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Stream #\d+:\d+.*?: Video:.*?(\d+(?:\.\d+)?)\s*fps").expect("Invalid regex")
});

static TBR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Stream #\d+:\d+.*?: Video:.*?(\d+(?:\.\d+)?k?)\s*tbr").expect("Invalid regex")
});

static SUBTITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Stream #\d+:(\d+)\S*: Subtitle:").expect("Invalid regex")
});

/// 影片探測器：先用 ffprobe，失敗時改用 ffmpeg 本身
#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffprobe: String,
    ffmpeg: String,
}

impl Default for MediaProbe {
    fn default() -> Self {
        Self::new("ffprobe", "ffmpeg")
    }
}

impl MediaProbe {
    #[must_use]
    pub fn new(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn probe(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let primary = match self.probe_with_ffprobe(path) {
            Ok(info) => return Ok(info),
            Err(attempt) => attempt,
        };
        warn!("ffprobe 探測失敗，改用 ffmpeg: {primary:?}");

        let fallback = match self.probe_with_ffmpeg(path) {
            Ok(info) => return Ok(info),
            Err(attempt) => attempt,
        };

        match (primary, fallback) {
            (Attempt::Incomplete(missing), _) | (_, Attempt::Incomplete(missing)) => {
                Err(ProbeError::Incomplete {
                    path: path.to_path_buf(),
                    missing,
                })
            }
            (Attempt::Unreadable(first), Attempt::Unreadable(second)) => {
                Err(ProbeError::Unreadable {
                    path: path.to_path_buf(),
                    diagnostic: format!("ffprobe: {first}\nffmpeg: {second}"),
                })
            }
        }
    }

    fn probe_with_ffprobe(&self, path: &Path) -> Result<VideoInfo, Attempt> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_streams", "-show_format", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Attempt::Unreadable(format!("無法執行 {}: {e}", self.ffprobe)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Attempt::Unreadable(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info = parse_ffprobe_json(path, &stdout)?;
        debug!(
            "ffprobe: {} duration={:.3}s fps={:.3} subs={:?}",
            path.display(),
            info.duration,
            info.frame_rate,
            info.subtitle_streams
        );
        Ok(info)
    }

    /// ffmpeg 沒有輸出檔時以非零狀態結束，所以只看 stderr 內容
    fn probe_with_ffmpeg(&self, path: &Path) -> Result<VideoInfo, Attempt> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-i"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Attempt::Unreadable(format!("無法執行 {}: {e}", self.ffmpeg)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let info = parse_ffmpeg_banner(path, &stderr)?;
        debug!(
            "ffmpeg: {} duration={:.3}s fps={:.3} subs={:?}",
            path.display(),
            info.duration,
            info.frame_rate,
            info.subtitle_streams
        );
        Ok(info)
    }
}

fn parse_ffprobe_json(path: &Path, stdout: &str) -> Result<VideoInfo, Attempt> {
    let probe: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| Attempt::Unreadable(format!("無法解析 ffprobe 輸出: {e}")))?;
    let streams = probe.streams.unwrap_or_default();

    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Attempt::Unreadable("找不到視訊串流".to_string()))?;

    let subtitle_streams = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .filter_map(|s| s.index)
        .collect();

    // 影片長度：優先取視訊串流，其次取 format
    let duration = video_stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| Attempt::Incomplete("duration".to_string()))?;

    let frame_count = video_stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0);

    let frame_rate = frame_count
        .map(|n| n as f64 / duration)
        .or_else(|| video_stream.avg_frame_rate.as_deref().and_then(parse_frame_rate))
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| Attempt::Incomplete("frame rate".to_string()))?;

    Ok(VideoInfo {
        path: path.to_path_buf(),
        duration,
        frame_rate,
        subtitle_streams,
        frame_count,
        fingerprint: SourceFingerprint::of(path),
    })
}

fn parse_ffmpeg_banner(path: &Path, stderr: &str) -> Result<VideoInfo, Attempt> {
    if !stderr.contains("Stream #") {
        let last_line = stderr.lines().last().unwrap_or_default().trim();
        return Err(Attempt::Unreadable(last_line.to_string()));
    }

    let duration = DURATION_RE
        .captures(stderr)
        .and_then(|caps| {
            let h: f64 = caps[1].parse().ok()?;
            let m: f64 = caps[2].parse().ok()?;
            let s: f64 = caps[3].parse().ok()?;
            Some(h * 3600.0 + m * 60.0 + s)
        })
        .filter(|d| *d > 0.0)
        .ok_or_else(|| Attempt::Incomplete("duration".to_string()))?;

    let frame_rate = FPS_RE
        .captures(stderr)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .or_else(|| {
            TBR_RE
                .captures(stderr)
                .and_then(|caps| parse_tbr(&caps[1]))
        })
        .filter(|fps| *fps > 0.0)
        .ok_or_else(|| Attempt::Incomplete("frame rate".to_string()))?;

    let subtitle_streams = SUBTITLE_RE
        .captures_iter(stderr)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .collect();

    Ok(VideoInfo {
        path: path.to_path_buf(),
        duration,
        frame_rate,
        subtitle_streams,
        frame_count: None,
        fingerprint: SourceFingerprint::of(path),
    })
}

fn parse_tbr(value: &str) -> Option<f64> {
    match value.strip_suffix('k') {
        Some(thousands) => thousands.parse::<f64>().ok().map(|v| v * 1000.0),
        None => value.parse().ok(),
    }
}

/// 解析幀率字串（例如 "30/1" 或 "30000/1001"）
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = if let Some((num_str, den_str)) = rate.split_once('/') {
        let num: f64 = num_str.parse().ok()?;
        let den: f64 = den_str.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        rate.parse().ok()?
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
