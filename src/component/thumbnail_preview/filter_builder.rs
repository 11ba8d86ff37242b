use super::sampling_policy::{SamplingMethod, SamplingRequest};
use crate::error::FilterError;
use std::path::Path;

/// 由取樣設定建立 ffmpeg `-vf` 濾鏡字串
///
/// 濾鏡鏈固定為：選幀條件 → `showinfo`（回報每幀時間）→ 等比縮放，
/// 有指定字幕串流時再加上字幕燒入。
pub fn build_filter(
    request: &SamplingRequest,
    frame_rate: f64,
    source: &Path,
) -> Result<String, FilterError> {
    if request.width == 0 {
        return Err(invalid(&request.method, "縮圖寬度必須大於 0"));
    }

    let mut filter = select_predicate(&request.method, frame_rate)?;
    filter.push_str(",showinfo");
    filter.push_str(&format!(",scale={}:-1", request.width));

    if let Some(stream) = request.subtitle_stream {
        filter.push(',');
        filter.push_str(&subtitle_step(source, stream, request.start_offset()));
    }

    Ok(filter)
}

/// 起訖時間參數，放在 `-i` 之前
pub fn build_trim_args(request: &SamplingRequest) -> Result<Vec<String>, FilterError> {
    let start = request.start_offset();
    let end = request.end.filter(|e| *e > 0.0);

    if !start.is_finite() || request.start.is_some_and(|s| s < 0.0) {
        return Err(invalid(&request.method, "起始時間不可為負數"));
    }
    if let Some(end) = end
        && (!end.is_finite() || end <= start)
    {
        return Err(invalid(
            &request.method,
            &format!("結束時間 {end} 必須大於起始時間 {start}"),
        ));
    }

    let mut args = Vec::new();
    if start > 0.0 {
        args.push("-ss".to_string());
        args.push(start.to_string());
    }
    if let Some(end) = end {
        args.push("-to".to_string());
        args.push(end.to_string());
    }
    Ok(args)
}

/// `time` 取樣時每隔幾幀取一張
#[must_use]
pub fn frame_step(seconds: f64, frame_rate: f64) -> u64 {
    ((seconds * frame_rate).round() as u64).max(1)
}

fn select_predicate(method: &SamplingMethod, frame_rate: f64) -> Result<String, FilterError> {
    match method {
        SamplingMethod::IFrame => Ok(r"select=eq(pict_type\,I)".to_string()),
        SamplingMethod::Scene { threshold } => {
            if !(threshold.is_finite() && *threshold > 0.0 && *threshold < 1.0) {
                return Err(invalid(method, &format!("門檻 {threshold} 必須介於 0 與 1 之間")));
            }
            Ok(format!(r"select=gt(scene\,{threshold})"))
        }
        SamplingMethod::Skip { frames } => {
            if *frames < 1 {
                return Err(invalid(method, "幀數間隔必須至少為 1"));
            }
            Ok(format!(r"select=not(mod(n\,{frames}))"))
        }
        SamplingMethod::Time { seconds } => {
            if !(seconds.is_finite() && *seconds > 0.0) {
                return Err(invalid(method, &format!("秒數間隔 {seconds} 必須大於 0")));
            }
            if !(frame_rate.is_finite() && frame_rate > 0.0) {
                return Err(invalid(method, "影片幀率未知"));
            }
            let step = frame_step(*seconds, frame_rate);
            Ok(format!(r"select=not(mod(n\,{step}))"))
        }
        SamplingMethod::CustomVf { filter } => {
            if filter.trim().is_empty() {
                return Err(invalid(method, "自訂濾鏡不可為空"));
            }
            Ok(filter.clone())
        }
    }
}

/// 輸入端 `-ss` 會讓時間從 0 起算，先平移回原始時間軸再燒字幕，之後移回
fn subtitle_step(source: &Path, stream: usize, start: f64) -> String {
    let subtitles = format!(
        "subtitles={}:si={stream}",
        escape_filtergraph(&escape_option_value(&source.to_string_lossy()))
    );
    if start > 0.0 {
        format!("setpts=PTS+{start}/TB,{subtitles},setpts=PTS-{start}/TB")
    } else {
        subtitles
    }
}

/// 第一層跳脫：濾鏡參數值中的 `'` 與 `:`
fn escape_option_value(value: &str) -> String {
    value.replace('\'', r"\'").replace(':', r"\:")
}

/// 第二層跳脫：濾鏡圖層級的 `\`、`'`、`,`、`;`、`[`、`]`
fn escape_filtergraph(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn invalid(method: &SamplingMethod, reason: &str) -> FilterError {
    FilterError::InvalidParam {
        method: method.name(),
        reason: reason.to_string(),
    }
}
