use anyhow::{Result, bail};
use chrono::{DateTime, Local};

/// 解析 `[[HH:]MM:]SS[.fff]` 格式的時間字串為秒數
pub fn parse_hms(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("時間字串為空");
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() > 3 {
        bail!("時間格式錯誤: {trimmed}");
    }

    let mut seconds = 0.0;
    for part in &parts {
        let value: f64 = part
            .parse()
            .map_err(|_| anyhow::anyhow!("時間格式錯誤: {trimmed}"))?;
        if value < 0.0 || !value.is_finite() {
            bail!("時間不可為負數: {trimmed}");
        }
        seconds = seconds * 60.0 + value;
    }

    Ok(seconds)
}

/// 格式化秒數為 `HH:MM:SS.mmm`，未滿一小時時省略小時
#[must_use]
pub fn format_hms(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let (h, m, s) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);

    if h > 0 {
        format!("{h}:{m:02}:{s:02}.{ms:03}")
    } else {
        format!("{m:02}:{s:02}.{ms:03}")
    }
}

/// 將 Unix 秒數格式化為本地時間 `YYYY-MM-DD HH:MM:SS`
#[must_use]
pub fn format_timestamp(unix_secs: u64) -> String {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || "-".to_string(),
            |utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hms_plain_seconds() {
        assert!((parse_hms("90").unwrap() - 90.0).abs() < 1e-9);
        assert!((parse_hms("12.5").unwrap() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_hms_with_fields() {
        assert!((parse_hms("1:30").unwrap() - 90.0).abs() < 1e-9);
        assert!((parse_hms("01:02:03.25").unwrap() - 3723.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_hms_invalid() {
        assert!(parse_hms("").is_err());
        assert!(parse_hms("abc").is_err());
        assert!(parse_hms("1:2:3:4").is_err());
        assert!(parse_hms("-5").is_err());
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "00:00.000");
        assert_eq!(format_hms(75.5), "01:15.500");
        assert_eq!(format_hms(3723.25), "1:02:03.250");
    }

    #[test]
    fn test_format_timestamp_shape() {
        let text = format_timestamp(1_700_000_000);
        assert_eq!(text.len(), 19);
        assert!(text.starts_with("2023-11-1"));
        assert_eq!(format_timestamp(u64::MAX), "-");
    }
}
