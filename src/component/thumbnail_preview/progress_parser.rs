//! ffmpeg stderr 的逐行解析
//!
//! 輸入是任意切割的位元組片段，`\n` 與 `\r` 都視為行尾（統計行以 `\r` 覆寫）。
//! 只辨識兩種行：showinfo 的出幀行與統計行，其他行原樣交回給呼叫端。

use regex::Regex;
use std::sync::LazyLock;

/// 單行超過此長度仍未換行時強制切斷
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// `[Parsed_showinfo_1 @ 0x55d1] n:   3 pts:  76800 pts_time:3       duration: ...`
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bn:\s*(\d+)\s+pts:\s*-?\d+\s+pts_time:\s*(-?\d+(?:\.\d+)?)")
        .expect("Invalid regex")
});

/// `frame=  123 fps= 45 q=-0.0 size=N/A time=00:00:05.00 bitrate=N/A speed=10x`
static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^frame=\s*\d+.*?\btime=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
        .expect("Invalid regex")
});

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// 濾鏡輸出了一幀，`pts_time` 相對於輸入起點
    FrameEmitted { ordinal: u64, pts_time: f64 },
    /// 編碼進度（秒）
    Progress { time: f64 },
    /// 無法辨識的行，僅供錯誤診斷
    Other(String),
}

#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: Vec<u8>,
}

impl ProgressParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 餵入一段位元組，回傳其中已完整的行所產生的事件
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_line(&mut events);
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_PENDING_BYTES {
                    self.flush_line(&mut events);
                }
            }
        }

        events
    }

    /// 串流結束時處理最後一行沒有換行的內容
    pub fn finish(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        self.flush_line(&mut events);
        events
    }

    fn flush_line(&mut self, events: &mut Vec<ProgressEvent>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();

        if let Some(event) = parse_line(&line) {
            events.push(event);
        }
    }
}

fn parse_line(line: &str) -> Option<ProgressEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = FRAME_RE.captures(trimmed) {
        let ordinal = caps[1].parse().ok();
        let pts_time = caps[2].parse().ok();
        if let (Some(ordinal), Some(pts_time)) = (ordinal, pts_time) {
            return Some(ProgressEvent::FrameEmitted { ordinal, pts_time });
        }
    }

    if let Some(caps) = STATS_RE.captures(trimmed) {
        let h: Option<f64> = caps[1].parse().ok();
        let m: Option<f64> = caps[2].parse().ok();
        let s: Option<f64> = caps[3].parse().ok();
        if let (Some(h), Some(m), Some(s)) = (h, m, s) {
            return Some(ProgressEvent::Progress {
                time: h * 3600.0 + m * 60.0 + s,
            });
        }
    }

    Some(ProgressEvent::Other(trimmed.to_string()))
}
