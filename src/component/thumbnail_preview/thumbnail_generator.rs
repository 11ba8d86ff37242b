use super::filter_builder::{build_filter, build_trim_args};
use super::index_store::{
    IMAGE_PATTERN, IndexRecord, IndexStore, RunStatus, ThumbnailEntry, image_file_name,
};
use super::progress_parser::{ProgressEvent, ProgressParser};
use super::sampling_policy::SamplingRequest;
use crate::error::{FilterError, GenerationError, PreviewError};
use crate::signal::Cancellation;
use crate::tools::{ThumbDir, VideoInfo};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 取消旗標與子程序狀態的檢查間隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 失敗時保留的 stderr 行數
const DIAGNOSTIC_LINES: usize = 20;

const READ_CHUNK: usize = 4096;

/// 執行 ffmpeg 產生縮圖並收集每張縮圖的時間
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    ffmpeg: String,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// 子程序執行期間累積的結果
#[derive(Debug, Default)]
struct RunOutput {
    timestamps: Vec<f64>,
    diagnostics: VecDeque<String>,
}

impl RunOutput {
    fn diagnostic_text(&self) -> String {
        self.diagnostics
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ThumbnailGenerator {
    #[must_use]
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// 建立 ffmpeg 指令；參數不合法時不會產生任何子程序
    pub fn build_command(
        &self,
        video: &VideoInfo,
        request: &SamplingRequest,
        thumb_dir: &ThumbDir,
    ) -> Result<Command, FilterError> {
        let trim = build_trim_args(request)?;
        let filter = build_filter(request, video.frame_rate, &video.path)?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "info", "-y"]);
        cmd.args(&trim);
        cmd.arg("-i").arg(&video.path);
        cmd.args(["-vf", &filter, "-vsync", "vfr"]);
        cmd.arg(thumb_dir.dir.join(IMAGE_PATTERN));

        debug!("縮圖濾鏡: {filter}");
        Ok(cmd)
    }

    /// 產生縮圖
    ///
    /// `on_progress(目前位置, 總長度)` 以來源影片的時間軸（秒）回報。
    /// 取消時會終止 ffmpeg、刪除已產生的縮圖，且不寫入索引。
    pub fn generate<F>(
        &self,
        video: &VideoInfo,
        request: &SamplingRequest,
        thumb_dir: &ThumbDir,
        cancel: &Cancellation,
        mut on_progress: F,
    ) -> Result<IndexRecord, PreviewError>
    where
        F: FnMut(f64, f64),
    {
        let mut cmd = self.build_command(video, request, thumb_dir)?;
        thumb_dir.ensure_exists()?;

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GenerationError::ToolFailed {
                status: format!("無法啟動 {}", self.ffmpeg),
                diagnostic: e.to_string(),
            })?;

        let (sender, receiver) = mpsc::channel();
        Self::spawn_stderr_reader(child.stderr.take(), sender);

        let start = request.start_offset();
        let total = request
            .end
            .filter(|e| *e > 0.0)
            .map_or(video.duration, |e| e.min(video.duration));

        let mut output = RunOutput::default();
        let status = Self::wait_for_exit(
            &mut child,
            &receiver,
            cancel,
            &mut output,
            &mut |event: ProgressEvent, output: &mut RunOutput| {
                Self::handle_event(event, start, total, output, &mut on_progress);
            },
        );

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                Self::discard_images(thumb_dir);
                return Err(e.into());
            }
        };

        Self::finish_record(video, request, thumb_dir, status, output)
    }

    fn spawn_stderr_reader(stderr: Option<ChildStderr>, sender: Sender<Vec<u8>>) {
        let Some(mut stderr) = stderr else {
            return;
        };

        thread::spawn(move || {
            let mut buffer = [0u8; READ_CHUNK];
            loop {
                match stderr.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if sender.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// stderr 關閉後才確認結束狀態，確保所有出幀行都已處理
    fn wait_for_exit(
        child: &mut Child,
        receiver: &Receiver<Vec<u8>>,
        cancel: &Cancellation,
        output: &mut RunOutput,
        on_event: &mut dyn FnMut(ProgressEvent, &mut RunOutput),
    ) -> Result<ExitStatus, GenerationError> {
        let mut parser = ProgressParser::new();
        let mut stderr_open = true;

        loop {
            if cancel.is_cancelled() {
                info!("取消縮圖產生，終止 ffmpeg");
                let _ = child.kill();
                let _ = child.wait();
                return Err(GenerationError::Cancelled);
            }

            if stderr_open {
                match receiver.recv_timeout(POLL_INTERVAL) {
                    Ok(chunk) => {
                        for event in parser.feed(&chunk) {
                            on_event(event, output);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        for event in parser.finish() {
                            on_event(event, output);
                        }
                        stderr_open = false;
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(GenerationError::ToolFailed {
                        status: "無法取得 ffmpeg 結束狀態".to_string(),
                        diagnostic: e.to_string(),
                    });
                }
            }
        }
    }

    fn handle_event<F>(
        event: ProgressEvent,
        start: f64,
        total: f64,
        output: &mut RunOutput,
        on_progress: &mut F,
    ) where
        F: FnMut(f64, f64),
    {
        match event {
            ProgressEvent::FrameEmitted { pts_time, .. } => {
                let previous = output.timestamps.last().copied().unwrap_or(f64::NEG_INFINITY);
                // 時間必須不遞減
                let timestamp = (pts_time.max(0.0) + start).max(previous);
                output.timestamps.push(timestamp);
                on_progress(timestamp.min(total), total);
            }
            ProgressEvent::Progress { time } => {
                on_progress((start + time).min(total), total);
            }
            ProgressEvent::Other(line) => {
                if output.diagnostics.len() == DIAGNOSTIC_LINES {
                    output.diagnostics.pop_front();
                }
                output.diagnostics.push_back(line);
            }
        }
    }

    fn finish_record(
        video: &VideoInfo,
        request: &SamplingRequest,
        thumb_dir: &ThumbDir,
        status: ExitStatus,
        output: RunOutput,
    ) -> Result<IndexRecord, PreviewError> {
        if !status.success() && output.timestamps.is_empty() {
            Self::discard_images(thumb_dir);
            return Err(GenerationError::ToolFailed {
                status: status.to_string(),
                diagnostic: output.diagnostic_text(),
            }
            .into());
        }

        let mut record = IndexRecord::new(video, request);
        record.generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        let mut missing = 0usize;
        for (position, timestamp) in output.timestamps.iter().enumerate() {
            let file_name = image_file_name(position as u64 + 1);
            if !thumb_dir.dir.join(&file_name).is_file() {
                missing += 1;
                continue;
            }
            record.entries.push(ThumbnailEntry {
                index: record.entries.len(),
                timestamp: *timestamp,
                file_name,
            });
        }

        if !status.success() {
            warn!(
                "ffmpeg 非正常結束 ({status})，保留已產生的 {} 張縮圖: {}\n{}",
                record.entries.len(),
                video.path.display(),
                output.diagnostic_text()
            );
            record.status = RunStatus::Partial {
                exit_code: status.code(),
            };
        } else if missing > 0 {
            warn!("{missing} 張縮圖檔案不存在，已自索引中略過: {}", video.path.display());
            record.status = RunStatus::Partial {
                exit_code: status.code(),
            };
        }

        info!(
            "產生 {} 張縮圖: {}",
            record.entries.len(),
            video.path.display()
        );
        Ok(record)
    }

    fn discard_images(thumb_dir: &ThumbDir) {
        if let Err(e) = IndexStore::new(thumb_dir.clone()).clear() {
            warn!("無法清除未完成的縮圖: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::thumbnail_preview::SamplingMethod;
    use std::path::PathBuf;

    fn video() -> VideoInfo {
        VideoInfo {
            path: PathBuf::from("/videos/movie.mp4"),
            duration: 120.0,
            frame_rate: 25.0,
            subtitle_streams: Vec::new(),
            frame_count: None,
            fingerprint: None,
        }
    }

    #[test]
    fn test_command_line_layout() {
        let generator = ThumbnailGenerator::new("/opt/ffmpeg");
        let mut request = SamplingRequest::new(SamplingMethod::Skip { frames: 100 }, 160);
        request.start = Some(5.0);
        let thumb_dir = ThumbDir::new(PathBuf::from("/tmp/thumbs/movie.mp4-0123abcd"));

        let cmd = generator.build_command(&video(), &request, &thumb_dir).unwrap();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(cmd.get_program(), "/opt/ffmpeg");
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[input + 1], "/videos/movie.mp4");
        assert!(args.contains(&r"select=not(mod(n\,100)),showinfo,scale=160:-1".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "/tmp/thumbs/movie.mp4-0123abcd/%08d.png"
        );
    }

    #[test]
    fn test_invalid_request_fails_before_spawn() {
        let generator = ThumbnailGenerator::new("/nonexistent/ffmpeg");
        let request = SamplingRequest::new(SamplingMethod::Skip { frames: 0 }, 160);
        let thumb_dir = ThumbDir::new(PathBuf::from("/nonexistent/dir"));

        let result = generator.generate(
            &video(),
            &request,
            &thumb_dir,
            &Cancellation::new(),
            |_, _| {},
        );
        assert!(matches!(result, Err(PreviewError::Filter(_))));
    }

    #[test]
    fn test_timestamps_offset_and_monotonic() {
        let mut output = RunOutput::default();
        let mut seen = Vec::new();
        let mut progress = |current: f64, _total: f64| seen.push(current);

        for pts_time in [0.0, 4.0, 3.5, 9.0] {
            ThumbnailGenerator::handle_event(
                ProgressEvent::FrameEmitted {
                    ordinal: 0,
                    pts_time,
                },
                10.0,
                120.0,
                &mut output,
                &mut progress,
            );
        }

        assert_eq!(output.timestamps, vec![10.0, 14.0, 14.0, 19.0]);
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_diagnostics_keep_tail() {
        let mut output = RunOutput::default();
        for i in 0..(DIAGNOSTIC_LINES + 5) {
            ThumbnailGenerator::handle_event(
                ProgressEvent::Other(format!("line {i}")),
                0.0,
                1.0,
                &mut output,
                &mut |_: f64, _: f64| {},
            );
        }
        assert_eq!(output.diagnostics.len(), DIAGNOSTIC_LINES);
        assert!(output.diagnostic_text().ends_with(&format!("line {}", DIAGNOSTIC_LINES + 4)));
        assert!(!output.diagnostic_text().contains("line 0\n"));
    }
}
