//! 整合測試 - 以假的 ffmpeg / ffprobe 腳本驗證縮圖產生與快取流程
//!
//! 腳本會記錄每次呼叫的參數，並依情境輸出 showinfo 行與縮圖檔。

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ffpreview::component::thumbnail_preview::{
    Preview, PreviewRequest, PreviewService, ReuseMode, RunStatus, SamplingMethod, SamplingRequest,
    ThumbnailGenerator, load_index,
};
use ffpreview::error::{GenerationError, PreviewError, ProbeError};
use ffpreview::signal::Cancellation;
use ffpreview::tools::{MediaProbe, PathResolver};
use tempfile::TempDir;

/// 同時寫入並執行腳本可能遇到 ETXTBSY，測試之間依序執行
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

const FFPROBE_SCRIPT: &str = r#"#!/bin/sh
cat <<'JSON'
{"streams": [
  {"index": 0, "codec_type": "video", "avg_frame_rate": "25/1", "duration": "120.000000"},
  {"index": 1, "codec_type": "audio"},
  {"index": 2, "codec_type": "subtitle"}
 ],
 "format": {"duration": "120.000000"}}
JSON
"#;

/// 每 10 秒一張，共 12 張
const TWELVE_FRAMES: &str = r#"
i=0
while [ $i -lt 12 ]; do
  emit $i $((i * 10))
  i=$((i + 1))
done
echo "frame=   12 fps=0.0 q=-0.0 size=N/A time=00:01:50.00 bitrate=N/A speed= 100x" >&2
exit 0
"#;

struct Fixture {
    temp: TempDir,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    args_log: PathBuf,
    video: PathBuf,
}

impl Fixture {
    fn new(ffmpeg_body: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let args_log = temp.path().join("ffmpeg_args.log");

        let ffmpeg = bin.join("ffmpeg");
        let header = format!(
            r#"#!/bin/sh
printf '%s\n' "$*" >> "{}"
for a in "$@"; do out="$a"; done
emit() {{
  f=$(printf "$out" $(($1 + 1)))
  printf png > "$f"
  echo "[Parsed_showinfo_1 @ 0x5581] n: $1 pts: $1 pts_time:$2 duration: 1 fmt:yuv420p" >&2
}}
"#,
            args_log.display()
        );
        write_script(&ffmpeg, &format!("{header}{ffmpeg_body}"));

        let ffprobe = bin.join("ffprobe");
        write_script(&ffprobe, FFPROBE_SCRIPT);

        let video = temp.path().join("movie.mp4");
        fs::write(&video, b"not really a video").unwrap();

        Self {
            temp,
            ffmpeg,
            ffprobe,
            args_log,
            video,
        }
    }

    fn service(&self) -> PreviewService {
        let out = self.temp.path().join("out");
        let resolver = PathResolver::new(Some(out.as_path())).unwrap();
        PreviewService::new(
            resolver,
            MediaProbe::new(self.ffprobe.to_string_lossy(), self.ffmpeg.to_string_lossy()),
            ThumbnailGenerator::new(self.ffmpeg.to_string_lossy()),
        )
    }

    fn request(&self, method: SamplingMethod, width: u32) -> PreviewRequest {
        PreviewRequest::new(&self.video, SamplingRequest::new(method, width))
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.args_log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn write_script(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn count_images(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".png"))
        .count()
}

fn run(service: &PreviewService, request: &PreviewRequest) -> Result<Preview, PreviewError> {
    service.preview(request, &Cancellation::new(), |_, _| {})
}

/// 測試 1: 依時間取樣產生 12 張縮圖並寫入索引
#[test]
fn test_time_sampling_generates_ordered_thumbnails() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let request = fixture.request(SamplingMethod::Time { seconds: 10.0 }, 192);

    let mut progress = Vec::new();
    let preview = service
        .preview(&request, &Cancellation::new(), |current, total| {
            progress.push((current, total));
        })
        .unwrap();

    assert!(!preview.reused);
    assert!(preview.is_complete());
    assert_eq!(preview.thumbnails.len(), 12);
    for (i, thumbnail) in preview.thumbnails.iter().enumerate() {
        assert_eq!(thumbnail.index, i);
        assert!((thumbnail.timestamp - i as f64 * 10.0).abs() < 1e-9);
        assert!(thumbnail.path.is_file());
    }
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|(_, total)| (*total - 120.0).abs() < 1e-9));

    let stored = load_index(&preview.thumb_dir.index_path).unwrap().unwrap();
    assert_eq!(stored, preview.record);
    assert!(!preview.thumb_dir.lock_path.exists());

    let args = fixture.invocations();
    assert_eq!(args.len(), 1);
    assert!(args[0].contains(r"select=not(mod(n\,250)),showinfo,scale=192:-1"));
}

/// 測試 2: 設定相同時直接沿用，不再呼叫 ffmpeg
#[test]
fn test_second_request_reuses_index() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let request = fixture.request(SamplingMethod::IFrame, 192);

    let first = run(&service, &request).unwrap();
    let second = run(&service, &request).unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.thumbnails, second.thumbnails);
    assert_eq!(fixture.invocations().len(), 1);
}

/// 測試 3: 寬度改變時重新產生
#[test]
fn test_width_change_regenerates() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();

    run(&service, &fixture.request(SamplingMethod::IFrame, 192)).unwrap();
    let wider = run(&service, &fixture.request(SamplingMethod::IFrame, 256)).unwrap();

    assert!(!wider.reused);
    let args = fixture.invocations();
    assert_eq!(args.len(), 2);
    assert!(args[1].contains("scale=256:-1"));
    assert_eq!(wider.record.request.width, 256);

    // 沿用模式下忽略寬度
    let mut keep = fixture.request(SamplingMethod::Skip { frames: 10 }, 128);
    keep.reuse = ReuseMode::KeepSettings;
    let kept = run(&service, &keep).unwrap();
    assert!(kept.reused);
    assert_eq!(kept.record.request.width, 256);
    assert_eq!(fixture.invocations().len(), 2);
}

/// 測試 4: 強制重新產生與縮圖遺失
#[test]
fn test_force_and_missing_file_regenerate() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let mut request = fixture.request(SamplingMethod::IFrame, 192);

    let first = run(&service, &request).unwrap();

    request.force = true;
    assert!(!run(&service, &request).unwrap().reused);
    assert_eq!(fixture.invocations().len(), 2);

    request.force = false;
    fs::remove_file(&first.thumbnails[5].path).unwrap();
    let repaired = run(&service, &request).unwrap();
    assert!(!repaired.reused);
    assert_eq!(repaired.thumbnails.len(), 12);
    assert_eq!(fixture.invocations().len(), 3);
}

/// 測試 5: 索引損毀視同沒有快取
#[test]
fn test_malformed_index_regenerates() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let request = fixture.request(SamplingMethod::IFrame, 192);

    let first = run(&service, &request).unwrap();
    fs::write(&first.thumb_dir.index_path, "{ \"format\": 1, \"entries\": [").unwrap();

    let second = run(&service, &request).unwrap();
    assert!(!second.reused);
    assert_eq!(second.thumbnails.len(), 12);
    assert!(load_index(&second.thumb_dir.index_path).unwrap().is_some());
}

/// 測試 6: 起始時間平移縮圖時間並傳給 ffmpeg
#[test]
fn test_start_offset_shifts_timestamps() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let mut request = fixture.request(SamplingMethod::IFrame, 192);
    request.sampling.start = Some(30.0);

    let preview = run(&service, &request).unwrap();
    assert!((preview.thumbnails[0].timestamp - 30.0).abs() < 1e-9);
    assert!((preview.thumbnails[11].timestamp - 140.0).abs() < 1e-9);

    let args = &fixture.invocations()[0];
    let ss = args.find("-ss 30").unwrap();
    let input = args.find(" -i ").unwrap();
    assert!(ss < input);
}

/// 測試 7: 非零結束但已有縮圖時保留為不完整結果
#[test]
fn test_partial_run_is_kept() {
    let _guard = serial();
    let fixture = Fixture::new(
        r#"
emit 0 0
emit 1 5.5
emit 2 11
echo "Error while decoding stream #0:0: Invalid data found when processing input" >&2
exit 1
"#,
    );
    let service = fixture.service();
    let request = fixture.request(SamplingMethod::IFrame, 192);

    let preview = run(&service, &request).unwrap();
    assert!(!preview.is_complete());
    assert_eq!(preview.record.status, RunStatus::Partial { exit_code: Some(1) });
    assert_eq!(preview.thumbnails.len(), 3);
    assert!((preview.thumbnails[1].timestamp - 5.5).abs() < 1e-9);

    let stored = load_index(&preview.thumb_dir.index_path).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Partial { exit_code: Some(1) });
}

/// 測試 8: 沒有產生任何縮圖的失敗回報診斷訊息
#[test]
fn test_tool_failure_reports_diagnostic() {
    let _guard = serial();
    let fixture = Fixture::new(
        r#"
printf png > "$(printf "$out" 1)"
echo "[AVFilterGraph @ 0x1] No such filter: 'bogus'" >&2
exit 1
"#,
    );
    let service = fixture.service();
    let request = fixture.request(
        SamplingMethod::CustomVf {
            filter: "bogus".to_string(),
        },
        192,
    );

    let err = run(&service, &request).unwrap_err();
    match &err {
        PreviewError::Generation(GenerationError::ToolFailed { diagnostic, .. }) => {
            assert!(diagnostic.contains("No such filter"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let thumb_dir = service.resolver().resolve(&fixture.video).unwrap();
    assert_eq!(count_images(&thumb_dir.dir), 0);
    assert!(!thumb_dir.index_path.exists());
    assert!(!thumb_dir.lock_path.exists());
}

/// 測試 9: 取消時終止 ffmpeg 並清除縮圖
#[test]
fn test_cancellation_kills_tool_and_cleans_up() {
    let _guard = serial();
    let fixture = Fixture::new(
        r#"
emit 0 0
emit 1 10
exec sleep 30
"#,
    );
    let service = fixture.service();
    let request = fixture.request(SamplingMethod::IFrame, 192);
    let cancel = Cancellation::new().with_timeout(Some(Duration::from_millis(300)));

    let started = Instant::now();
    let err = service.preview(&request, &cancel, |_, _| {}).unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));

    let thumb_dir = service.resolver().resolve(&fixture.video).unwrap();
    assert_eq!(count_images(&thumb_dir.dir), 0);
    assert!(!thumb_dir.index_path.exists());
    assert!(!thumb_dir.lock_path.exists());
}

/// 測試 10: 參數錯誤時不執行 ffmpeg 且保留既有快取
#[test]
fn test_invalid_params_keep_existing_cache() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();

    let first = run(&service, &fixture.request(SamplingMethod::IFrame, 192)).unwrap();
    let err = run(
        &service,
        &fixture.request(SamplingMethod::Scene { threshold: 1.5 }, 192),
    )
    .unwrap_err();

    assert!(matches!(err, PreviewError::Filter(_)));
    assert_eq!(fixture.invocations().len(), 1);
    assert!(first.thumb_dir.index_path.exists());
    assert!(first.thumbnails.iter().all(|t| t.path.is_file()));
}

/// 測試 11: 其他工作持有目錄鎖時回報忙碌
#[test]
fn test_live_lock_reports_busy() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();
    let thumb_dir = service.resolver().resolve(&fixture.video).unwrap();
    fs::create_dir_all(&thumb_dir.dir).unwrap();
    fs::write(&thumb_dir.lock_path, format!("{}\nother-job\n", std::process::id())).unwrap();

    let err = run(&service, &fixture.request(SamplingMethod::IFrame, 192)).unwrap_err();
    assert!(matches!(
        err,
        PreviewError::Generation(GenerationError::Busy { .. })
    ));
    assert!(fixture.invocations().is_empty());
}

/// 測試 12: 字幕串流超出範圍時不加字幕濾鏡
#[test]
fn test_subtitle_stream_clamped() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();

    let mut request = fixture.request(SamplingMethod::IFrame, 192);
    request.sampling.subtitle_stream = Some(3);
    let preview = run(&service, &request).unwrap();
    assert_eq!(preview.record.request.subtitle_stream, None);
    assert!(!fixture.invocations()[0].contains("subtitles="));

    request.sampling.subtitle_stream = Some(0);
    request.force = true;
    run(&service, &request).unwrap();
    assert!(fixture.invocations()[1].contains(":si=0"));
}

/// 測試 13: 批次處理保持輸入順序
#[test]
fn test_batch_keeps_order() {
    let _guard = serial();
    let fixture = Fixture::new(TWELVE_FRAMES);
    let service = fixture.service();

    let other = fixture.temp.path().join("other.mkv");
    fs::write(&other, b"another").unwrap();
    let requests = vec![
        fixture.request(SamplingMethod::IFrame, 192),
        PreviewRequest::new(&other, SamplingRequest::new(SamplingMethod::IFrame, 192)),
    ];

    let reported = Mutex::new(Vec::new());
    let results = service.preview_batch(&requests, 2, &Cancellation::new(), |position, _, _| {
        reported.lock().unwrap().push(position);
    });
    assert_eq!(results.len(), 2);
    let mut reported = reported.into_inner().unwrap();
    reported.sort_unstable();
    reported.dedup();
    assert_eq!(reported, vec![0, 1]);
    let first = results[0].as_ref().unwrap();
    let second = results[1].as_ref().unwrap();
    assert!(first.video.path.ends_with("movie.mp4"));
    assert!(second.video.path.ends_with("other.mkv"));
    assert_ne!(first.thumb_dir, second.thumb_dir);
}

/// 測試 14: ffprobe 無法使用時改由 ffmpeg 輸出取得影片資訊
#[test]
fn test_probe_falls_back_to_ffmpeg_banner() {
    let _guard = serial();
    let fixture = Fixture::new(
        r#"
cat >&2 <<'BANNER'
Input #0, matroska,webm, from 'movie.mkv':
  Duration: 00:10:00.04, start: 0.000000, bitrate: 1205 kb/s
  Stream #0:0(eng): Video: h264 (High), yuv420p(progressive), 1920x1080, 23.98 fps, 23.98 tbr, 1k tbn (default)
  Stream #0:1(eng): Subtitle: subrip
At least one output file must be specified
BANNER
exit 1
"#,
    );

    let probe = MediaProbe::new("/nonexistent/ffprobe", fixture.ffmpeg.to_string_lossy());
    let info = probe.probe(&fixture.video).unwrap();
    assert!((info.duration - 600.04).abs() < 1e-6);
    assert!((info.frame_rate - 23.98).abs() < 1e-6);
    assert_eq!(info.subtitle_streams, vec![1]);

    let missing = MediaProbe::new("/nonexistent/ffprobe", "/nonexistent/ffmpeg");
    assert!(matches!(
        missing.probe(&fixture.video),
        Err(ProbeError::Unreadable { .. })
    ));
}

/// 測試 15: 索引寫入失敗時回報目錄錯誤，且不留下沒有索引的縮圖
#[test]
fn test_index_write_failure_discards_images() {
    let _guard = serial();
    let fixture = Fixture::new(
        r#"
emit 0 0
emit 1 10
emit 2 20
exit 0
"#,
    );
    let service = fixture.service();
    let thumb_dir = service.resolver().resolve(&fixture.video).unwrap();
    // 暫存索引路徑被資料夾佔用，寫入必定失敗
    let blocker = thumb_dir.dir.join("ffpreview.idx.tmp");
    fs::create_dir_all(&blocker).unwrap();

    let err = run(&service, &fixture.request(SamplingMethod::IFrame, 192)).unwrap_err();
    assert!(
        matches!(err, PreviewError::Generation(GenerationError::Io { .. })),
        "unexpected error: {err:?}"
    );

    assert_eq!(fixture.invocations().len(), 1);
    assert_eq!(count_images(&thumb_dir.dir), 0);
    assert!(!thumb_dir.index_path.exists());
    assert!(!thumb_dir.lock_path.exists());
    assert!(blocker.is_dir());
}
