use anyhow::{Context, Result, bail};
use clap::{ArgAction, CommandFactory, Parser};
use console::style;
use ffpreview::component::thumbnail_manager::{ThumbnailManager, format_size};
use ffpreview::component::thumbnail_preview::{
    MethodFlags, Preview, PreviewRequest, PreviewService, ReuseMode, SamplingRequest, resolve,
};
use ffpreview::config::{SETTINGS_FILE_NAME, Settings, save_settings};
use ffpreview::init;
use ffpreview::signal::{Cancellation, setup_shutdown_signal};
use ffpreview::tools::{format_hms, parse_hms};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 進度條以千分比顯示
const PROGRESS_SCALE: u64 = 1000;

#[derive(Debug, Parser)]
#[command(
    name = "ffpreview",
    version,
    about = "以 ffmpeg 產生影片縮圖預覽並快取結果"
)]
struct Cli {
    /// 影片檔案
    files: Vec<PathBuf>,

    /// 縮圖輸出根目錄
    #[arg(short = 'o', long)]
    outdir: Option<PathBuf>,

    /// 縮圖寬度（像素）
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// 忽略既有縮圖，強制重新產生（只套用於第一個檔案）
    #[arg(short = 'f', long)]
    force: bool,

    /// 沿用既有縮圖，不論寬度與取樣方式
    #[arg(short = 'r', long)]
    reuse: bool,

    /// 擷取所有 I-frame
    #[arg(short = 'i', long)]
    iframe: bool,

    /// 每 N 幀擷取一張
    #[arg(short = 'n', long = "nskip", value_name = "N")]
    nskip: Option<u32>,

    /// 每 N 秒擷取一張
    #[arg(short = 'N', long = "nsecs", value_name = "F")]
    nsecs: Option<f64>,

    /// 場景變換門檻（0 到 1 之間）
    #[arg(short = 's', long, value_name = "F")]
    scene: Option<f64>,

    /// 自訂選幀濾鏡
    #[arg(short = 'C', long, value_name = "FILTER")]
    customvf: Option<String>,

    /// 起始時間 [[HH:]MM:]SS[.fff]
    #[arg(short = 'S', long, value_parser = parse_time)]
    start: Option<f64>,

    /// 結束時間 [[HH:]MM:]SS[.fff]
    #[arg(short = 'E', long, value_parser = parse_time)]
    end: Option<f64>,

    /// 燒入第 N 個字幕串流（預設第 0 個）
    #[arg(short = 'a', long = "addss", value_name = "N", num_args = 0..=1, default_missing_value = "0")]
    addss: Option<usize>,

    /// 平行處理數
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// 設定檔路徑
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 顯示更多日誌（可重複）
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// 列出縮圖庫
    #[arg(long)]
    manage: bool,

    /// 列出縮圖庫時只顯示名稱包含此字串的項目
    #[arg(long, value_name = "TEXT", requires = "manage")]
    filter: Option<String>,

    /// 移除來源已不存在或索引損毀的縮圖目錄
    #[arg(long)]
    prune: bool,

    /// 整批作業的時間上限（秒），逾時視同取消
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// 將目前的設定寫入設定檔
    #[arg(long)]
    save_config: bool,
}

fn parse_time(value: &str) -> Result<f64, String> {
    parse_hms(value).map_err(|e| e.to_string())
}

impl Cli {
    fn method_flags(&self) -> MethodFlags {
        MethodFlags {
            custom_filter: self.customvf.clone(),
            iframe: self.iframe,
            per_seconds: self.nsecs,
            per_frame_count: self.nskip,
            scene_threshold: self.scene,
        }
    }

    fn apply_to(&self, settings: &mut Settings) {
        if let Some(outdir) = &self.outdir {
            settings.outdir = Some(outdir.clone());
        }
        if let Some(width) = self.width {
            settings.thumb_width = width;
        }
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs.max(1);
        }
        if self.reuse {
            settings.reuse = true;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init::init(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply_to(&mut settings);

    if cli.save_config {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME));
        save_settings(&settings, &path)?;
        println!("{} {}", style("已儲存設定:").green(), path.display());
    }

    let service = PreviewService::from_settings(&settings).context("無法準備縮圖輸出目錄")?;

    if cli.manage || cli.prune {
        run_manager(&service, &cli)?;
    }

    if cli.files.is_empty() {
        if !(cli.manage || cli.prune || cli.save_config) {
            Cli::command().print_help()?;
        }
        return Ok(());
    }

    let shutdown_signal = setup_shutdown_signal()?;
    let timeout = cli
        .timeout
        .filter(|t| t.is_finite() && *t > 0.0)
        .map(Duration::from_secs_f64);
    let cancel = Cancellation::from_signal(shutdown_signal).with_timeout(timeout);

    let requests = build_requests(&cli, &settings);
    run_previews(&service, &requests, settings.jobs, &cancel)
}

fn build_requests(cli: &Cli, settings: &Settings) -> Vec<PreviewRequest> {
    let mut flags = cli.method_flags();
    if flags.is_empty() {
        flags = settings.default_flags();
    }

    let sampling = SamplingRequest {
        method: resolve(&flags),
        start: cli.start,
        end: cli.end,
        width: settings.thumb_width,
        subtitle_stream: cli.addss,
    };
    let reuse = if settings.reuse {
        ReuseMode::KeepSettings
    } else {
        ReuseMode::Exact
    };

    cli.files
        .iter()
        .enumerate()
        .map(|(i, file)| PreviewRequest {
            video_path: file.clone(),
            sampling: sampling.clone(),
            force: cli.force && i == 0,
            reuse,
        })
        .collect()
}

fn run_previews(
    service: &PreviewService,
    requests: &[PreviewRequest],
    jobs: usize,
    cancel: &Cancellation,
) -> Result<()> {
    let multi = MultiProgress::new();
    let bars = create_bars(&multi, requests);

    let results = service.preview_batch(requests, jobs, cancel, |position, current, total| {
        if let Some(bar) = bars.get(position)
            && total > 0.0
        {
            bar.set_position(((current / total) * PROGRESS_SCALE as f64) as u64);
        }
    });

    for bar in &bars {
        bar.finish_and_clear();
    }

    let mut failed = 0;
    for (request, result) in requests.iter().zip(results) {
        let name = display_name(&request.video_path);
        match result {
            Ok(preview) => print_preview(&name, &preview),
            Err(e) if e.is_cancelled() => {
                eprintln!("{} {name}: {e}", style("⤳").yellow());
                failed += 1;
            }
            Err(e) => {
                warn!("處理影片失敗 {name}: {e}");
                eprintln!("{} {name}: {e}", style("✗").red());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} 個檔案處理失敗");
    }
    Ok(())
}

/// 每個請求一條進度條，同一檔案重複出現時也各自獨立
fn create_bars(multi: &MultiProgress, requests: &[PreviewRequest]) -> Vec<ProgressBar> {
    let progress_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {percent:>3}% {msg}")
        .expect("Invalid progress bar template")
        .progress_chars("#>-");

    requests
        .iter()
        .map(|request| {
            let bar = multi.add(ProgressBar::new(PROGRESS_SCALE));
            bar.set_style(progress_style.clone());
            bar.set_message(display_name(&request.video_path));
            bar
        })
        .collect()
}

fn print_preview(name: &str, preview: &Preview) {
    let mut note = String::new();
    if preview.reused {
        note.push_str("（沿用）");
    }
    if !preview.is_complete() {
        note.push_str("（不完整）");
    }
    eprintln!(
        "{} {name}: {} 張縮圖，長度 {}{note}",
        style("✓").green(),
        preview.thumbnails.len(),
        format_hms(preview.video.duration)
    );
    info!("縮圖目錄: {}", preview.thumb_dir.dir.display());

    for thumbnail in &preview.thumbnails {
        println!("{:.3}\t{}", thumbnail.timestamp, thumbnail.path.display());
    }
}

fn run_manager(service: &PreviewService, cli: &Cli) -> Result<()> {
    let manager = ThumbnailManager::new(service.resolver().clone());

    if cli.prune {
        let summary = manager.prune()?;
        println!(
            "{} 已移除 {} 個失效目錄，釋放 {}",
            style("✓").green(),
            summary.removed,
            format_size(summary.freed_bytes)
        );
        if summary.failed > 0 {
            println!("{} {} 個目錄無法移除", style("✗").red(), summary.failed);
        }
    }

    if cli.manage {
        let entries = manager.scan()?;
        manager.print_listing(&entries, cli.filter.as_deref());
    }

    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}
