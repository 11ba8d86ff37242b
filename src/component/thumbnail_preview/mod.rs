//! 影片縮圖預覽元件
//!
//! 由 ffmpeg 依取樣方式擷取代表畫面，記錄每張縮圖對應的播放時間，
//! 並以索引檔快取結果，設定相同時直接沿用。

mod filter_builder;
mod index_store;
mod main;
mod progress_parser;
mod sampling_policy;
mod thumbnail_generator;

pub use filter_builder::{build_filter, build_trim_args, frame_step};
pub use index_store::{
    DURATION_EPSILON, INDEX_FORMAT, IndexRecord, IndexStore, ReuseMode, RunStatus, Thumbnail,
    ThumbnailEntry, image_file_name, is_image_file_name, load_index, save_index,
};
pub use main::{Preview, PreviewRequest, PreviewService};
pub use progress_parser::{ProgressEvent, ProgressParser};
pub use sampling_policy::{MethodFlags, SamplingMethod, SamplingRequest, resolve};
pub use thumbnail_generator::ThumbnailGenerator;
