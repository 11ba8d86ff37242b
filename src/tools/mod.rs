mod media_probe;
mod path_resolver;
mod run_lock;
mod time_format;

pub use media_probe::{MediaProbe, SourceFingerprint, VideoInfo};
pub use path_resolver::{
    INDEX_FILE_NAME, LOCK_FILE_NAME, PathResolver, TAKEOVER_FILE_NAME, THUMBS_DIR_SUFFIX,
    ThumbDir, absolute_path, ensure_directory_exists,
};
pub use run_lock::RunLock;
pub use time_format::{format_hms, format_timestamp, parse_hms};
