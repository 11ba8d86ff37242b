pub mod load;
pub mod save;
pub mod types;

pub use save::save_settings;
pub use types::{DefaultMethod, SETTINGS_FILE_NAME, Settings};
