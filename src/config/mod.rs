pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;

pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{default_state_root_path, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR};
pub use save::save_settings;
pub use settings::{
    Binaries, PluginPaths, QueueConfig, Settings, SweepConfig, Timeouts, ValidationOptions,
    WorkerCounts,
};
