pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_config_from_yaml};
pub use schema::{
    app_data_dir, expand_home, Config, EnvironmentConfig, HistoryBackend, HistoryConfig,
    LogFormat, LoggingConfig, QueueConfig, TranslationOptions,
};
