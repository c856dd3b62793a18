use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// Application-private directory holding per-job output folders.
    #[serde(default)]
    pub runtime_directory: Option<String>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub translation: TranslationOptions,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            runtime_directory: None,
            history: HistoryConfig::default(),
            environment: EnvironmentConfig::default(),
            translation: TranslationOptions::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Resolved runtime directory, falling back to the platform data dir.
    pub fn runtime_dir(&self) -> PathBuf {
        match &self.runtime_directory {
            Some(dir) => expand_home(dir),
            None => app_data_dir().join("runtime"),
        }
    }

    /// Resolved SQLite history path.
    pub fn database_path(&self) -> PathBuf {
        match &self.history.database_path {
            Some(path) => expand_home(path),
            None => app_data_dir().join("history.db"),
        }
    }
}

/// `<data_local_dir>/doctrans`, or `./.doctrans` when no data dir is known.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("doctrans"))
        .unwrap_or_else(|| PathBuf::from(".doctrans"))
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,
    #[serde(default)]
    pub database_path: Option<String>,
}

/// Where to find the interpreter, tool manager and translation executable.
/// Explicit paths win; otherwise the names are looked up on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub tool_manager: Option<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default = "default_interpreter_name")]
    pub interpreter_name: String,
    #[serde(default = "default_tool_manager_name")]
    pub tool_manager_name: String,
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
}

fn default_interpreter_name() -> String {
    "python3".to_string()
}

fn default_tool_manager_name() -> String {
    "uv".to_string()
}

fn default_executable_name() -> String {
    "pdf2zh".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            tool_manager: None,
            executable: None,
            interpreter_name: default_interpreter_name(),
            tool_manager_name: default_tool_manager_name(),
            executable_name: default_executable_name(),
        }
    }
}

/// Options forwarded to the translation executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOptions {
    /// Produce a side-by-side bilingual document in addition to the mono one.
    #[serde(default = "default_true")]
    pub bilingual: bool,
    #[serde(default)]
    pub debug: bool,
    /// Free-form arguments, split on whitespace and appended verbatim.
    #[serde(default)]
    pub extra_args: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub lang_in: Option<String>,
    #[serde(default)]
    pub lang_out: Option<String>,
    /// Opaque arguments owned by the settings layer.
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            bilingual: true,
            debug: false,
            extra_args: String::new(),
            service: None,
            lang_in: None,
            lang_out: None,
            args: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Kill a job's process after this many seconds. `None` disables the limit.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}
