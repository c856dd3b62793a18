use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

/// Loads a config file. `.yaml`/`.yml` files are parsed as YAML, anything
/// else as JSON.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        load_config_from_yaml(&content)
    } else {
        load_config_from_str(&content)
    }
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_yaml(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(config.version.clone()));
    }

    if config.queue.job_timeout_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "queue.job_timeout_secs must be greater than 0".to_string(),
        });
    }

    let env = &config.environment;
    for (field, value) in [
        ("environment.interpreter_name", &env.interpreter_name),
        ("environment.tool_manager_name", &env.tool_manager_name),
        ("environment.executable_name", &env.executable_name),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{} must not be empty", field),
            });
        }
    }

    for (field, value) in [
        ("translation.service", &config.translation.service),
        ("translation.lang_in", &config.translation.lang_in),
        ("translation.lang_out", &config.translation.lang_out),
    ] {
        if let Some(v) = value {
            if v.trim().is_empty() || v.chars().any(char::is_whitespace) {
                return Err(ConfigError::Validation {
                    message: format!("{} must be a single non-empty word", field),
                });
            }
        }
    }

    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging.level '{}': {}", config.logging.level, e),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HistoryBackend, LogFormat};
    use std::io::Write;

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "runtime_directory": "/tmp/doctrans",
            "history": { "backend": "memory" },
            "translation": {
                "bilingual": false,
                "debug": true,
                "extra_args": "--thread 4",
                "lang_out": "zh"
            },
            "queue": { "job_timeout_secs": 600 }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.runtime_directory.as_deref(), Some("/tmp/doctrans"));
        assert_eq!(config.history.backend, HistoryBackend::Memory);
        assert!(!config.translation.bilingual);
        assert!(config.translation.debug);
        assert_eq!(config.translation.extra_args, "--thread 4");
        assert_eq!(config.translation.lang_out.as_deref(), Some("zh"));
        assert_eq!(config.queue.job_timeout_secs, Some(600));
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.translation.bilingual);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_invalid_version() {
        let err = load_config_from_str(r#"{ "version": "2.0" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = load_config_from_str(r#"{ "queue": { "job_timeout_secs": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_multi_word_language_rejected() {
        let err =
            load_config_from_str(r#"{ "translation": { "lang_in": "en fr" } }"#).unwrap_err();
        assert!(err.to_string().contains("translation.lang_in"));
    }

    #[test]
    fn test_malformed_json() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doctrans.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "version: \"1.0\"\nenvironment:\n  executable: /opt/pdf2zh/bin/pdf2zh\nlogging:\n  level: debug\n  format: json"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.environment.executable.as_deref(),
            Some("/opt/pdf2zh/bin/pdf2zh")
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
