//! Resolution of the external tool environment.
//!
//! A job needs three things on disk before it can run: the interpreter,
//! the tool manager, and the translation executable itself. The queue asks
//! an [`EnvironmentProvisioner`] for them at the start of every run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::EnvironmentConfig;
use crate::error::ProvisionError;

/// Absolute locations of the tools a translation run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub interpreter_path: PathBuf,
    pub tool_manager_path: PathBuf,
    pub executable_path: PathBuf,
    /// Prepended to the child's `PATH`.
    pub tool_bin_dir: PathBuf,
}

#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Resolves (and, for implementations that can, installs) the tools.
    /// Called once per run; implementations may cache.
    async fn ensure(&self) -> Result<ResolvedEnvironment, ProvisionError>;
}

/// Finds the tools from explicit config paths or by searching `PATH`.
///
/// A successful resolution is cached for the lifetime of the provisioner.
/// Failures are not cached, so installing a missing tool fixes the next run.
pub struct PathProvisioner {
    config: EnvironmentConfig,
    resolved: OnceCell<ResolvedEnvironment>,
}

impl PathProvisioner {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            config,
            resolved: OnceCell::new(),
        }
    }

    fn resolve(&self) -> Result<ResolvedEnvironment, ProvisionError> {
        let interpreter_path = locate(
            &self.config.interpreter_name,
            self.config.interpreter.as_deref(),
        )?;
        let tool_manager_path = locate(
            &self.config.tool_manager_name,
            self.config.tool_manager.as_deref(),
        )?;
        let executable_path = locate(
            &self.config.executable_name,
            self.config.executable.as_deref(),
        )?;
        let tool_bin_dir = executable_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        log::info!(
            "Resolved translation environment: interpreter={}, tool manager={}, executable={}",
            interpreter_path.display(),
            tool_manager_path.display(),
            executable_path.display()
        );

        Ok(ResolvedEnvironment {
            interpreter_path,
            tool_manager_path,
            executable_path,
            tool_bin_dir,
        })
    }
}

#[async_trait]
impl EnvironmentProvisioner for PathProvisioner {
    async fn ensure(&self) -> Result<ResolvedEnvironment, ProvisionError> {
        self.resolved
            .get_or_try_init(|| async { self.resolve() })
            .await
            .cloned()
    }
}

fn locate(name: &str, explicit: Option<&str>) -> Result<PathBuf, ProvisionError> {
    if let Some(path) = explicit {
        let path = crate::config::expand_home(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ProvisionError::NotAFile {
            tool: name.to_string(),
            path,
        });
    }

    find_on_path(name).ok_or_else(|| ProvisionError::Missing {
        tool: name.to_string(),
        searched: std::env::var("PATH").unwrap_or_default(),
    })
}

/// Searches the directories of `PATH` for `name`. On Windows the `.exe`
/// suffix is tried as well.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(name);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", name));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
