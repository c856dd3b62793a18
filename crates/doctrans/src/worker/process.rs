//! Launching the external translation tool and reading its output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TranslationOptions;
use crate::environment::ResolvedEnvironment;
use crate::error::RunError;
use crate::worker::lines::LineSplitter;

/// Environment variable telling the child where its output belongs.
pub const OUTPUT_DIR_ENV: &str = "DOCTRANS_OUTPUT_DIR";

const READ_CHUNK: usize = 8 * 1024;

/// A fully resolved command line for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub output_dir: PathBuf,
    pub tool_bin_dir: PathBuf,
}

impl Invocation {
    pub fn build(
        env: &ResolvedEnvironment,
        source: &Path,
        output_dir: &Path,
        options: &TranslationOptions,
    ) -> Self {
        let mut args: Vec<OsString> = vec![
            source.as_os_str().to_owned(),
            "--output".into(),
            output_dir.as_os_str().to_owned(),
        ];

        for (flag, value) in [
            ("--lang-in", &options.lang_in),
            ("--lang-out", &options.lang_out),
            ("--service", &options.service),
        ] {
            if let Some(value) = value {
                args.push(flag.into());
                args.push(value.into());
            }
        }

        if !options.bilingual {
            args.push("--no-dual".into());
        }
        if options.debug {
            args.push("--debug".into());
        }

        args.extend(options.args.iter().map(OsString::from));
        args.extend(options.extra_args.split_whitespace().map(OsString::from));

        Self {
            program: env.executable_path.clone(),
            args,
            output_dir: output_dir.to_path_buf(),
            tool_bin_dir: env.tool_bin_dir.clone(),
        }
    }

    fn search_path(&self) -> Option<OsString> {
        let existing = std::env::var_os("PATH").unwrap_or_default();
        let dirs = std::iter::once(self.tool_bin_dir.clone()).chain(std::env::split_paths(&existing));
        match std::env::join_paths(dirs) {
            Ok(joined) => Some(joined),
            Err(e) => {
                log::warn!(
                    "Cannot prepend '{}' to PATH: {}",
                    self.tool_bin_dir.display(),
                    e
                );
                None
            }
        }
    }

    pub fn command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .env(OUTPUT_DIR_ENV, &self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down helpers the tool starts.
        #[cfg(unix)]
        cmd.process_group(0);

        if !self.tool_bin_dir.as_os_str().is_empty() {
            if let Some(path) = self.search_path() {
                cmd.env("PATH", path);
            }
        }
        cmd
    }

    pub fn spawn(&self) -> Result<Child, RunError> {
        log::debug!("Spawning {} {:?}", self.program.display(), self.args);
        self.command().spawn().map_err(|source| RunError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

/// Kills `child` together with everything it started.
///
/// On unix the child leads its own process group (see
/// [`Invocation::command`]) and the whole group gets `SIGKILL`. Elsewhere,
/// or if that fails, only the child itself is killed.
pub async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let group = format!("-{}", pid);
            match TokioCommand::new("kill")
                .args(["-KILL", "--", group.as_str()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
            {
                Ok(status) if status.success() => return,
                Ok(status) => log::warn!("kill {} exited with {}", group, status),
                Err(e) => log::warn!("Failed to run kill for process group {}: {}", pid, e),
            }
        }
    }

    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill translation process: {}", e);
    }
}

/// Reads `stream` until EOF, forwarding each completed line to `tx`.
///
/// Stops early if the receiver is gone.
pub fn pump_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        let mut splitter = LineSplitter::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for line in splitter.push(&buf[..n]) {
                if tx.send(line).is_err() {
                    return Ok(());
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send(line);
        }
        Ok(())
    })
}
