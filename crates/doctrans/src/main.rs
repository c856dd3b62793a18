use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use doctrans::config::HistoryBackend;
use doctrans::db::Database;
use doctrans::logging::init_logging;
use doctrans::worker::TranslationQueueBuilder;
use doctrans::{
    load_config, Config, HistoryStore, JobEventBroadcaster, JobInput, JobStatus,
    MemoryHistoryStore, QueueEvent, SqliteHistoryStore, TranslationQueue,
};

#[derive(Parser, Debug)]
#[command(name = "doctrans")]
#[command(version)]
#[command(about = "Queue PDF documents for translation and track their history")]
#[command(propagate_version = true)]
struct Args {
    /// Path to a JSON or YAML config file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Translate documents one after another
    Translate {
        /// Documents to translate, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Hide the translation tool's output lines
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// List past jobs, newest first
    History {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record where a finished job's output was saved
    Save { id: String, dest: PathBuf },

    /// Translate a past job's document again as a new job
    Rerun {
        id: String,

        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Delete a job from history
    Remove { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_history(config: &Config) -> doctrans::Result<Arc<dyn HistoryStore>> {
    Ok(match config.history.backend {
        HistoryBackend::Sqlite => {
            let db = Database::open(&config.database_path())?;
            Arc::new(SqliteHistoryStore::new(db))
        }
        HistoryBackend::Memory => Arc::new(MemoryHistoryStore::new()),
    })
}

async fn run(args: Args) -> doctrans::Result<ExitCode> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging)?;

    let broadcaster = JobEventBroadcaster::default();
    let queue = TranslationQueueBuilder::from_config(&config)
        .history(open_history(&config)?)
        .events(Arc::new(broadcaster.clone()))
        .build()?;
    queue.recover_interrupted()?;

    match args.command {
        Commands::Translate { files, quiet } => {
            let mut rx = broadcaster.subscribe();
            let mut ids = HashSet::new();
            let mut rejected = false;
            for file in files {
                match std::fs::canonicalize(&file) {
                    Ok(path) if path.is_file() => {
                        let job = queue.enqueue(JobInput::local(path));
                        println!("[{}] queued {}", short_id(&job.id), job.original_name);
                        ids.insert(job.id);
                    }
                    Ok(path) => {
                        eprintln!("Not a file: {}", path.display());
                        rejected = true;
                    }
                    Err(e) => {
                        eprintln!("Cannot read {}: {}", file.display(), e);
                        rejected = true;
                    }
                }
            }
            let ok = supervise(&queue, &mut rx, &ids, quiet).await;
            Ok(exit_code(ok && !rejected))
        }

        Commands::Rerun { id, quiet } => {
            let mut rx = broadcaster.subscribe();
            match queue.rerun(&id)? {
                Some(job) => {
                    println!("[{}] queued {}", short_id(&job.id), job.original_name);
                    let ids = HashSet::from([job.id]);
                    Ok(exit_code(supervise(&queue, &mut rx, &ids, quiet).await))
                }
                None => {
                    eprintln!("No job with id {}", id);
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Commands::History { json } => {
            let entries = queue.history()?;
            if json {
                match serde_json::to_string_pretty(&entries) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("Cannot encode history: {}", e);
                        return Ok(ExitCode::FAILURE);
                    }
                }
            } else if entries.is_empty() {
                println!("No translation history.");
            } else {
                for entry in entries {
                    println!(
                        "{}  {:<13} {:>3}%  {}  {}",
                        entry.id,
                        entry.status.as_str(),
                        entry.progress,
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        entry.metadata.title.as_deref().unwrap_or(&entry.original_name)
                    );
                    if let Some(error) = &entry.error {
                        println!("    error: {}", error);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Save { id, dest } => match queue.mark_saved(&id, dest)? {
            Some(job) => {
                println!(
                    "[{}] saved to {}",
                    short_id(&job.id),
                    job.save_path.map(|p| p.display().to_string()).unwrap_or_default()
                );
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("No job with id {}", id);
                Ok(ExitCode::FAILURE)
            }
        },

        Commands::Remove { id } => {
            if queue.remove_from_history(&id)? {
                println!("Removed {}", id);
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("No job with id {}", id);
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

/// Prints events for `ids` until the queue is idle. Returns whether every
/// job ended without failing.
async fn supervise(
    queue: &TranslationQueue,
    rx: &mut tokio::sync::broadcast::Receiver<QueueEvent>,
    ids: &HashSet<String>,
    quiet: bool,
) -> bool {
    if ids.is_empty() {
        return true;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => print_event(&event, ids, quiet),
                Err(RecvError::Lagged(n)) => log::warn!("Skipped {} queue events", n),
                Err(RecvError::Closed) => break,
            },
            _ = queue.wait_idle() => {
                loop {
                    match rx.try_recv() {
                        Ok(event) => print_event(&event, ids, quiet),
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }

    ids.iter()
        .filter_map(|id| queue.get_job(id))
        .all(|job| job.status != JobStatus::Failed)
}

fn print_event(event: &QueueEvent, ids: &HashSet<String>, quiet: bool) {
    if !ids.contains(event.job_id()) {
        return;
    }
    match event {
        QueueEvent::Status {
            job_id,
            status,
            progress,
            ..
        } => match progress {
            Some(p) => println!("[{}] {} {}%", short_id(job_id), status, p),
            None => println!("[{}] {}", short_id(job_id), status),
        },
        QueueEvent::Progress { job_id, line, .. } => {
            if !quiet {
                println!("[{}]   | {}", short_id(job_id), line);
            }
        }
        QueueEvent::Completed {
            job_id, outcome, ..
        } => {
            if outcome.success {
                let dir = outcome
                    .output_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                println!("[{}] done, output in {}", short_id(job_id), dir);
                println!("    save with: doctrans save {} <dest>", job_id);
            } else {
                println!(
                    "[{}] failed: {}",
                    short_id(job_id),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
