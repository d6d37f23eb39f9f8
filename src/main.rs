//! podcast-backup CLI entrypoint

use anyhow::{Context, Result};
use clap::Parser;
use podcast_backup::{Archiver, Config, Event, opml, run_with_shutdown};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Minimum time between two progress lines
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Exit status after SIGINT/SIGTERM, as shells report it for Ctrl+C
const EXIT_INTERRUPTED: u8 = 130;

/// Archive every episode of the podcasts listed in an OPML file
#[derive(Parser, Debug)]
#[command(name = "podcast-backup", version, about)]
struct Cli {
    /// OPML file listing the feeds to archive
    opml: PathBuf,

    /// Archive root directory [default: current directory]
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Maximum number of simultaneous HTTP requests
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Maximum number of feeds traversed at the same time
    #[arg(long)]
    feed_concurrency: Option<usize>,

    /// JSON config file; command-line flags take precedence over it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not write `{episode}.json` and `meta.json` metadata files
    #[arg(long)]
    no_metadata: bool,

    /// Do not write shownotes files
    #[arg(long)]
    no_shownotes: bool,
}

impl Cli {
    /// Defaults, then the config file, then flags
    fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(destination) = &self.destination {
            config.destination = destination.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_downloads = concurrency;
        }
        if let Some(feed_concurrency) = self.feed_concurrency {
            config.max_concurrent_feeds = feed_concurrency;
        }
        if self.no_metadata {
            config.write_episode_metadata = false;
        }
        if self.no_shownotes {
            config.write_shownotes = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("podcast-backup: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Setup failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.build_config()?;
    let feeds = opml::read_opml(&cli.opml).context("cannot load subscriptions")?;
    if feeds.is_empty() {
        tracing::warn!(path = %cli.opml.display(), "OPML file lists no feeds");
    }

    let archiver = Archiver::new(config).context("cannot prepare the archive")?;
    let reporter = tokio::spawn(report_progress(archiver.subscribe()));

    let outcome = run_with_shutdown(&archiver, &feeds).await;
    reporter.abort();

    match outcome {
        Some(summary) => {
            tracing::info!("{summary}");
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
    }
}

/// Progress line throttling and the failure tally shown in it
#[derive(Debug, Default)]
struct ProgressLog {
    last_logged: Option<Instant>,
    failed: u64,
    failed_feeds: u64,
}

impl ProgressLog {
    /// Fold `event` in; true when a progress line is due at `now`
    fn observe(&mut self, event: &Event, now: Instant) -> bool {
        match event {
            Event::Failed { .. } => self.failed += 1,
            Event::FeedFailed { .. } => self.failed_feeds += 1,
            Event::Progress { .. } => {
                let due = self
                    .last_logged
                    .is_none_or(|at| now.duration_since(at) >= PROGRESS_LOG_INTERVAL);
                if due {
                    self.last_logged = Some(now);
                }
                return due;
            }
            _ => {}
        }
        false
    }
}

/// Log progress at most once per [`PROGRESS_LOG_INTERVAL`], with the failures so far
///
/// Each failure is logged with its URL where it happens; this only keeps count.
async fn report_progress(mut events: broadcast::Receiver<Event>) {
    let mut log = ProgressLog::default();

    loop {
        match events.recv().await {
            Ok(event) => {
                let due = log.observe(&event, Instant::now());
                match event {
                    Event::Progress {
                        processed,
                        discovered,
                    } if due => {
                        tracing::info!(
                            processed,
                            discovered,
                            failed = log.failed,
                            failed_feeds = log.failed_feeds,
                            "Progress"
                        );
                    }
                    Event::FeedFinished {
                        name,
                        pages,
                        entries,
                        ..
                    } => {
                        tracing::info!(feed = %name, pages, entries, "Feed complete");
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Progress reporter lagging behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// stderr always; a plain-text copy in `log_file` when given
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(())
}
