use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_extract::{Extractor, KeywordFilter};
use jobwatch_storage::{JsonSeenStore, SeenStore};
use jobwatch_sync::{run_once_with, NotificationStatus, WatchConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobwatch-cli")]
#[command(about = "Watch a job listing page and mail newly posted openings")]
struct Cli {
    /// Listing page to scrape.
    #[arg(long, global = true)]
    url: Option<String>,
    /// JSON file holding already reported posting ids.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, dedupe, notify and persist once.
    Run,
    /// Run the extractor over a saved HTML file; touches neither state nor mail.
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show how many posting ids are persisted.
    Seen,
}

impl Cli {
    fn config(&self) -> WatchConfig {
        let mut config = WatchConfig::from_env();
        if let Some(url) = &self.url {
            config.target_url = url.clone();
        }
        if let Some(path) = &self.state_file {
            config.state_file = path.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.http_timeout_secs = secs;
        }
        config
    }
}

fn notification_label(status: &NotificationStatus) -> String {
    match status {
        NotificationStatus::NotAttempted => "not-attempted".to_string(),
        NotificationStatus::Sent => "sent".to_string(),
        NotificationStatus::Skipped { missing } => {
            format!("skipped (missing {})", missing.join(", "))
        }
        NotificationStatus::Failed { reason } => format!("failed ({reason})"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = run_once_with(config).await?;
            info!(
                run_id = %summary.run_id,
                candidates = summary.candidates,
                new = summary.new_postings.len(),
                notification = %notification_label(&summary.notification),
                persisted = summary.persisted,
                "run complete"
            );
        }
        Commands::Extract { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let extractor = Extractor::new(KeywordFilter::new(&config.keywords));
            let extraction = extractor.extract(&bytes);
            for posting in &extraction.postings {
                println!("{}\t{}", posting.url, posting.display_text);
            }
            info!(
                file = %file.display(),
                keywords = ?extractor.filter().keywords(),
                tables = extraction.stats.tables,
                data_rows = extraction.stats.data_rows,
                matched = extraction.stats.matched_rows,
                without_link = extraction.stats.rows_without_link,
                postings = extraction.postings.len(),
                "extraction finished"
            );
        }
        Commands::Seen => {
            let store = JsonSeenStore::new(&config.state_file);
            let seen = store.load().await;
            info!(count = seen.len(), path = %store.path().display(), "persisted posting ids");
        }
    }

    Ok(())
}
