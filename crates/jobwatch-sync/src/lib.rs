//! One watch run: load seen-set, fetch + extract, dedupe, notify, persist.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use jobwatch_core::{Posting, SeenSet};
use jobwatch_extract::{ExtractStats, Extraction, Extractor, KeywordFilter, DEFAULT_KEYWORDS};
use jobwatch_notify::{EmailNotifier, MailConfig, Notifier, NotifyOutcome};
use jobwatch_storage::{
    FetchError, HttpClientConfig, HttpFetcher, JsonSeenStore, PageFetcher, SeenStore, StoreError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-sync";

pub const DEFAULT_TARGET_URL: &str = "https://github.com/SimplifyJobs/New-Grad-Positions";
pub const DEFAULT_STATE_FILE: &str = "processed_jobs.json";

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub target_url: String,
    pub state_file: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub keywords: Vec<String>,
    pub mail: MailConfig,
}

impl WatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let keywords = lookup("JOBWATCH_KEYWORDS")
            .map(|raw| {
                raw.split(',')
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect());

        Self {
            target_url: lookup("JOBWATCH_TARGET_URL")
                .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
            state_file: lookup("JOBWATCH_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            http_timeout_secs: lookup("JOBWATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            user_agent: lookup("JOBWATCH_USER_AGENT")
                .unwrap_or_else(|| format!("jobwatch/{}", env!("CARGO_PKG_VERSION"))),
            keywords,
            mail: MailConfig::from_parts(
                lookup(jobwatch_notify::SENDER_ENV),
                lookup(jobwatch_notify::RECIPIENT_ENV),
                lookup(jobwatch_notify::PASSWORD_ENV),
                lookup("SMTP_HOST"),
                lookup("SMTP_PORT").and_then(|v| v.parse().ok()),
            ),
        }
    }

    /// A zero timeout would fail every fetch instantly, so it falls back to the client default.
    pub fn http_timeout(&self) -> Duration {
        match self.http_timeout_secs {
            0 => HttpClientConfig::default().timeout,
            secs => Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub new_postings: Vec<Posting>,
    pub updated_seen: SeenSet,
}

/// Splits candidates into unseen postings and the grown seen-set, in extraction order.
///
/// A repeated id later in the same batch counts as seen, since the first copy already
/// entered the set.
pub fn partition(candidates: Vec<Posting>, seen: SeenSet) -> Partition {
    let mut updated_seen = seen;
    let mut new_postings = Vec::new();
    for posting in candidates {
        if updated_seen.insert(posting.id.clone()) {
            new_postings.push(posting);
        }
    }
    Partition {
        new_postings,
        updated_seen,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStage {
    LoadState,
    Fetch,
    Extract,
    Dedupe,
    Notify,
    Persist,
    Done,
}

fn enter(stage: RunStage) {
    debug!(?stage, "run stage");
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("persisting seen-set failed: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    NotAttempted,
    Sent,
    Skipped { missing: Vec<&'static str> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target_url: String,
    pub previously_seen: usize,
    pub candidates: usize,
    pub extract_stats: Option<ExtractStats>,
    pub new_postings: Vec<Posting>,
    pub notification: NotificationStatus,
    pub persisted: bool,
    pub fetch_error: Option<String>,
}

impl RunSummary {
    fn finish(mut self) -> Self {
        enter(RunStage::Done);
        self.finished_at = Utc::now();
        self
    }
}

pub struct WatchPipeline {
    target_url: String,
    store: Arc<dyn SeenStore>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
    notifier: Arc<dyn Notifier>,
}

impl WatchPipeline {
    pub fn new(config: WatchConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
        })?;
        Ok(Self::from_parts(
            config.target_url,
            Arc::new(JsonSeenStore::new(config.state_file)),
            Arc::new(fetcher),
            Extractor::new(KeywordFilter::new(&config.keywords)),
            Arc::new(EmailNotifier::new(config.mail)),
        ))
    }

    pub fn from_parts(
        target_url: impl Into<String>,
        store: Arc<dyn SeenStore>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Extractor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            store,
            fetcher,
            extractor,
            notifier,
        }
    }

    pub async fn scrape(&self) -> Result<Extraction, ScrapeError> {
        enter(RunStage::Fetch);
        let body = self.fetcher.fetch(&self.target_url).await?;
        enter(RunStage::Extract);
        Ok(self.extractor.extract(&body))
    }

    /// Only a failed state write aborts the run; fetch and notify failures are logged and
    /// recorded in the summary.
    pub async fn run_once(&self) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("watch_run", %run_id, url = %self.target_url);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();

        enter(RunStage::LoadState);
        let seen = self.store.load().await;
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            target_url: self.target_url.clone(),
            previously_seen: seen.len(),
            candidates: 0,
            extract_stats: None,
            new_postings: Vec::new(),
            notification: NotificationStatus::NotAttempted,
            persisted: false,
            fetch_error: None,
        };

        let extraction = match self.scrape().await {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(error = %err, "fetch failed; state left unchanged");
                summary.fetch_error = Some(err.to_string());
                return Ok(summary.finish());
            }
        };
        summary.candidates = extraction.postings.len();
        summary.extract_stats = Some(extraction.stats);
        info!(count = summary.candidates, "found potential postings matching keywords");

        enter(RunStage::Dedupe);
        let Partition {
            new_postings,
            updated_seen,
        } = partition(extraction.postings, seen);

        if new_postings.is_empty() {
            info!("no new postings found");
            return Ok(summary.finish());
        }
        info!(count = new_postings.len(), "new postings found");

        enter(RunStage::Notify);
        summary.notification = match self.notifier.notify(&new_postings).await {
            Ok(NotifyOutcome::Sent { .. }) => NotificationStatus::Sent,
            Ok(NotifyOutcome::Skipped { missing }) => NotificationStatus::Skipped { missing },
            Err(err) => {
                warn!(error = %err, "notification failed; persisting state anyway");
                NotificationStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };

        enter(RunStage::Persist);
        self.store.save(&updated_seen).await?;
        summary.persisted = true;
        summary.new_postings = new_postings;
        Ok(summary.finish())
    }
}

pub async fn run_once_with(config: WatchConfig) -> Result<RunSummary> {
    let pipeline = WatchPipeline::new(config)?;
    Ok(pipeline.run_once().await?)
}
