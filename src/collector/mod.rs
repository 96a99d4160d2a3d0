//! Catalog collection and restock-detection engine.
//!
//! One run walks the pipeline in order (fetch, parse, classify, upsert,
//! restock detection, notify) over the set of enumerated catalog pages.
//! Per-page and per-record failures are contained and counted; only missing
//! configuration aborts a run.

pub mod classifier;
pub mod error;
pub mod fetcher;
pub mod notifier;
pub mod parser;
pub mod restock;
pub mod store;
pub mod upsert;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use classifier::Classifier;
use error::CollectError;
use fetcher::Fetcher;
use notifier::Notifier;
use parser::CatalogParser;
use restock::RestockDetector;
use store::Store;
use upsert::{UpsertEngine, UpsertOutcome};

/// Listing status of a product observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    New,
    Restock,
}

/// A fully classified product observation, ready to be merged into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub images: Vec<String>,
    pub price: Option<i64>,
    pub status: Status,
    pub category: String,
    /// Release or restock date, normalized to `YYYY-MM-DD`.
    pub event_date: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Persisted row of the `information` table. `source_id` is globally unique;
/// a row is updated in place on later sightings, never duplicated and never
/// deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub images: Vec<String>,
    pub price: Option<i64>,
    pub status: Status,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub event_date: Option<String>,
    /// Set once on first insert, untouched afterwards.
    pub created_at: DateTime<Utc>,
}

/// Persisted row of the `restock_history` table. Created when a known product
/// is re-observed with a different event date; `notified` flips to true at
/// most once and never back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub product_url: String,
    pub product_title: String,
    pub previous_event_date: Option<String>,
    pub new_event_date: String,
    pub detected_at: DateTime<Utc>,
    pub notified: bool,
}

/// Run-level counters, threaded through the pipeline as an explicit
/// accumulator and logged as the run summary on every non-fatal completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_parsed: usize,
    pub records_skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub restocks_detected: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages fetched ({} failed), {} records parsed ({} skipped), \
             {} inserted, {} updated, {} unchanged, {} restocks detected, \
             {} notifications sent ({} failed)",
            self.pages_fetched,
            self.pages_failed,
            self.records_parsed,
            self.records_skipped,
            self.inserted,
            self.updated,
            self.unchanged,
            self.restocks_detected,
            self.notifications_sent,
            self.notifications_failed,
        )
    }
}

/// Configuration for one collection run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Fixed origin tag written into every stored row.
    pub source_tag: String,
    /// Root of the watched catalog site.
    pub catalog_base_url: String,
    /// How many listing index pages to walk per run, in addition to the
    /// current date page.
    pub page_depth: u32,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Politeness delay before each page request.
    pub request_delay_ms: u64,
    /// Store endpoint (PostgREST-compatible). Required.
    pub store_url: String,
    /// Store credential. Required.
    pub store_key: String,
    /// Webhook sink for restock notifications. When absent the notification
    /// stage is skipped entirely.
    pub webhook_url: Option<String>,
    /// Send one aggregate summary message per run.
    pub notify_summary: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            source_tag: "market".to_string(),
            catalog_base_url: "https://chiikawamarket.jp".to_string(),
            page_depth: 3,
            request_timeout_secs: 15,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            request_delay_ms: 500,
            store_url: String::new(),
            store_key: String::new(),
            webhook_url: None,
            notify_summary: false,
        }
    }
}

impl CollectorConfig {
    /// Build a config from the environment. `STORE_URL` and `STORE_KEY` are
    /// required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self, CollectError> {
        let store_url = std::env::var("STORE_URL")
            .map_err(|_| CollectError::FatalConfig("STORE_URL is not set".to_string()))?;
        let store_key = std::env::var("STORE_KEY")
            .map_err(|_| CollectError::FatalConfig("STORE_KEY is not set".to_string()))?;

        let mut config = Self {
            store_url,
            store_key,
            ..Self::default()
        };

        if let Ok(v) = std::env::var("WEBHOOK_URL") {
            if !v.is_empty() {
                config.webhook_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("NOTIFY_SUMMARY") {
            config.notify_summary = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CATALOG_BASE_URL") {
            if !v.is_empty() {
                config.catalog_base_url = v.trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = std::env::var("CATALOG_PAGE_DEPTH") {
            if let Ok(n) = v.parse() {
                config.page_depth = n;
            }
        }
        if let Ok(v) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.request_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("RETRY_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                config.retry_attempts = n;
            }
        }

        Ok(config)
    }
}

/// The collection engine. Owns one instance of every pipeline stage plus the
/// store handle, and executes the stages strictly in order.
pub struct Collector {
    config: CollectorConfig,
    fetcher: Fetcher,
    parser: CatalogParser,
    classifier: Classifier,
    upsert: UpsertEngine,
    detector: RestockDetector,
    notifier: Option<Notifier>,
    store: Arc<dyn Store>,
}

impl Collector {
    pub fn new(config: CollectorConfig, store: Arc<dyn Store>) -> Self {
        let notifier = config
            .webhook_url
            .as_ref()
            .map(|url| Notifier::new(url.clone(), config.request_timeout_secs));

        Self {
            fetcher: Fetcher::new(&config),
            parser: CatalogParser::new(),
            classifier: Classifier::new(),
            upsert: UpsertEngine::new(),
            detector: RestockDetector::new(),
            notifier,
            store,
            config,
        }
    }

    /// Execute one full collection run and return its counters.
    pub async fn run(&self) -> RunStats {
        let mut stats = RunStats::default();

        for page in self.fetcher.enumerate_pages() {
            let page_url = self.fetcher.page_url(&page);
            match self.fetcher.fetch(&page).await {
                Ok(Some(body)) => {
                    stats.pages_fetched += 1;
                    self.process_page(&body, &page_url, &mut stats).await;
                }
                Ok(None) => {
                    debug!(url = %page_url, "no catalog for page");
                }
                Err(e) => {
                    stats.pages_failed += 1;
                    warn!(url = %page_url, error = %e, "page skipped");
                }
            }
        }

        if let Some(notifier) = &self.notifier {
            notifier.deliver_pending(self.store.as_ref(), &mut stats).await;

            if self.config.notify_summary {
                if let Err(e) = notifier.send_summary(&stats).await {
                    warn!(error = %e, "summary delivery failed");
                }
            }
        } else {
            debug!("no webhook configured, notification stage skipped");
        }

        info!(summary = %stats, "collection run finished");
        stats
    }

    /// Parse one fetched page and merge every extracted record.
    pub async fn process_page(&self, body: &str, page_url: &str, stats: &mut RunStats) {
        let outcome = self.parser.parse_page(body, page_url);
        stats.records_parsed += outcome.products.len();
        stats.records_skipped += outcome.skipped;

        for parsed in outcome.products {
            let source_id = parsed.source_id.clone();
            if let Err(e) = self.process_record(parsed, stats).await {
                stats.records_skipped += 1;
                warn!(source_id = %source_id, error = %e, "record skipped");
            }
        }
    }

    /// Merge a single parsed record: read the prior row, classify, detect a
    /// restock against the pre-upsert value, then apply the write. The prior
    /// `event_date` is captured before the upsert overwrites it.
    async fn process_record(
        &self,
        parsed: parser::ParsedProduct,
        stats: &mut RunStats,
    ) -> Result<(), CollectError> {
        let prior = self.store.find_by_source_id(&parsed.source_id).await?;

        let record = self
            .classifier
            .classify(parsed, prior.as_ref(), &self.config.source_tag);

        let event = self.detector.detect(prior.as_ref(), &record);

        match self.upsert.apply(self.store.as_ref(), prior, record).await? {
            UpsertOutcome::Inserted => stats.inserted += 1,
            UpsertOutcome::Updated => stats.updated += 1,
            UpsertOutcome::Unchanged => stats.unchanged += 1,
        }

        if let Some(event) = event {
            self.store.insert_restock_event(&event).await?;
            stats.restocks_detected += 1;
        }

        Ok(())
    }
}
