//! Catalog page retrieval with retry, backoff and page enumeration.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::warn;

use crate::collector::error::CollectError;
use crate::collector::CollectorConfig;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Reference to one catalog page: either the release-calendar page for a
/// date, or one page of the paginated new-arrivals listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRef {
    Date(NaiveDate),
    Index(u32),
}

impl PageRef {
    pub fn url(&self, base: &str) -> String {
        match self {
            PageRef::Date(date) => {
                format!("{}/collections/release-calendar/{}", base, date.format("%Y-%m-%d"))
            }
            PageRef::Index(n) => format!("{}/collections/new-arrivals?page={}", base, n),
        }
    }
}

/// How one HTTP response should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    /// No catalog exists for this page. Not an error.
    Missing,
    /// Worth retrying with backoff.
    Transient,
    /// Retrying will not help.
    Fatal,
}

fn status_disposition(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Disposition::Missing
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Disposition::Transient
    } else {
        Disposition::Fatal
    }
}

pub struct Fetcher {
    client: Client,
    base_url: String,
    page_depth: u32,
    retry_attempts: u32,
    retry_backoff: Duration,
    request_delay: Duration,
}

impl Fetcher {
    pub fn new(config: &CollectorConfig) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .unwrap(),
        );
        headers.insert("Accept-Language", "ja,en-US;q=0.9,en;q=0.8".parse().unwrap());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.catalog_base_url.trim_end_matches('/').to_string(),
            page_depth: config.page_depth,
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }

    /// Pages relevant to the current run: the release-calendar page for
    /// today, then the first `page_depth` pages of the new-arrivals listing.
    /// Enumeration is a fetcher policy; callers never hard-code pages.
    pub fn enumerate_pages(&self) -> Vec<PageRef> {
        let mut pages = vec![PageRef::Date(Utc::now().date_naive())];
        for n in 1..=self.page_depth {
            pages.push(PageRef::Index(n));
        }
        pages
    }

    pub fn page_url(&self, page: &PageRef) -> String {
        page.url(&self.base_url)
    }

    /// Retrieve one page. `Ok(None)` means the page has no catalog (a day
    /// without releases); transient failures are retried with exponential
    /// backoff before surfacing as `CollectError::Fetch`.
    pub async fn fetch(&self, page: &PageRef) -> Result<Option<String>, CollectError> {
        let url = self.page_url(page);

        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }

        let mut last_reason = String::new();
        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                sleep(self.retry_backoff * 2u32.pow(attempt - 1)).await;
            }

            let user_agent = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0]);

            let response = match self
                .client
                .get(&url)
                .header("User-Agent", user_agent)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    // Connect errors and timeouts are transient by nature.
                    last_reason = e.to_string();
                    warn!(url = %url, attempt = attempt + 1, error = %e, "request failed");
                    continue;
                }
            };

            match status_disposition(response.status()) {
                Disposition::Success => {
                    let body = response.text().await.map_err(|e| CollectError::Fetch {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                    if body.is_empty() {
                        last_reason = "empty response body".to_string();
                        continue;
                    }
                    return Ok(Some(body));
                }
                Disposition::Missing => return Ok(None),
                Disposition::Transient => {
                    last_reason = format!("HTTP {}", response.status());
                    warn!(url = %url, attempt = attempt + 1, status = %response.status(), "retrying");
                }
                Disposition::Fatal => {
                    return Err(CollectError::Fetch {
                        url,
                        reason: format!("HTTP {}", response.status()),
                    });
                }
            }
        }

        Err(CollectError::Fetch {
            url,
            reason: format!("retries exhausted: {last_reason}"),
        })
    }
}
