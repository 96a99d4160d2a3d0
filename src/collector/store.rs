//! Persistence seam for the `information` and `restock_history` tables.
//!
//! The schema is owned by an external provisioning script; this module only
//! reads and writes rows. Production talks to a PostgREST-compatible endpoint
//! ([`RestStore`]); the test suite runs the same pipeline against
//! [`MemoryStore`]. Both enforce the `source_id` uniqueness that the whole
//! pipeline leans on.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::Mutex;

use crate::collector::error::CollectError;
use crate::collector::{CollectorConfig, InformationRow, RestockEvent};

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> Result<Option<InformationRow>, CollectError>;

    /// Insert a new row. A duplicate `source_id` must fail, not duplicate.
    async fn insert_information(&self, row: &InformationRow) -> Result<(), CollectError>;

    /// Update the row with `row.source_id` in place.
    async fn update_information(&self, row: &InformationRow) -> Result<(), CollectError>;

    async fn insert_restock_event(&self, event: &RestockEvent) -> Result<(), CollectError>;

    /// All events still awaiting notification, oldest first.
    async fn pending_restock_events(&self) -> Result<Vec<RestockEvent>, CollectError>;

    /// Flip `notified` to true. The flag never goes back.
    async fn mark_notified(&self, event_id: i64) -> Result<(), CollectError>;
}

/// PostgREST-compatible HTTP store client.
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &CollectorConfig) -> Result<Self, CollectError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollectError::FatalConfig(format!("store client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.store_url.trim_end_matches('/').to_string(),
            api_key: config.store_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CollectError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(CollectError::StoreWrite(format!("store returned HTTP {status}")))
        }
    }
}

#[async_trait]
impl Store for RestStore {
    async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> Result<Option<InformationRow>, CollectError> {
        let response = self
            .authed(self.client.get(self.table_url("information")))
            .query(&[("source_id", format!("eq.{source_id}")), ("limit", "1".to_string())])
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        let mut rows: Vec<InformationRow> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;
        Ok(rows.pop())
    }

    async fn insert_information(&self, row: &InformationRow) -> Result<(), CollectError> {
        let response = self
            .authed(self.client.post(self.table_url("information")))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn update_information(&self, row: &InformationRow) -> Result<(), CollectError> {
        // Only mutable fields; created_at is set once and never patched.
        let payload = json!({
            "title": row.title,
            "content": row.content,
            "url": row.url,
            "images": row.images,
            "price": row.price,
            "status": row.status,
            "category": row.category,
            "published_at": row.published_at,
            "event_date": row.event_date,
        });

        let response = self
            .authed(self.client.patch(self.table_url("information")))
            .query(&[("source_id", format!("eq.{}", row.source_id))])
            .header("Prefer", "return=minimal")
            .json(&payload)
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn insert_restock_event(&self, event: &RestockEvent) -> Result<(), CollectError> {
        let response = self
            .authed(self.client.post(self.table_url("restock_history")))
            .header("Prefer", "return=minimal")
            .json(event)
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn pending_restock_events(&self) -> Result<Vec<RestockEvent>, CollectError> {
        let response = self
            .authed(self.client.get(self.table_url("restock_history")))
            .query(&[
                ("notified", "eq.false".to_string()),
                ("order", "detected_at.asc".to_string()),
            ])
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))
    }

    async fn mark_notified(&self, event_id: i64) -> Result<(), CollectError> {
        let response = self
            .authed(self.client.patch(self.table_url("restock_history")))
            .query(&[("id", format!("eq.{event_id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "notified": true }))
            .send()
            .await
            .map_err(|e| CollectError::StoreWrite(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }
}

/// In-memory store with the same contract as the REST one.
#[cfg(test)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryInner {
    information: HashMap<String, InformationRow>,
    restocks: Vec<RestockEvent>,
    next_id: i64,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Snapshot of all information rows (test/inspection helper).
    pub async fn information_rows(&self) -> Vec<InformationRow> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.information.values().cloned().collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    /// Snapshot of all restock events in insertion order.
    pub async fn all_restock_events(&self) -> Vec<RestockEvent> {
        self.inner.lock().await.restocks.clone()
    }
}

#[cfg(test)]
impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[async_trait]
impl Store for MemoryStore {
    async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> Result<Option<InformationRow>, CollectError> {
        Ok(self.inner.lock().await.information.get(source_id).cloned())
    }

    async fn insert_information(&self, row: &InformationRow) -> Result<(), CollectError> {
        let mut inner = self.inner.lock().await;
        if inner.information.contains_key(&row.source_id) {
            return Err(CollectError::StoreWrite(format!(
                "duplicate source_id {}",
                row.source_id
            )));
        }
        inner.next_id += 1;
        let mut row = row.clone();
        row.id = Some(inner.next_id);
        inner.information.insert(row.source_id.clone(), row);
        Ok(())
    }

    async fn update_information(&self, row: &InformationRow) -> Result<(), CollectError> {
        let mut inner = self.inner.lock().await;
        match inner.information.get_mut(&row.source_id) {
            Some(stored) => {
                let id = stored.id;
                let created_at = stored.created_at;
                *stored = row.clone();
                stored.id = id;
                stored.created_at = created_at;
                Ok(())
            }
            None => Err(CollectError::StoreWrite(format!(
                "no row for source_id {}",
                row.source_id
            ))),
        }
    }

    async fn insert_restock_event(&self, event: &RestockEvent) -> Result<(), CollectError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let mut event = event.clone();
        event.id = Some(inner.next_id);
        inner.restocks.push(event);
        Ok(())
    }

    async fn pending_restock_events(&self) -> Result<Vec<RestockEvent>, CollectError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .restocks
            .iter()
            .filter(|e| !e.notified)
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, event_id: i64) -> Result<(), CollectError> {
        let mut inner = self.inner.lock().await;
        match inner.restocks.iter_mut().find(|e| e.id == Some(event_id)) {
            Some(event) => {
                event.notified = true;
                Ok(())
            }
            None => Err(CollectError::StoreWrite(format!("no restock event {event_id}"))),
        }
    }
}
