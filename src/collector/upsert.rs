//! Insert-or-update of classified records, keyed by `source_id`.

use chrono::Utc;

use crate::collector::error::CollectError;
use crate::collector::store::Store;
use crate::collector::{InformationRow, ProductRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Every mutable field already matched; no write was issued.
    Unchanged,
}

pub struct UpsertEngine;

impl UpsertEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge one record against the prior row the caller already read.
    /// Absent prior: insert with `created_at` = now. Present: update every
    /// mutable field, leaving `created_at` alone. Re-applying an identical
    /// record issues no write at all.
    pub async fn apply(
        &self,
        store: &dyn Store,
        prior: Option<InformationRow>,
        record: ProductRecord,
    ) -> Result<UpsertOutcome, CollectError> {
        match prior {
            None => {
                let row = InformationRow {
                    id: None,
                    source: record.source,
                    source_id: record.source_id,
                    title: record.title,
                    content: record.content,
                    url: record.url,
                    images: record.images,
                    price: record.price,
                    status: record.status,
                    category: record.category,
                    published_at: record.observed_at,
                    event_date: record.event_date,
                    created_at: Utc::now(),
                };
                store.insert_information(&row).await?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(prior) => {
                if unchanged(&prior, &record) {
                    return Ok(UpsertOutcome::Unchanged);
                }

                let row = InformationRow {
                    title: record.title,
                    content: record.content,
                    url: record.url,
                    images: record.images,
                    price: record.price,
                    status: record.status,
                    category: record.category,
                    published_at: record.observed_at,
                    event_date: record.event_date,
                    ..prior
                };
                store.update_information(&row).await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }
}

impl Default for UpsertEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// True when every mutable field of the stored row already equals the
/// incoming observation. Timestamps are excluded: a re-observed identical
/// product is not a change.
fn unchanged(prior: &InformationRow, record: &ProductRecord) -> bool {
    prior.title == record.title
        && prior.content == record.content
        && prior.url == record.url
        && prior.images == record.images
        && prior.price == record.price
        && prior.status == record.status
        && prior.category == record.category
        && prior.event_date == record.event_date
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::store::MemoryStore;
    use crate::collector::Status;

    fn record(price: Option<i64>) -> ProductRecord {
        ProductRecord {
            source: "market".to_string(),
            source_id: "abc123".to_string(),
            title: "Bear Plush".to_string(),
            content: None,
            url: "https://market.test/products/bear-plush".to_string(),
            images: vec!["https://cdn.market.test/bear.jpg".to_string()],
            price,
            status: Status::New,
            category: "goods".to_string(),
            event_date: Some("2024-05-01".to_string()),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn absent_prior_inserts_with_created_at() {
        let store = MemoryStore::new();
        let engine = UpsertEngine::new();

        let outcome = engine.apply(&store, None, record(Some(1980))).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let rows = store.information_rows().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].id.is_some());
    }

    #[tokio::test]
    async fn present_prior_updates_and_keeps_created_at() {
        let store = MemoryStore::new();
        let engine = UpsertEngine::new();

        engine.apply(&store, None, record(Some(1980))).await.unwrap();
        let prior = store.find_by_source_id("abc123").await.unwrap().unwrap();
        let created_at = prior.created_at;

        let outcome = engine
            .apply(&store, Some(prior), record(Some(2480)))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let row = store.find_by_source_id("abc123").await.unwrap().unwrap();
        assert_eq!(row.price, Some(2480));
        assert_eq!(row.created_at, created_at);
        assert_eq!(store.information_rows().await.len(), 1);
    }

    #[tokio::test]
    async fn identical_record_is_a_no_op() {
        let store = MemoryStore::new();
        let engine = UpsertEngine::new();

        engine.apply(&store, None, record(Some(1980))).await.unwrap();
        let prior = store.find_by_source_id("abc123").await.unwrap().unwrap();
        let before = prior.clone();

        let outcome = engine
            .apply(&store, Some(prior), record(Some(1980)))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let after = store.find_by_source_id("abc123").await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_by_the_store() {
        let store = MemoryStore::new();
        let engine = UpsertEngine::new();

        engine.apply(&store, None, record(Some(1980))).await.unwrap();
        // A second insert for the same source_id must hit the uniqueness
        // constraint rather than create a second row.
        let err = engine.apply(&store, None, record(Some(1980))).await.unwrap_err();
        assert!(matches!(err, CollectError::StoreWrite(_)));
        assert_eq!(store.information_rows().await.len(), 1);
    }
}
