//! Diff-based restock detection.
//!
//! Runs against the prior row as it stood *before* the upsert overwrites it:
//! the engine reads the old value, calls [`RestockDetector::detect`], and
//! only then applies the new value.

use crate::collector::{InformationRow, ProductRecord, RestockEvent};

pub struct RestockDetector;

impl RestockDetector {
    pub fn new() -> Self {
        Self
    }

    /// Emit a restock event iff a prior row exists and the incoming event
    /// date is non-null and differs from the stored one (which may itself be
    /// null, meaning no date was previously known). First sightings never
    /// emit.
    pub fn detect(
        &self,
        prior: Option<&InformationRow>,
        incoming: &ProductRecord,
    ) -> Option<RestockEvent> {
        let prior = prior?;
        let new_date = incoming.event_date.as_deref()?;

        if prior.event_date.as_deref() == Some(new_date) {
            return None;
        }

        Some(RestockEvent {
            id: None,
            product_url: incoming.url.clone(),
            product_title: incoming.title.clone(),
            previous_event_date: prior.event_date.clone(),
            new_event_date: new_date.to_string(),
            detected_at: incoming.observed_at,
            notified: false,
        })
    }
}

impl Default for RestockDetector {
    fn default() -> Self {
        Self::new()
    }
}
