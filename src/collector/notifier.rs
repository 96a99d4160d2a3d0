//! Webhook delivery of restock notifications.
//!
//! At-least-once: an event is marked notified only after the sink confirmed
//! delivery with a 2xx, so a failed delivery is retried on the next run. A
//! duplicate message is possible and tolerated; a silently dropped one is
//! not.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

use crate::collector::error::CollectError;
use crate::collector::store::Store;
use crate::collector::{RestockEvent, RunStats};

const EMBED_TITLE_LIMIT: usize = 256;
const COLOR_RESTOCK: u32 = 0xFF9800;
const COLOR_SUMMARY: u32 = 0x4CAF50;

pub struct Notifier {
    client: Client,
    webhook_url: String,
}

impl Notifier {
    pub fn new(webhook_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            webhook_url,
        }
    }

    /// Deliver every not-yet-notified restock event, flipping each row's
    /// flag only on confirmed delivery. Failures are logged and left pending
    /// for the next run.
    pub async fn deliver_pending(&self, store: &dyn Store, stats: &mut RunStats) {
        let pending = match store.pending_restock_events().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "could not list pending restock events");
                return;
            }
        };

        for event in pending {
            match self.post(event_payload(&event)).await {
                Ok(()) => {
                    let Some(id) = event.id else {
                        warn!(title = %event.product_title, "delivered event has no row id");
                        continue;
                    };
                    match store.mark_notified(id).await {
                        Ok(()) => stats.notifications_sent += 1,
                        Err(e) => {
                            // Delivered but not marked: the next run will
                            // send a duplicate, which at-least-once allows.
                            warn!(id, error = %e, "could not mark event notified");
                        }
                    }
                }
                Err(e) => {
                    stats.notifications_failed += 1;
                    warn!(title = %event.product_title, error = %e, "delivery failed, will retry next run");
                }
            }
        }
    }

    /// One aggregate message with the run's counts. Failure here never
    /// touches per-event flags.
    pub async fn send_summary(&self, stats: &RunStats) -> Result<(), CollectError> {
        self.post(summary_payload(stats)).await
    }

    async fn post(&self, payload: Value) -> Result<(), CollectError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CollectError::NotifyDelivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CollectError::NotifyDelivery(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn event_payload(event: &RestockEvent) -> Value {
    let title: String = event.product_title.chars().take(EMBED_TITLE_LIMIT).collect();

    let mut fields = vec![json!({
        "name": "📅 Restock date",
        "value": event.new_event_date,
        "inline": true,
    })];
    if let Some(previous) = &event.previous_event_date {
        fields.push(json!({
            "name": "📆 Previous date",
            "value": previous,
            "inline": true,
        }));
    }

    json!({
        "content": "🔔 **Restock detected**",
        "embeds": [{
            "title": title,
            "url": event.product_url,
            "color": COLOR_RESTOCK,
            "fields": fields,
            "timestamp": event.detected_at.to_rfc3339(),
        }],
    })
}

fn summary_payload(stats: &RunStats) -> Value {
    json!({
        "embeds": [{
            "title": "✅ Collection run complete",
            "color": COLOR_SUMMARY,
            "fields": [
                {
                    "name": "📦 New records",
                    "value": stats.inserted.to_string(),
                    "inline": true,
                },
                {
                    "name": "🔔 Restocks detected",
                    "value": stats.restocks_detected.to_string(),
                    "inline": true,
                },
            ],
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::store::MemoryStore;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn event(previous: Option<&str>) -> RestockEvent {
        RestockEvent {
            id: None,
            product_url: "https://market.test/products/bear-plush".to_string(),
            product_title: "Bear Plush".to_string(),
            previous_event_date: previous.map(String::from),
            new_event_date: "2024-05-10".to_string(),
            detected_at: Utc::now(),
            notified: false,
        }
    }

    /// Minimal webhook double: answers sequential connections with the given
    /// status lines.
    async fn spawn_webhook(statuses: Vec<&'static str>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for status in statuses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 16384];
                let mut read = 0;
                loop {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) => break,
                        Ok(n) => {
                            read += n;
                            let Some(headers_end) =
                                buf[..read].windows(4).position(|w| w == b"\r\n\r\n")
                            else {
                                if read == buf.len() {
                                    break;
                                }
                                continue;
                            };
                            let headers = String::from_utf8_lossy(&buf[..headers_end]);
                            let body_len: usize = headers
                                .lines()
                                .find_map(|l| {
                                    l.to_lowercase()
                                        .strip_prefix("content-length:")
                                        .map(|v| v.trim().parse().unwrap_or(0))
                                })
                                .unwrap_or(0);
                            if read >= headers_end + 4 + body_len {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}/webhook")
    }

    #[test]
    fn event_payload_carries_both_dates_and_link() {
        let payload = event_payload(&event(Some("2024-05-01")));
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "Bear Plush");
        assert_eq!(embed["url"], "https://market.test/products/bear-plush");
        assert_eq!(embed["fields"][0]["value"], "2024-05-10");
        assert_eq!(embed["fields"][1]["value"], "2024-05-01");
    }

    #[test]
    fn unknown_previous_date_omits_the_field() {
        let payload = event_payload(&event(None));
        let fields = payload["embeds"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let mut long = event(None);
        long.product_title = "ぬ".repeat(300);
        let payload = event_payload(&long);
        let title = payload["embeds"][0]["title"].as_str().unwrap();
        assert_eq!(title.chars().count(), EMBED_TITLE_LIMIT);
    }

    #[test]
    fn summary_payload_reports_run_counts() {
        let stats = RunStats {
            inserted: 4,
            restocks_detected: 2,
            ..RunStats::default()
        };
        let payload = summary_payload(&stats);
        let fields = &payload["embeds"][0]["fields"];
        assert_eq!(fields[0]["value"], "4");
        assert_eq!(fields[1]["value"], "2");
    }

    #[tokio::test]
    async fn confirmed_delivery_marks_the_event_notified() {
        let store = MemoryStore::new();
        store.insert_restock_event(&event(None)).await.unwrap();

        let url = spawn_webhook(vec!["204 No Content"]).await;
        let notifier = Notifier::new(url, 5);

        let mut stats = RunStats::default();
        notifier.deliver_pending(&store, &mut stats).await;

        assert_eq!(stats.notifications_sent, 1);
        assert_eq!(stats.notifications_failed, 0);
        assert!(store.pending_restock_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_leaves_the_event_pending_then_retry_succeeds() {
        let store = MemoryStore::new();
        store.insert_restock_event(&event(Some("2024-05-01"))).await.unwrap();

        let url = spawn_webhook(vec!["500 Internal Server Error"]).await;
        let notifier = Notifier::new(url, 5);
        let mut stats = RunStats::default();
        notifier.deliver_pending(&store, &mut stats).await;

        assert_eq!(stats.notifications_sent, 0);
        assert_eq!(stats.notifications_failed, 1);
        assert_eq!(store.pending_restock_events().await.unwrap().len(), 1);

        // Next run against a healthy sink flips the flag.
        let url = spawn_webhook(vec!["200 OK"]).await;
        let notifier = Notifier::new(url, 5);
        let mut stats = RunStats::default();
        notifier.deliver_pending(&store, &mut stats).await;

        assert_eq!(stats.notifications_sent, 1);
        assert!(store.pending_restock_events().await.unwrap().is_empty());
        assert!(store.all_restock_events().await[0].notified);
    }
}
