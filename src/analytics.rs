//! Analytics sink for chat events.
//!
//! Events are queued and posted to `/api/v1/analytics/event` in order. A failed
//! post puts the event back at the head of the queue; it goes out with the
//! next flush.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::events::ChatEvent;

/// Receives chat events. Tracking never blocks the caller and never fails.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: ChatEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track(&self, _event: ChatEvent) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub metadata: Value,
}

impl AnalyticsEvent {
    pub fn from_chat(event: &ChatEvent) -> Self {
        let mut metadata = event.metadata();
        if let Value::Object(map) = &mut metadata {
            map.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
            map.insert(
                "user_agent".into(),
                Value::String(format!("portfolio-chat/{}", env!("CARGO_PKG_VERSION"))),
            );
        }
        Self {
            event_type: event.event_type().to_string(),
            metadata,
        }
    }
}

/// Events kept while the endpoint is unreachable; the oldest go first
pub const MAX_QUEUED_EVENTS: usize = 100;

struct Inner {
    api: ApiClient,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    flushing: Mutex<()>,
}

impl Inner {
    async fn push(&self, event: AnalyticsEvent) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= MAX_QUEUED_EVENTS {
            if let Some(dropped) = queue.pop_front() {
                warn!(event_type = %dropped.event_type, "analytics queue full, dropping oldest event");
            }
        }
        queue.push_back(event);
    }

    /// Post queued events in order. Returns false when a post failed.
    async fn drain(&self) -> bool {
        loop {
            let Some(event) = self.queue.lock().await.pop_front() else {
                return true;
            };

            if let Err(e) = self.api.post("/api/v1/analytics/event", Some(&event)).await {
                warn!(event_type = %event.event_type, error = %e, "failed to track analytics event");
                self.queue.lock().await.push_front(event);
                return false;
            }
            debug!(event_type = %event.event_type, "analytics event delivered");
        }
    }
}

/// Queued HTTP analytics
#[derive(Clone)]
pub struct HttpAnalytics {
    inner: Arc<Inner>,
}

impl HttpAnalytics {
    pub fn new(api: ApiClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                queue: Mutex::new(VecDeque::new()),
                flushing: Mutex::new(()),
            }),
        }
    }

    /// Deliver everything queued, waiting for any flush already running
    pub async fn flush(&self) {
        let _guard = self.inner.flushing.lock().await;
        self.inner.drain().await;
    }

    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    async fn enqueue(inner: Arc<Inner>, event: AnalyticsEvent) {
        inner.push(event).await;
        loop {
            // Whoever holds the flush lock is already draining.
            let Ok(guard) = inner.flushing.try_lock() else {
                return;
            };
            let delivered = inner.drain().await;
            drop(guard);

            // An event pushed while the lock was held would otherwise wait for
            // the next track or flush.
            if !delivered || inner.queue.lock().await.is_empty() {
                return;
            }
        }
    }
}

impl AnalyticsSink for HttpAnalytics {
    fn track(&self, event: ChatEvent) {
        let event = AnalyticsEvent::from_chat(&event);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::enqueue(self.inner.clone(), event));
            }
            Err(_) => warn!(event_type = %event.event_type, "no runtime, analytics event dropped"),
        }
    }
}
