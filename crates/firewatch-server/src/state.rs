use chrono::{DateTime, Utc};
use firewatch_core::backend::DocumentBackend;
use firewatch_core::store::{FireReportStore, StoreEvent, SubscriptionHandle};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const EVENT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct StoreEventLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: StoreEvent,
}

pub struct AppState<B> {
    pub store: FireReportStore<B>,
    pub backend_kind: &'static str,
    pub start_time: Instant,
    pub subscription: Arc<RwLock<Option<SubscriptionHandle>>>,
    pub event_log: Arc<RwLock<VecDeque<StoreEventLogEntry>>>,
    pub metrics: Option<PrometheusHandle>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            backend_kind: self.backend_kind,
            start_time: self.start_time,
            subscription: Arc::clone(&self.subscription),
            event_log: Arc::clone(&self.event_log),
            metrics: self.metrics.clone(),
        }
    }
}

impl<B: DocumentBackend> AppState<B> {
    pub fn new(store: FireReportStore<B>, backend_kind: &'static str, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            store,
            backend_kind,
            start_time: Instant::now(),
            subscription: Arc::new(RwLock::new(None)),
            event_log: Arc::new(RwLock::new(VecDeque::new())),
            metrics,
        }
    }

    pub async fn set_subscription(&self, handle: SubscriptionHandle) {
        let previous = self.subscription.write().await.replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub async fn take_subscription(&self) -> Option<SubscriptionHandle> {
        self.subscription.write().await.take()
    }

    pub async fn is_subscribed(&self) -> bool {
        self.subscription
            .read()
            .await
            .as_ref()
            .map(|h| h.is_active())
            .unwrap_or(false)
    }

    pub async fn push_event(&self, event: StoreEvent) {
        let mut log = self.event_log.write().await;
        log.push_back(StoreEventLogEntry {
            timestamp: Utc::now(),
            event,
        });
        while log.len() > EVENT_LOG_CAPACITY {
            log.pop_front();
        }
    }

    /// Most recent `limit` events, oldest first.
    pub async fn get_events(&self, limit: usize) -> Vec<StoreEventLogEntry> {
        let log = self.event_log.read().await;
        let start = log.len().saturating_sub(limit);
        log.iter().skip(start).cloned().collect()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Follow the store's events: keep the activity log and gauges current.
pub fn spawn_event_observer<B: DocumentBackend>(state: AppState<B>) -> tokio::task::JoinHandle<()> {
    let mut events = state.store.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    match &event {
                        StoreEvent::BatchApplied { added, modified, removed, .. } => {
                            crate::metrics::record_change_batch(*added, *modified, *removed);
                            crate::metrics::update_report_gauges(&state.store.stats().await);
                        }
                        StoreEvent::ReportPatched { id } => {
                            debug!("Report {} patched locally", id);
                            crate::metrics::update_report_gauges(&state.store.stats().await);
                        }
                        StoreEvent::NotificationsChanged { unread } => {
                            crate::metrics::update_unread(*unread);
                        }
                    }
                    state.push_event(event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event observer lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
