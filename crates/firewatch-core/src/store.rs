use crate::backend::DocumentBackend;
use crate::error::BackendError;
use crate::ledger::NotificationLedger;
use crate::mirror::{IncidentMirror, MirrorOutcome};
use crate::recorder::Recorder;
use crate::stats::{self, ReportStats};
use crate::types::{
    server_timestamp, ChangeBatch, CollectionQuery, Document, IncidentRecord, IncidentStatus,
    Notification,
};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Emitted after every change to the store's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    BatchApplied {
        added: usize,
        modified: usize,
        removed: usize,
        ignored: usize,
    },
    ReportPatched {
        id: String,
    },
    NotificationsChanged {
        unread: usize,
    },
}

#[derive(Debug, Default)]
struct StoreState {
    mirror: IncidentMirror,
    ledger: NotificationLedger,
}

/// Reactive mirror of the fire report collection.
///
/// Two write paths converge on the same records: pushed batches from the
/// live query, and optimistic patches applied after a backend write
/// succeeds. Both set the same field values, so applying one after the other
/// is harmless in either order.
pub struct FireReportStore<B> {
    backend: Arc<B>,
    collection: String,
    state: Arc<RwLock<StoreState>>,
    events: broadcast::Sender<StoreEvent>,
    recorder: Option<Arc<Mutex<Recorder>>>,
}

impl<B> Clone for FireReportStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            collection: self.collection.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl<B: DocumentBackend> FireReportStore<B> {
    pub fn new(backend: Arc<B>, collection: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            collection: collection.into(),
            state: Arc::new(RwLock::new(StoreState::default())),
            events,
            recorder: None,
        }
    }

    /// Append every pushed batch to `recorder` before applying it.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(Arc::new(Mutex::new(recorder)));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Start mirroring the live query. Batches are applied on a spawned task
    /// until the returned handle is cancelled or the backend ends the stream.
    pub async fn subscribe(&self) -> Result<SubscriptionHandle, BackendError> {
        let query = CollectionQuery::fire_reports(self.collection.clone());
        let mut stream = self.backend.subscribe_ordered_collection(&query).await?;
        info!("Subscribed to {} ordered by {}", query.collection, query.order_by);

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let store = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        debug!("Subscription to {} cancelled", store.collection);
                        break;
                    }
                    batch = stream.recv() => match batch {
                        Some(batch) => store.apply_batch(batch).await,
                        None => {
                            warn!("Change stream for {} closed by backend", store.collection);
                            break;
                        }
                    }
                }
            }
        });

        Ok(SubscriptionHandle {
            _guard: token.clone().drop_guard(),
            token,
            task,
        })
    }

    async fn apply_batch(&self, batch: ChangeBatch) {
        if let Some(recorder) = &self.recorder {
            let mut recorder = recorder.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = recorder.record_batch(&self.collection, &batch) {
                warn!("Failed to record batch: {}", e);
            }
        }

        let (mut added, mut modified, mut removed, mut ignored) = (0, 0, 0, 0);
        let unread = {
            let mut state = self.state.write().await;
            for change in &batch {
                let outcome = state.mirror.apply(change);
                match outcome {
                    MirrorOutcome::Added(record) => {
                        added += 1;
                        state.ledger.add_notification(&record);
                    }
                    MirrorOutcome::Modified => modified += 1,
                    MirrorOutcome::Removed => removed += 1,
                    MirrorOutcome::Ignored => ignored += 1,
                }
            }
            state.ledger.unread_count()
        };

        debug!(
            "Applied batch: {} added, {} modified, {} removed, {} ignored",
            added, modified, removed, ignored
        );
        let _ = self.events.send(StoreEvent::BatchApplied {
            added,
            modified,
            removed,
            ignored,
        });
        if added > 0 {
            let _ = self.events.send(StoreEvent::NotificationsChanged { unread });
        }
    }

    /// Create a report. The record shows up locally only once the backend
    /// pushes it back.
    pub async fn create_incident(&self, mut data: Document) -> Result<String, BackendError> {
        data.insert("createdAt".to_string(), server_timestamp());
        match self.backend.create_document(&self.collection, data).await {
            Ok(id) => {
                info!("Document written with id {}", id);
                Ok(id)
            }
            Err(e) => {
                error!("Error adding fire report: {}", e);
                Err(e)
            }
        }
    }

    pub async fn set_status(&self, id: &str, status: IncidentStatus) -> Result<(), BackendError> {
        let mut fields = Document::new();
        fields.insert("status".to_string(), json!(status.as_str()));
        if let Err(e) = self.backend.update_document(&self.collection, id, fields).await {
            error!("Error updating status of report {}: {}", id, e);
            return Err(e);
        }

        let patched = self.state.write().await.mirror.patch_status(id, status);
        if patched {
            let _ = self.events.send(StoreEvent::ReportPatched { id: id.to_string() });
        }
        Ok(())
    }

    /// Assign a handler. Assignment resolves the report in the same write.
    pub async fn assign_handler(&self, id: &str, handler: &str) -> Result<(), BackendError> {
        let mut fields = Document::new();
        fields.insert("assignedTo".to_string(), json!(handler));
        fields.insert("status".to_string(), json!(IncidentStatus::Resolved.as_str()));
        if let Err(e) = self.backend.update_document(&self.collection, id, fields).await {
            error!("Error assigning handler {} to report {}: {}", handler, id, e);
            return Err(e);
        }

        let patched = self.state.write().await.mirror.patch_assignment(id, handler);
        if patched {
            let _ = self.events.send(StoreEvent::ReportPatched { id: id.to_string() });
        }
        Ok(())
    }

    pub async fn mark_read(&self, notification_id: &str) -> bool {
        let (changed, unread) = {
            let mut state = self.state.write().await;
            let changed = state.ledger.mark_read(notification_id);
            (changed, state.ledger.unread_count())
        };
        if changed {
            let _ = self.events.send(StoreEvent::NotificationsChanged { unread });
        }
        changed
    }

    pub async fn mark_all_read(&self) {
        let unread = {
            let mut state = self.state.write().await;
            state.ledger.mark_all_read();
            state.ledger.unread_count()
        };
        let _ = self.events.send(StoreEvent::NotificationsChanged { unread });
    }

    /// Drop every read notification. Returns how many were removed.
    pub async fn clear_read(&self) -> usize {
        let (removed, unread) = {
            let mut state = self.state.write().await;
            let removed = state.ledger.clear_read();
            (removed, state.ledger.unread_count())
        };
        let _ = self.events.send(StoreEvent::NotificationsChanged { unread });
        removed
    }

    pub async fn reports(&self) -> Vec<IncidentRecord> {
        self.state.read().await.mirror.reports().to_vec()
    }

    pub async fn report(&self, id: &str) -> Option<IncidentRecord> {
        self.state.read().await.mirror.get(id).cloned()
    }

    pub async fn recent_reports(&self) -> Vec<IncidentRecord> {
        stats::recent(self.state.read().await.mirror.reports()).to_vec()
    }

    pub async fn stats(&self) -> ReportStats {
        let state = self.state.read().await;
        ReportStats::compute(state.mirror.reports(), state.ledger.unread_count())
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.ledger.to_vec()
    }

    pub async fn unread_count(&self) -> usize {
        self.state.read().await.ledger.unread_count()
    }
}

/// Keeps a live query running. Cancelling stops the pump task, which drops
/// the backend stream. Dropping the handle cancels too.
#[derive(Debug)]
pub struct SubscriptionHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait for the pump to stop.
    pub async fn unsubscribe(self) {
        let Self { token, task, .. } = self;
        token.cancel();
        if let Err(e) = task.await {
            warn!("Subscription task ended abnormally: {}", e);
        }
    }
}
