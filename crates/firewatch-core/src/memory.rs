use crate::backend::{ChangeStream, DocumentBackend};
use crate::error::BackendError;
use crate::types::{
    is_server_timestamp, ChangeBatch, ChangeKind, CollectionQuery, Direction, Document,
    DocumentChange,
};
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// In-process document backend.
///
/// Behaves like the managed service as far as the store can tell: ids are
/// assigned on create, timestamp sentinels are resolved, and every write is
/// fanned out to live subscribers as a one-change batch. Used for replay,
/// offline runs and tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<(String, Document)>>,
    listeners: Vec<Listener>,
    next_id: u64,
    pending_failure: Option<BackendError>,
    writes: u64,
}

struct Listener {
    collection: String,
    tx: mpsc::UnboundedSender<ChangeBatch>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next create/update fail with `error`.
    pub fn fail_next_write(&self, error: BackendError) {
        self.lock().pending_failure = Some(error);
    }

    /// Apply a batch as if it came from elsewhere and push it to listeners.
    pub fn push_batch(&self, collection: &str, batch: ChangeBatch) {
        let mut inner = self.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        for change in &batch {
            let existing = docs.iter().position(|(id, _)| *id == change.id);
            match (change.kind, existing) {
                (ChangeKind::Added | ChangeKind::Modified, Some(i)) => docs[i].1 = change.data.clone(),
                (ChangeKind::Added | ChangeKind::Modified, None) => {
                    docs.push((change.id.clone(), change.data.clone()))
                }
                (ChangeKind::Removed, Some(i)) => {
                    docs.remove(i);
                }
                (ChangeKind::Removed, None) => {}
            }
        }
        inner.broadcast(collection, batch);
    }

    pub fn delete_document(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        let index = docs
            .iter()
            .position(|(doc_id, _)| doc_id == id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        docs.remove(index);
        inner.broadcast(collection, vec![DocumentChange::removed(id)]);
        Ok(())
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)?
            .iter()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(_, doc)| doc.clone())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, Vec::len)
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn listener_count(&self) -> usize {
        let mut inner = self.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }
}

impl Inner {
    fn broadcast(&mut self, collection: &str, batch: ChangeBatch) {
        self.listeners.retain(|listener| {
            if listener.collection != collection {
                return true;
            }
            listener.tx.send(batch.clone()).is_ok()
        });
    }

    fn take_failure(&mut self) -> Result<(), BackendError> {
        match self.pending_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn resolve_sentinels(doc: &mut Document) {
    let now = Utc::now().to_rfc3339();
    for value in doc.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::String(now.clone());
        }
    }
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

impl DocumentBackend for MemoryBackend {
    async fn subscribe_ordered_collection(
        &self,
        query: &CollectionQuery,
    ) -> Result<ChangeStream, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let mut docs = inner
            .collections
            .get(&query.collection)
            .cloned()
            .unwrap_or_default();
        docs.sort_by(|(_, a), (_, b)| {
            let ord = compare_field(a.get(&query.order_by), b.get(&query.order_by));
            match query.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
        let initial: ChangeBatch = docs
            .into_iter()
            .map(|(id, data)| DocumentChange::added(id, data))
            .collect();
        debug!("memory listen on {} ({} initial docs)", query.collection, initial.len());

        // The initial snapshot is delivered even when empty.
        let _ = tx.send(initial);
        inner.listeners.push(Listener {
            collection: query.collection.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn create_document(&self, collection: &str, mut data: Document) -> Result<String, BackendError> {
        let mut inner = self.lock();
        inner.take_failure()?;

        resolve_sentinels(&mut data);
        inner.next_id += 1;
        let id = format!("doc-{}", inner.next_id);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push((id.clone(), data.clone()));
        inner.writes += 1;
        inner.broadcast(collection, vec![DocumentChange::added(id.clone(), data)]);
        Ok(id)
    }

    async fn update_document(&self, collection: &str, id: &str, mut fields: Document) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.take_failure()?;

        resolve_sentinels(&mut fields);
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        doc.extend(fields);
        let data = doc.clone();
        inner.writes += 1;
        inner.broadcast(collection, vec![DocumentChange::modified(id, data)]);
        Ok(())
    }
}
