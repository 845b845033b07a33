use crate::error::BackendError;
use crate::types::{ChangeBatch, CollectionQuery, Document};
use std::future::Future;
use tokio::sync::mpsc;

/// Batches pushed by a live query. Dropping the receiver ends the
/// subscription on the backend side.
pub type ChangeStream = mpsc::UnboundedReceiver<ChangeBatch>;

/// The managed document service the store sits on.
///
/// Durability, query execution, fan-out and reconnection all live behind
/// this trait.
pub trait DocumentBackend: Send + Sync + 'static {
    /// Start a live query. The first batch carries the current result set as
    /// `added` changes.
    fn subscribe_ordered_collection(
        &self,
        query: &CollectionQuery,
    ) -> impl Future<Output = Result<ChangeStream, BackendError>> + Send;

    /// Create a document and return its backend-assigned id. Fields holding
    /// the server timestamp sentinel are resolved by the backend.
    fn create_document(
        &self,
        collection: &str,
        data: Document,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;

    /// Merge `fields` into an existing document as one write.
    fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
