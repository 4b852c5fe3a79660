//! Realtime key-value store connector.
//!
//! The store is an external collaborator: a hierarchical JSON keyspace with
//! server-assigned timestamps, whole-subtree value subscriptions and ordered
//! child-append streams. Nothing here is transactional.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use watchparty_core::StorePath;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store value could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Expected an object to merge, got {0}")]
    NotAnObject(String),
}

/// A child appended under a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildAdded {
    pub key: String,
    pub value: Value,
}

/// Asynchronous access to the realtime store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Current value at `path`, `None` when absent.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Replace the subtree at `path`. Writing `Null` deletes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into `path`; keys may address nested children with `/`.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append `value` under `path` and return its ordered key.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Complete snapshots of `path`: the current one first, then one per change.
    fn subscribe_value(&self, path: &StorePath) -> Subscription<Option<Value>>;

    /// Children appended under `path` after the subscription starts.
    fn subscribe_child_added(&self, path: &StorePath) -> Subscription<ChildAdded>;
}

/// Cancellable stream of store events.
///
/// Dropping the subscription (or calling [`Subscription::cancel`]) runs its
/// disposer, which unregisters the listener from the store.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            disposer: Some(Box::new(disposer)),
        }
    }

    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(self) {
        drop(self);
    }

    fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Encode a record for writing.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

/// Encode a record as a field map for [`StoreConnector::update`].
pub fn encode_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::NotAnObject(other.to_string())),
    }
}

/// Decode an optional snapshot into a record.
pub fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>, StoreError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}
