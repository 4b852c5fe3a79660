//! In-process realtime store.
//!
//! Holds one JSON tree behind a mutex and fans changes out to listeners over
//! unbounded channels. Used by tests and the demo binary, and as the reference
//! behaviour any production connector must match.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use watchparty_core::{ServerTime, StorePath};

use super::{ChildAdded, StoreConnector, StoreError, Subscription};

enum Sink {
    Value {
        tx: mpsc::UnboundedSender<Option<Value>>,
        last: Option<Value>,
    },
    ChildAdded {
        tx: mpsc::UnboundedSender<ChildAdded>,
        seen: HashSet<String>,
    },
}

struct Listener {
    id: u64,
    path: StorePath,
    sink: Sink,
}

#[derive(Default)]
struct Inner {
    root: Value,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    push_seq: u64,
    last_push_millis: i64,
    fail_reads: bool,
    fail_writes: bool,
}

/// Shared in-memory store. Clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail until turned off again.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Make every subsequent write fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Copy of the whole tree.
    pub fn dump(&self) -> Value {
        self.inner.lock().root.clone()
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn disposer(&self, id: u64) -> impl FnOnce() + Send + 'static {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.retain(|l| l.id != id);
            }
        }
    }

    fn write_with(
        &self,
        path: &StorePath,
        apply: impl FnOnce(&mut Value, i64),
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StoreError::Unavailable(format!("write to {path} rejected")));
        }
        apply(&mut inner.root, now_millis());
        inner.notify(path);
        Ok(())
    }
}

impl Inner {
    fn add_listener(&mut self, path: &StorePath, sink: Sink) -> u64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push(Listener {
            id,
            path: path.clone(),
            sink,
        });
        id
    }

    fn notify(&mut self, written: &StorePath) {
        let root = &self.root;
        self.listeners.retain_mut(|listener| {
            if !written.overlaps(&listener.path) {
                return true;
            }
            let current = lookup(root, &listener.path);
            match &mut listener.sink {
                Sink::Value { tx, last } => {
                    if current == last.as_ref() {
                        return true;
                    }
                    *last = current.cloned();
                    tx.send(last.clone()).is_ok()
                }
                Sink::ChildAdded { tx, seen } => {
                    let Some(Value::Object(children)) = current else {
                        seen.clear();
                        return !tx.is_closed();
                    };
                    seen.retain(|key| children.contains_key(key));
                    for (key, value) in children {
                        if seen.insert(key.clone()) {
                            let event = ChildAdded {
                                key: key.clone(),
                                value: value.clone(),
                            };
                            if tx.send(event).is_err() {
                                return false;
                            }
                        }
                    }
                    true
                }
            }
        });
    }

    fn next_push_key(&mut self) -> String {
        let millis = now_millis().max(self.last_push_millis);
        self.last_push_millis = millis;
        self.push_seq += 1;
        format!("-{millis:012x}{:08x}", self.push_seq)
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(StoreError::Unavailable(format!("read of {path} rejected")));
        }
        Ok(lookup(&inner.root, path).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.write_with(path, |root, now| {
            let mut value = value;
            resolve_server_values(&mut value, now);
            write(root, path.segments(), value);
        })
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.write_with(path, |root, now| {
            for (key, mut value) in fields {
                resolve_server_values(&mut value, now);
                write(root, path.child(&key).segments(), value);
            }
        })
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StoreError::Unavailable(format!("push to {path} rejected")));
        }
        let key = inner.next_push_key();
        let child = path.child(&key);
        let mut value = value;
        resolve_server_values(&mut value, now_millis());
        write(&mut inner.root, child.segments(), value);
        inner.notify(&child);
        Ok(key)
    }

    fn subscribe_value(&self, path: &StorePath) -> Subscription<Option<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.inner.lock();
            let current = lookup(&inner.root, path).cloned();
            // Queued under the lock so the initial snapshot always comes first.
            let _ = tx.send(current.clone());
            inner.add_listener(path, Sink::Value { tx, last: current })
        };
        Subscription::new(rx, self.disposer(id))
    }

    fn subscribe_child_added(&self, path: &StorePath) -> Subscription<ChildAdded> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.inner.lock();
            let seen = match lookup(&inner.root, path) {
                Some(Value::Object(children)) => children.keys().cloned().collect(),
                _ => HashSet::new(),
            };
            inner.add_listener(path, Sink::ChildAdded { tx, seen })
        };
        Subscription::new(rx, self.disposer(id))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    (!node.is_null()).then_some(node)
}

/// Write `value` at `segments`, creating parents. `Null` or an empty object
/// removes the node and prunes parents left empty.
fn write(root: &mut Value, segments: &[String], value: Value) {
    let value = normalize(value);
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove(root, parents, last);
        return;
    }

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(obj) = node else {
            return;
        };
        node = obj.entry(segment.clone()).or_insert(Value::Null);
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(obj) = node {
        obj.insert(last.clone(), value);
    }
}

/// Remove `parents/last`; returns whether the parent became empty.
fn remove(node: &mut Value, parents: &[String], last: &str) -> bool {
    let Some(obj) = node.as_object_mut() else {
        return false;
    };
    match parents.split_first() {
        None => {
            obj.remove(last);
        }
        Some((head, rest)) => {
            let emptied = obj
                .get_mut(head)
                .is_some_and(|child| remove(child, rest, last));
            if emptied {
                obj.remove(head);
            }
        }
    }
    obj.is_empty()
}

/// Drop null children and empty objects, the way the store never keeps them.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let cleaned: Map<String, Value> = obj
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

fn resolve_server_values(value: &mut Value, now: i64) {
    if ServerTime::is_sentinel(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(obj) => obj
            .values_mut()
            .for_each(|child| resolve_server_values(child, now)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| resolve_server_values(child, now)),
        _ => {}
    }
}
