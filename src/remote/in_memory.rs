use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_lock::Mutex;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{generic_error, MirrorError, MirrorResult};
use crate::model::Entity;
use crate::platform::runtime::spawn_detached;
use crate::util::subscribe::Observer;

use super::listener::ListenerRegistration;
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::{Datastore, QueryScope, WriteOperation};

struct DocumentListenerEntry<T> {
    id: u64,
    document_id: String,
    observer: Observer<DocumentSnapshot<T>>,
}

struct QueryListenerEntry<T> {
    id: u64,
    scope: QueryScope,
    observer: Observer<QuerySnapshot<T>>,
}

struct StoreInner<T> {
    documents: Mutex<BTreeMap<String, Value>>,
    document_listeners: StdMutex<Vec<DocumentListenerEntry<T>>>,
    query_listeners: StdMutex<Vec<QueryListenerEntry<T>>>,
    listener_counter: AtomicU64,
    next_read_error: StdMutex<Option<MirrorError>>,
    next_write_error: StdMutex<Option<MirrorError>>,
    next_delete_error: StdMutex<Option<MirrorError>>,
    next_commit_error: StdMutex<Option<MirrorError>>,
}

/// In-memory store implementing the full remote contract, for tests and demos.
///
/// Documents are held as JSON trees (the store's native format) and converted
/// at the boundary. Listeners receive their initial snapshot asynchronously,
/// mirroring the round trip a real backend adds; every successful mutation
/// then re-delivers full-replace snapshots to affected listeners. The
/// `inject_*` hooks arm a one-shot failure for the next matching operation so
/// rollback paths can be exercised without a real backend.
pub struct InMemoryDatastore<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for InMemoryDatastore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for InMemoryDatastore<T>
where
    T: Entity + Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryDatastore<T>
where
    T: Entity + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                documents: Mutex::new(BTreeMap::new()),
                document_listeners: StdMutex::new(Vec::new()),
                query_listeners: StdMutex::new(Vec::new()),
                listener_counter: AtomicU64::new(1),
                next_read_error: StdMutex::new(None),
                next_write_error: StdMutex::new(None),
                next_delete_error: StdMutex::new(None),
                next_commit_error: StdMutex::new(None),
            }),
        }
    }

    /// Fails the next `read` with `error`.
    pub fn inject_read_error(&self, error: MirrorError) {
        *self.inner.next_read_error.lock().unwrap() = Some(error);
    }

    /// Fails the next `write` with `error`.
    pub fn inject_write_error(&self, error: MirrorError) {
        *self.inner.next_write_error.lock().unwrap() = Some(error);
    }

    /// Fails the next `delete` with `error`.
    pub fn inject_delete_error(&self, error: MirrorError) {
        *self.inner.next_delete_error.lock().unwrap() = Some(error);
    }

    /// Fails the next `commit` with `error`, before any write is applied.
    pub fn inject_commit_error(&self, error: MirrorError) {
        *self.inner.next_commit_error.lock().unwrap() = Some(error);
    }

    /// Delivers `error` to every live query listener's error callback.
    pub fn emit_query_error(&self, error: &MirrorError) {
        let observers: Vec<_> = {
            let guard = self.inner.query_listeners.lock().unwrap();
            guard.iter().map(|entry| entry.observer.clone()).collect()
        };
        for observer in observers {
            observer.emit_error(error);
        }
    }

    /// Delivers `error` to the error callbacks of listeners on `id`.
    pub fn emit_document_error(&self, id: &str, error: &MirrorError) {
        let observers: Vec<_> = {
            let guard = self.inner.document_listeners.lock().unwrap();
            guard
                .iter()
                .filter(|entry| entry.document_id == id)
                .map(|entry| entry.observer.clone())
                .collect()
        };
        for observer in observers {
            observer.emit_error(error);
        }
    }

    /// Total number of live listeners, document and query combined.
    pub fn active_listener_count(&self) -> usize {
        let documents = self.inner.document_listeners.lock().unwrap().len();
        let queries = self.inner.query_listeners.lock().unwrap().len();
        documents + queries
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.documents.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.documents.lock().await.is_empty()
    }
}

impl<T> StoreInner<T>
where
    T: Entity + Serialize + DeserializeOwned,
{
    fn encode(id: &str, data: &T) -> MirrorResult<Value> {
        serde_json::to_value(data).map_err(|err| {
            generic_error(format!("failed to encode document: {err}")).with_document_id(id)
        })
    }

    fn decode(id: &str, value: &Value) -> MirrorResult<T> {
        serde_json::from_value(value.clone()).map_err(|err| {
            generic_error(format!("failed to decode document: {err}")).with_document_id(id)
        })
    }

    fn scope_matches(scope: &QueryScope, value: &Value) -> bool {
        match scope {
            QueryScope::All => true,
            QueryScope::OwnedBy { field, subject } => value
                .get(field)
                .and_then(Value::as_str)
                .map(|owner| owner == subject)
                .unwrap_or(false),
        }
    }

    async fn apply_set(&self, id: &str, value: Value, merge: bool) {
        let mut documents = self.documents.lock().await;
        let next = if merge {
            match (documents.get(id), &value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    let mut merged = existing.clone();
                    for (field, field_value) in incoming {
                        merged.insert(field.clone(), field_value.clone());
                    }
                    Value::Object(merged)
                }
                _ => value,
            }
        } else {
            value
        };
        documents.insert(id.to_string(), next);
    }

    async fn apply_delete(&self, id: &str) {
        self.documents.lock().await.remove(id);
    }

    async fn document_snapshot(&self, id: &str) -> MirrorResult<DocumentSnapshot<T>> {
        let value = { self.documents.lock().await.get(id).cloned() };
        let data = match value {
            Some(value) => Some(Self::decode(id, &value)?),
            None => None,
        };
        Ok(DocumentSnapshot::new(id, data))
    }

    async fn query_snapshot(&self, scope: &QueryScope) -> MirrorResult<QuerySnapshot<T>> {
        let entries: Vec<(String, Value)> = {
            let documents = self.documents.lock().await;
            documents
                .iter()
                .filter(|(_, value)| Self::scope_matches(scope, value))
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect()
        };
        let mut decoded = Vec::with_capacity(entries.len());
        for (id, value) in &entries {
            decoded.push(Self::decode(id, value)?);
        }
        Ok(QuerySnapshot::new(decoded))
    }

    async fn notify_document_listeners(&self, id: &str) {
        let observers: Vec<_> = {
            let guard = self.document_listeners.lock().unwrap();
            guard
                .iter()
                .filter(|entry| entry.document_id == id)
                .map(|entry| entry.observer.clone())
                .collect()
        };
        if observers.is_empty() {
            return;
        }
        match self.document_snapshot(id).await {
            Ok(snapshot) => {
                for observer in observers {
                    observer.emit(&snapshot);
                }
            }
            Err(error) => {
                for observer in observers {
                    observer.emit_error(&error);
                }
            }
        }
    }

    async fn notify_query_listeners(&self) {
        let targets: Vec<(QueryScope, Observer<QuerySnapshot<T>>)> = {
            let guard = self.query_listeners.lock().unwrap();
            guard
                .iter()
                .map(|entry| (entry.scope.clone(), entry.observer.clone()))
                .collect()
        };
        for (scope, observer) in targets {
            match self.query_snapshot(&scope).await {
                Ok(snapshot) => observer.emit(&snapshot),
                Err(error) => observer.emit_error(&error),
            }
        }
    }

    async fn deliver_initial_document_snapshot(&self, listener_id: u64) {
        let pending = {
            let guard = self.document_listeners.lock().unwrap();
            guard
                .iter()
                .find(|entry| entry.id == listener_id)
                .map(|entry| (entry.document_id.clone(), entry.observer.clone()))
        };
        if let Some((document_id, observer)) = pending {
            match self.document_snapshot(&document_id).await {
                Ok(snapshot) => observer.emit(&snapshot),
                Err(error) => observer.emit_error(&error),
            }
        }
    }

    async fn deliver_initial_query_snapshot(&self, listener_id: u64) {
        let pending = {
            let guard = self.query_listeners.lock().unwrap();
            guard
                .iter()
                .find(|entry| entry.id == listener_id)
                .map(|entry| (entry.scope.clone(), entry.observer.clone()))
        };
        if let Some((scope, observer)) = pending {
            match self.query_snapshot(&scope).await {
                Ok(snapshot) => observer.emit(&snapshot),
                Err(error) => observer.emit_error(&error),
            }
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<T> Datastore<T> for InMemoryDatastore<T>
where
    T: Entity + Serialize + DeserializeOwned,
{
    async fn read(&self, id: &str) -> MirrorResult<Option<T>> {
        if let Some(error) = self.inner.next_read_error.lock().unwrap().take() {
            return Err(error);
        }
        let value = { self.inner.documents.lock().await.get(id).cloned() };
        match value {
            Some(value) => Ok(Some(StoreInner::decode(id, &value)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, id: &str, data: &T, merge: bool) -> MirrorResult<()> {
        if let Some(error) = self.inner.next_write_error.lock().unwrap().take() {
            return Err(error);
        }
        let value = StoreInner::<T>::encode(id, data)?;
        self.inner.apply_set(id, value, merge).await;
        self.inner.notify_document_listeners(id).await;
        self.inner.notify_query_listeners().await;
        Ok(())
    }

    async fn delete(&self, id: &str) -> MirrorResult<()> {
        if let Some(error) = self.inner.next_delete_error.lock().unwrap().take() {
            return Err(error);
        }
        self.inner.apply_delete(id).await;
        self.inner.notify_document_listeners(id).await;
        self.inner.notify_query_listeners().await;
        Ok(())
    }

    async fn commit(&self, writes: Vec<WriteOperation<T>>) -> MirrorResult<()> {
        if let Some(error) = self.inner.next_commit_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut touched = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                WriteOperation::Set { id, data, merge } => {
                    let value = StoreInner::<T>::encode(&id, &data)?;
                    self.inner.apply_set(&id, value, merge).await;
                    touched.push(id);
                }
                WriteOperation::Delete { id } => {
                    self.inner.apply_delete(&id).await;
                    touched.push(id);
                }
            }
        }
        for id in &touched {
            self.inner.notify_document_listeners(id).await;
        }
        self.inner.notify_query_listeners().await;
        Ok(())
    }

    fn subscribe_document(
        &self,
        id: &str,
        observer: Observer<DocumentSnapshot<T>>,
    ) -> ListenerRegistration {
        let listener_id = self.inner.listener_counter.fetch_add(1, Ordering::SeqCst);
        self.inner
            .document_listeners
            .lock()
            .unwrap()
            .push(DocumentListenerEntry {
                id: listener_id,
                document_id: id.to_string(),
                observer,
            });

        let task_inner = Arc::downgrade(&self.inner);
        spawn_detached(async move {
            if let Some(inner) = task_inner.upgrade() {
                inner.deliver_initial_document_snapshot(listener_id).await;
            }
        });

        let stop_inner = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = stop_inner.upgrade() {
                inner
                    .document_listeners
                    .lock()
                    .unwrap()
                    .retain(|entry| entry.id != listener_id);
            }
        })
    }

    fn subscribe_query(
        &self,
        scope: &QueryScope,
        observer: Observer<QuerySnapshot<T>>,
    ) -> ListenerRegistration {
        let listener_id = self.inner.listener_counter.fetch_add(1, Ordering::SeqCst);
        self.inner
            .query_listeners
            .lock()
            .unwrap()
            .push(QueryListenerEntry {
                id: listener_id,
                scope: scope.clone(),
                observer,
            });

        let task_inner = Arc::downgrade(&self.inner);
        spawn_detached(async move {
            if let Some(inner) = task_inner.upgrade() {
                inner.deliver_initial_query_snapshot(listener_id).await;
            }
        });

        let stop_inner = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = stop_inner.upgrade() {
                inner
                    .query_listeners
                    .lock()
                    .unwrap()
                    .retain(|entry| entry.id != listener_id);
            }
        })
    }
}
