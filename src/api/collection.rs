use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::coordinator::{missing_document, MutationCoordinator};
use crate::api::write_batch::WriteBatch;
use crate::auth::{NoSubjectProvider, SubjectProvider};
use crate::error::{MirrorError, MirrorResult};
use crate::local::{CollectionMirror, MirrorWriter};
use crate::model::{validate_document_id, Entity, MutationVars};
use crate::remote::{
    Datastore, ListenerRegistration, QuerySnapshot, QueryScope, SubscriptionManager,
};
use crate::util::{Observer, Unsubscribe};

/// Live local mirror of a collection of documents.
///
/// Reads are synchronous against the mirror; mutations are optimistic and
/// confirmed against the backing [`Datastore`]; `stream_*` keeps the mirror
/// fed from a query subscription. Clones share the same mirror and stream.
pub struct CollectionApi<T: Entity> {
    inner: Arc<CollectionInner<T>>,
}

struct CollectionInner<T: Entity> {
    mirror: Arc<CollectionMirror<T>>,
    datastore: Arc<dyn Datastore<T>>,
    coordinator: MutationCoordinator<T>,
    subscriptions: SubscriptionManager,
}

impl<T: Entity> Clone for CollectionApi<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> CollectionApi<T> {
    pub fn new(datastore: Arc<dyn Datastore<T>>) -> Self {
        Self::with_subjects(datastore, Arc::new(NoSubjectProvider::default()))
    }

    /// Builds an api whose mutation vars carry the provider's current subject.
    pub fn with_subjects(
        datastore: Arc<dyn Datastore<T>>,
        subjects: Arc<dyn SubjectProvider>,
    ) -> Self {
        let mirror = Arc::new(CollectionMirror::new());
        let coordinator = MutationCoordinator::new(
            Arc::clone(&datastore),
            Arc::clone(&mirror) as Arc<dyn MirrorWriter<T>>,
            subjects,
        );
        Self {
            inner: Arc::new(CollectionInner {
                mirror,
                datastore,
                coordinator,
                subscriptions: SubscriptionManager::new(),
            }),
        }
    }

    pub fn mirror(&self) -> Arc<CollectionMirror<T>> {
        Arc::clone(&self.inner.mirror)
    }

    // --- synchronous reads ---

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.mirror.get(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.inner.mirror.exists(id)
    }

    pub fn require_by_id(&self, id: &str) -> MirrorResult<T> {
        self.inner.mirror.require_by_id(id)
    }

    pub fn find<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.inner.mirror.find(predicate)
    }

    /// All mirrored entities, ordered by identity.
    pub fn all(&self) -> Vec<T> {
        self.inner.mirror.all()
    }

    pub fn len(&self) -> usize {
        self.inner.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.mirror.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.mirror.is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.mirror.is_loading()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.mirror.is_loaded()
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&BTreeMap<String, T>) + Send + Sync + 'static,
    {
        self.inner.mirror.subscribe(callback)
    }

    pub fn force_notify(&self) {
        self.inner.mirror.force_notify()
    }

    // --- optimistic mutations ---

    pub async fn create<F>(&self, build: F) -> MirrorResult<T>
    where
        F: FnOnce(&MutationVars) -> T,
    {
        self.inner.coordinator.create(build).await
    }

    pub async fn update<F>(&self, id: &str, apply: F) -> MirrorResult<T>
    where
        F: FnOnce(&T, &MutationVars) -> T,
    {
        self.inner.coordinator.update(id, apply).await
    }

    pub async fn upsert<F>(&self, id: &str, apply: F) -> MirrorResult<T>
    where
        F: FnOnce(Option<&T>, &MutationVars) -> T,
    {
        self.inner.coordinator.upsert(id, apply).await
    }

    pub async fn delete(&self, id: &str) -> MirrorResult<()> {
        self.inner.coordinator.delete(id).await
    }

    /// Remote point read applied to the mirror; absence removes the entry.
    pub async fn fetch(&self, id: &str) -> MirrorResult<Option<T>> {
        self.inner.coordinator.fetch(id).await
    }

    // --- local-only mutations ---

    pub fn create_local<F>(&self, build: F) -> T
    where
        F: FnOnce(&MutationVars) -> T,
    {
        self.inner.coordinator.create_local(build)
    }

    /// Panics when `id` is absent from the mirror.
    pub fn update_local<F>(&self, id: &str, apply: F) -> T
    where
        F: FnOnce(&T, &MutationVars) -> T,
    {
        self.inner.coordinator.update_local(id, apply)
    }

    pub fn upsert_local<F>(&self, id: &str, apply: F) -> T
    where
        F: FnOnce(Option<&T>, &MutationVars) -> T,
    {
        self.inner.coordinator.upsert_local(id, apply)
    }

    /// Panics when `id` is absent from the mirror.
    pub fn delete_local(&self, id: &str) {
        self.inner.coordinator.delete_local(id)
    }

    // --- batched mutations ---

    /// A fresh batch against this api's datastore. The batch bypasses the
    /// mirror; use the `*_many` operations for mirrored batch mutations.
    pub fn batch(&self) -> WriteBatch<T> {
        WriteBatch::new(Arc::clone(&self.inner.datastore))
    }

    /// Creates every entity locally, then commits them in one batch. Any
    /// staging or commit failure rolls back all local changes from this call.
    pub async fn create_many<F>(&self, builds: Vec<F>) -> MirrorResult<Vec<T>>
    where
        F: FnOnce(&MutationVars) -> T,
    {
        if builds.is_empty() {
            return Ok(Vec::new());
        }
        let mut entities = Vec::with_capacity(builds.len());
        for build in builds {
            let vars = self.inner.coordinator.fresh_vars();
            let entity = build(&vars);
            validate_document_id(entity.id())?;
            entities.push(entity);
        }

        let previous = self.capture(entities.iter().map(|e| e.id().to_string()));
        let changes = entities
            .iter()
            .map(|e| (e.id().to_string(), Some(e.clone())))
            .collect();
        self.inner.mirror.apply_local_many(changes, true);

        self.stage_and_commit_sets("create_many", &entities, previous)
            .await?;
        Ok(entities)
    }

    /// Applies the transform to every listed document. Returns `NotFound`
    /// without touching anything when any id is absent; a failed commit rolls
    /// back all local changes from this call.
    pub async fn update_many<F>(&self, ids: &[&str], apply: F) -> MirrorResult<Vec<T>>
    where
        F: Fn(&T, &MutationVars) -> T,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut currents = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.mirror.get(id) {
                Some(entity) => currents.push(entity),
                None => return Err(missing_document(id)),
            }
        }

        let mut nexts = Vec::with_capacity(ids.len());
        let mut previous = Vec::with_capacity(ids.len());
        let mut changes = Vec::with_capacity(ids.len());
        for (id, current) in ids.iter().zip(currents) {
            let vars = self.inner.coordinator.vars_for(id);
            let next = apply(&current, &vars);
            previous.push((id.to_string(), Some(current)));
            changes.push((id.to_string(), Some(next.clone())));
            nexts.push(next);
        }
        self.inner.mirror.apply_local_many(changes, true);

        self.stage_and_commit_sets("update_many", &nexts, previous)
            .await?;
        Ok(nexts)
    }

    /// Deletes every listed document. Same all-or-nothing policy as
    /// [`update_many`](Self::update_many).
    pub async fn delete_many(&self, ids: &[&str]) -> MirrorResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut previous = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.mirror.get(id) {
                Some(entity) => previous.push((id.to_string(), Some(entity))),
                None => return Err(missing_document(id)),
            }
        }

        let changes = ids.iter().map(|id| (id.to_string(), None)).collect();
        self.inner.mirror.apply_local_many(changes, true);

        let mut batch = self.batch();
        for id in ids {
            if let Err(error) = batch.delete(id) {
                self.rollback_many("delete_many", previous, &error);
                return Err(error);
            }
        }
        if let Err(error) = batch.commit().await {
            self.rollback_many("delete_many", previous, &error);
            return Err(error);
        }
        Ok(())
    }

    async fn stage_and_commit_sets(
        &self,
        operation: &str,
        entities: &[T],
        previous: Vec<(String, Option<T>)>,
    ) -> MirrorResult<()> {
        let mut batch = self.batch();
        for entity in entities {
            if let Err(error) = batch.set(entity.clone(), false) {
                self.rollback_many(operation, previous, &error);
                return Err(error);
            }
        }
        if let Err(error) = batch.commit().await {
            self.rollback_many(operation, previous, &error);
            return Err(error);
        }
        Ok(())
    }

    fn capture(&self, ids: impl Iterator<Item = String>) -> Vec<(String, Option<T>)> {
        ids.map(|id| {
            let existing = self.inner.mirror.get(&id);
            (id, existing)
        })
        .collect()
    }

    fn rollback_many(
        &self,
        operation: &str,
        previous: Vec<(String, Option<T>)>,
        error: &MirrorError,
    ) {
        log::warn!(
            "{} of {} documents failed, rolling back local changes: {}",
            operation,
            previous.len(),
            error
        );
        self.inner.mirror.apply_local_many(previous, true);
    }

    // --- streaming ---

    /// Streams the whole collection into the mirror.
    pub fn stream_all(&self) {
        self.stream_scope(QueryScope::All)
    }

    pub fn stream_all_observed(&self, observer: Observer<QuerySnapshot<T>>) {
        self.stream_scope_observed(QueryScope::All, observer)
    }

    /// Streams one query scope into the mirror, releasing any previous
    /// stream before the new one starts.
    pub fn stream_scope(&self, scope: QueryScope) {
        self.stream_scope_observed(scope, Observer::default())
    }

    pub fn stream_scope_observed(&self, scope: QueryScope, observer: Observer<QuerySnapshot<T>>) {
        self.inner
            .subscriptions
            .start(|| self.scoped_subscription(&scope, observer));
    }

    /// Starts streaming `scope` the first time it is called; later calls are
    /// no-ops once a load has begun.
    pub fn ensure_streaming(&self, scope: QueryScope) {
        if self.inner.mirror.begin_first_load() {
            self.stream_scope(scope);
        }
    }

    pub fn stop_stream(&self) {
        self.inner.subscriptions.stop();
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.subscriptions.is_active()
    }

    /// Stops the stream. Mirrored values and `ready` stay as they were.
    pub fn dispose(&self) {
        self.inner.subscriptions.stop();
    }

    fn scoped_subscription(
        &self,
        scope: &QueryScope,
        forward: Observer<QuerySnapshot<T>>,
    ) -> ListenerRegistration {
        let mirror = Arc::clone(&self.inner.mirror);
        let on_next = forward.clone();
        let on_error = forward;
        let observer = Observer::new()
            .with_next(move |snapshot: &QuerySnapshot<T>| {
                mirror.replace_all(snapshot.documents().to_vec(), true);
                on_next.emit(snapshot);
            })
            .with_error(move |error: &MirrorError| {
                log::warn!("collection stream error: {error}");
                on_error.emit_error(error);
            });
        self.inner.datastore.subscribe_query(scope, observer)
    }
}
