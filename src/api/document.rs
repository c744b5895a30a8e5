use std::sync::Arc;

use crate::api::coordinator::MutationCoordinator;
use crate::auth::{NoSubjectProvider, SubjectProvider};
use crate::error::{MirrorError, MirrorResult};
use crate::local::{DocumentMirror, MirrorWriter};
use crate::model::{Entity, MutationVars};
use crate::remote::{Datastore, DocumentSnapshot, ListenerRegistration, SubscriptionManager};
use crate::util::{Observer, Unsubscribe};

/// Live local mirror of a single document.
///
/// The mirror holds one slot; `stream_one` keeps it fed from a document
/// subscription and mutations are confirmed against the backing
/// [`Datastore`]. Clones share the same slot and stream.
pub struct DocumentApi<T: Entity> {
    inner: Arc<DocumentInner<T>>,
}

struct DocumentInner<T: Entity> {
    mirror: Arc<DocumentMirror<T>>,
    datastore: Arc<dyn Datastore<T>>,
    coordinator: MutationCoordinator<T>,
    subscriptions: SubscriptionManager,
}

impl<T: Entity> Clone for DocumentApi<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> DocumentApi<T> {
    pub fn new(datastore: Arc<dyn Datastore<T>>) -> Self {
        Self::with_subjects(datastore, Arc::new(NoSubjectProvider::default()))
    }

    pub fn with_subjects(
        datastore: Arc<dyn Datastore<T>>,
        subjects: Arc<dyn SubjectProvider>,
    ) -> Self {
        let mirror = Arc::new(DocumentMirror::new());
        let coordinator = MutationCoordinator::new(
            Arc::clone(&datastore),
            Arc::clone(&mirror) as Arc<dyn MirrorWriter<T>>,
            subjects,
        );
        Self {
            inner: Arc::new(DocumentInner {
                mirror,
                datastore,
                coordinator,
                subscriptions: SubscriptionManager::new(),
            }),
        }
    }

    pub fn mirror(&self) -> Arc<DocumentMirror<T>> {
        Arc::clone(&self.inner.mirror)
    }

    // --- synchronous reads ---

    pub fn get(&self) -> Option<T> {
        self.inner.mirror.get()
    }

    pub fn exists(&self) -> bool {
        self.inner.mirror.exists()
    }

    pub fn require(&self) -> MirrorResult<T> {
        self.inner.mirror.require()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.mirror.is_ready()
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&Option<T>) + Send + Sync + 'static,
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

    /// Remote point read applied to the mirror; absence clears the slot.
    pub async fn fetch_one(&self, id: &str) -> MirrorResult<Option<T>> {
        self.inner.coordinator.fetch(id).await
    }

    // --- local-only mutations ---

    pub fn create_local<F>(&self, build: F) -> T
    where
        F: FnOnce(&MutationVars) -> T,
    {
        self.inner.coordinator.create_local(build)
    }

    /// Panics when the mirror does not hold `id`.
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

    /// Panics when the mirror does not hold `id`.
    pub fn delete_local(&self, id: &str) {
        self.inner.coordinator.delete_local(id)
    }

    // --- streaming ---

    /// Streams one document into the mirror, releasing any previous stream
    /// before the new one starts.
    pub fn stream_one(&self, id: &str) {
        self.stream_one_observed(id, Observer::default())
    }

    pub fn stream_one_observed(&self, id: &str, observer: Observer<DocumentSnapshot<T>>) {
        self.inner
            .subscriptions
            .start(|| self.document_subscription(id, observer));
    }

    pub fn stop_stream(&self) {
        self.inner.subscriptions.stop();
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.subscriptions.is_active()
    }

    /// Stops the stream. The mirrored value and `ready` stay as they were.
    pub fn dispose(&self) {
        self.inner.subscriptions.stop();
    }

    fn document_subscription(
        &self,
        id: &str,
        forward: Observer<DocumentSnapshot<T>>,
    ) -> ListenerRegistration {
        let mirror = Arc::clone(&self.inner.mirror);
        let on_next = forward.clone();
        let on_error = forward;
        let observer = Observer::new()
            .with_next(move |snapshot: &DocumentSnapshot<T>| {
                mirror.replace(snapshot.data().cloned(), true);
                on_next.emit(snapshot);
            })
            .with_error(move |error: &MirrorError| {
                log::warn!("document stream error: {error}");
                on_error.emit_error(error);
            });
        self.inner.datastore.subscribe_document(id, observer)
    }
}
