use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use async_trait::async_trait;

use crate::error::MirrorResult;
use crate::model::{Entity, SubjectId};
use crate::util::subscribe::Observer;

pub mod in_memory;
pub mod listener;
pub mod snapshot;

pub use in_memory::InMemoryDatastore;
pub use listener::{ListenerRegistration, SubscriptionManager};
pub use snapshot::{DocumentSnapshot, QuerySnapshot};

/// A single staged write, applied remotely as part of one atomic commit.
#[derive(Clone, Debug)]
pub enum WriteOperation<T> {
    Set { id: String, data: T, merge: bool },
    Delete { id: String },
}

impl<T> WriteOperation<T> {
    pub fn id(&self) -> &str {
        match self {
            WriteOperation::Set { id, .. } => id,
            WriteOperation::Delete { id } => id,
        }
    }
}

/// The one query family the engine needs: everything, or the documents
/// owned by one subject. The store's own query language stays behind this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryScope {
    All,
    OwnedBy { field: String, subject: SubjectId },
}

impl QueryScope {
    pub fn owned_by(field: impl Into<String>, subject: impl Into<SubjectId>) -> Self {
        QueryScope::OwnedBy {
            field: field.into(),
            subject: subject.into(),
        }
    }
}

/// Access to the remote document store.
///
/// Point operations resolve once; subscriptions deliver full-replace
/// snapshots until their registration is stopped. Subscription errors go
/// through the observer's error callback, never through a return value.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Datastore<T: Entity>: Send + Sync + 'static {
    async fn read(&self, id: &str) -> MirrorResult<Option<T>>;
    async fn write(&self, id: &str, data: &T, merge: bool) -> MirrorResult<()>;
    async fn delete(&self, id: &str) -> MirrorResult<()>;
    async fn commit(&self, writes: Vec<WriteOperation<T>>) -> MirrorResult<()>;
    fn subscribe_document(
        &self,
        id: &str,
        observer: Observer<DocumentSnapshot<T>>,
    ) -> ListenerRegistration;
    fn subscribe_query(
        &self,
        scope: &QueryScope,
        observer: Observer<QuerySnapshot<T>>,
    ) -> ListenerRegistration;
    fn new_document_id(&self) -> String {
        generate_document_id()
    }
}

/// Generates a 20 character alphanumeric document id.
pub fn generate_document_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(20)
        .collect()
}
