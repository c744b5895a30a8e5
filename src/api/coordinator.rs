use std::sync::Arc;

use crate::auth::SubjectProvider;
use crate::error::{not_found, MirrorError, MirrorResult};
use crate::local::MirrorWriter;
use crate::model::{validate_document_id, Entity, MutationVars};
use crate::remote::Datastore;

/// Pre-mutation value captured before the local apply; consumed by rollback
/// and discarded on success. Lives for the duration of one mutation call.
struct PendingMutation<T> {
    id: String,
    previous: Option<T>,
}

/// The optimistic mutation protocol, shared by both mirror shapes.
///
/// Every remote-confirmed mutation runs the same sequence: run the caller's
/// transform, capture the previous value, apply the new one to the mirror so
/// observers see it immediately, then call the store. A store failure rolls
/// the mirror back to the captured value and surfaces as an `Err`; it never
/// escapes as a panic.
pub(crate) struct MutationCoordinator<T: Entity> {
    datastore: Arc<dyn Datastore<T>>,
    mirror: Arc<dyn MirrorWriter<T>>,
    subjects: Arc<dyn SubjectProvider>,
}

impl<T: Entity> MutationCoordinator<T> {
    pub(crate) fn new(
        datastore: Arc<dyn Datastore<T>>,
        mirror: Arc<dyn MirrorWriter<T>>,
        subjects: Arc<dyn SubjectProvider>,
    ) -> Self {
        Self {
            datastore,
            mirror,
            subjects,
        }
    }

    /// Vars for a mutation that mints its own identity.
    pub(crate) fn fresh_vars(&self) -> MutationVars {
        self.vars_for(&self.datastore.new_document_id())
    }

    /// Vars for a mutation targeting a known identity.
    pub(crate) fn vars_for(&self, id: &str) -> MutationVars {
        MutationVars::new(id.to_string(), self.subjects.current_subject())
    }

    pub(crate) async fn create<F>(&self, build: F) -> MirrorResult<T>
    where
        F: FnOnce(&MutationVars) -> T,
    {
        let vars = self.fresh_vars();
        let entity = build(&vars);
        let id = entity.id().to_string();
        validate_document_id(&id)?;

        let pending = self.capture(&id);
        self.mirror.apply(&id, Some(entity.clone()), true);
        match self.datastore.write(&id, &entity, false).await {
            Ok(()) => Ok(entity),
            Err(error) => {
                self.rollback("create", pending, &error);
                Err(error)
            }
        }
    }

    /// Fails with `NotFound` before any local or remote change when `id` is
    /// absent from the mirror.
    pub(crate) async fn update<F>(&self, id: &str, apply: F) -> MirrorResult<T>
    where
        F: FnOnce(&T, &MutationVars) -> T,
    {
        let current = match self.mirror.lookup(id) {
            Some(entity) => entity,
            None => return Err(missing_document(id)),
        };
        let vars = self.vars_for(id);
        let next = apply(&current, &vars);

        let pending = PendingMutation {
            id: id.to_string(),
            previous: Some(current),
        };
        self.mirror.apply(id, Some(next.clone()), true);
        match self.datastore.write(id, &next, false).await {
            Ok(()) => Ok(next),
            Err(error) => {
                self.rollback("update", pending, &error);
                Err(error)
            }
        }
    }

    /// Never pre-checks existence: absence means create, presence means
    /// update, and the local presence decides the remote merge flag. The
    /// rollback restores the previous value or removes the entry when there
    /// was none.
    pub(crate) async fn upsert<F>(&self, id: &str, apply: F) -> MirrorResult<T>
    where
        F: FnOnce(Option<&T>, &MutationVars) -> T,
    {
        validate_document_id(id)?;
        let previous = self.mirror.lookup(id);
        let vars = self.vars_for(id);
        let next = apply(previous.as_ref(), &vars);
        let merge = previous.is_some();

        let pending = PendingMutation {
            id: id.to_string(),
            previous,
        };
        self.mirror.apply(id, Some(next.clone()), true);
        match self.datastore.write(id, &next, merge).await {
            Ok(()) => Ok(next),
            Err(error) => {
                self.rollback("upsert", pending, &error);
                Err(error)
            }
        }
    }

    /// Fails with `NotFound` before any local or remote change when `id` is
    /// absent from the mirror.
    pub(crate) async fn delete(&self, id: &str) -> MirrorResult<()> {
        let current = match self.mirror.lookup(id) {
            Some(entity) => entity,
            None => return Err(missing_document(id)),
        };

        let pending = PendingMutation {
            id: id.to_string(),
            previous: Some(current),
        };
        self.mirror.apply(id, None, true);
        match self.datastore.delete(id).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.rollback("delete", pending, &error);
                Err(error)
            }
        }
    }

    /// Remote point read, applied to the mirror like a one-shot snapshot:
    /// a present document replaces the entry, an absent one removes it.
    pub(crate) async fn fetch(&self, id: &str) -> MirrorResult<Option<T>> {
        let fetched = self.datastore.read(id).await?;
        self.mirror.apply(id, fetched.clone(), true);
        Ok(fetched)
    }

    /// Local-only create: applies to the mirror and never talks to the store.
    pub(crate) fn create_local<F>(&self, build: F) -> T
    where
        F: FnOnce(&MutationVars) -> T,
    {
        let vars = self.fresh_vars();
        let entity = build(&vars);
        self.mirror.apply(entity.id(), Some(entity.clone()), true);
        entity
    }

    /// Local-only update. Panics when `id` is absent: reaching for a missing
    /// document without a store round trip is a caller bug, not an
    /// environmental failure.
    pub(crate) fn update_local<F>(&self, id: &str, apply: F) -> T
    where
        F: FnOnce(&T, &MutationVars) -> T,
    {
        let current = match self.mirror.lookup(id) {
            Some(entity) => entity,
            None => panic!("update_local: document {id} is not in the mirror"),
        };
        let vars = self.vars_for(id);
        let next = apply(&current, &vars);
        self.mirror.apply(id, Some(next.clone()), true);
        next
    }

    /// Local-only upsert: applies whatever the transform builds.
    pub(crate) fn upsert_local<F>(&self, id: &str, apply: F) -> T
    where
        F: FnOnce(Option<&T>, &MutationVars) -> T,
    {
        let previous = self.mirror.lookup(id);
        let vars = self.vars_for(id);
        let next = apply(previous.as_ref(), &vars);
        self.mirror.apply(id, Some(next.clone()), true);
        next
    }

    /// Local-only delete. Panics when `id` is absent, like `update_local`.
    pub(crate) fn delete_local(&self, id: &str) {
        if self.mirror.lookup(id).is_none() {
            panic!("delete_local: document {id} is not in the mirror");
        }
        self.mirror.apply(id, None, true);
    }

    fn capture(&self, id: &str) -> PendingMutation<T> {
        PendingMutation {
            id: id.to_string(),
            previous: self.mirror.lookup(id),
        }
    }

    fn rollback(&self, operation: &str, pending: PendingMutation<T>, error: &MirrorError) {
        log::warn!(
            "{} of document {} failed, rolling back local change: {}",
            operation,
            pending.id,
            error
        );
        self.mirror.apply(&pending.id, pending.previous, true);
    }
}

pub(crate) fn missing_document(id: &str) -> MirrorError {
    not_found(format!("Document {id} does not exist")).with_document_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticSubjectProvider;
    use crate::error::{unavailable, MirrorErrorKind};
    use crate::local::CollectionMirror;
    use crate::remote::InMemoryDatastore;

    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        title: String,
        completed: bool,
    }

    impl Entity for Task {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn setup() -> (
        MutationCoordinator<Task>,
        Arc<CollectionMirror<Task>>,
        InMemoryDatastore<Task>,
    ) {
        let store = InMemoryDatastore::new();
        let mirror = Arc::new(CollectionMirror::new());
        let coordinator = MutationCoordinator::new(
            Arc::new(store.clone()),
            Arc::clone(&mirror) as Arc<dyn MirrorWriter<Task>>,
            Arc::new(StaticSubjectProvider::new("alice")),
        );
        (coordinator, mirror, store)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_confirms_against_the_store() {
        let (coordinator, mirror, store) = setup();

        let created = coordinator
            .create(|vars| Task {
                id: vars.id.clone(),
                title: "Buy milk".to_string(),
                completed: false,
            })
            .await
            .unwrap();

        assert_eq!(mirror.get(created.id()), Some(created.clone()));
        assert!(store.contains(created.id()).await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_create_rolls_the_mirror_back() {
        let (coordinator, mirror, store) = setup();
        store.inject_write_error(unavailable("store unreachable"));

        let error = coordinator
            .create(|vars| Task {
                id: vars.id.clone(),
                title: "Buy milk".to_string(),
                completed: false,
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind, MirrorErrorKind::Unavailable);
        assert!(mirror.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_of_missing_document_never_reaches_the_store() {
        let (coordinator, mirror, store) = setup();
        // arm a write error: if the store were called, the kind would differ
        store.inject_write_error(unavailable("should not be consumed"));

        let error = coordinator
            .update("t1", |current: &Task, _| current.clone())
            .await
            .unwrap_err();

        assert_eq!(error.kind, MirrorErrorKind::NotFound);
        assert_eq!(error.document_id(), Some("t1"));
        assert!(mirror.is_empty());

        // the armed error is still pending, proving no write happened
        let still_armed = store
            .write(
                "probe",
                &Task {
                    id: "probe".to_string(),
                    title: String::new(),
                    completed: false,
                },
                false,
            )
            .await;
        assert!(still_armed.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_update_restores_the_previous_value() {
        let (coordinator, mirror, store) = setup();
        let original = coordinator
            .create(|vars| Task {
                id: vars.id.clone(),
                title: "Buy milk".to_string(),
                completed: false,
            })
            .await
            .unwrap();

        store.inject_write_error(unavailable("store unreachable"));
        let error = coordinator
            .update(original.id(), |current, _| Task {
                completed: true,
                ..current.clone()
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind, MirrorErrorKind::Unavailable);
        assert_eq!(mirror.get(original.id()), Some(original));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn upsert_creates_then_updates_without_prechecks() {
        let (coordinator, mirror, _store) = setup();

        let created = coordinator
            .upsert("t1", |current, _| {
                assert!(current.is_none());
                Task {
                    id: "t1".to_string(),
                    title: "Buy milk".to_string(),
                    completed: false,
                }
            })
            .await
            .unwrap();
        assert_eq!(mirror.get("t1"), Some(created));

        let updated = coordinator
            .upsert("t1", |current, _| Task {
                completed: true,
                ..current.unwrap().clone()
            })
            .await
            .unwrap();
        assert!(updated.completed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_upsert_of_new_document_removes_the_entry() {
        let (coordinator, mirror, store) = setup();
        store.inject_write_error(unavailable("store unreachable"));

        let result = coordinator
            .upsert("t1", |_, _| Task {
                id: "t1".to_string(),
                title: "Buy milk".to_string(),
                completed: false,
            })
            .await;

        assert!(result.is_err());
        assert!(!mirror.exists("t1"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_delete_restores_the_document() {
        let (coordinator, mirror, store) = setup();
        let created = coordinator
            .create(|vars| Task {
                id: vars.id.clone(),
                title: "Buy milk".to_string(),
                completed: false,
            })
            .await
            .unwrap();

        store.inject_delete_error(unavailable("store unreachable"));
        let error = coordinator.delete(created.id()).await.unwrap_err();

        assert_eq!(error.kind, MirrorErrorKind::Unavailable);
        assert_eq!(mirror.get(created.id()), Some(created.clone()));
        assert!(store.contains(created.id()).await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_applies_presence_and_absence() {
        let (coordinator, mirror, store) = setup();
        let remote_only = Task {
            id: "t9".to_string(),
            title: "Remote".to_string(),
            completed: false,
        };
        store.write("t9", &remote_only, false).await.unwrap();

        let fetched = coordinator.fetch("t9").await.unwrap();
        assert_eq!(fetched, Some(remote_only.clone()));
        assert_eq!(mirror.get("t9"), Some(remote_only));

        store.delete("t9").await.unwrap();
        let refetched = coordinator.fetch("t9").await.unwrap();
        assert_eq!(refetched, None);
        assert!(!mirror.exists("t9"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn vars_carry_the_current_subject() {
        let (coordinator, _mirror, _store) = setup();
        let vars = coordinator.fresh_vars();
        assert_eq!(vars.subject.as_deref(), Some("alice"));
        assert_eq!(vars.id.len(), 20);
    }

    #[test]
    #[should_panic(expected = "update_local")]
    fn update_local_panics_on_missing_document() {
        let (coordinator, _mirror, _store) = setup();
        coordinator.update_local("absent", |current: &Task, _| current.clone());
    }

    #[test]
    #[should_panic(expected = "delete_local")]
    fn delete_local_panics_on_missing_document() {
        let (coordinator, _mirror, _store) = setup();
        coordinator.delete_local("absent");
    }

    #[test]
    fn local_only_mutations_skip_the_store() {
        let (coordinator, mirror, _store) = setup();

        let draft = coordinator.create_local(|vars| Task {
            id: vars.id.clone(),
            title: "Draft".to_string(),
            completed: false,
        });
        assert!(mirror.exists(draft.id()));

        let revised = coordinator.update_local(draft.id(), |current, _| Task {
            title: "Revised".to_string(),
            ..current.clone()
        });
        assert_eq!(mirror.get(draft.id()).unwrap().title, "Revised");

        coordinator.delete_local(revised.id());
        assert!(!mirror.exists(revised.id()));
    }
}
