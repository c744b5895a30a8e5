use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{not_found, MirrorResult};
use crate::model::Entity;
use crate::util::observable::Observable;
use crate::util::subscribe::Unsubscribe;

use super::MirrorWriter;

/// In-memory cache of a collection of remote documents, keyed by identity.
///
/// Iteration order is derived from the key order; correctness never depends
/// on it. Besides the sticky `ready` flag the collection shape carries a
/// `loading`/`loaded` pair so the first remote load can be requested
/// idempotently: `begin_first_load` admits exactly one caller until
/// `complete_first_load` (or a delivered snapshot) settles it.
pub struct CollectionMirror<T> {
    entries: Observable<BTreeMap<String, T>>,
    ready: AtomicBool,
    loading: AtomicBool,
    loaded: AtomicBool,
}

impl<T: Entity> CollectionMirror<T> {
    pub fn new() -> Self {
        Self::with_seed(Vec::new())
    }

    /// Creates a mirror pre-populated with `seed`. Seeding does not mark the
    /// mirror ready or loaded; only an observation does.
    pub fn with_seed(seed: Vec<T>) -> Self {
        let mut entries = BTreeMap::new();
        for entity in seed {
            entries.insert(entity.id().to_string(), entity);
        }
        Self {
            entries: Observable::new(entries),
            ready: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.entries.get().get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.entries.get().contains_key(id)
    }

    /// Returns the entity or a `NotFound` failure; use where absence is a
    /// caller bug rather than an expected state.
    pub fn require_by_id(&self, id: &str) -> MirrorResult<T> {
        self.get(id).ok_or_else(|| {
            not_found(format!("Document {id} is not present in the mirror")).with_document_id(id)
        })
    }

    pub fn find<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.entries.get().values().find(|e| predicate(e)).cloned()
    }

    /// All entities, ordered by identity.
    pub fn all(&self) -> Vec<T> {
        self.entries.get().into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.get().is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Claims the first load. Returns `false` when it already happened or is
    /// underway, in which case the caller must not start another one.
    pub fn begin_first_load(&self) -> bool {
        if self.loaded.load(Ordering::SeqCst) {
            return false;
        }
        self.loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn complete_first_load(&self) {
        self.loaded.store(true, Ordering::SeqCst);
        self.loading.store(false, Ordering::SeqCst);
    }

    /// Inserts (`Some`) or removes (`None`) one entry. The single choke
    /// point for local mutation; flips `ready` on first use.
    pub fn apply_local(&self, id: &str, value: Option<T>, notify: bool) {
        self.ready.store(true, Ordering::SeqCst);
        let mutate = |entries: &mut BTreeMap<String, T>| match value {
            Some(entity) => {
                entries.insert(id.to_string(), entity);
            }
            None => {
                entries.remove(id);
            }
        };
        if notify {
            self.entries.update(mutate);
        } else {
            self.entries.update_silently(mutate);
        }
    }

    /// Applies a batch of changes with at most one notification at the end.
    pub fn apply_local_many(&self, changes: Vec<(String, Option<T>)>, notify: bool) {
        if changes.is_empty() {
            return;
        }
        self.ready.store(true, Ordering::SeqCst);
        let mutate = |entries: &mut BTreeMap<String, T>| {
            for (id, value) in changes {
                match value {
                    Some(entity) => {
                        entries.insert(id, entity);
                    }
                    None => {
                        entries.remove(&id);
                    }
                }
            }
        };
        if notify {
            self.entries.update(mutate);
        } else {
            self.entries.update_silently(mutate);
        }
    }

    /// Atomically swaps the whole backing map, as query snapshot delivery
    /// requires; a snapshot is never partially applied. Also settles the
    /// first load and flips `ready`.
    pub fn replace_all(&self, entities: Vec<T>, notify: bool) {
        let mut next = BTreeMap::new();
        for entity in entities {
            next.insert(entity.id().to_string(), entity);
        }
        self.ready.store(true, Ordering::SeqCst);
        self.complete_first_load();
        if notify {
            self.entries.set(next);
        } else {
            self.entries.set_silently(next);
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&BTreeMap<String, T>) + Send + Sync + 'static,
    {
        self.entries.subscribe(callback)
    }

    /// Re-delivers the current map to every subscriber.
    pub fn force_notify(&self) {
        self.entries.force_notify();
    }
}

impl<T: Entity> Default for CollectionMirror<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MirrorWriter<T> for CollectionMirror<T> {
    fn lookup(&self, id: &str) -> Option<T> {
        self.get(id)
    }

    fn apply(&self, id: &str, value: Option<T>, notify: bool) {
        self.apply_local(id, value, notify);
    }
}
