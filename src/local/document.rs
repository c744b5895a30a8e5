use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{not_found, MirrorResult};
use crate::model::Entity;
use crate::util::observable::Observable;
use crate::util::subscribe::Unsubscribe;

use super::MirrorWriter;

/// In-memory cache of a single remote document.
///
/// Holds at most one entity plus a sticky `ready` flag that flips on the
/// first observation, whether that observation found a document or not.
/// All mutation goes through [`DocumentMirror::apply_local`] (id-aware, used
/// by the optimistic protocol) or [`DocumentMirror::replace`] (authoritative
/// full replace, used by snapshot delivery).
pub struct DocumentMirror<T> {
    value: Observable<Option<T>>,
    ready: AtomicBool,
}

impl<T: Entity> DocumentMirror<T> {
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    /// Creates a mirror pre-populated with `seed`. Seeding does not mark the
    /// mirror ready; only an observation does.
    pub fn with_seed(seed: Option<T>) -> Self {
        Self {
            value: Observable::new(seed),
            ready: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.value.get()
    }

    pub fn exists(&self) -> bool {
        self.value.get().is_some()
    }

    /// Returns the entity or a `NotFound` failure; use where absence is a
    /// caller bug rather than an expected state.
    pub fn require(&self) -> MirrorResult<T> {
        self.value
            .get()
            .ok_or_else(|| not_found("Document is not present in the mirror"))
    }

    /// True once the first snapshot or local apply has been observed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Replaces or removes the tracked document.
    ///
    /// A `Some` value always installs; a `None` only clears when the current
    /// entity carries `id`, so a stale removal cannot clear an unrelated
    /// document that was installed in the meantime.
    pub fn apply_local(&self, id: &str, value: Option<T>, notify: bool) {
        self.ready.store(true, Ordering::SeqCst);
        match value {
            Some(entity) => {
                if notify {
                    self.value.set(Some(entity));
                } else {
                    self.value.set_silently(Some(entity));
                }
            }
            None => {
                let clears = self
                    .value
                    .get()
                    .map(|current| current.id() == id)
                    .unwrap_or(false);
                if clears {
                    if notify {
                        self.value.set(None);
                    } else {
                        self.value.set_silently(None);
                    }
                }
            }
        }
    }

    /// Authoritative full replace from a remote snapshot; `None` clears
    /// unconditionally.
    pub fn replace(&self, value: Option<T>, notify: bool) {
        self.ready.store(true, Ordering::SeqCst);
        if notify {
            self.value.set(value);
        } else {
            self.value.set_silently(value);
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&Option<T>) + Send + Sync + 'static,
    {
        self.value.subscribe(callback)
    }

    /// Re-delivers the current value to every subscriber.
    pub fn force_notify(&self) {
        self.value.force_notify();
    }
}

impl<T: Entity> Default for DocumentMirror<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MirrorWriter<T> for DocumentMirror<T> {
    fn lookup(&self, id: &str) -> Option<T> {
        self.value.get().filter(|current| current.id() == id)
    }

    fn apply(&self, id: &str, value: Option<T>, notify: bool) {
        self.apply_local(id, value, notify);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        id: String,
        name: String,
    }

    impl Entity for Profile {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn ready_flips_on_first_apply_even_when_absent() {
        let mirror: DocumentMirror<Profile> = DocumentMirror::new();
        assert!(!mirror.is_ready());

        mirror.apply_local("p1", None, true);
        assert!(mirror.is_ready());
        assert!(!mirror.exists());
    }

    #[test]
    fn require_reports_not_found_when_absent() {
        let mirror: DocumentMirror<Profile> = DocumentMirror::new();
        let error = mirror.require().unwrap_err();
        assert_eq!(error.code_str(), "mirror/not-found");

        mirror.apply_local("p1", Some(profile("p1", "Ada")), true);
        assert_eq!(mirror.require().unwrap().name, "Ada");
    }

    #[test]
    fn removal_only_clears_the_matching_document() {
        let mirror = DocumentMirror::new();
        mirror.apply_local("p1", Some(profile("p1", "Ada")), true);

        mirror.apply_local("other", None, true);
        assert!(mirror.exists());

        mirror.apply_local("p1", None, true);
        assert!(!mirror.exists());
    }

    #[test]
    fn replace_clears_unconditionally() {
        let mirror = DocumentMirror::new();
        mirror.apply_local("p1", Some(profile("p1", "Ada")), true);

        mirror.replace(None, true);
        assert!(!mirror.exists());
        assert!(mirror.is_ready());
    }

    #[test]
    fn silent_apply_skips_subscribers() {
        let mirror = DocumentMirror::new();
        let notifications = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&notifications);
        let _keep = mirror.subscribe(move |_| {
            *counter.lock().unwrap() += 1;
        });

        mirror.apply_local("p1", Some(profile("p1", "Ada")), false);
        assert_eq!(*notifications.lock().unwrap(), 0);
        assert!(mirror.exists());

        mirror.apply_local("p1", Some(profile("p1", "Grace")), true);
        assert_eq!(*notifications.lock().unwrap(), 1);
    }

    #[test]
    fn lookup_matches_identity() {
        let mirror = DocumentMirror::new();
        mirror.apply_local("p1", Some(profile("p1", "Ada")), true);

        assert!(MirrorWriter::lookup(&mirror, "p1").is_some());
        assert!(MirrorWriter::lookup(&mirror, "p2").is_none());
    }
}
