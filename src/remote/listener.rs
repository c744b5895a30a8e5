use std::sync::Mutex;

type StopFn = Box<dyn FnOnce() + Send + 'static>;

/// Stop capability returned by every subscribe entry point.
///
/// Stopping is idempotent and dropping an unstopped registration releases
/// the listener, so a registration can never outlive its owner.
pub struct ListenerRegistration {
    stop: Option<StopFn>,
}

impl ListenerRegistration {
    pub fn new<F>(stop: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A registration with nothing to release.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    /// Releases the underlying listener. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Owns zero-or-one live remote subscription and enforces stop-before-start.
///
/// Retargeting is always expressed as a fresh `start`: the previous handle
/// (if any) is released under the same lock that installs the new one, so
/// two handles for the same logical stream can never be live at once.
#[derive(Default)]
pub struct SubscriptionManager {
    active: Mutex<Option<ListenerRegistration>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active subscription with the one `subscribe` produces.
    ///
    /// `subscribe` runs while the manager's lock is held and must not call
    /// back into this manager. Datastores that deliver initial snapshots
    /// asynchronously satisfy this.
    pub fn start<F>(&self, subscribe: F)
    where
        F: FnOnce() -> ListenerRegistration,
    {
        let mut active = self.active.lock().unwrap();
        if let Some(mut previous) = active.take() {
            previous.stop();
        }
        *active = Some(subscribe());
    }

    /// Releases the active subscription, if any.
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap();
        if let Some(mut registration) = active.take() {
            registration.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|registration| registration.is_active())
            .unwrap_or(false)
    }
}
