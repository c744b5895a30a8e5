use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::util::subscribe::Unsubscribe;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct ObservableState<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    subscriber_counter: AtomicU64,
}

/// Thread-safe value holder that fans out changes to subscribers.
///
/// Subscribers are invoked synchronously, in registration order, after the
/// value lock has been released, so a callback may read the observable (or
/// subscribe another callback) without deadlocking.
pub struct Observable<T> {
    state: Arc<ObservableState<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Arc::new(ObservableState {
                value: Mutex::new(initial),
                subscribers: Mutex::new(Vec::new()),
                subscriber_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.state.value.lock().unwrap().clone()
    }

    /// Replaces the value and notifies subscribers.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.state.value.lock().unwrap();
            *guard = value.clone();
        }
        self.notify(&value);
    }

    /// Replaces the value without notifying anyone.
    pub fn set_silently(&self, value: T) {
        let mut guard = self.state.value.lock().unwrap();
        *guard = value;
    }

    /// Mutates the value in place and notifies subscribers.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T),
    {
        let snapshot = {
            let mut guard = self.state.value.lock().unwrap();
            mutate(&mut guard);
            guard.clone()
        };
        self.notify(&snapshot);
    }

    /// Mutates the value in place without notifying anyone.
    pub fn update_silently<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.state.value.lock().unwrap();
        mutate(&mut guard);
    }

    /// Re-delivers the current value to every subscriber.
    pub fn force_notify(&self) {
        let snapshot = self.get();
        self.notify(&snapshot);
    }

    /// Registers a callback for future value changes.
    ///
    /// The current value is not delivered; callers that need it should read
    /// [`Observable::get`] first. Dropping the returned closure without
    /// calling it keeps the subscription alive.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.state.subscriber_counter.fetch_add(1, Ordering::SeqCst);
        self.state
            .subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        let weak: Weak<ObservableState<T>> = Arc::downgrade(&self.state);
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .subscribers
                    .lock()
                    .unwrap()
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().unwrap().len()
    }

    fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let guard = self.state.subscribers.lock().unwrap();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }
}
