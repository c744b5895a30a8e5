use std::sync::Arc;

use crate::error::MirrorError;

pub type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
pub type ErrorFn = Arc<dyn Fn(&MirrorError) + Send + Sync + 'static>;

/// Callback pair handed to subscription entry points.
///
/// Both slots are optional: a caller that only cares about snapshots leaves
/// `error` unset and the owner of the stream decides what to do with
/// failures (the apis log them, the supervisor drives its retry machine).
#[derive(Clone)]
pub struct Observer<T> {
    pub next: Option<NextFn<T>>,
    pub error: Option<ErrorFn>,
}

impl<T> Observer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(callback));
        self
    }

    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&MirrorError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }

    /// Invokes the `next` callback if one is attached.
    pub fn emit(&self, value: &T) {
        if let Some(next) = &self.next {
            next(value);
        }
    }

    /// Invokes the `error` callback if one is attached.
    pub fn emit_error(&self, error: &MirrorError) {
        if let Some(callback) = &self.error {
            callback(error);
        }
    }
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self {
            next: None,
            error: None,
        }
    }
}

/// Capability to detach an observer from whatever it was attached to.
pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;
