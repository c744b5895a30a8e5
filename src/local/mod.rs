use crate::model::Entity;

pub mod collection;
pub mod document;

pub use collection::CollectionMirror;
pub use document::DocumentMirror;

/// Choke point the mutation coordinator drives mirrors through.
///
/// Every local change, optimistic apply and rollback included, goes through
/// `apply`; `lookup` captures the pre-mutation value for the pending record.
/// Implemented by both mirror shapes so one coordinator serves both.
pub(crate) trait MirrorWriter<T: Entity>: Send + Sync {
    fn lookup(&self, id: &str) -> Option<T>;
    fn apply(&self, id: &str, value: Option<T>, notify: bool);
}
