use chrono::{DateTime, Utc};

use crate::error::{generic_error, MirrorResult};

/// Identifier of the authenticated subject a stream or mutation belongs to.
pub type SubjectId = String;

/// A value that can live in a mirror: cloneable, shareable, and carrying a
/// stable identity string.
///
/// Entities are immutable snapshots. A mutation never patches an entity in
/// place; it builds a new value and hands it to the mirror.
pub trait Entity: Clone + Send + Sync + 'static {
    /// The identity the entity is keyed by, stable across mutations.
    fn id(&self) -> &str;
}

/// Per-mutation inputs handed to caller-supplied transform functions.
///
/// Built once at the start of every optimistic mutation: a freshly minted
/// document id (used by `create` transforms that do not bring their own),
/// the wall-clock instant, and the authenticated subject if one is known.
#[derive(Clone, Debug)]
pub struct MutationVars {
    pub id: String,
    pub now: DateTime<Utc>,
    pub subject: Option<SubjectId>,
}

impl MutationVars {
    pub fn new(id: String, subject: Option<SubjectId>) -> Self {
        Self {
            id,
            now: Utc::now(),
            subject,
        }
    }
}

/// Checks that `id` is usable as a document identity.
///
/// Identities must be non-empty and must not contain `'/'`; anything else is
/// opaque to this crate. Violations are staging failures, reported before any
/// remote traffic happens.
pub fn validate_document_id(id: &str) -> MirrorResult<()> {
    if id.is_empty() {
        return Err(generic_error("Document ids must not be empty"));
    }
    if id.contains('/') {
        return Err(generic_error("Document ids must not contain '/'").with_document_id(id));
    }
    Ok(())
}
