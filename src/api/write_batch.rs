use std::sync::Arc;

use crate::error::{generic_error, MirrorResult};
use crate::model::{validate_document_id, Entity};
use crate::remote::{Datastore, WriteOperation};

const MAX_BATCH_WRITES: usize = 500;

/// Accumulates writes locally and sends them to the store as one atomic
/// commit. Staging performs no I/O; every error surfaces either at staging
/// time (validation, capacity) or from `commit`.
pub struct WriteBatch<T: Entity> {
    datastore: Arc<dyn Datastore<T>>,
    writes: Vec<WriteOperation<T>>,
}

impl<T: Entity> WriteBatch<T> {
    pub(crate) fn new(datastore: Arc<dyn Datastore<T>>) -> Self {
        Self {
            datastore,
            writes: Vec::new(),
        }
    }

    /// Stages a full write (`merge == false`) or a partial one.
    pub fn set(&mut self, entity: T, merge: bool) -> MirrorResult<&mut Self> {
        self.ensure_capacity()?;
        validate_document_id(entity.id())?;
        self.writes.push(WriteOperation::Set {
            id: entity.id().to_string(),
            data: entity,
            merge,
        });
        Ok(self)
    }

    pub fn delete(&mut self, id: &str) -> MirrorResult<&mut Self> {
        self.ensure_capacity()?;
        validate_document_id(id)?;
        self.writes.push(WriteOperation::Delete { id: id.to_string() });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits every staged write in one store call. An empty batch commits
    /// trivially without touching the store.
    pub async fn commit(self) -> MirrorResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.datastore.commit(self.writes).await
    }

    fn ensure_capacity(&self) -> MirrorResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(generic_error(format!(
                "A write batch cannot contain more than {MAX_BATCH_WRITES} operations"
            )));
        }
        Ok(())
    }
}

impl<T: Entity> std::fmt::Debug for WriteBatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("writes", &self.writes.len())
            .finish()
    }
}
