use crate::model::Entity;

/// A full-replace delivery of remote state for one document.
///
/// `data` is `None` when the store reports the document as missing; that is
/// still a valid snapshot (it answers the question), not an error.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot<T> {
    id: String,
    data: Option<T>,
}

impl<T> DocumentSnapshot<T> {
    pub fn new(id: impl Into<String>, data: Option<T>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Returns whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// A full-replace delivery of remote state for a subscribed scope.
#[derive(Clone, Debug)]
pub struct QuerySnapshot<T> {
    documents: Vec<T>,
}

impl<T: Entity> QuerySnapshot<T> {
    pub fn new(documents: Vec<T>) -> Self {
        Self { documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn documents(&self) -> &[T] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<T> {
        self.documents
    }
}
