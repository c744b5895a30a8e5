mod collection;
mod coordinator;
mod document;
mod write_batch;

pub use collection::CollectionApi;
pub use document::DocumentApi;
pub use write_batch::WriteBatch;
