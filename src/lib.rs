//! Live local mirrors for remote document stores.
//!
//! A mirror is an in-process, synchronously readable view of remote
//! documents, kept current by snapshot subscriptions and mutated
//! optimistically: local state changes first, the store confirms, and a
//! failed confirmation rolls the mirror back to the last known good value.
//!
//! The crate is organized around four pieces:
//!
//! - [`local`]: the mirror holders ([`local::DocumentMirror`],
//!   [`local::CollectionMirror`]) with ordered, synchronous observer
//!   delivery.
//! - [`remote`]: the [`remote::Datastore`] collaborator trait, snapshot
//!   types, subscription handles and the [`remote::InMemoryDatastore`]
//!   used by tests and offline tools.
//! - [`api`]: the consumer surface ([`api::CollectionApi`],
//!   [`api::DocumentApi`], [`api::WriteBatch`]) tying mirrors, mutations
//!   and streams together.
//! - [`auth`]: the [`auth::AuthGatedSupervisor`], which binds a
//!   subject-scoped stream to the authentication state with bounded,
//!   fixed-delay retries.

pub mod api;
pub mod auth;
pub mod error;
pub mod local;
pub mod model;
pub mod platform;
pub mod remote;
pub mod util;
