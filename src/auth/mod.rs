use std::sync::Arc;

use crate::model::SubjectId;
use crate::remote::listener::ListenerRegistration;

pub mod supervisor;

pub use supervisor::{
    AuthGatedSupervisor, SupervisorConfig, SupervisorPhase, SupervisorSettings,
};

/// Callback receiving authentication state observations.
pub type AuthStateCallback = Arc<dyn Fn(Option<&SubjectId>) + Send + Sync + 'static>;

/// The authentication collaborator, consumed as a state stream.
///
/// A new subscriber is handed the current state immediately, then every
/// change until the registration is stopped. `None` means signed out.
pub trait AuthProvider: Send + Sync + 'static {
    fn subscribe_auth_state(&self, on_change: AuthStateCallback) -> ListenerRegistration;
}

/// Supplies the subject bound into mutation vars.
pub trait SubjectProvider: Send + Sync + 'static {
    fn current_subject(&self) -> Option<SubjectId>;
}

/// Subject provider for unauthenticated use: there never is one.
#[derive(Default, Clone)]
pub struct NoSubjectProvider;

impl SubjectProvider for NoSubjectProvider {
    fn current_subject(&self) -> Option<SubjectId> {
        None
    }
}

/// Fixed-subject provider, handy for tests and single-user tools.
#[derive(Clone)]
pub struct StaticSubjectProvider {
    subject: SubjectId,
}

impl StaticSubjectProvider {
    pub fn new(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

impl SubjectProvider for StaticSubjectProvider {
    fn current_subject(&self) -> Option<SubjectId> {
        Some(self.subject.clone())
    }
}
