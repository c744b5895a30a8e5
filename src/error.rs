use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure kinds surfaced by remote stores and by the mirror layer itself.
///
/// The set is closed on purpose: callers branch on kinds, not on concrete
/// error types, and store adapters map their wire errors into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MirrorErrorKind {
    NotFound,
    PermissionDenied,
    Unavailable,
    AlreadyExists,
    Cancelled,
    DeadlineExceeded,
    Generic,
}

impl MirrorErrorKind {
    /// Stable machine code for logs and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorErrorKind::NotFound => "mirror/not-found",
            MirrorErrorKind::PermissionDenied => "mirror/permission-denied",
            MirrorErrorKind::Unavailable => "mirror/unavailable",
            MirrorErrorKind::AlreadyExists => "mirror/already-exists",
            MirrorErrorKind::Cancelled => "mirror/cancelled",
            MirrorErrorKind::DeadlineExceeded => "mirror/deadline-exceeded",
            MirrorErrorKind::Generic => "mirror/generic",
        }
    }

    /// Short human-readable label, usable as a failure title in consumer UIs.
    pub fn title(&self) -> &'static str {
        match self {
            MirrorErrorKind::NotFound => "Not found",
            MirrorErrorKind::PermissionDenied => "Permission denied",
            MirrorErrorKind::Unavailable => "Service unavailable",
            MirrorErrorKind::AlreadyExists => "Already exists",
            MirrorErrorKind::Cancelled => "Cancelled",
            MirrorErrorKind::DeadlineExceeded => "Deadline exceeded",
            MirrorErrorKind::Generic => "Operation failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MirrorError {
    pub kind: MirrorErrorKind,
    message: String,
    document_id: Option<String>,
}

impl MirrorError {
    pub fn new(kind: MirrorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            document_id: None,
        }
    }

    /// Attaches the identity of the document the failure concerns.
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }
}

impl Display for MirrorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())?;
        if let Some(id) = &self.document_id {
            write!(f, " [{}]", id)?;
        }
        Ok(())
    }
}

impl Error for MirrorError {}

pub type MirrorResult<T> = Result<T, MirrorError>;

pub fn not_found(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::NotFound, message)
}

pub fn permission_denied(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::PermissionDenied, message)
}

pub fn unavailable(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::Unavailable, message)
}

pub fn already_exists(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::AlreadyExists, message)
}

pub fn cancelled(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::Cancelled, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::DeadlineExceeded, message)
}

pub fn generic_error(message: impl Into<String>) -> MirrorError {
    MirrorError::new(MirrorErrorKind::Generic, message)
}
