//! Error handling and status mapping for the WebDAV server.
//!
//! Every failure the request pipeline can produce is a [`DavError`], and
//! every variant maps to exactly one HTTP status via
//! [`DavError::status_code`]. I/O errors are classified by their
//! [`io::ErrorKind`] so that a missing entry discovered half-way through an
//! operation still surfaces as `404` rather than a generic `500`.

use hyper::StatusCode;
use std::io;
use thiserror::Error;

/// Errors that can occur while serving a WebDAV request.
#[derive(Debug, Error)]
pub enum DavError {
    /// The path resolves outside the storage root, or the operation is
    /// not allowed on this resource (e.g. deleting the root).
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A collection or file already occupies the target path.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Malformed protocol input (missing destination, bad encoding, ...).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials.
    #[error("Authentication required")]
    Unauthorized,

    /// The request verb is not implemented.
    #[error("Unsupported method: {0}")]
    Unsupported(String),

    /// An intermediate collection is missing or is not a collection.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// `Overwrite: F` was sent and the destination exists.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize a multistatus document.
    #[error("XML error: {0}")]
    Xml(#[from] xml::writer::Error),

    /// Unexpected server-side failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DavError {
    /// Returns the HTTP status this error is reported as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DavError::AccessDenied(_) => StatusCode::FORBIDDEN,
            DavError::NotFound(_) => StatusCode::NOT_FOUND,
            DavError::AlreadyExists(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            DavError::Io(e) => io_error_to_status(e),
            DavError::Xml(_) | DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error indicates a server-side fault rather than a
    /// client mistake.
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Classifies an IO error into an HTTP status.
pub fn io_error_to_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        io::ErrorKind::AlreadyExists => StatusCode::METHOD_NOT_ALLOWED,
        io::ErrorKind::NotADirectory => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Result type for WebDAV operations.
pub type DavResult<T> = Result<T, DavError>;
