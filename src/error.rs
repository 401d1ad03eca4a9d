use std::fmt;

use crate::api::{ApiError, ApiErrorKind};
use crate::gate::DenyReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    AlreadyLiked,
    NotAuthor,
    InProgress,
    NotFound,
    Validation,
    Network,
    Server,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::AlreadyLiked => "already liked",
            ErrorKind::NotAuthor => "not author",
            ErrorKind::InProgress => "in progress",
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "validation error",
            ErrorKind::Network => "network error",
            ErrorKind::Server => "server error",
        };
        f.write_str(label)
    }
}

impl From<ApiErrorKind> for ErrorKind {
    fn from(kind: ApiErrorKind) -> Self {
        match kind {
            ApiErrorKind::Unauthenticated => ErrorKind::Unauthenticated,
            ApiErrorKind::Unauthorized => ErrorKind::Unauthorized,
            ApiErrorKind::NotFound => ErrorKind::NotFound,
            ApiErrorKind::Validation => ErrorKind::Validation,
            ApiErrorKind::Network => ErrorKind::Network,
            ApiErrorKind::Server => ErrorKind::Server,
        }
    }
}

/// Why a user action did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Stopped before any network call.
    #[error("{0}")]
    Denied(DenyReason),
    /// The call went out and failed; local changes were undone.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Denied(reason) => reason.kind(),
            Error::Api(err) => err.kind.into(),
        }
    }

    /// Message suitable for showing next to the control that failed.
    pub fn user_message(&self) -> String {
        match self {
            Error::Denied(reason) => reason.to_string(),
            Error::Api(err) => match err.kind {
                ApiErrorKind::Unauthenticated => "You must be logged in.".to_string(),
                ApiErrorKind::Unauthorized => {
                    format!("The server refused the request: {}", err.detail)
                }
                ApiErrorKind::NotFound => "That item no longer exists.".to_string(),
                ApiErrorKind::Validation => err.detail.clone(),
                ApiErrorKind::Network => format!("Could not reach the server: {}", err.detail),
                ApiErrorKind::Server => format!("The server failed: {}", err.detail),
            },
        }
    }
}

impl From<DenyReason> for Error {
    fn from(reason: DenyReason) -> Self {
        Error::Denied(reason)
    }
}
