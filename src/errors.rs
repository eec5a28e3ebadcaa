use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::LoanStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error("{entity} not found")]
    NotFound {
        entity: &'static str,
    },

    #[error("validation failed: {message}")]
    ValidationFailed {
        message: String,
    },

    #[error("permission denied: {message}")]
    PermissionDenied {
        message: String,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
    },

    #[error("cannot transition from {from} to {to}")]
    InvalidTransition {
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("operation not allowed while loan is {status}: {message}")]
    InvalidState {
        status: LoanStatus,
        message: String,
    },

    #[error("{action} is only allowed within {window_hours} hours of creation")]
    TimeWindowExpired {
        action: &'static str,
        window_hours: i64,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },
}

/// coarse classification handed to the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    PermissionDenied,
    Conflict,
    InvalidStateTransition,
    TimeWindowExpired,
    Storage,
}

impl LoanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoanError::NotFound { .. } => ErrorKind::NotFound,
            LoanError::ValidationFailed { .. } | LoanError::InvalidConfiguration { .. } => {
                ErrorKind::ValidationFailed
            }
            LoanError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            LoanError::Conflict { .. } => ErrorKind::Conflict,
            LoanError::InvalidTransition { .. } | LoanError::InvalidState { .. } => {
                ErrorKind::InvalidStateTransition
            }
            LoanError::TimeWindowExpired { .. } => ErrorKind::TimeWindowExpired,
            LoanError::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        LoanError::ValidationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn denied(message: impl Into<String>) -> Self {
        LoanError::PermissionDenied {
            message: message.into(),
        }
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        LoanError::Conflict {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(status: LoanStatus, message: impl Into<String>) -> Self {
        LoanError::InvalidState {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;
