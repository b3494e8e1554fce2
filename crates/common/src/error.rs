//! Error types for Skymock

use crate::types::{Kind, Surface};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using Skymock Error
pub type Result<T> = std::result::Result<T, Error>;

/// Skymock error types
///
/// Every backend verb returns one of these synchronously; none is raised
/// after a mutation has started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("The request must contain the parameter {0}")]
    MissingParameter(String),

    #[error("The {kind} '{key}' does not exist")]
    NotFound { kind: Kind, key: String },

    #[error("The {kind} '{key}' already exists")]
    AlreadyExists { kind: Kind, key: String },

    #[error("Invalid value: {0}")]
    InvalidArgument(String),

    #[error("The {kind} '{key}' has dependencies and cannot be deleted: {reason}")]
    DependencyViolation {
        kind: Kind,
        key: String,
        reason: String,
    },

    #[error("Cannot {verb} {kind} '{key}' while it is {state}")]
    InvalidStateTransition {
        kind: Kind,
        key: String,
        state: String,
        verb: String,
    },

    #[error("Precondition failed: {0}")]
    ConditionNotMet(String),

    #[error("The action {0} is not valid for this web service")]
    UnknownAction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: Kind, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn already_exists(kind: Kind, key: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// HTTP status used by both wire surfaces
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::AlreadyExists { .. } => 409,
            Error::ConditionNotMet(_) => 412,
            Error::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Machine-readable reason token for the GCP-style surface
    pub fn reason(&self) -> &'static str {
        match self {
            Error::MissingParameter(_) => "required",
            Error::NotFound { .. } => "notFound",
            Error::AlreadyExists { .. } => "alreadyExists",
            Error::InvalidArgument(_) | Error::UnknownAction(_) => "invalid",
            Error::DependencyViolation { .. } => "resourceInUseByAnotherResource",
            Error::InvalidStateTransition { .. } => "resourceNotReady",
            Error::ConditionNotMet(_) => "conditionNotMet",
            Error::Internal(_) => "backendError",
        }
    }

    /// Error code for the AWS-style surface
    pub fn aws_code(&self) -> String {
        match self {
            Error::MissingParameter(_) => "MissingParameter".to_string(),
            Error::NotFound { kind, .. } => format!("Invalid{}.NotFound", kind.aws_error_noun()),
            Error::AlreadyExists { kind, .. } => {
                format!("Invalid{}.Duplicate", kind.aws_error_noun())
            }
            Error::InvalidArgument(_) => "InvalidParameterValue".to_string(),
            Error::DependencyViolation { .. } => "DependencyViolation".to_string(),
            Error::InvalidStateTransition { .. } => "IncorrectState".to_string(),
            Error::ConditionNotMet(_) => "PreconditionFailed".to_string(),
            Error::UnknownAction(_) => "InvalidAction".to_string(),
            Error::Internal(_) => "InternalError".to_string(),
        }
    }

    /// Build the wire error envelope for one surface
    pub fn envelope(&self, surface: Surface, request_id: &str) -> ErrorEnvelope {
        let message = self.to_string();
        match surface {
            Surface::Gcp => ErrorEnvelope::Gcp {
                error: GcpErrorBody {
                    code: self.http_status(),
                    message: message.clone(),
                    errors: vec![GcpErrorItem {
                        domain: "global",
                        reason: self.reason(),
                        message,
                    }],
                },
            },
            Surface::Aws => ErrorEnvelope::Aws(AwsErrorBody {
                errors: vec![AwsErrorItem {
                    code: self.aws_code(),
                    message,
                }],
                request_id: request_id.to_string(),
            }),
        }
    }
}

/// Wire error envelope
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ErrorEnvelope {
    Gcp { error: GcpErrorBody },
    Aws(AwsErrorBody),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GcpErrorBody {
    pub code: u16,
    pub message: String,
    pub errors: Vec<GcpErrorItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GcpErrorItem {
    pub domain: &'static str,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AwsErrorBody {
    #[serde(rename = "Errors")]
    pub errors: Vec<AwsErrorItem>,
    #[serde(rename = "RequestID")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AwsErrorItem {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}
