//! Sandbox errors

use stackflow_cloud::CloudError;
use stackflow_synth::SynthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid template: {0}")]
    Template(String),

    #[error("Unsupported resource type {resource_type} ({logical_id})")]
    UnsupportedResource {
        logical_id: String,
        resource_type: String,
    },

    #[error("{logical_id}: {message}")]
    InvalidProperty { logical_id: String, message: String },

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("No value for parameter {0}")]
    MissingParameter(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Domain already associated with another user pool: {0}")]
    DomainAlreadyExists(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("{principal} is not authorized to perform {action} on resource {resource}")]
    AccessDenied {
        principal: String,
        action: String,
        resource: String,
    },

    #[error("Password did not conform with policy: {0}")]
    InvalidPassword(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("User already exists: {0}")]
    UsernameExists(String),

    #[error("User is not confirmed: {0}")]
    UserNotConfirmed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid(logical_id: &str, message: impl Into<String>) -> Self {
        Self::InvalidProperty {
            logical_id: logical_id.to_string(),
            message: message.into(),
        }
    }
}

impl From<SynthError> for SandboxError {
    fn from(err: SynthError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<SandboxError> for CloudError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::StackNotFound(stack) => CloudError::StackNotFound(stack),
            SandboxError::NotFound { id, .. } => CloudError::ResourceNotFound(id),
            SandboxError::DomainAlreadyExists(_) | SandboxError::AlreadyExists(_) => {
                CloudError::ResourceAlreadyExists(err.to_string())
            }
            SandboxError::Template(_)
            | SandboxError::UnsupportedResource { .. }
            | SandboxError::InvalidProperty { .. }
            | SandboxError::UnresolvedReference(_)
            | SandboxError::MissingParameter(_) => CloudError::InvalidTemplate(err.to_string()),
            SandboxError::Json(e) => CloudError::Json(e),
            other => CloudError::DeploymentFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
