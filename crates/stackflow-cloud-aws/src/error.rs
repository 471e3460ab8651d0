//! CloudFormation provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("AWS API call {operation} failed: {message}")]
    Sdk { operation: &'static str, message: String },

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Change set {change_set} failed: {reason}")]
    ChangeSetFailed { change_set: String, reason: String },

    #[error("Stack {stack} ended in {status}: {reason}")]
    StackFailed {
        stack: String,
        status: String,
        reason: String,
    },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AwsError>;

impl From<AwsError> for stackflow_cloud::CloudError {
    fn from(e: AwsError) -> Self {
        use stackflow_cloud::CloudError;
        match e {
            AwsError::StackNotFound(name) => CloudError::StackNotFound(name),
            AwsError::Timeout(what) => CloudError::Timeout(what),
            AwsError::Json(e) => CloudError::Json(e),
            e @ (AwsError::ChangeSetFailed { .. } | AwsError::StackFailed { .. }) => {
                CloudError::DeploymentFailed(e.to_string())
            }
            e @ AwsError::Sdk { .. } => CloudError::ApiError(e.to_string()),
        }
    }
}
