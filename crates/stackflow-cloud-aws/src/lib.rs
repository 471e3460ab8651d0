//! CloudFormation deployment target for StackFlow
//!
//! This crate implements the CloudProvider trait on top of CloudFormation
//! change sets. The synthesized template is uploaded inline; planning and
//! application are delegated to the CloudFormation engine.
//!
//! # Requirements
//!
//! - AWS credentials resolvable by the default provider chain
//! - Permission to create change sets with `CAPABILITY_NAMED_IAM`
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{CloudProvider, DeployRequest};
//! use stackflow_cloud_aws::CloudFormationProvider;
//!
//! let provider = CloudFormationProvider::from_env(Some("us-east-1".into()), None).await;
//! let request = DeployRequest::new("CdkStack", template_json);
//! let plan = provider.plan(&request).await?;
//! let result = provider.apply(&request, &plan).await?;
//! ```

pub mod changeset;
pub mod error;
pub mod provider;

pub use error::{AwsError, Result};
pub use provider::{CloudFormationProvider, MAX_TEMPLATE_BODY};
