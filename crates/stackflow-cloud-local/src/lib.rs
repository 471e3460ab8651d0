//! In-memory deployment target for StackFlow
//!
//! Deploys synthesized templates into a [`Sandbox`] that models the services
//! the customer onboarding stack uses: user pools and tokens, IAM roles and
//! session policies, functions backed by Rust handlers, a Kinesis stream fed
//! by a table's change feed, event source mappings, topics, and REST APIs with
//! a Cognito authorizer.
//!
//! Nothing leaves the process. Events move when the caller drives them with
//! [`Sandbox::run_until_idle`].
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud_local::{Sandbox, asset_parameters, register_onboarding_handlers};
//!
//! let synthesis = stackflow_synth::synthesize(&blueprint)?;
//! let mut sandbox = Sandbox::default();
//! let params = asset_parameters(&synthesis.assets, "local-assets");
//! sandbox.deploy("CdkStack-dev", &synthesis.template.to_json()?, &params)?;
//! register_onboarding_handlers(&mut sandbox);
//! ```

pub mod api;
pub mod error;
pub mod function;
pub mod iam;
pub mod identity;
pub mod mapping;
pub mod onboarding;
pub mod policy;
mod props;
pub mod provider;
mod resolve;
pub mod sandbox;
pub mod stream;
pub mod table;
pub mod topic;

pub use api::ApiResponse;
pub use error::{Result, SandboxError};
pub use function::{FunctionHandler, Invocation, InvocationContext, Trigger};
pub use iam::Session;
pub use identity::AuthenticationResult;
pub use onboarding::register_onboarding_handlers;
pub use provider::LocalProvider;
pub use sandbox::{
    DEFAULT_ACCOUNT_ID, DEFAULT_REGION, DeployedStack, Orphan, PhysicalResource, Sandbox,
    asset_parameters,
};
