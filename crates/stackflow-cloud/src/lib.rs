//! StackFlow Cloud
//!
//! 合成したテンプレートをデプロイ先に渡すための抽象化です。
//!
//! # Supported Providers
//!
//! - **AWS**: CloudFormation change sets (`stackflow-cloud-aws`)
//! - **Local**: in-memory sandbox (`stackflow-cloud-local`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 StackFlow CLI                    │
//! │           (plan / deploy / destroy)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │ DeployRequest (template + parameters)
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Provider Abstraction             │   │
//! │  │  trait CloudProvider { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Plan/Action  │  │  State Mgmt  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │CloudFormation │ │ local sandbox │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use provider::{AuthStatus, CloudProvider, DeployRequest, diff};
pub use state::{
    GlobalState, ProviderState, ResourceState, ResourceStatus, StackRecord, StateLock,
    StateManager,
};
