//! Deployment target trait definition

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::state::ProviderState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deployment target abstraction trait
///
/// Every target (CloudFormation, the local sandbox) receives the synthesized
/// template and leaves diffing and ordering to its own engine.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws", "local")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Get the current state of a deployed stack
    async fn get_state(&self, stack_name: &str) -> Result<ProviderState>;

    /// Ask the target what applying the request would change
    async fn plan(&self, request: &DeployRequest) -> Result<Plan>;

    /// Apply a plan produced by [`CloudProvider::plan`]
    async fn apply(&self, request: &DeployRequest, plan: &Plan) -> Result<ApplyResult>;

    /// Delete the stack; resources with a Retain policy stay behind
    async fn destroy(&self, stack_name: &str) -> Result<ApplyResult>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// A synthesized template bound for one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Provider-side stack name
    pub stack_name: String,

    /// CloudFormation template document
    pub template: Value,

    /// Template parameter values
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl DeployRequest {
    pub fn new(stack_name: impl Into<String>, template: Value) -> Self {
        Self {
            stack_name: stack_name.into(),
            template,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Logical id → resource definition
    pub fn resources(&self) -> Result<&serde_json::Map<String, Value>> {
        self.template
            .get("Resources")
            .and_then(Value::as_object)
            .ok_or_else(|| CloudError::InvalidTemplate("template has no Resources".to_string()))
    }

    /// Template parameters that have no value in this request
    pub fn missing_parameters(&self) -> Vec<String> {
        self.template
            .get("Parameters")
            .and_then(Value::as_object)
            .map(|params| {
                params
                    .iter()
                    .filter(|(name, def)| {
                        !self.parameters.contains_key(*name) && def.get("Default").is_none()
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Compare a request against the recorded state by logical id
///
/// Targets without a native change-set engine use this. Type changes are
/// replacements; property changes are updates; resources that disappear are
/// deleted unless their DeletionPolicy is Retain.
pub fn diff(request: &DeployRequest, current: &ProviderState) -> Result<Plan> {
    let desired = request.resources()?;
    let mut actions = Vec::new();

    for (logical_id, definition) in desired {
        let resource_type = definition
            .get("Type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let properties = definition.get("Properties").cloned().unwrap_or(Value::Null);

        let action_type = match current.get(logical_id) {
            None => ActionType::Create,
            Some(existing) if existing.resource_type != resource_type => ActionType::Replace,
            Some(existing) if existing.attributes.get("properties") != Some(&properties) => {
                ActionType::Update
            }
            Some(_) => ActionType::NoOp,
        };
        actions.push(Action::new(action_type, resource_type, logical_id.clone()));
    }

    for (logical_id, existing) in current.iter() {
        if desired.contains_key(logical_id) {
            continue;
        }
        let action_type = if existing.is_retained_on_delete() {
            ActionType::Retain
        } else {
            ActionType::Delete
        };
        actions.push(Action::new(
            action_type,
            existing.resource_type.clone(),
            logical_id.clone(),
        ));
    }

    Ok(Plan::new(request.stack_name.clone(), actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;

    fn request() -> DeployRequest {
        DeployRequest::new(
            "CdkStack",
            json!({
                "Parameters": {
                    "FnCodeS3Bucket": { "Type": "String" },
                    "FnCodeS3Key": { "Type": "String", "Default": "assets/x.zip" }
                },
                "Resources": {
                    "Topic": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": "CustomerCreated" } },
                    "Stream": { "Type": "AWS::Kinesis::Stream", "Properties": { "ShardCount": 1 } }
                }
            }),
        )
    }

    #[test]
    fn test_missing_parameters() {
        let request = request();
        assert_eq!(request.missing_parameters(), vec!["FnCodeS3Bucket"]);
        let request = request.with_parameter("FnCodeS3Bucket", "bucket");
        assert!(request.missing_parameters().is_empty());
    }

    #[test]
    fn test_diff_against_empty_state_creates_everything() {
        let plan = diff(&request(), &ProviderState::new()).unwrap();
        assert_eq!(plan.summary().create, 2);
        assert!(plan.has_changes);
    }

    #[test]
    fn test_diff_detects_updates_and_retained_removals() {
        let mut state = ProviderState::new();
        state.add(
            "Topic".to_string(),
            ResourceState::new("arn:topic", "AWS::SNS::Topic")
                .with_attribute("properties", json!({ "TopicName": "CustomerCreated" })),
        );
        state.add(
            "Stream".to_string(),
            ResourceState::new("stream", "AWS::Kinesis::Stream")
                .with_attribute("properties", json!({ "ShardCount": 2 })),
        );
        state.add(
            "UserPool".to_string(),
            ResourceState::new("pool", "AWS::Cognito::UserPool")
                .with_deletion_policy("Retain"),
        );
        state.add(
            "Old".to_string(),
            ResourceState::new("old", "AWS::SNS::Topic"),
        );

        let plan = diff(&request(), &state).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.no_change, 1);
        assert_eq!(summary.update, 1);
        assert_eq!(summary.retain, 1);
        assert_eq!(summary.delete, 1);
    }

    #[test]
    fn test_template_without_resources_is_rejected() {
        let request = DeployRequest::new("x", json!({}));
        assert!(matches!(
            diff(&request, &ProviderState::new()),
            Err(CloudError::InvalidTemplate(_))
        ));
    }
}
