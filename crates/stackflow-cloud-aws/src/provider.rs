//! CloudFormation provider implementation
//!
//! Planning creates a change set and reads back its changes; applying executes
//! that change set and waits for the stack to settle. Ordering, diffing and
//! rollback stay with CloudFormation.

use crate::changeset;
use crate::error::{AwsError, Result};
use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, ChangeSetType, Parameter, Stack};
use serde_json::Value;
use stackflow_cloud::{
    Action, ApplyResult, AuthStatus, CloudProvider, DeployRequest, Plan, ProviderState,
    ResourceState, ResourceStatus,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Largest template CloudFormation accepts inline
pub const MAX_TEMPLATE_BODY: usize = 51_200;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// CloudFormation provider
pub struct CloudFormationProvider {
    client: Client,
    region: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl CloudFormationProvider {
    pub fn new(client: Client, region: Option<String>) -> Self {
        Self {
            client,
            region,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a client from the default credential chain
    pub async fn from_env(region: Option<String>, profile: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        let region = config.region().map(|r| r.to_string());
        Self::new(Client::new(&config), region)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<Stack>> {
        match self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(output) => Ok(output.stacks().first().cloned()),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                if changeset::is_missing_stack(&message) {
                    Ok(None)
                } else {
                    Err(sdk_error("DescribeStacks", message))
                }
            }
        }
    }

    /// Poll until the stack leaves every *_IN_PROGRESS status
    async fn wait_for_stack(&self, stack_name: &str) -> Result<Option<Stack>> {
        let started = Instant::now();
        loop {
            let stack = self.describe_stack(stack_name).await?;
            let status = stack.as_ref().map(stack_status).unwrap_or_default();
            debug!(stack = stack_name, status = %status, "Polling stack");

            if stack.is_none() || changeset::is_settled(&status) {
                return Ok(stack);
            }
            if started.elapsed() > self.timeout {
                return Err(AwsError::Timeout(format!("stack {}", stack_name)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll the change set until it is ready; `None` when it has no changes
    async fn wait_for_change_set(&self, stack_name: &str, change_set: &str) -> Result<Option<()>> {
        let started = Instant::now();
        loop {
            let output = self
                .client
                .describe_change_set()
                .stack_name(stack_name)
                .change_set_name(change_set)
                .send()
                .await
                .map_err(|e| sdk_error("DescribeChangeSet", DisplayErrorContext(&e).to_string()))?;

            let status = output.status().map(|s| s.as_str()).unwrap_or_default();
            match status {
                "CREATE_COMPLETE" => return Ok(Some(())),
                "FAILED" => {
                    let reason = output.status_reason().unwrap_or_default();
                    if changeset::is_empty_change_set(reason) {
                        return Ok(None);
                    }
                    return Err(AwsError::ChangeSetFailed {
                        change_set: change_set.to_string(),
                        reason: reason.to_string(),
                    });
                }
                _ => {}
            }

            if started.elapsed() > self.timeout {
                return Err(AwsError::Timeout(format!("change set {}", change_set)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn change_set_actions(&self, stack_name: &str, change_set: &str) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_change_set()
                .stack_name(stack_name)
                .change_set_name(change_set)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("DescribeChangeSet", DisplayErrorContext(&e).to_string()))?;

            for change in output.changes() {
                let Some(resource) = change.resource_change() else {
                    continue;
                };
                let action_type = changeset::action_type(
                    resource.action().map(|a| a.as_str()).unwrap_or_default(),
                    resource.replacement().map(|r| r.as_str()),
                );
                let mut action = Action::new(
                    action_type,
                    resource.resource_type().unwrap_or_default(),
                    resource.logical_resource_id().unwrap_or_default(),
                );
                if let Some(physical) = resource.physical_resource_id() {
                    action = action.with_detail("physical_id", Value::from(physical));
                }
                actions.push(action);
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(actions)
    }

    async fn delete_change_set(&self, stack_name: &str, change_set: &str) {
        if let Err(e) = self
            .client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
        {
            warn!(change_set, error = %DisplayErrorContext(&e), "Failed to delete empty change set");
        }
    }

    /// Logical id → (DeletionPolicy, Properties) from the deployed template
    async fn deployed_template(&self, stack_name: &str) -> Result<BTreeMap<String, (Option<String>, Value)>> {
        let output = self
            .client
            .get_template()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| sdk_error("GetTemplate", DisplayErrorContext(&e).to_string()))?;

        let body: Value = match output.template_body() {
            Some(body) => serde_json::from_str(body)?,
            None => return Ok(BTreeMap::new()),
        };

        Ok(body
            .get("Resources")
            .and_then(Value::as_object)
            .map(|resources| {
                resources
                    .iter()
                    .map(|(id, def)| {
                        let policy = def
                            .get("DeletionPolicy")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let properties = def.get("Properties").cloned().unwrap_or(Value::Null);
                        (id.clone(), (policy, properties))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CloudProvider for CloudFormationProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn display_name(&self) -> &str {
        "AWS CloudFormation"
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        match self.client.describe_account_limits().send().await {
            Ok(_) => Ok(AuthStatus::ok(format!(
                "CloudFormation ({})",
                self.region.as_deref().unwrap_or("default region")
            ))),
            Err(e) => Ok(AuthStatus::failed(DisplayErrorContext(&e).to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn get_state(&self, stack_name: &str) -> stackflow_cloud::Result<ProviderState> {
        let stack = self
            .describe_stack(stack_name)
            .await?
            .ok_or_else(|| AwsError::StackNotFound(stack_name.to_string()))?;
        let template = self.deployed_template(stack_name).await?;

        let mut state = ProviderState::new();
        state.outputs = stack_outputs(&stack);

        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_stack_resources()
                .stack_name(stack_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("ListStackResources", DisplayErrorContext(&e).to_string()))?;

            for summary in output.stack_resource_summaries() {
                let Some(logical_id) = summary.logical_resource_id() else {
                    continue;
                };
                let status = summary
                    .resource_status()
                    .map(|s| resource_status(s.as_str()))
                    .unwrap_or(ResourceStatus::Unknown);
                let mut resource = ResourceState::new(
                    summary.physical_resource_id().unwrap_or_default(),
                    summary.resource_type().unwrap_or_default(),
                )
                .with_status(status);
                if let Some((policy, properties)) = template.get(logical_id) {
                    resource = resource.with_attribute("properties", properties.clone());
                    if let Some(policy) = policy {
                        resource = resource.with_deletion_policy(policy.clone());
                    }
                }
                state.add(logical_id.to_string(), resource);
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(state)
    }

    #[instrument(skip(self, request), fields(stack = %request.stack_name))]
    async fn plan(&self, request: &DeployRequest) -> stackflow_cloud::Result<Plan> {
        let missing = request.missing_parameters();
        if !missing.is_empty() {
            return Err(stackflow_cloud::CloudError::InvalidTemplate(format!(
                "missing parameter values: {}",
                missing.join(", ")
            )));
        }

        let body = serde_json::to_string(&request.template)?;
        if body.len() > MAX_TEMPLATE_BODY {
            return Err(stackflow_cloud::CloudError::InvalidTemplate(format!(
                "template is {} bytes, larger than the {} byte inline limit",
                body.len(),
                MAX_TEMPLATE_BODY
            )));
        }

        let change_set_type = match self.describe_stack(&request.stack_name).await? {
            None => ChangeSetType::Create,
            Some(stack) => {
                let status = stack_status(&stack);
                if changeset::needs_recreate(&status) {
                    return Err(stackflow_cloud::CloudError::DeploymentFailed(format!(
                        "stack {} is in {}; destroy it before deploying again",
                        request.stack_name, status
                    )));
                }
                ChangeSetType::Update
            }
        };

        let change_set_name = format!(
            "stackflow-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let parameters: Vec<Parameter> = request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect();

        info!(change_set = %change_set_name, change_set_type = change_set_type.as_str(), "Creating change set");
        let output = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&change_set_name)
            .change_set_type(change_set_type)
            .template_body(body)
            .capabilities(Capability::CapabilityNamedIam)
            .set_parameters(Some(parameters))
            .send()
            .await
            .map_err(|e| sdk_error("CreateChangeSet", DisplayErrorContext(&e).to_string()))?;
        let change_set = output.id().unwrap_or(change_set_name.as_str()).to_string();

        if self
            .wait_for_change_set(&request.stack_name, &change_set)
            .await?
            .is_none()
        {
            info!("No changes");
            self.delete_change_set(&request.stack_name, &change_set).await;
            return Ok(Plan::empty(request.stack_name.clone()));
        }

        let actions = self
            .change_set_actions(&request.stack_name, &change_set)
            .await?;
        let plan = Plan::new(request.stack_name.clone(), actions).with_reference(change_set);
        info!(summary = %plan.summary(), "Change set ready");
        Ok(plan)
    }

    #[instrument(skip(self, request, plan), fields(stack = %request.stack_name))]
    async fn apply(&self, request: &DeployRequest, plan: &Plan) -> stackflow_cloud::Result<ApplyResult> {
        let start = Instant::now();
        let mut result = ApplyResult::new();

        if let Some(change_set) = plan.reference.as_deref().filter(|_| plan.has_changes) {
            info!(change_set, "Executing change set");
            self.client
                .execute_change_set()
                .stack_name(&request.stack_name)
                .change_set_name(change_set)
                .send()
                .await
                .map_err(|e| sdk_error("ExecuteChangeSet", DisplayErrorContext(&e).to_string()))?;
        }

        let stack = self
            .wait_for_stack(&request.stack_name)
            .await?
            .ok_or_else(|| AwsError::StackNotFound(request.stack_name.clone()))?;
        let status = stack_status(&stack);
        if changeset::is_failed(&status) {
            return Err(AwsError::StackFailed {
                stack: request.stack_name.clone(),
                status,
                reason: stack.stack_status_reason().unwrap_or_default().to_string(),
            }
            .into());
        }

        for action in &plan.actions {
            result.add_success(action.id.clone(), action.description.clone());
        }
        result.outputs = stack_outputs(&stack);
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(status = %status, duration_ms = result.duration_ms, "Stack settled");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn destroy(&self, stack_name: &str) -> stackflow_cloud::Result<ApplyResult> {
        let start = Instant::now();
        let state = self.get_state(stack_name).await?;

        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteStack", DisplayErrorContext(&e).to_string()))?;

        if let Some(stack) = self.wait_for_stack(stack_name).await? {
            let status = stack_status(&stack);
            if status != "DELETE_COMPLETE" {
                return Err(AwsError::StackFailed {
                    stack: stack_name.to_string(),
                    status,
                    reason: stack.stack_status_reason().unwrap_or_default().to_string(),
                }
                .into());
            }
        }

        let mut result = ApplyResult::new();
        for (logical_id, resource) in state.iter() {
            let message = if resource.is_retained_on_delete() {
                format!("{} retained ({})", logical_id, resource.id)
            } else {
                format!("{} deleted", logical_id)
            };
            result.add_success(logical_id.clone(), message);
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

fn sdk_error(operation: &'static str, message: String) -> AwsError {
    AwsError::Sdk { operation, message }
}

fn stack_status(stack: &Stack) -> String {
    stack
        .stack_status()
        .map(|s| s.as_str().to_string())
        .unwrap_or_default()
}

fn stack_outputs(stack: &Stack) -> BTreeMap<String, String> {
    stack
        .outputs()
        .iter()
        .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
        .collect()
}

fn resource_status(status: &str) -> ResourceStatus {
    match status {
        s if s.starts_with("DELETE_COMPLETE") => ResourceStatus::Deleted,
        s if s.starts_with("DELETE_SKIPPED") => ResourceStatus::Retained,
        s if s.ends_with("_FAILED") => ResourceStatus::Error,
        s if s.starts_with("CREATE_IN_PROGRESS") => ResourceStatus::Creating,
        s if s.starts_with("UPDATE_IN_PROGRESS") => ResourceStatus::Updating,
        s if s.starts_with("DELETE_IN_PROGRESS") => ResourceStatus::Deleting,
        s if s.ends_with("_COMPLETE") => ResourceStatus::Active,
        _ => ResourceStatus::Unknown,
    }
}
