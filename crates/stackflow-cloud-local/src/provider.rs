//! Sandbox provider implementation
//!
//! Plans are computed by comparing the request with the stack the sandbox
//! holds. The sandbox has no in-place updates, so every property change is
//! planned as a replacement.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use serde_json::Value;
use stackflow_cloud::{
    Action, ActionType, ApplyResult, AuthStatus, CloudError, CloudProvider, DeployRequest, Plan,
    ProviderState, ResourceState, ResourceStatus, diff,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// In-memory deployment target
#[derive(Clone, Default)]
pub struct LocalProvider {
    sandbox: Arc<Mutex<Sandbox>>,
}

impl LocalProvider {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox: Arc::new(Mutex::new(sandbox)),
        }
    }

    /// Shared handle to the sandbox, for driving requests and events
    pub fn sandbox(&self) -> Arc<Mutex<Sandbox>> {
        Arc::clone(&self.sandbox)
    }

    fn state_of(sandbox: &Sandbox, stack_name: &str) -> Option<ProviderState> {
        let stack = sandbox.stack(stack_name)?;
        let mut state = ProviderState::new();
        state.outputs = stack.outputs.clone();
        for (logical_id, resource) in &stack.resources {
            // Compare against what the template said, not the resolved values
            let properties = stack
                .template
                .resource(logical_id)
                .map(|r| Value::Object(r.properties.clone()))
                .unwrap_or(Value::Null);
            let mut entry = ResourceState::new(&resource.physical_id, &resource.resource_type)
                .with_status(ResourceStatus::Active)
                .with_attribute("properties", properties);
            for (name, value) in &resource.attributes {
                entry.set_attribute(name.clone(), value.clone());
            }
            if let Some(policy) = &resource.deletion_policy {
                entry = entry.with_deletion_policy(policy.clone());
            }
            entry.created_at = stack.created_at;
            entry.updated_at = stack.updated_at;
            state.add(logical_id.clone(), entry);
        }
        Some(state)
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn display_name(&self) -> &str {
        "Local sandbox"
    }

    async fn check_auth(&self) -> stackflow_cloud::Result<AuthStatus> {
        let sandbox = self.sandbox.lock().await;
        Ok(AuthStatus::ok(format!(
            "sandbox account {} ({})",
            sandbox.account_id(),
            sandbox.region()
        )))
    }

    #[instrument(skip(self))]
    async fn get_state(&self, stack_name: &str) -> stackflow_cloud::Result<ProviderState> {
        let sandbox = self.sandbox.lock().await;
        Self::state_of(&sandbox, stack_name)
            .ok_or_else(|| CloudError::StackNotFound(stack_name.to_string()))
    }

    #[instrument(skip(self, request), fields(stack = %request.stack_name))]
    async fn plan(&self, request: &DeployRequest) -> stackflow_cloud::Result<Plan> {
        let missing = request.missing_parameters();
        if !missing.is_empty() {
            return Err(CloudError::InvalidTemplate(format!(
                "missing parameter values: {}",
                missing.join(", ")
            )));
        }

        let current = {
            let sandbox = self.sandbox.lock().await;
            Self::state_of(&sandbox, &request.stack_name).unwrap_or_default()
        };
        let mut plan = diff(request, &current)?;
        for action in &mut plan.actions {
            if action.action_type == ActionType::Update {
                *action = Action::new(
                    ActionType::Replace,
                    action.resource_type.clone(),
                    action.resource_id.clone(),
                );
            }
        }
        info!(summary = %plan.summary(), "Plan ready");
        Ok(plan)
    }

    #[instrument(skip(self, request, plan), fields(stack = %request.stack_name))]
    async fn apply(&self, request: &DeployRequest, plan: &Plan) -> stackflow_cloud::Result<ApplyResult> {
        let start = Instant::now();
        let mut result = ApplyResult::new();

        let mut sandbox = self.sandbox.lock().await;
        let stack = sandbox.deploy(&request.stack_name, &request.template, &request.parameters)?;

        for action in plan.actions.iter().filter(|a| a.action_type != ActionType::NoOp) {
            result.add_success(action.id.clone(), action.description.clone());
        }
        result.outputs = stack.outputs.clone();
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn destroy(&self, stack_name: &str) -> stackflow_cloud::Result<ApplyResult> {
        let start = Instant::now();
        let mut sandbox = self.sandbox.lock().await;
        let state = Self::state_of(&sandbox, stack_name)
            .ok_or_else(|| CloudError::StackNotFound(stack_name.to_string()))?;
        let retained = sandbox.destroy(stack_name)?;

        let mut result = ApplyResult::new();
        for (logical_id, _) in state.iter() {
            let message = match retained.iter().find(|o| &o.logical_id == logical_id) {
                Some(orphan) => format!("{} retained ({})", logical_id, orphan.resource.physical_id),
                None => format!("{} deleted", logical_id),
            };
            result.add_success(logical_id.clone(), message);
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}
