//! In-memory account
//!
//! A [`Sandbox`] instantiates templates as stacks, creating resources in
//! dependency order and resolving intrinsics to synthetic physical ids and
//! ARNs. Removing a stack deletes its resources in reverse order, except those
//! with a `Retain` deletion policy, which stay behind as [`Orphan`]s.

use crate::api::RestApi;
use crate::error::{Result, SandboxError};
use crate::function::{Function, FunctionHandler, Invocation, Permission};
use crate::iam::{AttachedPolicy, Role};
use crate::identity::{IssuedToken, UserPool};
use crate::mapping::EventSourceMapping;
use crate::resolve::Resolver;
use crate::stream::Stream;
use crate::table::Table;
use crate::topic::{Delivery, DeliveryFailure, PublishedMessage, Topic};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use stackflow_synth::{AssetManifest, Template, deployment_order};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound on delivery/poll rounds in one `run_until_idle`
const MAX_IDLE_ROUNDS: usize = 10_000;

/// A created resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalResource {
    pub resource_type: String,
    /// Value of `Ref`
    pub physical_id: String,
    /// Values of `Fn::GetAtt`
    pub attributes: BTreeMap<String, Value>,
    /// Resolved properties it was created with
    pub properties: Value,
    pub deletion_policy: Option<String>,
    pub update_replace_policy: Option<String>,
    /// Owning pool, API or topic for child resources
    pub parent: Option<String>,
}

impl PhysicalResource {
    pub fn new(resource_type: impl Into<String>, physical_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            physical_id: physical_id.into(),
            attributes: BTreeMap::new(),
            properties: Value::Null,
            deletion_policy: None,
            update_replace_policy: None,
            parent: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn is_retained_on_delete(&self) -> bool {
        self.deletion_policy.as_deref() == Some("Retain")
    }
}

#[derive(Debug, Clone)]
pub struct DeployedStack {
    pub name: String,
    pub template: Template,
    pub parameters: BTreeMap<String, String>,
    pub resources: BTreeMap<String, PhysicalResource>,
    pub outputs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeployedStack {
    pub fn physical_id(&self, logical_id: &str) -> Option<&str> {
        self.resources
            .get(logical_id)
            .map(|r| r.physical_id.as_str())
    }
}

/// A resource left behind by a deleted stack
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Orphan {
    pub stack_name: String,
    pub logical_id: String,
    pub resource: PhysicalResource,
    pub retained_at: DateTime<Utc>,
}

pub struct Sandbox {
    pub(crate) account_id: String,
    pub(crate) region: String,
    clock_offset: Duration,
    stacks: BTreeMap<String, DeployedStack>,
    orphans: Vec<Orphan>,

    pub(crate) pools: BTreeMap<String, UserPool>,
    /// Domain prefix → pool id
    pub(crate) domains: BTreeMap<String, String>,
    pub(crate) tokens: BTreeMap<String, IssuedToken>,

    pub(crate) roles: BTreeMap<String, Role>,
    pub(crate) policies: BTreeMap<String, AttachedPolicy>,

    pub(crate) functions: BTreeMap<String, Function>,
    pub(crate) permissions: BTreeMap<String, Permission>,
    pub(crate) handlers: BTreeMap<String, Arc<dyn FunctionHandler>>,
    pub(crate) invocations: Vec<Invocation>,

    pub(crate) streams: BTreeMap<String, Stream>,
    pub(crate) mappings: BTreeMap<String, EventSourceMapping>,
    pub(crate) tables: BTreeMap<String, Table>,

    /// Topic ARN → topic
    pub(crate) topics: BTreeMap<String, Topic>,
    pub(crate) deliveries: VecDeque<Delivery>,
    pub(crate) published: Vec<PublishedMessage>,
    pub(crate) delivery_failures: Vec<DeliveryFailure>,

    pub(crate) apis: BTreeMap<String, RestApi>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT_ID, DEFAULT_REGION)
    }
}

impl Sandbox {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            clock_offset: Duration::zero(),
            stacks: BTreeMap::new(),
            orphans: Vec::new(),
            pools: BTreeMap::new(),
            domains: BTreeMap::new(),
            tokens: BTreeMap::new(),
            roles: BTreeMap::new(),
            policies: BTreeMap::new(),
            functions: BTreeMap::new(),
            permissions: BTreeMap::new(),
            handlers: BTreeMap::new(),
            invocations: Vec::new(),
            streams: BTreeMap::new(),
            mappings: BTreeMap::new(),
            tables: BTreeMap::new(),
            topics: BTreeMap::new(),
            deliveries: VecDeque::new(),
            published: Vec::new(),
            delivery_failures: Vec::new(),
            apis: BTreeMap::new(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sandbox time (wall clock plus any advance)
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    pub fn advance_clock(&mut self, by: Duration) {
        self.clock_offset += by;
    }

    /// `<stack>-<logical>-<SUFFIX>`, trimmed to the service's name limit
    pub(crate) fn generate_name(&self, stack_name: &str, logical_id: &str, max_len: usize) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..12].to_uppercase();
        let budget = max_len.saturating_sub(suffix.len() + 1);
        let prefix: String = format!("{}-{}", stack_name, logical_id)
            .chars()
            .take(budget)
            .collect();
        format!("{}-{}", prefix, suffix)
    }

    pub fn stack(&self, name: &str) -> Option<&DeployedStack> {
        self.stacks.get(name)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &DeployedStack> {
        self.stacks.values()
    }

    /// Resources retained by deleted stacks
    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    /// Create or update a stack from a template
    ///
    /// A failed create deletes what it had created (retaining `Retain`
    /// resources). On update, resources whose resolved properties or type
    /// changed are replaced and resources no longer in the template are
    /// deleted.
    #[instrument(skip(self, template, parameters))]
    pub fn deploy(
        &mut self,
        stack_name: &str,
        template: &Value,
        parameters: &BTreeMap<String, String>,
    ) -> Result<&DeployedStack> {
        let template = Template::from_json(template.clone())?;
        if let Some(missing) = template
            .parameters
            .keys()
            .find(|name| !parameters.contains_key(*name))
        {
            return Err(SandboxError::MissingParameter(missing.clone()));
        }
        let order = deployment_order(&template)?;

        let now = self.now();
        let (resources, created_at) = match self.stacks.remove(stack_name) {
            None => {
                let resources = self.create_resources(stack_name, &template, &order, parameters)?;
                (resources, now)
            }
            Some(previous) => {
                let created_at = previous.created_at;
                let resources = self.update_resources(stack_name, previous, &template, &order, parameters)?;
                (resources, created_at)
            }
        };

        let outputs = self.resolve_outputs(stack_name, &template, &resources, parameters)?;
        info!(resources = resources.len(), outputs = outputs.len(), "Stack deployed");
        let stack = DeployedStack {
            name: stack_name.to_string(),
            template,
            parameters: parameters.clone(),
            resources,
            outputs,
            created_at,
            updated_at: now,
        };
        Ok(self.stacks.entry(stack_name.to_string()).or_insert(stack))
    }

    /// Delete a stack; returns the resources it retained
    #[instrument(skip(self))]
    pub fn destroy(&mut self, stack_name: &str) -> Result<Vec<Orphan>> {
        let stack = self
            .stacks
            .remove(stack_name)
            .ok_or_else(|| SandboxError::StackNotFound(stack_name.to_string()))?;
        let mut order = deployment_order(&stack.template)?;
        order.reverse();

        let mut resources = stack.resources;
        let before = self.orphans.len();
        for logical_id in order {
            if let Some(resource) = resources.remove(&logical_id) {
                let retain = resource.is_retained_on_delete();
                self.dispose(stack_name, &logical_id, resource, retain);
            }
        }
        let retained = self.orphans[before..].to_vec();
        info!(retained = retained.len(), "Stack deleted");
        Ok(retained)
    }

    /// Deliver queued messages and poll mappings until nothing moves
    ///
    /// Returns the number of deliveries and batches processed. A batch that
    /// keeps failing does not count as progress.
    pub fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        for _ in 0..MAX_IDLE_ROUNDS {
            let step = self.drain_deliveries() + self.poll_mappings();
            if step == 0 {
                return processed;
            }
            processed += step;
        }
        warn!(processed, "Sandbox did not become idle");
        processed
    }

    fn create_resources(
        &mut self,
        stack_name: &str,
        template: &Template,
        order: &[String],
        parameters: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, PhysicalResource>> {
        let mut resources = BTreeMap::new();
        for logical_id in order {
            match self.instantiate(stack_name, logical_id, template, &resources, parameters) {
                Ok(resource) => {
                    resources.insert(logical_id.clone(), resource);
                }
                Err(e) => {
                    warn!(logical_id = %logical_id, error = %e, "Create failed, rolling back");
                    for created in order.iter().rev() {
                        if let Some(resource) = resources.remove(created) {
                            let retain = resource.is_retained_on_delete();
                            self.dispose(stack_name, created, resource, retain);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(resources)
    }

    fn update_resources(
        &mut self,
        stack_name: &str,
        previous: DeployedStack,
        template: &Template,
        order: &[String],
        parameters: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, PhysicalResource>> {
        let mut resources = previous.resources;

        let mut old_order = deployment_order(&previous.template)?;
        old_order.reverse();
        for logical_id in old_order {
            if !template.resources.contains_key(&logical_id)
                && let Some(resource) = resources.remove(&logical_id)
            {
                let retain = resource.is_retained_on_delete();
                self.dispose(stack_name, &logical_id, resource, retain);
            }
        }

        for logical_id in order {
            let Some(definition) = template.resources.get(logical_id) else {
                continue;
            };
            let properties = self.resolve_properties(stack_name, definition, &resources, parameters);
            if let Some(existing) = resources.get_mut(logical_id) {
                let unchanged = existing.resource_type == definition.resource_type
                    && properties.as_ref().ok() == Some(&existing.properties);
                if unchanged {
                    existing.deletion_policy = definition.deletion_policy.clone();
                    existing.update_replace_policy = definition.update_replace_policy.clone();
                    continue;
                }
            }
            if let Some(old) = resources.remove(logical_id) {
                info!(logical_id = %logical_id, "Replacing resource");
                let retain = old.update_replace_policy.as_deref() == Some("Retain");
                self.dispose(stack_name, logical_id, old, retain);
            }

            match self.instantiate(stack_name, logical_id, template, &resources, parameters) {
                Ok(resource) => {
                    resources.insert(logical_id.clone(), resource);
                }
                Err(e) => {
                    // Keep what exists so the stack can still be deleted
                    let now = self.now();
                    self.stacks.insert(
                        stack_name.to_string(),
                        DeployedStack {
                            name: stack_name.to_string(),
                            template: previous.template,
                            parameters: previous.parameters,
                            resources,
                            outputs: previous.outputs,
                            created_at: previous.created_at,
                            updated_at: now,
                        },
                    );
                    return Err(e);
                }
            }
        }
        Ok(resources)
    }

    fn resolve_properties(
        &self,
        stack_name: &str,
        definition: &stackflow_synth::Resource,
        resources: &BTreeMap<String, PhysicalResource>,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Value> {
        let resolver = Resolver {
            resources,
            parameters,
            account_id: &self.account_id,
            region: &self.region,
            stack_name,
        };
        resolver.resolve(&Value::Object(definition.properties.clone()))
    }

    fn instantiate(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        template: &Template,
        resources: &BTreeMap<String, PhysicalResource>,
        parameters: &BTreeMap<String, String>,
    ) -> Result<PhysicalResource> {
        let definition = template
            .resources
            .get(logical_id)
            .ok_or_else(|| SandboxError::UnresolvedReference(logical_id.to_string()))?;
        let properties = self.resolve_properties(stack_name, definition, resources, parameters)?;

        let mut resource = self.provision(stack_name, logical_id, &definition.resource_type, &properties)?;
        resource.properties = properties;
        resource.deletion_policy = definition.deletion_policy.clone();
        resource.update_replace_policy = definition.update_replace_policy.clone();
        Ok(resource)
    }

    fn provision(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        resource_type: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        match resource_type {
            "AWS::Cognito::UserPool" => self.create_user_pool(logical_id, props),
            "AWS::Cognito::UserPoolClient" => self.create_pool_client(logical_id, props),
            "AWS::Cognito::UserPoolDomain" => self.create_pool_domain(logical_id, props),
            "AWS::Cognito::UserPoolGroup" => self.create_pool_group(logical_id, props),
            "AWS::IAM::Role" => self.create_role(stack_name, logical_id, props),
            "AWS::IAM::Policy" => self.create_policy(stack_name, logical_id, props),
            "AWS::Lambda::Function" => self.create_function(stack_name, logical_id, props),
            "AWS::Lambda::Permission" => self.create_permission(stack_name, logical_id, props),
            "AWS::Lambda::EventSourceMapping" => self.create_event_source_mapping(logical_id, props),
            "AWS::Kinesis::Stream" => self.create_stream(stack_name, logical_id, props),
            "AWS::DynamoDB::Table" => self.create_table(stack_name, logical_id, props),
            "AWS::SNS::Topic" => self.create_topic(stack_name, logical_id, props),
            "AWS::SNS::Subscription" => self.create_subscription(logical_id, props),
            "AWS::ApiGateway::RestApi" => self.create_rest_api(logical_id, props),
            "AWS::ApiGateway::Resource" => self.create_api_resource(logical_id, props),
            "AWS::ApiGateway::Authorizer" => self.create_api_authorizer(logical_id, props),
            "AWS::ApiGateway::Method" => self.create_api_method(logical_id, props),
            "AWS::ApiGateway::Deployment" => self.create_api_deployment(logical_id, props),
            "AWS::ApiGateway::Stage" => self.create_api_stage(logical_id, props),
            other => Err(SandboxError::UnsupportedResource {
                logical_id: logical_id.to_string(),
                resource_type: other.to_string(),
            }),
        }
    }

    /// Delete a resource, or keep it as an orphan
    fn dispose(&mut self, stack_name: &str, logical_id: &str, resource: PhysicalResource, retain: bool) {
        if retain {
            info!(logical_id = %logical_id, physical_id = %resource.physical_id, "Resource retained");
            self.orphans.push(Orphan {
                stack_name: stack_name.to_string(),
                logical_id: logical_id.to_string(),
                resource,
                retained_at: self.now(),
            });
            return;
        }

        let service = resource.resource_type.split("::").nth(1).unwrap_or_default();
        match service {
            "Cognito" => self.delete_identity_resource(&resource),
            "IAM" => self.delete_iam_resource(&resource),
            "Lambda" if resource.resource_type == "AWS::Lambda::EventSourceMapping" => {
                self.delete_event_source_mapping(&resource)
            }
            "Lambda" => self.delete_function_resource(&resource),
            "Kinesis" => self.delete_stream(&resource),
            "DynamoDB" => self.delete_table(&resource),
            "SNS" => self.delete_topic_resource(&resource),
            "ApiGateway" => self.delete_api_resource(&resource),
            _ => {}
        }
    }

    fn resolve_outputs(
        &self,
        stack_name: &str,
        template: &Template,
        resources: &BTreeMap<String, PhysicalResource>,
        parameters: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let resolver = Resolver {
            resources,
            parameters,
            account_id: &self.account_id,
            region: &self.region,
            stack_name,
        };
        template
            .outputs
            .iter()
            .map(|(name, output)| {
                let value = match resolver.resolve(&output.value)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

/// Parameter values for a synthesized template's code assets
///
/// Every function gets the bucket, and the fingerprinted key when known or
/// `assets/<function>.zip` otherwise.
pub fn asset_parameters(assets: &AssetManifest, bucket: &str) -> BTreeMap<String, String> {
    assets
        .assets
        .iter()
        .flat_map(|asset| {
            let key = asset
                .default_key()
                .unwrap_or_else(|| format!("assets/{}.zip", asset.function));
            [
                (asset.bucket_parameter.clone(), bucket.to_string()),
                (asset.key_parameter.clone(), key),
            ]
        })
        .collect()
}
