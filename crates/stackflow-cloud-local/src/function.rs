//! Functions, invoke permissions and handlers
//!
//! Function code is never executed. Each function is backed by a registered
//! [`FunctionHandler`] that receives an [`InvocationContext`] carrying the
//! function role's session, through which it reaches the other services.

use crate::error::{Result, SandboxError};
use crate::iam::Session;
use crate::policy::wildcard_match;
use crate::props::{function_name_of, str_prop, u64_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handler behind a function
pub trait FunctionHandler: Send + Sync {
    fn handle(&self, ctx: &mut InvocationContext<'_>, event: Value) -> std::result::Result<Value, String>;
}

impl<F> FunctionHandler for F
where
    F: Fn(&mut InvocationContext<'_>, Value) -> std::result::Result<Value, String> + Send + Sync,
{
    fn handle(&self, ctx: &mut InvocationContext<'_>, event: Value) -> std::result::Result<Value, String> {
        self(ctx, event)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub arn: String,
    pub logical_id: String,
    pub handler: String,
    pub runtime: Option<String>,
    pub role_arn: String,
    pub memory_size: Option<u64>,
    pub timeout: Option<u64>,
    pub environment: BTreeMap<String, String>,
}

/// `AWS::Lambda::Permission`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: String,
    pub function_name: String,
    pub action: String,
    pub principal: String,
    pub source_arn: Option<String>,
}

/// What caused an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Direct,
    Api {
        api_id: String,
        method: String,
        path: String,
    },
    Stream {
        mapping: String,
        shard_id: String,
        records: usize,
    },
    Topic {
        topic_arn: String,
        message_id: String,
    },
}

/// One entry of the invocation log
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub function_name: String,
    pub trigger: Trigger,
    pub event: Value,
    pub result: std::result::Result<Value, String>,
    pub at: DateTime<Utc>,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

impl Sandbox {
    pub(crate) fn create_function(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let name = match str_prop(props, "FunctionName") {
            Some(name) => name.to_string(),
            None => self.generate_name(stack_name, logical_id, 64),
        };
        if self.functions.contains_key(&name) {
            return Err(SandboxError::AlreadyExists(format!("function {}", name)));
        }
        let role_arn = str_prop(props, "Role")
            .ok_or_else(|| SandboxError::invalid(logical_id, "Role is required"))?
            .to_string();
        self.service_session(&role_arn, &name)?;

        let environment = props
            .pointer("/Environment/Variables")
            .and_then(Value::as_object)
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().map_or_else(|| v.to_string(), String::from)))
                    .collect()
            })
            .unwrap_or_default();

        let arn = format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, name
        );
        self.functions.insert(
            name.clone(),
            Function {
                name: name.clone(),
                arn: arn.clone(),
                logical_id: logical_id.to_string(),
                handler: str_prop(props, "Handler").unwrap_or_default().to_string(),
                runtime: str_prop(props, "Runtime").map(String::from),
                role_arn,
                memory_size: u64_prop(props, "MemorySize"),
                timeout: u64_prop(props, "Timeout"),
                environment,
            },
        );
        info!(function = %name, "Function created");
        Ok(PhysicalResource::new("AWS::Lambda::Function", name).with_attribute("Arn", json!(arn)))
    }

    pub(crate) fn create_permission(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let function = str_prop(props, "FunctionName")
            .ok_or_else(|| SandboxError::invalid(logical_id, "FunctionName is required"))?;
        let function_name = function_name_of(function).to_string();
        if !self.functions.contains_key(&function_name) {
            return Err(SandboxError::not_found("Function", function_name));
        }

        let id = self.generate_name(stack_name, logical_id, 100);
        self.permissions.insert(
            id.clone(),
            Permission {
                id: id.clone(),
                function_name,
                action: str_prop(props, "Action").unwrap_or("lambda:InvokeFunction").to_string(),
                principal: str_prop(props, "Principal").unwrap_or_default().to_string(),
                source_arn: str_prop(props, "SourceArn").map(String::from),
            },
        );
        Ok(PhysicalResource::new("AWS::Lambda::Permission", id))
    }

    pub(crate) fn delete_function_resource(&mut self, resource: &PhysicalResource) {
        match resource.resource_type.as_str() {
            "AWS::Lambda::Function" => {
                self.functions.remove(&resource.physical_id);
            }
            "AWS::Lambda::Permission" => {
                self.permissions.remove(&resource.physical_id);
            }
            _ => {}
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Function name by name or logical id
    pub fn function_name(&self, name_or_logical_id: &str) -> Option<String> {
        if self.functions.contains_key(name_or_logical_id) {
            return Some(name_or_logical_id.to_string());
        }
        self.functions
            .values()
            .find(|f| f.logical_id == name_or_logical_id)
            .map(|f| f.name.clone())
    }

    /// Whether a service principal may invoke a function from a source ARN
    pub fn permits_invoke(&self, function_name: &str, principal: &str, source_arn: &str) -> bool {
        self.permissions.values().any(|p| {
            p.function_name == function_name
                && p.principal == principal
                && wildcard_match(&p.action.to_lowercase(), "lambda:invokefunction")
                && p
                    .source_arn
                    .as_deref()
                    .is_none_or(|pattern| wildcard_match(pattern, source_arn))
        })
    }

    /// Register a handler under a function name, logical id or handler string
    pub fn register_handler<F>(&mut self, key: impl Into<String>, handler: F)
    where
        F: Fn(&mut InvocationContext<'_>, Value) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(key.into(), Arc::new(handler));
    }

    pub fn register_handler_object(&mut self, key: impl Into<String>, handler: Arc<dyn FunctionHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Invoke a function directly
    pub fn invoke(&mut self, function: &str, event: Value) -> Result<std::result::Result<Value, String>> {
        let name = self
            .function_name(function)
            .ok_or_else(|| SandboxError::not_found("Function", function))?;
        Ok(self.invoke_function(&name, event, Trigger::Direct))
    }

    /// Run a function's handler and record the invocation
    pub(crate) fn invoke_function(
        &mut self,
        function_name: &str,
        event: Value,
        trigger: Trigger,
    ) -> std::result::Result<Value, String> {
        let result = self.run_handler(function_name, event.clone());
        match &result {
            Ok(_) => debug!(function = %function_name, ?trigger, "Invocation succeeded"),
            Err(e) => warn!(function = %function_name, ?trigger, error = %e, "Invocation failed"),
        }
        let at = self.now();
        self.invocations.push(Invocation {
            function_name: function_name.to_string(),
            trigger,
            event,
            result: result.clone(),
            at,
        });
        result
    }

    fn run_handler(&mut self, function_name: &str, event: Value) -> std::result::Result<Value, String> {
        let function = self
            .functions
            .get(function_name)
            .cloned()
            .ok_or_else(|| format!("Function not found: {}", function_name))?;
        let handler = [&function.name, &function.logical_id, &function.handler]
            .into_iter()
            .find_map(|key| self.handlers.get(key.as_str()).cloned())
            .ok_or_else(|| format!("No handler registered for {}", function.name))?;
        let session = self
            .service_session(&function.role_arn, &function.name)
            .map_err(|e| e.to_string())?;

        let mut ctx = InvocationContext {
            sandbox: self,
            function,
            session,
        };
        handler.handle(&mut ctx, event)
    }

    /// Every invocation so far, oldest first
    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    /// Invocations of one function (by name or logical id)
    pub fn invocations_of(&self, function: &str) -> Vec<&Invocation> {
        let name = self.function_name(function).unwrap_or_else(|| function.to_string());
        self.invocations
            .iter()
            .filter(|i| i.function_name == name)
            .collect()
    }
}

/// What a handler sees while it runs
///
/// Service calls are authorized against the current session, which starts as
/// the function's execution role and can be switched with [`act_as`].
///
/// [`act_as`]: InvocationContext::act_as
pub struct InvocationContext<'a> {
    sandbox: &'a mut Sandbox,
    function: Function,
    session: Session,
}

impl InvocationContext<'_> {
    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.function.environment.get(key).map(String::as_str)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Continue with another session's credentials
    pub fn act_as(&mut self, session: Session) {
        self.session = session;
    }

    pub fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<Session> {
        self.sandbox.assume_role(&self.session, role_arn, session_name)
    }

    pub fn role_arn(&self, role_name: &str) -> Option<String> {
        self.sandbox.role_arn(role_name)
    }

    pub fn put_item(&mut self, table: &str, item: Value) -> Result<Option<Value>> {
        let arn = self.sandbox.table_arn(table)?;
        self.sandbox.authorize(&self.session, "dynamodb:PutItem", &arn)?;
        self.sandbox.put_item(table, item)
    }

    pub fn get_item(&self, table: &str, key: &Value) -> Result<Option<Value>> {
        let arn = self.sandbox.table_arn(table)?;
        self.sandbox.authorize(&self.session, "dynamodb:GetItem", &arn)?;
        self.sandbox.get_item(table, key)
    }

    pub fn delete_item(&mut self, table: &str, key: &Value) -> Result<Option<Value>> {
        let arn = self.sandbox.table_arn(table)?;
        self.sandbox.authorize(&self.session, "dynamodb:DeleteItem", &arn)?;
        self.sandbox.delete_item(table, key)
    }

    /// Topic ARN by topic name
    pub fn topic_arn(&self, name: &str) -> Option<String> {
        self.sandbox.topic_arn(name)
    }

    pub fn publish(&mut self, topic_arn: &str, subject: Option<&str>, message: &str) -> Result<String> {
        self.sandbox.authorize(&self.session, "sns:Publish", topic_arn)?;
        self.sandbox.publish(topic_arn, subject, message)
    }

    pub fn user_pool_id(&self, name: &str) -> Option<String> {
        self.sandbox.user_pool_id(name)
    }

    pub fn admin_create_user(
        &mut self,
        pool_id: &str,
        username: &str,
        attributes: &[(&str, &str)],
    ) -> Result<String> {
        let arn = self.pool_arn(pool_id)?;
        self.sandbox.authorize(&self.session, "cognito-idp:AdminCreateUser", &arn)?;
        self.sandbox.admin_create_user(pool_id, username, attributes)
    }

    pub fn admin_update_user_attributes(
        &mut self,
        pool_id: &str,
        username: &str,
        attributes: &[(&str, &str)],
    ) -> Result<()> {
        let arn = self.pool_arn(pool_id)?;
        self.sandbox
            .authorize(&self.session, "cognito-idp:AdminUpdateUserAttributes", &arn)?;
        self.sandbox
            .admin_update_user_attributes(pool_id, username, attributes)
    }

    pub fn admin_add_user_to_group(&mut self, pool_id: &str, username: &str, group: &str) -> Result<()> {
        let arn = self.pool_arn(pool_id)?;
        self.sandbox.authorize(&self.session, "cognito-idp:AdminAddUserToGroup", &arn)?;
        self.sandbox.admin_add_user_to_group(pool_id, username, group)
    }

    fn pool_arn(&self, pool_id: &str) -> Result<String> {
        self.sandbox
            .user_pool(pool_id)
            .map(|p| p.arn.clone())
            .ok_or_else(|| SandboxError::not_found("User pool", pool_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_with_function() -> Sandbox {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_role(
                "Test",
                "Role",
                &json!({
                    "RoleName": "fn-role",
                    "ManagedPolicyArns": ["arn:aws:iam::aws:policy/CloudWatchFullAccess"]
                }),
            )
            .unwrap();
        sandbox
            .create_function(
                "Test",
                "EchoFn",
                &json!({
                    "FunctionName": "echo",
                    "Handler": "echo.main",
                    "Role": "arn:aws:iam::123456789012:role/fn-role",
                    "Environment": { "Variables": { "STAGE": "test" } }
                }),
            )
            .unwrap();
        sandbox
    }

    #[test]
    fn test_handler_lookup_and_log() {
        let mut sandbox = sandbox_with_function();

        let missing = sandbox.invoke("echo", json!({})).unwrap();
        assert!(missing.unwrap_err().contains("No handler"));

        sandbox.register_handler("EchoFn", |ctx: &mut InvocationContext<'_>, event: Value| {
            Ok(json!({ "stage": ctx.env("STAGE"), "event": event, "as": ctx.session().arn }))
        });
        let result = sandbox.invoke("EchoFn", json!({ "x": 1 })).unwrap().unwrap();
        assert_eq!(result["stage"], json!("test"));
        assert_eq!(result["event"], json!({ "x": 1 }));
        assert_eq!(
            result["as"],
            json!("arn:aws:sts::123456789012:assumed-role/fn-role/echo")
        );

        assert_eq!(sandbox.invocations().len(), 2);
        assert_eq!(sandbox.invocations_of("EchoFn").len(), 2);
        assert!(!sandbox.invocations()[0].succeeded());
        assert_eq!(sandbox.invocations()[1].trigger, Trigger::Direct);
    }

    #[test]
    fn test_permission_source_arn_pattern() {
        let mut sandbox = sandbox_with_function();
        sandbox
            .create_permission(
                "Test",
                "Perm",
                &json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": "arn:aws:lambda:us-east-1:123456789012:function:echo",
                    "Principal": "apigateway.amazonaws.com",
                    "SourceArn": "arn:aws:execute-api:us-east-1:123456789012:abc/*/POST/"
                }),
            )
            .unwrap();
        assert!(sandbox.permits_invoke(
            "echo",
            "apigateway.amazonaws.com",
            "arn:aws:execute-api:us-east-1:123456789012:abc/prod/POST/"
        ));
        assert!(!sandbox.permits_invoke(
            "echo",
            "apigateway.amazonaws.com",
            "arn:aws:execute-api:us-east-1:123456789012:abc/prod/GET/"
        ));
        assert!(!sandbox.permits_invoke(
            "echo",
            "sns.amazonaws.com",
            "arn:aws:execute-api:us-east-1:123456789012:abc/prod/POST/"
        ));
    }

    #[test]
    fn test_function_role_must_exist() {
        let mut sandbox = Sandbox::default();
        let err = sandbox
            .create_function(
                "Test",
                "Fn",
                &json!({ "Role": "arn:aws:iam::123456789012:role/missing" }),
            )
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound { .. }));
    }
}
