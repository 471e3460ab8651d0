//! Roles, policies and role sessions

use crate::error::{Result, SandboxError};
use crate::policy::{self, Decision, Statement};
use crate::props::{str_list, str_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub arn: String,
    pub trust: Vec<Statement>,
    pub managed_policy_arns: Vec<String>,
    /// Statements from the role's own `Policies` property
    pub inline: Vec<Statement>,
}

/// A standalone `AWS::IAM::Policy` attached to roles
#[derive(Debug, Clone)]
pub struct AttachedPolicy {
    pub id: String,
    pub name: String,
    pub statements: Vec<Statement>,
    pub roles: Vec<String>,
}

/// Credentials of an assumed role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub role_name: String,
    pub role_arn: String,
    pub session_name: String,
    /// arn:aws:sts::<account>:assumed-role/<role>/<session>
    pub arn: String,
}

impl Sandbox {
    pub(crate) fn create_role(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let name = match str_prop(props, "RoleName") {
            Some(name) => name.to_string(),
            None => self.generate_name(stack_name, logical_id, 64),
        };
        if self.roles.contains_key(&name) {
            return Err(SandboxError::AlreadyExists(format!("role {}", name)));
        }

        let trust = props
            .get("AssumeRolePolicyDocument")
            .map(policy::parse_document)
            .unwrap_or_default();
        let inline = props
            .get("Policies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|p| p.get("PolicyDocument"))
            .flat_map(policy::parse_document)
            .collect();

        let arn = format!("arn:aws:iam::{}:role/{}", self.account_id, name);
        self.roles.insert(
            name.clone(),
            Role {
                name: name.clone(),
                arn: arn.clone(),
                trust,
                managed_policy_arns: str_list(props, "ManagedPolicyArns"),
                inline,
            },
        );
        info!(role = %name, "Role created");

        let role_id = format!("AROA{}", &Uuid::new_v4().simple().to_string()[..17]).to_uppercase();
        Ok(PhysicalResource::new("AWS::IAM::Role", name)
            .with_attribute("Arn", json!(arn))
            .with_attribute("RoleId", json!(role_id)))
    }

    pub(crate) fn create_policy(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        props: &Value,
    ) -> Result<PhysicalResource> {
        let roles = str_list(props, "Roles");
        if let Some(missing) = roles.iter().find(|r| !self.roles.contains_key(*r)) {
            return Err(SandboxError::invalid(
                logical_id,
                format!("role {} does not exist", missing),
            ));
        }

        let id = self.generate_name(stack_name, logical_id, 128);
        let statements = props
            .get("PolicyDocument")
            .map(policy::parse_document)
            .unwrap_or_default();
        self.policies.insert(
            id.clone(),
            AttachedPolicy {
                id: id.clone(),
                name: str_prop(props, "PolicyName").unwrap_or(logical_id).to_string(),
                statements,
                roles,
            },
        );
        Ok(PhysicalResource::new("AWS::IAM::Policy", id))
    }

    pub(crate) fn delete_iam_resource(&mut self, resource: &PhysicalResource) {
        match resource.resource_type.as_str() {
            "AWS::IAM::Role" => {
                self.roles.remove(&resource.physical_id);
            }
            "AWS::IAM::Policy" => {
                self.policies.remove(&resource.physical_id);
            }
            _ => {}
        }
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// ARN of a role by name
    pub fn role_arn(&self, name: &str) -> Option<String> {
        self.roles.get(name).map(|r| r.arn.clone())
    }

    /// Every statement that applies to a role
    pub fn role_statements(&self, role_name: &str) -> Vec<Statement> {
        let Some(role) = self.roles.get(role_name) else {
            return Vec::new();
        };
        let managed = role
            .managed_policy_arns
            .iter()
            .flat_map(|arn| policy::managed_policy_statements(arn));
        let attached = self
            .policies
            .values()
            .filter(|p| p.roles.iter().any(|r| r == role_name))
            .flat_map(|p| p.statements.clone());
        managed
            .chain(role.inline.iter().cloned())
            .chain(attached)
            .collect()
    }

    pub fn evaluate(&self, session: &Session, action: &str, resource: &str) -> Decision {
        policy::evaluate(&self.role_statements(&session.role_name), action, resource)
    }

    pub(crate) fn authorize(&self, session: &Session, action: &str, resource: &str) -> Result<()> {
        let decision = self.evaluate(session, action, resource);
        debug!(principal = %session.arn, action, resource, ?decision, "Authorization");
        if decision.is_allowed() {
            Ok(())
        } else {
            Err(SandboxError::AccessDenied {
                principal: session.arn.clone(),
                action: action.to_string(),
                resource: resource.to_string(),
            })
        }
    }

    /// Session a service obtains by assuming a role on its own behalf
    pub(crate) fn service_session(&self, role_arn: &str, session_name: &str) -> Result<Session> {
        let role_name = role_arn.rsplit('/').next().unwrap_or(role_arn);
        if !self.roles.contains_key(role_name) {
            return Err(SandboxError::not_found("Role", role_arn));
        }
        Ok(self.session(role_name, session_name))
    }

    /// `sts:AssumeRole` from an existing session
    ///
    /// The caller needs permission for the target role ARN, and the target's
    /// trust policy must admit the caller's session.
    pub fn assume_role(&self, caller: &Session, role_arn: &str, session_name: &str) -> Result<Session> {
        let role_name = role_arn.rsplit('/').next().unwrap_or(role_arn);
        let target = self
            .roles
            .get(role_name)
            .ok_or_else(|| SandboxError::not_found("Role", role_arn))?;

        self.authorize(caller, "sts:AssumeRole", &target.arn)?;
        if !policy::trust_admits(&target.trust, &caller.arn, &caller.role_arn) {
            warn!(caller = %caller.arn, role = %target.arn, "Trust policy rejected caller");
            return Err(SandboxError::AccessDenied {
                principal: caller.arn.clone(),
                action: "sts:AssumeRole".to_string(),
                resource: target.arn.clone(),
            });
        }
        info!(caller = %caller.arn, role = %target.arn, "Role assumed");
        Ok(self.session(role_name, session_name))
    }

    fn session(&self, role_name: &str, session_name: &str) -> Session {
        Session {
            role_name: role_name.to_string(),
            role_arn: format!("arn:aws:iam::{}:role/{}", self.account_id, role_name),
            session_name: session_name.to_string(),
            arn: format!(
                "arn:aws:sts::{}:assumed-role/{}/{}",
                self.account_id, role_name, session_name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trust_for(principal: Value) -> Value {
        json!({ "Statement": [{ "Action": "sts:AssumeRole", "Effect": "Allow", "Principal": principal }] })
    }

    fn sandbox() -> Sandbox {
        let mut sandbox = Sandbox::default();
        sandbox
            .create_role(
                "Test",
                "CallerRole",
                &json!({
                    "RoleName": "caller",
                    "AssumeRolePolicyDocument": trust_for(json!({ "Service": "lambda.amazonaws.com" })),
                    "ManagedPolicyArns": ["arn:aws:iam::aws:policy/CloudWatchFullAccess"]
                }),
            )
            .unwrap();
        sandbox
            .create_role(
                "Test",
                "Elevated",
                &json!({
                    "RoleName": "AppAdmin",
                    "AssumeRolePolicyDocument": trust_for(json!({
                        "AWS": "arn:aws:sts::123456789012:assumed-role/caller/create-fn"
                    })),
                    "ManagedPolicyArns": ["arn:aws:iam::aws:policy/AmazonCognitoPowerUser"]
                }),
            )
            .unwrap();
        sandbox
    }

    #[test]
    fn test_assume_role_needs_grant_and_trust() {
        let mut sandbox = sandbox();
        let caller = sandbox
            .service_session("arn:aws:iam::123456789012:role/caller", "create-fn")
            .unwrap();
        let target = "arn:aws:iam::123456789012:role/AppAdmin";

        // No grant yet
        assert!(matches!(
            sandbox.assume_role(&caller, target, "s"),
            Err(SandboxError::AccessDenied { .. })
        ));

        sandbox
            .create_policy(
                "Test",
                "Grant",
                &json!({
                    "PolicyDocument": { "Statement": [
                        { "Action": "sts:AssumeRole", "Effect": "Allow", "Resource": target }
                    ]},
                    "PolicyName": "Grant",
                    "Roles": ["caller"]
                }),
            )
            .unwrap();
        let elevated = sandbox.assume_role(&caller, target, "s").unwrap();
        assert_eq!(elevated.role_name, "AppAdmin");
        assert!(
            sandbox
                .evaluate(&elevated, "cognito-idp:AdminAddUserToGroup", "arn:x")
                .is_allowed()
        );

        // Same role, different session name: trust does not admit it
        let other = sandbox
            .service_session("arn:aws:iam::123456789012:role/caller", "other-fn")
            .unwrap();
        assert!(sandbox.assume_role(&other, target, "s").is_err());
    }

    #[test]
    fn test_policy_requires_existing_role() {
        let mut sandbox = sandbox();
        let err = sandbox
            .create_policy("Test", "Grant", &json!({ "Roles": ["missing"] }))
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidProperty { .. }));
    }

    #[test]
    fn test_duplicate_role_name() {
        let mut sandbox = sandbox();
        assert!(matches!(
            sandbox.create_role("Test", "Again", &json!({ "RoleName": "caller" })),
            Err(SandboxError::AlreadyExists(_))
        ));
    }
}
