//! User pools: sign-up, confirmation, admin authentication and groups

use crate::error::{Result, SandboxError};
use crate::props::{bool_prop, str_list, str_prop, u64_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const ADMIN_USER_PASSWORD_FLOW: &str = "ALLOW_ADMIN_USER_PASSWORD_AUTH";

/// Token lifetime reported in authentication results (seconds)
pub const TOKEN_EXPIRES_IN: u64 = 3600;

/// Refresh token lifetime (seconds)
pub const REFRESH_TOKEN_EXPIRES_IN: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRules {
    pub min_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digits: bool,
    pub require_symbols: bool,
}

impl PasswordRules {
    fn from_props(props: &Value) -> Self {
        let policy = props.pointer("/Policies/PasswordPolicy").unwrap_or(&Value::Null);
        Self {
            min_length: u64_prop(policy, "MinimumLength").unwrap_or(8) as usize,
            require_lowercase: bool_prop(policy, "RequireLowercase").unwrap_or(true),
            require_uppercase: bool_prop(policy, "RequireUppercase").unwrap_or(true),
            require_digits: bool_prop(policy, "RequireNumbers").unwrap_or(true),
            require_symbols: bool_prop(policy, "RequireSymbols").unwrap_or(true),
        }
    }

    /// Violated rules, empty when the password conforms
    pub fn violations(&self, password: &str) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if password.chars().count() < self.min_length {
            violations.push("Password not long enough");
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push("Password must have lowercase characters");
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push("Password must have uppercase characters");
        }
        if self.require_digits && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("Password must have numeric characters");
        }
        if self.require_symbols && !password.chars().any(|c| c.is_ascii_punctuation()) {
            violations.push("Password must have symbol characters");
        }
        violations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Unconfirmed,
    Confirmed,
    ForceChangePassword,
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub sub: String,
    pub attributes: BTreeMap<String, String>,
    pub(crate) password: String,
    pub status: UserStatus,
    pub groups: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct PoolClient {
    pub id: String,
    pub name: String,
    pub secret: Option<String>,
    pub explicit_auth_flows: Vec<String>,
    pub oauth_flows: Vec<String>,
    pub oauth_scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub description: Option<String>,
    pub role_arn: Option<String>,
    pub precedence: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UserPool {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub password_rules: PasswordRules,
    pub admin_create_only: bool,
    pub alias_attributes: Vec<String>,
    pub username_attributes: Vec<String>,
    pub auto_verified: Vec<String>,
    pub required_attributes: Vec<String>,
    pub custom_attributes: Vec<String>,
    pub clients: BTreeMap<String, PoolClient>,
    pub groups: BTreeMap<String, Group>,
    pub users: BTreeMap<String, User>,
}

impl UserPool {
    fn find_user(&self, name: &str) -> Option<&User> {
        if let Some(user) = self.users.get(name) {
            return Some(user);
        }
        // Sign-in by a verified alias (email, phone_number)
        self.alias_attributes
            .iter()
            .chain(&self.username_attributes)
            .find_map(|attr| {
                self.users.values().find(|u| {
                    u.attributes.get(attr).map(String::as_str) == Some(name)
                        && u.attributes.get(&format!("{}_verified", attr)).map(String::as_str)
                            == Some("true")
                })
            })
    }

    fn check_attributes(&self, attributes: &BTreeMap<String, String>) -> Result<()> {
        let missing: Vec<&str> = self
            .required_attributes
            .iter()
            .filter(|name| !attributes.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(SandboxError::InvalidParameter(format!(
                "Attributes did not conform to the schema: {} required",
                missing.join(", ")
            )));
        }
        for name in attributes.keys() {
            if let Some(custom) = name.strip_prefix("custom:")
                && !self.custom_attributes.iter().any(|c| c == custom)
            {
                return Err(SandboxError::InvalidParameter(format!(
                    "Attributes did not conform to the schema: Type for attribute {{{}}} could not be determined",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Issued token (opaque uuid)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IssuedToken {
    pub pool_id: String,
    pub client_id: String,
    pub username: String,
    pub token_use: &'static str,
    pub issued_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = match self.token_use {
            "refresh" => REFRESH_TOKEN_EXPIRES_IN,
            _ => TOKEN_EXPIRES_IN,
        };
        self.issued_at + Duration::seconds(lifetime as i64)
    }
}

/// Result of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationResult {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub token_type: String,
}

impl Sandbox {
    pub(crate) fn create_user_pool(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let id = format!(
            "{}_{}",
            self.region,
            &Uuid::new_v4().simple().to_string()[..9]
        );
        let arn = format!(
            "arn:aws:cognito-idp:{}:{}:userpool/{}",
            self.region, self.account_id, id
        );

        let schema = props.get("Schema").and_then(Value::as_array);
        let required_attributes = schema
            .into_iter()
            .flatten()
            .filter(|attr| bool_prop(attr, "Required") == Some(true))
            .filter_map(|attr| str_prop(attr, "Name").map(String::from))
            .collect();
        let custom_attributes = schema
            .into_iter()
            .flatten()
            .filter(|attr| attr.get("AttributeDataType").is_some())
            .filter_map(|attr| str_prop(attr, "Name").map(String::from))
            .collect();

        let pool = UserPool {
            id: id.clone(),
            arn: arn.clone(),
            name: str_prop(props, "UserPoolName").unwrap_or(logical_id).to_string(),
            password_rules: PasswordRules::from_props(props),
            admin_create_only: props
                .pointer("/AdminCreateUserConfig/AllowAdminCreateUserOnly")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            alias_attributes: str_list(props, "AliasAttributes"),
            username_attributes: str_list(props, "UsernameAttributes"),
            auto_verified: str_list(props, "AutoVerifiedAttributes"),
            required_attributes,
            custom_attributes,
            clients: BTreeMap::new(),
            groups: BTreeMap::new(),
            users: BTreeMap::new(),
        };
        info!(pool_id = %id, name = %pool.name, "User pool created");
        self.pools.insert(id.clone(), pool);

        Ok(PhysicalResource::new("AWS::Cognito::UserPool", id)
            .with_attribute("Arn", json!(arn))
            .with_attribute(
                "ProviderName",
                json!(format!("cognito-idp.{}.amazonaws.com/{}", self.region, arn)),
            ))
    }

    pub(crate) fn create_pool_client(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let pool_id = required(props, "UserPoolId", logical_id)?;
        let pool = self.pool_mut(&pool_id)?;

        let client_id = Uuid::new_v4().simple().to_string()[..26].to_string();
        let client = PoolClient {
            id: client_id.clone(),
            name: str_prop(props, "ClientName").unwrap_or(logical_id).to_string(),
            secret: (bool_prop(props, "GenerateSecret") == Some(true))
                .then(|| format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())),
            explicit_auth_flows: str_list(props, "ExplicitAuthFlows"),
            oauth_flows: str_list(props, "AllowedOAuthFlows"),
            oauth_scopes: str_list(props, "AllowedOAuthScopes"),
        };
        let secret = client.secret.clone();
        pool.clients.insert(client_id.clone(), client);

        let mut resource = PhysicalResource::new("AWS::Cognito::UserPoolClient", client_id)
            .with_parent(pool_id);
        if let Some(secret) = secret {
            resource = resource.with_attribute("ClientSecret", json!(secret));
        }
        Ok(resource)
    }

    pub(crate) fn create_pool_domain(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let prefix = required(props, "Domain", logical_id)?;
        let pool_id = required(props, "UserPoolId", logical_id)?;
        self.pool_mut(&pool_id)?;

        // Hosted-domain prefixes are unique per region
        if self.domains.contains_key(&prefix) {
            return Err(SandboxError::DomainAlreadyExists(prefix));
        }
        self.domains.insert(prefix.clone(), pool_id.clone());

        let cloud_front = format!("{}.auth.{}.amazoncognito.com", prefix, self.region);
        Ok(PhysicalResource::new("AWS::Cognito::UserPoolDomain", prefix)
            .with_parent(pool_id)
            .with_attribute("CloudFrontDistribution", json!(cloud_front)))
    }

    pub(crate) fn create_pool_group(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let pool_id = required(props, "UserPoolId", logical_id)?;
        let name = str_prop(props, "GroupName").unwrap_or(logical_id).to_string();
        let pool = self.pool_mut(&pool_id)?;
        if pool.groups.contains_key(&name) {
            return Err(SandboxError::AlreadyExists(format!("group {}", name)));
        }
        pool.groups.insert(
            name.clone(),
            Group {
                name: name.clone(),
                description: str_prop(props, "Description").map(String::from),
                role_arn: str_prop(props, "RoleArn").map(String::from),
                precedence: u64_prop(props, "Precedence"),
            },
        );
        Ok(PhysicalResource::new("AWS::Cognito::UserPoolGroup", name).with_parent(pool_id))
    }

    pub(crate) fn delete_identity_resource(&mut self, resource: &PhysicalResource) {
        let parent = resource.parent.as_deref().unwrap_or_default();
        match resource.resource_type.as_str() {
            "AWS::Cognito::UserPool" => {
                self.pools.remove(&resource.physical_id);
                self.domains.retain(|_, pool| *pool != resource.physical_id);
                self.tokens.retain(|_, t| t.pool_id != resource.physical_id);
            }
            "AWS::Cognito::UserPoolClient" => {
                if let Some(pool) = self.pools.get_mut(parent) {
                    pool.clients.remove(&resource.physical_id);
                }
                self.tokens.retain(|_, t| t.client_id != resource.physical_id);
            }
            "AWS::Cognito::UserPoolDomain" => {
                self.domains.remove(&resource.physical_id);
            }
            "AWS::Cognito::UserPoolGroup" => {
                if let Some(pool) = self.pools.get_mut(parent) {
                    pool.groups.remove(&resource.physical_id);
                    for user in pool.users.values_mut() {
                        user.groups.remove(&resource.physical_id);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn user_pool(&self, pool_id: &str) -> Option<&UserPool> {
        self.pools.get(pool_id)
    }

    /// Pool id by pool name
    pub fn user_pool_id(&self, name: &str) -> Option<String> {
        self.pools
            .values()
            .find(|p| p.name == name)
            .map(|p| p.id.clone())
    }

    /// Client id by pool id and client name
    pub fn user_pool_client_id(&self, pool_id: &str, client_name: &str) -> Option<String> {
        self.pools
            .get(pool_id)?
            .clients
            .values()
            .find(|c| c.name == client_name)
            .map(|c| c.id.clone())
    }

    /// Pool that owns a hosted-domain prefix
    pub fn domain_owner(&self, prefix: &str) -> Option<&str> {
        self.domains.get(prefix).map(String::as_str)
    }

    /// Self-service registration; the user starts unconfirmed
    #[instrument(skip(self, password, attributes))]
    pub fn sign_up(
        &mut self,
        client_id: &str,
        username: &str,
        password: &str,
        attributes: &[(&str, &str)],
    ) -> Result<String> {
        let pool_id = self.pool_of_client(client_id)?;
        let pool = self.pool_mut(&pool_id)?;

        if pool.admin_create_only {
            return Err(SandboxError::NotAuthorized(
                "SignUp is not permitted for this user pool".to_string(),
            ));
        }
        if pool.users.contains_key(username) {
            return Err(SandboxError::UsernameExists(username.to_string()));
        }
        let violations = pool.password_rules.violations(password);
        if !violations.is_empty() {
            return Err(SandboxError::InvalidPassword(violations.join(", ")));
        }
        let attributes: BTreeMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pool.check_attributes(&attributes)?;

        let sub = Uuid::new_v4().to_string();
        pool.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                sub: sub.clone(),
                attributes,
                password: password.to_string(),
                status: UserStatus::Unconfirmed,
                groups: BTreeSet::new(),
            },
        );
        debug!(pool_id = %pool_id, "User signed up");
        Ok(sub)
    }

    /// Confirm a signed-up user; auto-verified attributes become verified
    #[instrument(skip(self))]
    pub fn confirm_sign_up(&mut self, client_id: &str, username: &str) -> Result<()> {
        let pool_id = self.pool_of_client(client_id)?;
        self.admin_confirm_sign_up(&pool_id, username)
    }

    pub fn admin_confirm_sign_up(&mut self, pool_id: &str, username: &str) -> Result<()> {
        let pool = self.pool_mut(pool_id)?;
        let auto_verified = pool.auto_verified.clone();
        let user = pool
            .users
            .get_mut(username)
            .ok_or_else(|| SandboxError::not_found("User", username))?;
        user.status = UserStatus::Confirmed;
        for attr in auto_verified {
            if user.attributes.contains_key(&attr) {
                user.attributes.insert(format!("{}_verified", attr), "true".to_string());
            }
        }
        Ok(())
    }

    /// Create a user on behalf of an administrator
    pub fn admin_create_user(
        &mut self,
        pool_id: &str,
        username: &str,
        attributes: &[(&str, &str)],
    ) -> Result<String> {
        let pool = self.pool_mut(pool_id)?;
        if pool.users.contains_key(username) {
            return Err(SandboxError::UsernameExists(username.to_string()));
        }
        let attributes: BTreeMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sub = Uuid::new_v4().to_string();
        pool.users.insert(
            username.to_string(),
            User {
                username: username.to_string(),
                sub: sub.clone(),
                attributes,
                password: Uuid::new_v4().to_string(),
                status: UserStatus::ForceChangePassword,
                groups: BTreeSet::new(),
            },
        );
        Ok(sub)
    }

    /// Overwrite or add attributes of an existing user
    pub fn admin_update_user_attributes(
        &mut self,
        pool_id: &str,
        username: &str,
        attributes: &[(&str, &str)],
    ) -> Result<()> {
        let pool = self.pool_mut(pool_id)?;
        let user = pool
            .users
            .get_mut(username)
            .ok_or_else(|| SandboxError::not_found("User", username))?;
        for (key, value) in attributes {
            user.attributes.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Username/password authentication through the admin flow
    #[instrument(skip(self, password))]
    pub fn admin_initiate_auth(
        &mut self,
        pool_id: &str,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthenticationResult> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| SandboxError::not_found("User pool", pool_id))?;
        let client = pool
            .clients
            .get(client_id)
            .ok_or_else(|| SandboxError::not_found("User pool client", client_id))?;
        if !client
            .explicit_auth_flows
            .iter()
            .any(|f| f == ADMIN_USER_PASSWORD_FLOW)
        {
            return Err(SandboxError::InvalidParameter(
                "Auth flow not enabled for this client".to_string(),
            ));
        }

        let user = pool
            .find_user(username)
            .filter(|u| u.password == password)
            .ok_or_else(|| {
                SandboxError::NotAuthorized("Incorrect username or password.".to_string())
            })?;
        match user.status {
            UserStatus::Confirmed => {}
            UserStatus::Unconfirmed => {
                return Err(SandboxError::UserNotConfirmed(username.to_string()));
            }
            UserStatus::ForceChangePassword => {
                return Err(SandboxError::NotAuthorized(
                    "Password change required".to_string(),
                ));
            }
        }

        let username = user.username.clone();
        let now = self.now();
        self.tokens.retain(|_, t| t.expires_at() > now);
        let mut issue = |token_use: &'static str| {
            let token = Uuid::new_v4().to_string();
            self.tokens.insert(
                token.clone(),
                IssuedToken {
                    pool_id: pool_id.to_string(),
                    client_id: client_id.to_string(),
                    username: username.clone(),
                    token_use,
                    issued_at: now,
                },
            );
            token
        };
        let result = AuthenticationResult {
            access_token: issue("access"),
            id_token: issue("id"),
            refresh_token: issue("refresh"),
            expires_in: TOKEN_EXPIRES_IN,
            token_type: "Bearer".to_string(),
        };
        info!(pool_id = %pool_id, "User authenticated");
        Ok(result)
    }

    pub fn admin_add_user_to_group(&mut self, pool_id: &str, username: &str, group: &str) -> Result<()> {
        let pool = self.pool_mut(pool_id)?;
        if !pool.groups.contains_key(group) {
            return Err(SandboxError::not_found("Group", group));
        }
        let user = pool
            .users
            .get_mut(username)
            .ok_or_else(|| SandboxError::not_found("User", username))?;
        user.groups.insert(group.to_string());
        Ok(())
    }

    /// Claims of an id or access token, with the pool ARN that issued it
    ///
    /// Groups are read at lookup time, so membership changes show up in
    /// tokens issued earlier. Expired tokens have no claims.
    pub fn token_claims(&self, token: &str) -> Option<(String, Map<String, Value>)> {
        let issued = self.tokens.get(token)?;
        if issued.token_use == "refresh" || self.now() >= issued.expires_at() {
            return None;
        }
        let pool = self.pools.get(&issued.pool_id)?;
        let user = pool.users.get(&issued.username)?;

        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!(user.sub));
        claims.insert("cognito:username".to_string(), json!(user.username));
        claims.insert("token_use".to_string(), json!(issued.token_use));
        claims.insert("aud".to_string(), json!(issued.client_id));
        claims.insert("auth_time".to_string(), json!(issued.issued_at.timestamp()));
        claims.insert("iat".to_string(), json!(issued.issued_at.timestamp()));
        claims.insert("exp".to_string(), json!(issued.expires_at().timestamp()));
        claims.insert(
            "iss".to_string(),
            json!(format!(
                "https://cognito-idp.{}.amazonaws.com/{}",
                self.region, pool.id
            )),
        );
        for (key, value) in &user.attributes {
            claims.insert(key.clone(), json!(value));
        }

        if !user.groups.is_empty() {
            let mut groups: Vec<&Group> = user
                .groups
                .iter()
                .filter_map(|g| pool.groups.get(g))
                .collect();
            groups.sort_by_key(|g| g.precedence.unwrap_or(u64::MAX));
            let roles: Vec<&str> = groups.iter().filter_map(|g| g.role_arn.as_deref()).collect();
            claims.insert(
                "cognito:groups".to_string(),
                json!(groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>()),
            );
            if !roles.is_empty() {
                claims.insert("cognito:preferred_role".to_string(), json!(roles[0]));
                claims.insert("cognito:roles".to_string(), json!(roles));
            }
        }
        Some((pool.arn.clone(), claims))
    }

    fn pool_of_client(&self, client_id: &str) -> Result<String> {
        self.pools
            .values()
            .find(|p| p.clients.contains_key(client_id))
            .map(|p| p.id.clone())
            .ok_or_else(|| SandboxError::not_found("User pool client", client_id))
    }

    fn pool_mut(&mut self, pool_id: &str) -> Result<&mut UserPool> {
        self.pools
            .get_mut(pool_id)
            .ok_or_else(|| SandboxError::not_found("User pool", pool_id))
    }
}

fn required(props: &Value, key: &str, logical_id: &str) -> Result<String> {
    str_prop(props, key)
        .map(String::from)
        .ok_or_else(|| SandboxError::invalid(logical_id, format!("{} is required", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_with_pool() -> (Sandbox, String, String) {
        let mut sandbox = Sandbox::default();
        let pool = sandbox
            .create_user_pool(
                "UserPool",
                &json!({
                    "UserPoolName": "MyUserPool",
                    "AdminCreateUserConfig": { "AllowAdminCreateUserOnly": false },
                    "Policies": { "PasswordPolicy": {
                        "MinimumLength": 8, "RequireLowercase": true, "RequireUppercase": true,
                        "RequireNumbers": true, "RequireSymbols": true
                    }},
                    "AliasAttributes": ["email"],
                    "AutoVerifiedAttributes": ["email"],
                    "Schema": [
                        { "Name": "given_name", "Required": true, "Mutable": true },
                        { "Name": "region", "AttributeDataType": "String", "Mutable": true }
                    ]
                }),
            )
            .unwrap();
        let client = sandbox
            .create_pool_client(
                "UserPoolMyClient",
                &json!({
                    "UserPoolId": pool.physical_id,
                    "ClientName": "MyClient",
                    "GenerateSecret": true,
                    "ExplicitAuthFlows": ["ALLOW_ADMIN_USER_PASSWORD_AUTH", "ALLOW_REFRESH_TOKEN_AUTH"]
                }),
            )
            .unwrap();
        assert!(client.attributes.contains_key("ClientSecret"));
        (sandbox, pool.physical_id, client.physical_id)
    }

    #[test]
    fn test_password_rules() {
        let rules = PasswordRules {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digits: true,
            require_symbols: true,
        };
        assert!(rules.violations("Passw0rd!").is_empty());
        assert_eq!(
            rules.violations("password"),
            vec![
                "Password must have uppercase characters",
                "Password must have numeric characters",
                "Password must have symbol characters"
            ]
        );
        assert_eq!(rules.violations("Pw0!"), vec!["Password not long enough"]);
    }

    #[test]
    fn test_sign_up_validates_policy_and_schema() {
        let (mut sandbox, _, client) = sandbox_with_pool();

        let err = sandbox
            .sign_up(&client, "alice", "weak", &[("given_name", "Alice")])
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPassword(_)));

        let err = sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("email", "a@example.com")])
            .unwrap_err();
        assert!(err.to_string().contains("given_name"));

        let err = sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice"), ("custom:tier", "gold")])
            .unwrap_err();
        assert!(err.to_string().contains("custom:tier"));

        sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice"), ("custom:region", "eu")])
            .unwrap();
        assert!(matches!(
            sandbox.sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice")]),
            Err(SandboxError::UsernameExists(_))
        ));
    }

    #[test]
    fn test_auth_requires_confirmation() {
        let (mut sandbox, pool, client) = sandbox_with_pool();
        sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice"), ("email", "a@example.com")])
            .unwrap();

        assert!(matches!(
            sandbox.admin_initiate_auth(&pool, &client, "alice", "Passw0rd!"),
            Err(SandboxError::UserNotConfirmed(_))
        ));

        sandbox.confirm_sign_up(&client, "alice").unwrap();
        assert!(matches!(
            sandbox.admin_initiate_auth(&pool, &client, "alice", "wrong"),
            Err(SandboxError::NotAuthorized(_))
        ));

        // Verified email works as an alias
        let result = sandbox
            .admin_initiate_auth(&pool, &client, "a@example.com", "Passw0rd!")
            .unwrap();
        assert_eq!(result.expires_in, TOKEN_EXPIRES_IN);
        let (issuer, claims) = sandbox.token_claims(&result.id_token).unwrap();
        assert!(issuer.ends_with(&pool));
        assert_eq!(claims["cognito:username"], json!("alice"));
        assert_eq!(claims["email_verified"], json!("true"));
        assert!(sandbox.token_claims(&result.refresh_token).is_none());
        assert!(sandbox.token_claims("not-a-token").is_none());
    }

    #[test]
    fn test_admin_flow_must_be_enabled() {
        let (mut sandbox, pool, _) = sandbox_with_pool();
        let srp_only = sandbox
            .create_pool_client(
                "SrpClient",
                &json!({ "UserPoolId": pool, "ExplicitAuthFlows": ["ALLOW_USER_SRP_AUTH"] }),
            )
            .unwrap();
        assert!(matches!(
            sandbox.admin_initiate_auth(&pool, &srp_only.physical_id, "alice", "Passw0rd!"),
            Err(SandboxError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_group_claims_carry_role() {
        let (mut sandbox, pool, client) = sandbox_with_pool();
        sandbox
            .create_pool_group(
                "Group",
                &json!({
                    "UserPoolId": pool,
                    "GroupName": "AppAdmin",
                    "RoleArn": "arn:aws:iam::123456789012:role/AppAdmin"
                }),
            )
            .unwrap();
        sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice")])
            .unwrap();
        sandbox.confirm_sign_up(&client, "alice").unwrap();
        let tokens = sandbox
            .admin_initiate_auth(&pool, &client, "alice", "Passw0rd!")
            .unwrap();

        sandbox.admin_add_user_to_group(&pool, "alice", "AppAdmin").unwrap();
        let (_, claims) = sandbox.token_claims(&tokens.id_token).unwrap();
        assert_eq!(claims["cognito:groups"], json!(["AppAdmin"]));
        assert_eq!(
            claims["cognito:roles"],
            json!(["arn:aws:iam::123456789012:role/AppAdmin"])
        );
        assert!(sandbox.admin_add_user_to_group(&pool, "alice", "Missing").is_err());
    }

    #[test]
    fn test_update_attributes_requires_user() {
        let (mut sandbox, pool, _) = sandbox_with_pool();
        sandbox
            .admin_create_user(&pool, "acme-admin", &[("given_name", "Ada")])
            .unwrap();
        sandbox
            .admin_update_user_attributes(&pool, "acme-admin", &[("given_name", "Grace")])
            .unwrap();
        assert_eq!(
            sandbox.user_pool(&pool).unwrap().users["acme-admin"].attributes["given_name"],
            "Grace"
        );
        assert!(sandbox
            .admin_update_user_attributes(&pool, "nobody", &[("given_name", "X")])
            .is_err());
    }

    #[test]
    fn test_tokens_expire() {
        let (mut sandbox, pool, client) = sandbox_with_pool();
        sandbox
            .sign_up(&client, "alice", "Passw0rd!", &[("given_name", "Alice")])
            .unwrap();
        sandbox.confirm_sign_up(&client, "alice").unwrap();
        let tokens = sandbox
            .admin_initiate_auth(&pool, &client, "alice", "Passw0rd!")
            .unwrap();

        let (_, claims) = sandbox.token_claims(&tokens.id_token).unwrap();
        let exp = claims["exp"].as_i64().unwrap();
        assert_eq!(exp - claims["auth_time"].as_i64().unwrap(), TOKEN_EXPIRES_IN as i64);

        sandbox.advance_clock(Duration::seconds(TOKEN_EXPIRES_IN as i64 - 60));
        assert!(sandbox.token_claims(&tokens.id_token).is_some());
        sandbox.advance_clock(Duration::seconds(120));
        assert!(sandbox.token_claims(&tokens.id_token).is_none());
        assert!(sandbox.token_claims(&tokens.access_token).is_none());

        // Signing in again drops the expired access and id tokens
        sandbox
            .admin_initiate_auth(&pool, &client, "alice", "Passw0rd!")
            .unwrap();
        assert!(!sandbox.tokens.contains_key(&tokens.id_token));
        assert!(sandbox.tokens.contains_key(&tokens.refresh_token));
    }

    #[test]
    fn test_domain_prefix_is_unique() {
        let (mut sandbox, pool, _) = sandbox_with_pool();
        let props = json!({ "Domain": "anupam-test1-0303", "UserPoolId": pool });
        sandbox.create_pool_domain("Domain", &props).unwrap();
        assert!(matches!(
            sandbox.create_pool_domain("Domain2", &props),
            Err(SandboxError::DomainAlreadyExists(_))
        ));
        assert_eq!(sandbox.domain_owner("anupam-test1-0303"), Some(pool.as_str()));
    }
}
