//! user-pool ノードのパース

use super::{
    first_string, first_u32, flag, invalid, node_id, parse_first, parse_value, prop_bool,
    prop_string, prop_u32, string_args,
};
use crate::error::Result;
use crate::model::{
    AttributeDataType, AuthFlows, CustomAttribute, OAuthFlows, OAuthScope, OAuthSettings,
    PasswordPolicy, SignInAlias, StandardAttribute, UserPool, UserPoolClient, UserPoolDomain,
    UserPoolGroup, VerifiableAttribute,
};
use kdl::KdlNode;

/// user-pool ノードをパース
pub fn parse_user_pool(node: &KdlNode) -> Result<UserPool> {
    let mut pool = UserPool::default();

    let Some(children) = node.children() else {
        return Ok(pool);
    };

    for child in children.nodes() {
        match child.name().value() {
            "name" => {
                pool.name = first_string(child);
            }
            "self-sign-up" | "self_sign_up" => {
                pool.self_sign_up = flag(child);
            }
            "sign-in-aliases" | "sign_in_aliases" => {
                pool.sign_in_aliases = string_args(child)
                    .iter()
                    .map(|v| parse_value::<SignInAlias>(child, v))
                    .collect::<Result<Vec<_>>>()?;
            }
            "auto-verify" | "auto_verify" => {
                pool.auto_verify = string_args(child)
                    .iter()
                    .map(|v| parse_value::<VerifiableAttribute>(child, v))
                    .collect::<Result<Vec<_>>>()?;
            }
            "standard-attribute" | "standard_attribute" => {
                let name = node_id(child)?;
                pool.standard_attributes.retain(|a| a.name != name);
                pool.standard_attributes.push(StandardAttribute {
                    name,
                    required: prop_bool(child, "required").unwrap_or(false),
                    mutable: prop_bool(child, "mutable").unwrap_or(true),
                });
            }
            "custom-attribute" | "custom_attribute" => {
                let name = node_id(child)?;
                let data_type = match prop_string(child, "type") {
                    Some(t) => parse_value::<AttributeDataType>(child, &t)?,
                    None => AttributeDataType::String,
                };
                pool.custom_attributes.retain(|a| a.name != name);
                pool.custom_attributes.push(CustomAttribute {
                    name,
                    data_type,
                    mutable: prop_bool(child, "mutable").unwrap_or(false),
                    min_length: prop_u32(child, "min-length")?,
                    max_length: prop_u32(child, "max-length")?,
                });
            }
            "password-policy" | "password_policy" => {
                pool.password_policy = parse_password_policy(child)?;
            }
            "account-recovery" | "account_recovery" => {
                pool.account_recovery = parse_first(child)?;
            }
            "removal-policy" | "removal_policy" => {
                pool.removal_policy = parse_first(child)?;
            }
            "client" => {
                let client = parse_client(child)?;
                pool.clients.retain(|c| c.id != client.id);
                pool.clients.push(client);
            }
            "domain" => {
                let id = node_id(child)?;
                let prefix = prop_string(child, "prefix")
                    .ok_or_else(|| invalid(child, "requires prefix=\"...\""))?;
                pool.domains.retain(|d| d.id != id);
                pool.domains.push(UserPoolDomain { id, prefix });
            }
            "group" => {
                let group = parse_group(child)?;
                pool.groups.retain(|g| g.id != group.id);
                pool.groups.push(group);
            }
            _ => {}
        }
    }

    Ok(pool)
}

/// password-policy ノードをパース
///
/// 省略したプロパティはデフォルト（8文字・全種必須）のまま。
fn parse_password_policy(node: &KdlNode) -> Result<PasswordPolicy> {
    let mut policy = PasswordPolicy::default();

    if let Some(min) = prop_u32(node, "min-length")? {
        policy.min_length = min;
    }
    if let Some(v) = prop_bool(node, "require-lowercase") {
        policy.require_lowercase = v;
    }
    if let Some(v) = prop_bool(node, "require-uppercase") {
        policy.require_uppercase = v;
    }
    if let Some(v) = prop_bool(node, "require-digits") {
        policy.require_digits = v;
    }
    if let Some(v) = prop_bool(node, "require-symbols") {
        policy.require_symbols = v;
    }
    policy.temp_password_validity_days = prop_u32(node, "temp-password-validity-days")?;

    Ok(policy)
}

/// client ノードをパース
fn parse_client(node: &KdlNode) -> Result<UserPoolClient> {
    let mut client = UserPoolClient {
        id: node_id(node)?,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => {
                    client.name = first_string(child);
                }
                "generate-secret" | "generate_secret" => {
                    client.generate_secret = flag(child);
                }
                "auth-flows" | "auth_flows" => {
                    client.auth_flows = parse_auth_flows(child)?;
                }
                "oauth" => {
                    client.oauth = Some(parse_oauth(child)?);
                }
                _ => {}
            }
        }
    }

    Ok(client)
}

fn parse_auth_flows(node: &KdlNode) -> Result<AuthFlows> {
    let mut flows = AuthFlows::default();
    for value in string_args(node) {
        match value.as_str() {
            "user-password" => flows.user_password = true,
            "admin-user-password" => flows.admin_user_password = true,
            "custom" => flows.custom = true,
            "user-srp" => flows.user_srp = true,
            other => return Err(invalid(node, &format!("unknown auth flow: {}", other))),
        }
    }
    Ok(flows)
}

fn parse_oauth(node: &KdlNode) -> Result<OAuthSettings> {
    let mut settings = OAuthSettings::default();

    let Some(children) = node.children() else {
        return Ok(settings);
    };

    for child in children.nodes() {
        match child.name().value() {
            "flows" => {
                let mut flows = OAuthFlows::default();
                for value in string_args(child) {
                    match value.as_str() {
                        "authorization-code" | "code" => flows.authorization_code = true,
                        "implicit" => flows.implicit = true,
                        "client-credentials" => flows.client_credentials = true,
                        other => {
                            return Err(invalid(child, &format!("unknown OAuth flow: {}", other)));
                        }
                    }
                }
                settings.flows = flows;
            }
            "scopes" => {
                settings.scopes = string_args(child)
                    .iter()
                    .map(|v| parse_value::<OAuthScope>(child, v))
                    .collect::<Result<Vec<_>>>()?;
            }
            "callback-url" | "callback-urls" => {
                settings.callback_urls.extend(string_args(child));
            }
            "logout-url" | "logout-urls" => {
                settings.logout_urls.extend(string_args(child));
            }
            _ => {}
        }
    }

    Ok(settings)
}

fn parse_group(node: &KdlNode) -> Result<UserPoolGroup> {
    let mut group = UserPoolGroup {
        id: node_id(node)?,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => group.name = first_string(child),
                "description" => group.description = first_string(child),
                "role" => group.role = first_string(child),
                "precedence" => group.precedence = first_u32(child)?,
                _ => {}
            }
        }
    }

    Ok(group)
}
