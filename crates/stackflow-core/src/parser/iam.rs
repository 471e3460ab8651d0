//! role / policy ノードのパース

use super::{first_string, invalid, parse_value, prop_string, string_args};
use crate::error::Result;
use crate::model::{Effect, Policy, PolicyStatement, Principal, ResourceRef, Role};
use kdl::KdlNode;

/// role ノードをパース
pub fn parse_role(node: &KdlNode) -> Result<Role> {
    let mut role = Role::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => role.name = first_string(child),
                "description" => role.description = first_string(child),
                "assumed-by" | "assumed_by" => {
                    role.assumed_by.push(parse_principal(child)?);
                }
                "managed-policy" | "managed_policy" | "managed-policies" => {
                    role.managed_policies.extend(string_args(child));
                }
                "statement" => {
                    role.statements.push(parse_statement(child)?);
                }
                _ => {}
            }
        }
    }

    Ok(role)
}

/// policy ノードをパース
pub fn parse_policy(node: &KdlNode) -> Result<Policy> {
    let mut policy = Policy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => policy.name = first_string(child),
                "attach-to" | "attach_to" => {
                    policy.attach_to.extend(string_args(child));
                }
                "statement" => {
                    policy.statements.push(parse_statement(child)?);
                }
                _ => {}
            }
        }
    }

    Ok(policy)
}

/// assumed-by ノードをパース
///
/// service= / function-role= / arn= / account= のいずれか1つ
fn parse_principal(node: &KdlNode) -> Result<Principal> {
    if let Some(service) = prop_string(node, "service") {
        Ok(Principal::Service(service))
    } else if let Some(function) = prop_string(node, "function-role") {
        Ok(Principal::FunctionRole(function))
    } else if let Some(arn) = prop_string(node, "arn") {
        Ok(Principal::Arn(arn))
    } else if let Some(account) = prop_string(node, "account") {
        Ok(Principal::Account(account))
    } else {
        Err(invalid(
            node,
            "requires one of service=, function-role=, arn= or account=",
        ))
    }
}

/// statement ノードをパース
pub(crate) fn parse_statement(node: &KdlNode) -> Result<PolicyStatement> {
    let mut effect = Effect::Allow;
    let mut actions = Vec::new();
    let mut resources = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "effect" => {
                    if let Some(value) = first_string(child) {
                        effect = parse_value(child, &value)?;
                    }
                }
                "actions" | "action" => {
                    actions.extend(string_args(child));
                }
                "resources" => {
                    resources.extend(string_args(child).into_iter().map(ResourceRef::Literal));
                }
                "resource" => {
                    if let Some(id) = prop_string(child, "arn-of") {
                        resources.push(ResourceRef::ArnOf(id));
                    } else {
                        resources.extend(string_args(child).into_iter().map(ResourceRef::Literal));
                    }
                }
                _ => {}
            }
        }
    }

    if actions.is_empty() {
        return Err(invalid(node, "requires at least one action"));
    }
    if resources.is_empty() {
        return Err(invalid(node, "requires at least one resource"));
    }

    Ok(PolicyStatement {
        effect,
        actions,
        resources,
    })
}
