//! rest-api ノードのパース

use super::{first_string, invalid, node_id, prop_string, string_args};
use crate::error::Result;
use crate::model::{Authorizer, AuthorizerKind, Method, RestApi};
use kdl::KdlNode;
use std::collections::BTreeMap;

/// rest-api ノードをパース
pub fn parse_rest_api(node: &KdlNode) -> Result<RestApi> {
    let mut api = RestApi::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => api.name = first_string(child),
                "description" => api.description = first_string(child),
                "stage-name" | "stage_name" => {
                    if let Some(stage) = first_string(child) {
                        api.stage_name = stage;
                    }
                }
                "authorizer" => {
                    let authorizer = parse_authorizer(child)?;
                    api.authorizers.retain(|a| a.id != authorizer.id);
                    api.authorizers.push(authorizer);
                }
                "method" => {
                    api.methods.push(parse_method(child)?);
                }
                _ => {}
            }
        }
    }

    Ok(api)
}

fn parse_authorizer(node: &KdlNode) -> Result<Authorizer> {
    let mut authorizer = Authorizer {
        id: node_id(node)?,
        identity_source: "method.request.header.Authorization".to_string(),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => authorizer.name = first_string(child),
                "type" => {
                    authorizer.kind = match first_string(child).as_deref() {
                        Some("COGNITO_USER_POOLS") | Some("cognito-user-pools") | None => {
                            AuthorizerKind::CognitoUserPools
                        }
                        Some(other) => {
                            return Err(invalid(
                                child,
                                &format!("unsupported authorizer type: {}", other),
                            ));
                        }
                    };
                }
                "identity-source" | "identity_source" => {
                    if let Some(source) = first_string(child) {
                        authorizer.identity_source = source;
                    }
                }
                "user-pool" | "user_pool" | "user-pools" => {
                    authorizer.user_pools.extend(string_args(child));
                }
                _ => {}
            }
        }
    }

    Ok(authorizer)
}

/// method "POST" path="/" { ... } をパース
fn parse_method(node: &KdlNode) -> Result<Method> {
    let verb = first_string(node)
        .ok_or_else(|| invalid(node, "requires an HTTP method"))?
        .to_ascii_uppercase();
    if !matches!(
        verb.as_str(),
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" | "OPTIONS" | "ANY"
    ) {
        return Err(invalid(node, &format!("unknown HTTP method: {}", verb)));
    }

    let path = prop_string(node, "path").unwrap_or_else(|| "/".to_string());
    let mut function: Option<String> = None;
    let mut authorizer = None;
    let mut request_templates = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "function" => function = first_string(child),
                "authorizer" => authorizer = first_string(child),
                "request-template" | "request_template" => {
                    let args = string_args(child);
                    match args.as_slice() {
                        [content_type, body] => {
                            request_templates.insert(content_type.clone(), body.clone());
                        }
                        _ => {
                            return Err(invalid(
                                child,
                                "expects a content type and a template body",
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let function = function.ok_or_else(|| invalid(node, "requires a function"))?;
    // パスは先頭スラッシュ付きに正規化
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    };

    Ok(Method {
        http_method: verb,
        path,
        function,
        authorizer,
        request_templates,
    })
}
