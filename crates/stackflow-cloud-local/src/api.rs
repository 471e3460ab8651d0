//! REST APIs with Lambda proxy integrations
//!
//! Requests go through route matching, the method's authorizer and the
//! function's invoke permission before a proxy event reaches the handler.

use crate::error::{Result, SandboxError};
use crate::function::Trigger;
use crate::props::{function_name_of, str_list, str_prop};
use crate::sandbox::{PhysicalResource, Sandbox};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const APIGATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";

#[derive(Debug, Clone)]
pub struct ApiResource {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ApiMethod {
    pub id: String,
    pub resource_id: String,
    pub http_method: String,
    pub authorization_type: String,
    pub authorizer_id: Option<String>,
    pub integration_type: Option<String>,
    pub integration_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Authorizer {
    pub id: String,
    pub name: String,
    pub authorizer_type: String,
    /// Header carrying the token
    pub header: String,
    pub provider_arns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    pub root_resource_id: String,
    pub resources: BTreeMap<String, ApiResource>,
    pub methods: BTreeMap<String, ApiMethod>,
    pub authorizers: BTreeMap<String, Authorizer>,
    pub deployments: BTreeSet<String>,
    /// Stage name → deployment id
    pub stages: BTreeMap<String, String>,
}

impl RestApi {
    fn route(&self, http_method: &str, path: &str) -> Option<(&ApiResource, &ApiMethod)> {
        let resource = self.resources.values().find(|r| r.path == path)?;
        let method = self
            .methods
            .values()
            .filter(|m| m.resource_id == resource.id)
            .find(|m| m.http_method == http_method)
            .or_else(|| {
                self.methods
                    .values()
                    .find(|m| m.resource_id == resource.id && m.http_method == "ANY")
            })?;
        Some((resource, method))
    }
}

/// HTTP response of an API invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    fn message(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: json!({ "message": message }).to_string(),
        }
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn short_id(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl Sandbox {
    pub(crate) fn create_rest_api(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let id = short_id(10);
        let root = short_id(10);
        let mut resources = BTreeMap::new();
        resources.insert(
            root.clone(),
            ApiResource {
                id: root.clone(),
                path: "/".to_string(),
            },
        );
        let name = str_prop(props, "Name").unwrap_or(logical_id).to_string();
        self.apis.insert(
            id.clone(),
            RestApi {
                id: id.clone(),
                name: name.clone(),
                root_resource_id: root.clone(),
                resources,
                methods: BTreeMap::new(),
                authorizers: BTreeMap::new(),
                deployments: BTreeSet::new(),
                stages: BTreeMap::new(),
            },
        );
        info!(api = %id, name = %name, "REST API created");
        Ok(PhysicalResource::new("AWS::ApiGateway::RestApi", id)
            .with_attribute("RootResourceId", json!(root)))
    }

    pub(crate) fn create_api_resource(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let (api_id, api) = self.api_of(logical_id, props)?;
        let parent_id = str_prop(props, "ParentId")
            .ok_or_else(|| SandboxError::invalid(logical_id, "ParentId is required"))?;
        let part = str_prop(props, "PathPart")
            .ok_or_else(|| SandboxError::invalid(logical_id, "PathPart is required"))?;
        let parent = api
            .resources
            .get(parent_id)
            .ok_or_else(|| SandboxError::not_found("API resource", parent_id))?;

        let path = normalize_path(&format!("{}/{}", parent.path.trim_end_matches('/'), part));
        if api.resources.values().any(|r| r.path == path) {
            return Err(SandboxError::AlreadyExists(format!("API resource {}", path)));
        }
        let id = short_id(6);
        api.resources.insert(id.clone(), ApiResource { id: id.clone(), path });
        Ok(PhysicalResource::new("AWS::ApiGateway::Resource", id).with_parent(api_id))
    }

    pub(crate) fn create_api_authorizer(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let (api_id, api) = self.api_of(logical_id, props)?;
        let source = str_prop(props, "IdentitySource")
            .unwrap_or("method.request.header.Authorization");
        let header = source
            .strip_prefix("method.request.header.")
            .ok_or_else(|| {
                SandboxError::invalid(logical_id, format!("unsupported IdentitySource {}", source))
            })?
            .to_string();

        let id = short_id(6);
        api.authorizers.insert(
            id.clone(),
            Authorizer {
                id: id.clone(),
                name: str_prop(props, "Name").unwrap_or(logical_id).to_string(),
                authorizer_type: str_prop(props, "Type").unwrap_or("COGNITO_USER_POOLS").to_string(),
                header,
                provider_arns: str_list(props, "ProviderARNs"),
            },
        );
        Ok(PhysicalResource::new("AWS::ApiGateway::Authorizer", id.clone())
            .with_parent(api_id)
            .with_attribute("AuthorizerId", json!(id)))
    }

    pub(crate) fn create_api_method(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let (api_id, api) = self.api_of(logical_id, props)?;
        let resource_id = str_prop(props, "ResourceId")
            .ok_or_else(|| SandboxError::invalid(logical_id, "ResourceId is required"))?
            .to_string();
        if !api.resources.contains_key(&resource_id) {
            return Err(SandboxError::not_found("API resource", resource_id));
        }
        let http_method = str_prop(props, "HttpMethod")
            .ok_or_else(|| SandboxError::invalid(logical_id, "HttpMethod is required"))?
            .to_uppercase();
        if api
            .methods
            .values()
            .any(|m| m.resource_id == resource_id && m.http_method == http_method)
        {
            return Err(SandboxError::AlreadyExists(format!("method {}", http_method)));
        }

        let authorization_type = str_prop(props, "AuthorizationType").unwrap_or("NONE").to_string();
        let authorizer_id = str_prop(props, "AuthorizerId").map(String::from);
        if authorization_type == "COGNITO_USER_POOLS" {
            match &authorizer_id {
                Some(id) if api.authorizers.contains_key(id) => {}
                _ => {
                    return Err(SandboxError::invalid(
                        logical_id,
                        "COGNITO_USER_POOLS needs an AuthorizerId of this API",
                    ));
                }
            }
        }

        let id = short_id(6);
        api.methods.insert(
            id.clone(),
            ApiMethod {
                id: id.clone(),
                resource_id,
                http_method,
                authorization_type,
                authorizer_id,
                integration_type: props
                    .pointer("/Integration/Type")
                    .and_then(Value::as_str)
                    .map(String::from),
                integration_uri: props
                    .pointer("/Integration/Uri")
                    .and_then(Value::as_str)
                    .map(String::from),
            },
        );
        Ok(PhysicalResource::new("AWS::ApiGateway::Method", id).with_parent(api_id))
    }

    pub(crate) fn create_api_deployment(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let (api_id, api) = self.api_of(logical_id, props)?;
        if api.methods.is_empty() {
            return Err(SandboxError::invalid(
                logical_id,
                "The REST API doesn't contain any methods",
            ));
        }
        let id = short_id(6);
        api.deployments.insert(id.clone());
        Ok(PhysicalResource::new("AWS::ApiGateway::Deployment", id).with_parent(api_id))
    }

    pub(crate) fn create_api_stage(&mut self, logical_id: &str, props: &Value) -> Result<PhysicalResource> {
        let (api_id, api) = self.api_of(logical_id, props)?;
        let stage = str_prop(props, "StageName")
            .ok_or_else(|| SandboxError::invalid(logical_id, "StageName is required"))?
            .to_string();
        let deployment = str_prop(props, "DeploymentId")
            .ok_or_else(|| SandboxError::invalid(logical_id, "DeploymentId is required"))?
            .to_string();
        if !api.deployments.contains(&deployment) {
            return Err(SandboxError::not_found("Deployment", deployment));
        }
        if api.stages.contains_key(&stage) {
            return Err(SandboxError::AlreadyExists(format!("stage {}", stage)));
        }
        api.stages.insert(stage.clone(), deployment);
        Ok(PhysicalResource::new("AWS::ApiGateway::Stage", stage).with_parent(api_id))
    }

    pub(crate) fn delete_api_resource(&mut self, resource: &PhysicalResource) {
        if resource.resource_type == "AWS::ApiGateway::RestApi" {
            self.apis.remove(&resource.physical_id);
            return;
        }
        let Some(api) = resource.parent.as_deref().and_then(|id| self.apis.get_mut(id)) else {
            return;
        };
        let id = &resource.physical_id;
        match resource.resource_type.as_str() {
            "AWS::ApiGateway::Resource" => {
                api.resources.remove(id);
            }
            "AWS::ApiGateway::Method" => {
                api.methods.remove(id);
            }
            "AWS::ApiGateway::Authorizer" => {
                api.authorizers.remove(id);
            }
            "AWS::ApiGateway::Deployment" => {
                api.deployments.remove(id);
            }
            "AWS::ApiGateway::Stage" => {
                api.stages.remove(id);
            }
            _ => {}
        }
    }

    fn api_of(&mut self, logical_id: &str, props: &Value) -> Result<(String, &mut RestApi)> {
        let api_id = str_prop(props, "RestApiId")
            .ok_or_else(|| SandboxError::invalid(logical_id, "RestApiId is required"))?
            .to_string();
        let api = self
            .apis
            .get_mut(&api_id)
            .ok_or_else(|| SandboxError::not_found("REST API", api_id.as_str()))?;
        Ok((api_id, api))
    }

    pub fn rest_api(&self, id: &str) -> Option<&RestApi> {
        self.apis.get(id)
    }

    /// API id by name
    pub fn rest_api_id(&self, name: &str) -> Option<String> {
        self.apis
            .values()
            .find(|a| a.name == name)
            .map(|a| a.id.clone())
    }

    /// Send an HTTP request to a deployed stage
    ///
    /// Gateway-level rejections come back as responses (403 no route, 401
    /// unauthorized, 500 missing invoke permission, 502 function error).
    #[instrument(skip(self, headers, body))]
    pub fn invoke_api(
        &mut self,
        api_id: &str,
        stage: &str,
        http_method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Result<ApiResponse> {
        let api = self
            .apis
            .get(api_id)
            .ok_or_else(|| SandboxError::not_found("REST API", api_id))?;
        if !api.stages.contains_key(stage) {
            return Ok(ApiResponse::message(403, "Forbidden"));
        }

        let http_method = http_method.to_uppercase();
        let path = normalize_path(path);
        let Some((resource, method)) = api.route(&http_method, &path) else {
            return Ok(ApiResponse::message(403, "Missing Authentication Token"));
        };
        let resource_path = resource.path.clone();
        let method = method.clone();

        let headers: BTreeMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut claims = None;
        if method.authorization_type == "COGNITO_USER_POOLS" {
            let authorizer = method
                .authorizer_id
                .as_deref()
                .and_then(|id| api.authorizers.get(id))
                .ok_or_else(|| SandboxError::not_found("Authorizer", api_id))?;
            let token = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&authorizer.header))
                .map(|(_, v)| v.strip_prefix("Bearer ").unwrap_or(v));
            let Some(token) = token else {
                debug!("Request without identity header");
                return Ok(ApiResponse::message(401, "Unauthorized"));
            };
            match self.token_claims(token) {
                Some((issuer, token_claims))
                    if authorizer.provider_arns.contains(&issuer)
                        && token_claims.get("token_use") == Some(&json!("id")) =>
                {
                    claims = Some(token_claims);
                }
                _ => {
                    debug!("Token rejected by authorizer");
                    return Ok(ApiResponse::message(401, "Unauthorized"));
                }
            }
        }

        let Some(function_arn) = method
            .integration_uri
            .as_deref()
            .and_then(integration_function_arn)
        else {
            return Ok(ApiResponse::message(500, "Internal server error"));
        };
        let function_name = function_name_of(function_arn).to_string();
        let source_arn = format!(
            "arn:aws:execute-api:{}:{}:{}/{}/{}{}",
            self.region, self.account_id, api_id, stage, http_method, path
        );
        if !self.permits_invoke(&function_name, APIGATEWAY_PRINCIPAL, &source_arn) {
            debug!(function = %function_name, "API Gateway lacks invoke permission");
            return Ok(ApiResponse::message(500, "Internal server error"));
        }

        let mut authorizer = Map::new();
        if let Some(claims) = claims {
            authorizer.insert("claims".to_string(), Value::Object(claims));
        }
        let event = json!({
            "resource": resource_path,
            "path": path,
            "httpMethod": http_method,
            "headers": headers,
            "queryStringParameters": null,
            "pathParameters": null,
            "stageVariables": null,
            "requestContext": {
                "resourceId": method.resource_id,
                "resourcePath": resource_path,
                "httpMethod": http_method,
                "stage": stage,
                "requestId": Uuid::new_v4().to_string(),
                "accountId": self.account_id,
                "apiId": api_id,
                "identity": { "sourceIp": "127.0.0.1" },
                "authorizer": authorizer,
            },
            "body": body,
            "isBase64Encoded": false,
        });

        let trigger = Trigger::Api {
            api_id: api_id.to_string(),
            method: http_method.clone(),
            path: path.clone(),
        };
        let response = match self.invoke_function(&function_name, event, trigger) {
            Ok(output) => proxy_response(&output),
            Err(_) => ApiResponse::message(502, "Internal server error"),
        };
        info!(status = response.status, "API request handled");
        Ok(response)
    }
}

/// Function ARN inside a Lambda integration URI
fn integration_function_arn(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("/functions/")?;
    rest.strip_suffix("/invocations")
}

fn proxy_response(output: &Value) -> ApiResponse {
    let status = match output.get("statusCode") {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    let Some(status) = status else {
        return ApiResponse::message(502, "Internal server error");
    };
    let body = match output.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let headers = output
        .get("headers")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map_or_else(|| v.to_string(), String::from)))
                .collect()
        })
        .unwrap_or_default();
    ApiResponse {
        status,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::InvocationContext;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/customers/"), "/customers");
        assert_eq!(normalize_path("customers"), "/customers");
    }

    #[test]
    fn test_integration_function_arn() {
        let uri = "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/arn:aws:lambda:us-east-1:123456789012:function:create/invocations";
        assert_eq!(
            integration_function_arn(uri),
            Some("arn:aws:lambda:us-east-1:123456789012:function:create")
        );
        assert_eq!(integration_function_arn("http://example.com"), None);
    }

    #[test]
    fn test_proxy_response_shapes() {
        let ok = proxy_response(&json!({ "statusCode": "201", "body": { "id": 1 } }));
        assert_eq!(ok.status, 201);
        assert_eq!(ok.json(), Some(json!({ "id": 1 })));
        assert_eq!(proxy_response(&json!({ "body": "x" })).status, 502);
    }

    /// Public API without an authorizer
    fn open_api(with_permission: bool) -> (Sandbox, String) {
        let mut sandbox = Sandbox::default();
        sandbox.create_role("Test", "Role", &json!({ "RoleName": "r" })).unwrap();
        let function = sandbox
            .create_function(
                "Test",
                "Fn",
                &json!({ "FunctionName": "hello", "Role": "arn:aws:iam::123456789012:role/r" }),
            )
            .unwrap();
        let api = sandbox.create_rest_api("Api", &json!({ "Name": "hello-api" })).unwrap();
        let resource = sandbox
            .create_api_resource(
                "Res",
                &json!({
                    "RestApiId": api.physical_id,
                    "ParentId": api.attributes["RootResourceId"],
                    "PathPart": "hello"
                }),
            )
            .unwrap();
        let uri = format!(
            "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/{}/invocations",
            function.attributes["Arn"].as_str().unwrap()
        );
        sandbox
            .create_api_method(
                "Get",
                &json!({
                    "RestApiId": api.physical_id,
                    "ResourceId": resource.physical_id,
                    "HttpMethod": "GET",
                    "AuthorizationType": "NONE",
                    "Integration": { "Type": "AWS_PROXY", "Uri": uri }
                }),
            )
            .unwrap();
        let deployment = sandbox
            .create_api_deployment("Dep", &json!({ "RestApiId": api.physical_id }))
            .unwrap();
        sandbox
            .create_api_stage(
                "Stage",
                &json!({
                    "RestApiId": api.physical_id,
                    "DeploymentId": deployment.physical_id,
                    "StageName": "prod"
                }),
            )
            .unwrap();
        if with_permission {
            sandbox
                .create_permission(
                    "Test",
                    "Perm",
                    &json!({
                        "FunctionName": "hello",
                        "Principal": APIGATEWAY_PRINCIPAL,
                        "SourceArn": format!("arn:aws:execute-api:us-east-1:123456789012:{}/*/GET/hello", api.physical_id)
                    }),
                )
                .unwrap();
        }
        sandbox.register_handler("hello", |_: &mut InvocationContext<'_>, event: Value| {
            Ok(json!({ "statusCode": 200, "body": event["path"] }))
        });
        (sandbox, api.physical_id)
    }

    #[test]
    fn test_routes_and_unknown_paths() {
        let (mut sandbox, api) = open_api(true);
        let ok = sandbox
            .invoke_api(&api, "prod", "get", "/hello/", &[], None)
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body, "/hello");

        let missing = sandbox
            .invoke_api(&api, "prod", "POST", "/hello", &[], None)
            .unwrap();
        assert_eq!(missing.status, 403);
        assert_eq!(
            missing.json(),
            Some(json!({ "message": "Missing Authentication Token" }))
        );
        let no_stage = sandbox
            .invoke_api(&api, "dev", "GET", "/hello", &[], None)
            .unwrap();
        assert_eq!(no_stage.status, 403);
    }

    #[test]
    fn test_missing_invoke_permission_is_500() {
        let (mut sandbox, api) = open_api(false);
        let response = sandbox
            .invoke_api(&api, "prod", "GET", "/hello", &[], None)
            .unwrap();
        assert_eq!(response.status, 500);
        assert!(sandbox.invocations().is_empty());
    }

    #[test]
    fn test_deployment_needs_methods() {
        let mut sandbox = Sandbox::default();
        let api = sandbox.create_rest_api("Api", &json!({})).unwrap();
        assert!(
            sandbox
                .create_api_deployment("Dep", &json!({ "RestApiId": api.physical_id }))
                .is_err()
        );
    }
}
