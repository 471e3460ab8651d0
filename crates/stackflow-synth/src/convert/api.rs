//! REST API の変換

use crate::error::Result;
use crate::intrinsic::{REGION, URL_SUFFIX, arn, get_att, join, ref_};
use crate::logical_id::{logical_id, nested_logical_id};
use crate::synth::Synthesizer;
use crate::template::Resource;
use serde_json::{Value, json};
use stackflow_core::{Method, RestApi};
use std::collections::BTreeMap;

/// AWS::ApiGateway::RestApi と、パス・認可・メソッド・デプロイ・ステージを追加
pub fn add_rest_api(synth: &mut Synthesizer<'_>, id: &str, api: &RestApi) -> Result<()> {
    let logical = synth.id(id);

    let resource = Resource::new("AWS::ApiGateway::RestApi")
        .with(
            "Name",
            json!(api.name.clone().unwrap_or_else(|| id.to_string())),
        )
        .with_opt("Description", api.description.clone().map(Value::from));
    synth.add(logical.clone(), resource)?;

    let paths = add_path_resources(synth, &logical, api)?;

    for authorizer in &api.authorizers {
        let pools: Vec<Value> = authorizer
            .user_pools
            .iter()
            .map(|pool| get_att(&synth.id(pool), "Arn"))
            .collect();
        let resource = Resource::new("AWS::ApiGateway::Authorizer")
            .with(
                "Name",
                json!(authorizer.name.clone().unwrap_or_else(|| authorizer.id.clone())),
            )
            .with("RestApiId", ref_(&logical))
            .with("Type", json!(authorizer.kind.as_str()))
            .with("IdentitySource", json!(authorizer.identity_source))
            .with("ProviderARNs", Value::Array(pools));
        synth.add(nested_logical_id(id, &authorizer.id), resource)?;
    }

    let mut method_ids = Vec::new();
    for method in &api.methods {
        let method_id = add_method(synth, id, &logical, method, &paths)?;
        method_ids.push(method_id);
    }

    let deployment_id = format!("{}Deployment", logical);
    let mut deployment = Resource::new("AWS::ApiGateway::Deployment")
        .with("RestApiId", ref_(&logical))
        .with("Description", json!(format!("Deployment of {}", logical)));
    for method_id in &method_ids {
        deployment = deployment.depends_on(method_id.clone());
    }
    synth.add(deployment_id.clone(), deployment)?;

    let stage_id = format!("{}Stage", logical);
    let stage = Resource::new("AWS::ApiGateway::Stage")
        .with("DeploymentId", ref_(&deployment_id))
        .with("RestApiId", ref_(&logical))
        .with("StageName", json!(api.stage_name));
    synth.add(stage_id.clone(), stage)?;

    synth.add_output(
        format!("{}Endpoint", logical),
        join(
            "",
            vec![
                json!("https://"),
                ref_(&logical),
                json!(".execute-api."),
                ref_(REGION),
                json!("."),
                ref_(URL_SUFFIX),
                json!("/"),
                ref_(&stage_id),
                json!("/"),
            ],
        ),
        "API endpoint URL",
    );

    Ok(())
}

/// パスの各階層に AWS::ApiGateway::Resource を作り、パス → 論理ID を返す
fn add_path_resources(
    synth: &mut Synthesizer<'_>,
    api_logical: &str,
    api: &RestApi,
) -> Result<BTreeMap<String, String>> {
    let mut paths: BTreeMap<String, String> = BTreeMap::new();

    for path in api.resource_paths() {
        let mut current = String::new();
        let mut parent: Option<String> = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);

            let resource_id = match paths.get(&current) {
                Some(existing) => existing.clone(),
                None => {
                    let resource_id = format!("{}{}", api_logical, logical_id(&current));
                    let parent_id = match &parent {
                        Some(parent) => ref_(parent),
                        None => get_att(api_logical, "RootResourceId"),
                    };
                    let resource = Resource::new("AWS::ApiGateway::Resource")
                        .with("ParentId", parent_id)
                        .with("PathPart", json!(segment))
                        .with("RestApiId", ref_(api_logical));
                    synth.add(resource_id.clone(), resource)?;
                    paths.insert(current.clone(), resource_id.clone());
                    resource_id
                }
            };
            parent = Some(resource_id);
        }
    }

    Ok(paths)
}

fn add_method(
    synth: &mut Synthesizer<'_>,
    api_id: &str,
    api_logical: &str,
    method: &Method,
    paths: &BTreeMap<String, String>,
) -> Result<String> {
    let function = synth.id(&method.function);
    let verb = method.http_method.as_str();

    let (resource_id, method_id) = match paths.get(method.path.trim_end_matches('/')) {
        Some(path_resource) => (ref_(path_resource), format!("{}{}", path_resource, verb)),
        None => (
            get_att(api_logical, "RootResourceId"),
            format!("{}{}", api_logical, verb),
        ),
    };

    let uri = arn(
        "apigateway",
        true,
        false,
        vec![
            json!("lambda:path/2015-03-31/functions/"),
            get_att(&function, "Arn"),
            json!("/invocations"),
        ],
    );
    let mut integration = json!({
        "IntegrationHttpMethod": "POST",
        "Type": "AWS_PROXY",
        "Uri": uri,
    });
    if !method.request_templates.is_empty() {
        integration["RequestTemplates"] = json!(method.request_templates);
    }

    let mut resource = Resource::new("AWS::ApiGateway::Method")
        .with("HttpMethod", json!(verb))
        .with("ResourceId", resource_id)
        .with("RestApiId", ref_(api_logical))
        .with("Integration", integration);
    resource = match &method.authorizer {
        Some(authorizer) => resource
            .with("AuthorizationType", json!("COGNITO_USER_POOLS"))
            .with("AuthorizerId", ref_(&nested_logical_id(api_id, authorizer))),
        None => resource.with("AuthorizationType", json!("NONE")),
    };
    synth.add(method_id.clone(), resource)?;

    // API Gateway からの呼び出しを許可
    let source_path = if method.path == "/" { "/" } else { method.path.as_str() };
    let permission = Resource::new("AWS::Lambda::Permission")
        .with("Action", json!("lambda:InvokeFunction"))
        .with("FunctionName", get_att(&function, "Arn"))
        .with("Principal", json!("apigateway.amazonaws.com"))
        .with(
            "SourceArn",
            arn(
                "execute-api",
                true,
                true,
                vec![ref_(api_logical), json!(format!("/*/{}{}", verb, source_path))],
            ),
        );
    synth.add(format!("{}Permission", method_id), permission)?;

    Ok(method_id)
}

#[cfg(test)]
mod tests {
    use crate::synth::synthesize;
    use serde_json::json;
    use stackflow_core::parse_kdl_string;

    const API: &str = r#"
role "handler-role" {
    assumed-by service="lambda.amazonaws.com"
}
function "handler" {
    code "resources/handler"
    role "handler-role"
}
user-pool "pool"
rest-api "orders-api" {
    authorizer "orders-auth" {
        user-pools "pool"
    }
    method "GET" path="/orders/items" {
        function "handler"
        authorizer "orders-auth"
    }
    method "POST" path="/orders" {
        function "handler"
    }
}
"#;

    #[test]
    fn test_nested_paths_share_parent_resources() {
        let blueprint = parse_kdl_string(API, "test".to_string()).unwrap();
        let template = synthesize(&blueprint).unwrap().template;

        template.resource_count_is("AWS::ApiGateway::Resource", 2).unwrap();
        let items = template.resource("OrdersApiOrdersItems").unwrap();
        assert_eq!(items.properties["ParentId"], json!({ "Ref": "OrdersApiOrders" }));
        assert_eq!(items.properties["PathPart"], json!("items"));

        let get = template.resource("OrdersApiOrdersItemsGET").unwrap();
        assert_eq!(get.properties["AuthorizationType"], json!("COGNITO_USER_POOLS"));
        assert_eq!(get.properties["AuthorizerId"], json!({ "Ref": "OrdersApiOrdersAuth" }));
        let post = template.resource("OrdersApiOrdersPOST").unwrap();
        assert_eq!(post.properties["AuthorizationType"], json!("NONE"));
    }

    #[test]
    fn test_deployment_waits_for_methods() {
        let blueprint = parse_kdl_string(API, "test".to_string()).unwrap();
        let template = synthesize(&blueprint).unwrap().template;

        let deployment = template.resource("OrdersApiDeployment").unwrap();
        assert_eq!(
            deployment.depends_on,
            vec!["OrdersApiOrdersItemsGET".to_string(), "OrdersApiOrdersPOST".to_string()]
        );
        template
            .has_resource_properties("AWS::ApiGateway::Stage", &json!({ "StageName": "prod" }))
            .unwrap();
        assert!(template.outputs.contains_key("OrdersApiEndpoint"));
        template.resource_count_is("AWS::Lambda::Permission", 2).unwrap();
    }
}
