//! 顧客オンボーディングスタックの合成結果テスト

use serde_json::json;
use stackflow_core::blueprints::customer_onboarding;
use stackflow_synth::{Template, deployment_order, synthesize};

fn template() -> Template {
    let blueprint = customer_onboarding().unwrap();
    synthesize(&blueprint).unwrap().template
}

#[test]
fn test_user_pool_name_and_password_policy() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::Cognito::UserPool",
            &json!({
                "UserPoolName": "MyUserPool",
                "Policies": {
                    "PasswordPolicy": {
                        "MinimumLength": 8,
                        "RequireLowercase": true,
                        "RequireUppercase": true,
                        "RequireNumbers": true,
                        "RequireSymbols": true,
                    }
                },
                "AdminCreateUserConfig": { "AllowAdminCreateUserOnly": false },
                "AliasAttributes": ["email"],
                "AccountRecoverySetting": {
                    "RecoveryMechanisms": [{ "Name": "verified_email", "Priority": 1 }]
                },
            }),
        )
        .unwrap();
    template
        .has_resource(
            "AWS::Cognito::UserPool",
            &json!({ "DeletionPolicy": "Retain", "UpdateReplacePolicy": "Retain" }),
        )
        .unwrap();
}

#[test]
fn test_client_secret_and_scopes() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::Cognito::UserPoolClient",
            &json!({
                "ClientName": "MyClient",
                "GenerateSecret": true,
                "AllowedOAuthFlows": ["implicit", "code"],
                "AllowedOAuthScopes": ["phone", "email", "openid", "aws.cognito.signin.user.admin"],
                "ExplicitAuthFlows": [
                    "ALLOW_ADMIN_USER_PASSWORD_AUTH",
                    "ALLOW_USER_SRP_AUTH",
                    "ALLOW_REFRESH_TOKEN_AUTH",
                ],
            }),
        )
        .unwrap();
    template
        .has_resource_properties(
            "AWS::Cognito::UserPoolDomain",
            &json!({ "Domain": "anupam-test1-0303", "UserPoolId": { "Ref": "UserPool" } }),
        )
        .unwrap();
}

#[test]
fn test_table_has_partition_key_only() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::DynamoDB::Table",
            &json!({
                "TableName": "customer-table",
                "KeySchema": [{ "AttributeName": "customerName", "KeyType": "HASH" }],
                "BillingMode": "PAY_PER_REQUEST",
                "ProvisionedThroughput": null,
                "KinesisStreamSpecification": { "StreamArn": { "Fn::GetAtt": ["Stream", "Arn"] } },
            }),
        )
        .unwrap();
    template
        .has_resource(
            "AWS::DynamoDB::Table",
            &json!({ "DeletionPolicy": "Delete", "UpdateReplacePolicy": "Delete" }),
        )
        .unwrap();
}

#[test]
fn test_stream_mapping_reads_from_oldest_record() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::Lambda::EventSourceMapping",
            &json!({
                "BatchSize": 100,
                "StartingPosition": "TRIM_HORIZON",
                "FunctionName": { "Ref": "ListenDynamoDBStream" },
                "EventSourceArn": { "Fn::GetAtt": ["Stream", "Arn"] },
            }),
        )
        .unwrap();
    template
        .has_resource("AWS::Kinesis::Stream", &json!({ "DeletionPolicy": "Retain" }))
        .unwrap();
}

#[test]
fn test_elevated_role_trusts_only_the_create_function_session() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::IAM::Role",
            &json!({
                "RoleName": "AppAdmin",
                "AssumeRolePolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": {
                            "AWS": {
                                "Fn::Join": ["", [
                                    "arn:",
                                    { "Ref": "AWS::Partition" },
                                    ":sts::",
                                    { "Ref": "AWS::AccountId" },
                                    ":assumed-role/",
                                    { "Ref": "CreateCustomerLambdaRole" },
                                    "/",
                                    { "Ref": "CreateCustomerLambda" },
                                ]]
                            }
                        },
                    }],
                },
            }),
        )
        .unwrap();

    template
        .has_resource_properties(
            "AWS::IAM::Policy",
            &json!({
                "PolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Resource": { "Fn::GetAtt": ["UserPoolRole", "Arn"] },
                    }],
                },
                "Roles": [{ "Ref": "CreateCustomerLambdaRole" }],
            }),
        )
        .unwrap();

    template
        .has_resource_properties(
            "AWS::Cognito::UserPoolGroup",
            &json!({
                "GroupName": "AppAdmin",
                "RoleArn": { "Fn::GetAtt": ["UserPoolRole", "Arn"] },
            }),
        )
        .unwrap();
}

#[test]
fn test_api_uses_cognito_authorizer() {
    let template = template();
    template
        .has_resource_properties(
            "AWS::ApiGateway::Authorizer",
            &json!({
                "Name": "create-customer-auth",
                "Type": "COGNITO_USER_POOLS",
                "ProviderARNs": [{ "Fn::GetAtt": ["UserPool", "Arn"] }],
            }),
        )
        .unwrap();
    let method = template.resource("CreateCustomerApiPOST").unwrap();
    assert_eq!(method.properties["AuthorizationType"], json!("COGNITO_USER_POOLS"));
    assert_eq!(
        method.properties["Integration"]["RequestTemplates"],
        json!({ "application/json": "{ \"statusCode\": \"200\" }" })
    );
}

#[test]
fn test_topic_delivers_to_provisioning() {
    let template = template();
    template
        .has_resource_properties("AWS::SNS::Topic", &json!({ "TopicName": "CustomerCreated" }))
        .unwrap();
    template
        .has_resource_properties(
            "AWS::SNS::Subscription",
            &json!({ "Endpoint": { "Fn::GetAtt": ["ProvisionCustomer", "Arn"] } }),
        )
        .unwrap();
    template.resource_count_is("AWS::Lambda::Function", 3).unwrap();
    template.resource_count_is("AWS::IAM::Role", 4).unwrap();
}

#[test]
fn test_deployment_order_puts_roles_before_functions() {
    let template = template();
    let order = deployment_order(&template).unwrap();
    let position = |id: &str| order.iter().position(|x| x == id).unwrap();

    assert!(position("CreateCustomerLambdaRole") < position("CreateCustomerLambda"));
    assert!(position("CreateCustomerLambda") < position("UserPoolRole"));
    assert!(position("UserPoolRole") < position("CreateCustomerPolicy"));
    assert!(position("ListenDynamoDBStreamLambdaRoleDefaultPolicy") < position("ListenDynamoDBStream"));
    assert_eq!(order.len(), template.resources.len());
}

#[test]
fn test_template_serializes_with_cloudformation_keys() {
    let template = template();
    let json = template.to_json().unwrap();
    assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
    assert!(json["Parameters"]["CreateCustomerLambdaCodeS3Bucket"].is_object());
    assert_eq!(json["Resources"]["CustomerTable"]["Type"], "AWS::DynamoDB::Table");
}
