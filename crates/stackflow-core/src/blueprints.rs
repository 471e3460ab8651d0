//! 組み込みブループリント

use crate::error::Result;
use crate::loader::load_blueprint_str;
use crate::model::Blueprint;

/// 顧客オンボーディングスタックのKDL
pub const CUSTOMER_ONBOARDING: &str = include_str!("../blueprints/customer-onboarding.kdl");

/// 顧客オンボーディングスタックをロード
pub fn customer_onboarding() -> Result<Blueprint> {
    load_blueprint_str(CUSTOMER_ONBOARDING, "CdkStack", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccountRecovery, BillingMode, OAuthScope, Principal, RemovalPolicy, ResourceRef,
        SignInAlias, StartingPosition,
    };
    use crate::validate::validate_blueprint;

    #[test]
    fn test_customer_onboarding_is_valid() {
        let blueprint = customer_onboarding().unwrap();
        let report = validate_blueprint(&blueprint);
        assert!(report.is_valid(), "{}", report);
        assert_eq!(blueprint.name, "CdkStack");
        assert_eq!(blueprint.resource_count(), 13);
    }

    #[test]
    fn test_user_pool_declaration() {
        let blueprint = customer_onboarding().unwrap();
        let pool = &blueprint.user_pools["UserPool"];

        assert_eq!(pool.name.as_deref(), Some("MyUserPool"));
        assert!(pool.self_sign_up);
        assert_eq!(
            pool.sign_in_aliases,
            vec![SignInAlias::Username, SignInAlias::Email]
        );
        assert_eq!(pool.required_attributes(), vec!["given_name", "family_name"]);
        assert_eq!(pool.custom_attributes.len(), 2);
        assert!(pool.custom_attributes.iter().all(|a| a.mutable));
        assert_eq!(pool.password_policy.min_length, 8);
        assert_eq!(pool.account_recovery, AccountRecovery::EmailOnly);
        assert_eq!(pool.removal_policy, RemovalPolicy::Retain);
        assert_eq!(pool.domains[0].prefix, "anupam-test1-0303");

        let client = pool.client("MyClient").unwrap();
        assert!(client.generate_secret);
        assert!(client.auth_flows.admin_user_password && client.auth_flows.user_srp);
        assert!(!client.auth_flows.user_password && !client.auth_flows.custom);
        let oauth = client.oauth.as_ref().unwrap();
        assert!(oauth.flows.authorization_code && oauth.flows.implicit);
        assert!(!oauth.flows.client_credentials);
        assert_eq!(
            oauth.scopes,
            vec![
                OAuthScope::Phone,
                OAuthScope::Email,
                OAuthScope::OpenId,
                OAuthScope::CognitoAdmin
            ]
        );

        let group = pool.group("MyCfnUserPoolGroup").unwrap();
        assert_eq!(group.name.as_deref(), Some("AppAdmin"));
        assert_eq!(group.role.as_deref(), Some("UserPoolRole"));
    }

    #[test]
    fn test_two_hop_trust_is_declared() {
        let blueprint = customer_onboarding().unwrap();

        let elevated = &blueprint.roles["UserPoolRole"];
        assert_eq!(elevated.name.as_deref(), Some("AppAdmin"));
        assert_eq!(
            elevated.assumed_by,
            vec![Principal::FunctionRole("CreateCustomerLambda".to_string())]
        );

        let grant = &blueprint.policies["CreateCustomerPolicy"];
        assert_eq!(grant.attach_to, vec!["createCustomerLambdaRole".to_string()]);
        assert_eq!(grant.statements[0].actions, vec!["sts:AssumeRole".to_string()]);
        assert_eq!(
            grant.statements[0].resources,
            vec![ResourceRef::ArnOf("UserPoolRole".to_string())]
        );
    }

    #[test]
    fn test_pipeline_wiring() {
        let blueprint = customer_onboarding().unwrap();

        let listener = &blueprint.functions["ListenDynamoDBStream"];
        assert_eq!(listener.runtime, "nodejs14.x");
        assert_eq!(listener.event_sources[0].stream, "Stream");
        assert_eq!(listener.event_sources[0].batch_size, 100);
        assert_eq!(
            listener.event_sources[0].starting_position,
            StartingPosition::TrimHorizon
        );

        let table = &blueprint.tables["CustomerTable"];
        assert_eq!(table.name.as_deref(), Some("customer-table"));
        assert_eq!(table.partition_key.as_ref().unwrap().name, "customerName");
        assert!(table.sort_key.is_none());
        assert_eq!(table.billing_mode, BillingMode::PayPerRequest);
        assert_eq!(table.removal_policy, RemovalPolicy::Destroy);
        assert_eq!(table.kinesis_stream.as_deref(), Some("Stream"));

        let topic = &blueprint.topics["Topic"];
        assert_eq!(topic.name.as_deref(), Some("CustomerCreated"));
        assert_eq!(topic.subscriptions[0].function, "ProvisionCustomer");

        let api = &blueprint.rest_apis["create-customer-api"];
        let method = &api.methods[0];
        assert_eq!(method.http_method, "POST");
        assert_eq!(method.path, "/");
        assert_eq!(method.authorizer.as_deref(), Some("create-customer-auth"));
        assert_eq!(
            method.request_templates["application/json"],
            r#"{ "statusCode": "200" }"#
        );
    }
}
