use super::*;
use crate::model::{
    AttributeType, Effect, Principal, RemovalPolicy, ResourceRef, StartingPosition,
};

#[test]
fn test_parse_stack_name_and_description() {
    let kdl = r#"
        stack "onboarding" {
            description "Customer onboarding"
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "default".to_string()).unwrap();
    assert_eq!(blueprint.name, "onboarding");
    assert_eq!(blueprint.description.as_deref(), Some("Customer onboarding"));
}

#[test]
fn test_default_name_without_stack_node() {
    let blueprint = parse_kdl_string("", "fallback".to_string()).unwrap();
    assert_eq!(blueprint.name, "fallback");
    assert_eq!(blueprint.resource_count(), 0);
}

#[test]
fn test_parse_user_pool() {
    let kdl = r#"
        user-pool "Pool" {
            name "MyUserPool"
            self-sign-up #true
            sign-in-aliases "username" "email"
            auto-verify "email"
            standard-attribute "given_name" required=#true mutable=#true
            custom-attribute "region" type="string" mutable=#true
            password-policy min-length=10 require-symbols=#false
            account-recovery "email-only"
            removal-policy "retain"
            client "Web" {
                generate-secret
                auth-flows "user-srp"
            }
            domain "Domain" prefix="my-prefix"
            group "Admins" {
                name "AppAdmin"
                precedence 1
            }
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let pool = &blueprint.user_pools["Pool"];
    assert_eq!(pool.name.as_deref(), Some("MyUserPool"));
    assert!(pool.self_sign_up);
    assert_eq!(pool.standard_attributes[0].name, "given_name");
    assert!(pool.standard_attributes[0].required);
    assert_eq!(pool.custom_attributes[0].name, "region");
    assert_eq!(pool.password_policy.min_length, 10);
    assert!(!pool.password_policy.require_symbols);
    // 省略した項目はデフォルトのまま
    assert!(pool.password_policy.require_uppercase);
    assert_eq!(pool.removal_policy, RemovalPolicy::Retain);
    assert!(pool.clients[0].generate_secret);
    assert!(pool.clients[0].auth_flows.user_srp);
    assert_eq!(pool.domains[0].prefix, "my-prefix");
    assert_eq!(pool.groups[0].precedence, Some(1));
}

#[test]
fn test_parse_role_principals_and_statements() {
    let kdl = r#"
        role "Elevated" {
            name "AppAdmin"
            assumed-by function-role="CreateFn"
            managed-policy "IAMFullAccess" "AmazonS3FullAccess"
            statement {
                effect "Deny"
                actions "s3:DeleteBucket"
                resources "*"
            }
        }
        role "Exec" {
            assumed-by service="lambda.amazonaws.com"
        }
        policy "Grant" {
            attach-to "Exec"
            statement {
                actions "sts:AssumeRole"
                resource arn-of="Elevated"
            }
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let elevated = &blueprint.roles["Elevated"];
    assert_eq!(
        elevated.assumed_by,
        vec![Principal::FunctionRole("CreateFn".to_string())]
    );
    assert_eq!(elevated.managed_policies.len(), 2);
    assert_eq!(elevated.statements[0].effect, Effect::Deny);

    assert_eq!(
        blueprint.roles["Exec"].assumed_by,
        vec![Principal::Service("lambda.amazonaws.com".to_string())]
    );
    assert_eq!(
        blueprint.policies["Grant"].statements[0].resources,
        vec![ResourceRef::ArnOf("Elevated".to_string())]
    );
}

#[test]
fn test_role_without_principal_kind_is_error() {
    let kdl = r#"
        role "R" {
            assumed-by
        }
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    assert!(matches!(result, Err(StackError::InvalidNode { .. })));
}

#[test]
fn test_statement_requires_actions() {
    let kdl = r#"
        role "R" {
            assumed-by service="lambda.amazonaws.com"
            statement {
                resources "*"
            }
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_function_and_event_source() {
    let kdl = r#"
        function "Listener" {
            runtime "nodejs14.x"
            handler "listen.main"
            code "resources/listen"
            role "ListenRole"
            memory 256
            timeout 30
            environment {
                TOPIC "CustomerCreated"
            }
            event-source stream="Stream" batch-size=50 starting-position="latest"
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let function = &blueprint.functions["Listener"];
    assert_eq!(function.handler, "listen.main");
    assert_eq!(function.code.to_str(), Some("resources/listen"));
    assert_eq!(function.memory_mb, 256);
    assert_eq!(function.timeout_secs, 30);
    assert_eq!(function.environment["TOPIC"], "CustomerCreated");
    assert_eq!(function.event_sources[0].batch_size, 50);
    assert_eq!(
        function.event_sources[0].starting_position,
        StartingPosition::Latest
    );
}

#[test]
fn test_event_source_defaults() {
    let kdl = r#"
        function "Listener" {
            code "resources/listen"
            event-source stream="Stream"
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let source = &blueprint.functions["Listener"].event_sources[0];
    assert_eq!(source.batch_size, 100);
    assert_eq!(source.starting_position, StartingPosition::TrimHorizon);
}

#[test]
fn test_function_requires_code() {
    let kdl = r#"
        function "NoCode" {
            handler "index.main"
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_negative_integer_is_rejected() {
    let kdl = r#"
        stream "S" {
            shard-count -1
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_rest_api() {
    let kdl = r#"
        rest-api "api" {
            name "Create Customer Service"
            authorizer "auth" {
                type "COGNITO_USER_POOLS"
                user-pool "Pool"
            }
            method "post" {
                function "CreateFn"
                authorizer "auth"
                request-template "application/json" "{ \"statusCode\": \"200\" }"
            }
            method "GET" path="customers" {
                function "ListFn"
            }
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let api = &blueprint.rest_apis["api"];
    assert_eq!(api.stage_name, "prod");
    assert_eq!(
        api.authorizers[0].identity_source,
        "method.request.header.Authorization"
    );
    assert_eq!(api.methods[0].http_method, "POST");
    assert_eq!(api.methods[0].path, "/");
    assert_eq!(api.methods[1].path, "/customers");
    assert!(api.methods[1].authorizer.is_none());
}

#[test]
fn test_unknown_http_method() {
    let kdl = r#"
        rest-api "api" {
            method "FETCH" {
                function "Fn"
            }
        }
    "#;
    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_table_and_topic() {
    let kdl = r#"
        table "Customers" {
            name "customer-table"
            partition-key "customerName" type="string"
            sort-key "createdAt" type="number"
            billing-mode "provisioned" read=2 write=3
            removal-policy "destroy"
            kinesis-stream "Stream"
        }
        topic "Topic" {
            name "CustomerCreated"
            subscription function="Provision"
        }
    "#;

    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let table = &blueprint.tables["Customers"];
    assert_eq!(
        table.sort_key.as_ref().map(|k| k.attribute_type),
        Some(AttributeType::Number)
    );
    assert_eq!(
        table.billing_mode,
        crate::model::BillingMode::Provisioned { read: 2, write: 3 }
    );
    assert_eq!(table.removal_policy, RemovalPolicy::Destroy);
    assert_eq!(
        blueprint.topics["Topic"].subscriptions[0].function,
        "Provision"
    );
}

#[test]
fn test_same_id_across_kinds_is_error() {
    let kdl = r#"
        stream "Shared"
        table "Shared" {
            partition-key "pk"
        }
    "#;
    let result = parse_kdl_string(kdl, "test".to_string());
    match result {
        Err(StackError::DuplicateResource { id, first, second }) => {
            assert_eq!(id, "Shared");
            assert_eq!(first, "stream");
            assert_eq!(second, "table");
        }
        other => panic!("unexpected result: {:?}", other.map(|b| b.name)),
    }
}

#[test]
fn test_later_declaration_replaces_earlier() {
    let kdl = r#"
        stream "S" {
            shard-count 1
        }
        stream "S" {
            shard-count 3
        }
    "#;
    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(blueprint.streams["S"].shard_count, 3);
}

#[test]
fn test_stage_block_applies_only_for_target_stage() {
    let kdl = r#"
        stream "S" {
            shard-count 1
        }
        stage "prod" {
            stream "S" {
                shard-count 4
            }
            topic "Audit"
        }
    "#;

    let dev = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(dev.streams["S"].shard_count, 1);
    assert!(dev.topics.is_empty());
    assert_eq!(dev.stages, vec!["prod".to_string()]);

    let prod = parse_kdl_string_with_stage(kdl, "test".to_string(), Some("prod")).unwrap();
    assert_eq!(prod.streams["S"].shard_count, 4);
    assert!(prod.topics.contains_key("Audit"));
}

#[test]
fn test_unknown_nodes_are_skipped() {
    let kdl = r#"
        dashboard "ops" {
            widget "latency"
        }
        topic "T"
    "#;
    let blueprint = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(blueprint.resource_count(), 1);
}

#[test]
fn test_parse_kdl_file_uses_directory_name() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("onboarding");
    std::fs::create_dir_all(&project).unwrap();
    let file = project.join("stack.kdl");
    std::fs::write(&file, "topic \"T\"").unwrap();

    let blueprint = parse_kdl_file(&file).unwrap();
    assert_eq!(blueprint.name, "onboarding");
}
