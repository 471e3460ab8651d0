//! ユーザープールの変換

use crate::error::Result;
use crate::intrinsic::{get_att, ref_};
use crate::logical_id::nested_logical_id;
use crate::synth::Synthesizer;
use crate::template::Resource;
use serde_json::{Map, Value, json};
use stackflow_core::{SignInAlias, UserPool, UserPoolClient};

/// AWS::Cognito::UserPool とクライアント・ドメイン・グループを追加
pub fn add_user_pool(synth: &mut Synthesizer<'_>, id: &str, pool: &UserPool) -> Result<()> {
    let logical = synth.id(id);

    let mut resource = Resource::new("AWS::Cognito::UserPool")
        .with_opt("UserPoolName", pool.name.clone().map(Value::from))
        .with(
            "AdminCreateUserConfig",
            json!({ "AllowAdminCreateUserOnly": !pool.self_sign_up }),
        )
        .with("Policies", json!({ "PasswordPolicy": password_policy(pool) }))
        .with(
            "VerificationMessageTemplate",
            json!({ "DefaultEmailOption": "CONFIRM_WITH_CODE" }),
        );

    let aliases: Vec<&str> = pool
        .sign_in_aliases
        .iter()
        .filter_map(SignInAlias::attribute_name)
        .collect();
    if !aliases.is_empty() {
        // ユーザー名でもサインインできるなら別名扱い、そうでなければユーザー名そのもの
        let key = if pool.sign_in_aliases.contains(&SignInAlias::Username) {
            "AliasAttributes"
        } else {
            "UsernameAttributes"
        };
        resource = resource.with(key, json!(aliases));
    }

    if !pool.auto_verify.is_empty() {
        let verified: Vec<&str> = pool.auto_verify.iter().map(|a| a.attribute_name()).collect();
        resource = resource.with("AutoVerifiedAttributes", json!(verified));
    }

    let schema = schema(pool);
    if !schema.is_empty() {
        resource = resource.with("Schema", Value::Array(schema));
    }

    let mechanisms: Vec<Value> = pool
        .account_recovery
        .mechanisms()
        .into_iter()
        .map(|(name, priority)| json!({ "Name": name, "Priority": priority }))
        .collect();
    if !mechanisms.is_empty() {
        resource = resource.with(
            "AccountRecoverySetting",
            json!({ "RecoveryMechanisms": mechanisms }),
        );
    }

    resource = resource.with_removal(pool.removal_policy.deletion_policy());
    synth.add(logical.clone(), resource)?;
    synth.add_output(
        format!("{}Id", logical),
        ref_(&logical),
        "User pool identifier",
    );

    for client in &pool.clients {
        add_client(synth, &logical, client)?;
    }

    for domain in &pool.domains {
        let resource = Resource::new("AWS::Cognito::UserPoolDomain")
            .with("Domain", json!(domain.prefix))
            .with("UserPoolId", ref_(&logical));
        synth.add(nested_logical_id(id, &domain.id), resource)?;
    }

    for group in &pool.groups {
        let resource = Resource::new("AWS::Cognito::UserPoolGroup")
            .with("UserPoolId", ref_(&logical))
            .with(
                "GroupName",
                json!(group.name.clone().unwrap_or_else(|| group.id.clone())),
            )
            .with_opt("Description", group.description.clone().map(Value::from))
            .with_opt(
                "RoleArn",
                group.role.as_deref().map(|role| get_att(&synth.id(role), "Arn")),
            )
            .with_opt("Precedence", group.precedence.map(Value::from));
        synth.add(nested_logical_id(id, &group.id), resource)?;
    }

    Ok(())
}

fn add_client(synth: &mut Synthesizer<'_>, pool_logical: &str, client: &UserPoolClient) -> Result<()> {
    let logical = nested_logical_id(pool_logical, &client.id);

    let mut resource = Resource::new("AWS::Cognito::UserPoolClient")
        .with("UserPoolId", ref_(pool_logical))
        .with_opt("ClientName", client.name.clone().map(Value::from))
        .with("GenerateSecret", json!(client.generate_secret))
        .with("SupportedIdentityProviders", json!(["COGNITO"]));

    if !client.auth_flows.is_empty() {
        resource = resource.with(
            "ExplicitAuthFlows",
            json!(client.auth_flows.explicit_flows()),
        );
    }

    if let Some(oauth) = &client.oauth {
        let flows = oauth.flows.allowed_flows();
        let scopes: Vec<&str> = oauth.scopes.iter().map(|s| s.as_str()).collect();
        resource = resource
            .with("AllowedOAuthFlowsUserPoolClient", json!(!flows.is_empty()))
            .with("AllowedOAuthFlows", json!(flows))
            .with("AllowedOAuthScopes", json!(scopes));
        if !oauth.callback_urls.is_empty() {
            resource = resource.with("CallbackURLs", json!(oauth.callback_urls));
        }
        if !oauth.logout_urls.is_empty() {
            resource = resource.with("LogoutURLs", json!(oauth.logout_urls));
        }
    }

    synth.add(logical.clone(), resource)?;
    synth.add_output(
        format!("{}Id", logical),
        ref_(&logical),
        "User pool client identifier",
    );
    Ok(())
}

fn password_policy(pool: &UserPool) -> Value {
    let policy = &pool.password_policy;
    let mut value = Map::new();
    value.insert("MinimumLength".to_string(), json!(policy.min_length));
    value.insert("RequireLowercase".to_string(), json!(policy.require_lowercase));
    value.insert("RequireUppercase".to_string(), json!(policy.require_uppercase));
    value.insert("RequireNumbers".to_string(), json!(policy.require_digits));
    value.insert("RequireSymbols".to_string(), json!(policy.require_symbols));
    if let Some(days) = policy.temp_password_validity_days {
        value.insert("TemporaryPasswordValidityDays".to_string(), json!(days));
    }
    Value::Object(value)
}

fn schema(pool: &UserPool) -> Vec<Value> {
    let standard = pool.standard_attributes.iter().map(|attr| {
        json!({
            "Mutable": attr.mutable,
            "Name": attr.name,
            "Required": attr.required,
        })
    });

    let custom = pool.custom_attributes.iter().map(|attr| {
        let mut value = json!({
            "AttributeDataType": attr.data_type.as_str(),
            "Mutable": attr.mutable,
            "Name": attr.name,
        });
        if attr.min_length.is_some() || attr.max_length.is_some() {
            let mut constraints = Map::new();
            if let Some(min) = attr.min_length {
                constraints.insert("MinLength".to_string(), json!(min.to_string()));
            }
            if let Some(max) = attr.max_length {
                constraints.insert("MaxLength".to_string(), json!(max.to_string()));
            }
            value["StringAttributeConstraints"] = Value::Object(constraints);
        }
        value
    });

    standard.chain(custom).collect()
}

#[cfg(test)]
mod tests {
    use crate::synth::synthesize;
    use serde_json::json;
    use stackflow_core::parse_kdl_string;

    fn synth(content: &str) -> crate::template::Template {
        let blueprint = parse_kdl_string(content, "test".to_string()).unwrap();
        synthesize(&blueprint).unwrap().template
    }

    #[test]
    fn test_email_only_sign_in_uses_username_attributes() {
        let template = synth(
            r#"
user-pool "pool" {
    sign-in-aliases "email"
    auto-verify "email"
    standard-attribute "email" required=#true
}
"#,
        );
        template
            .has_resource_properties(
                "AWS::Cognito::UserPool",
                &json!({
                    "UsernameAttributes": ["email"],
                    "AliasAttributes": null,
                    "AutoVerifiedAttributes": ["email"],
                    "Schema": [{ "Name": "email", "Required": true, "Mutable": true }],
                    "AdminCreateUserConfig": { "AllowAdminCreateUserOnly": true },
                }),
            )
            .unwrap();
        template
            .has_resource("AWS::Cognito::UserPool", &json!({ "DeletionPolicy": "Retain" }))
            .unwrap();
        template
            .has_output("PoolId", &json!({ "Value": { "Ref": "Pool" } }))
            .unwrap();
    }

    #[test]
    fn test_client_without_oauth_has_no_flows() {
        let template = synth(
            r#"
user-pool "pool" {
    client "web" {
        auth-flows "user-srp"
    }
}
"#,
        );
        template
            .has_resource_properties(
                "AWS::Cognito::UserPoolClient",
                &json!({
                    "UserPoolId": { "Ref": "Pool" },
                    "ExplicitAuthFlows": ["ALLOW_USER_SRP_AUTH", "ALLOW_REFRESH_TOKEN_AUTH"],
                    "AllowedOAuthFlows": null,
                    "GenerateSecret": false,
                }),
            )
            .unwrap();
        assert!(template.resource("PoolWeb").is_some());
    }
}
