//! IAM ロール・ポリシーの変換

use crate::error::Result;
use crate::intrinsic::{PARTITION, arn, get_att, join, managed_policy_arn, ref_};
use crate::synth::Synthesizer;
use crate::template::Resource;
use serde_json::{Value, json};
use stackflow_core::{Policy, PolicyStatement, Principal, ResourceKind, ResourceRef, Role};

pub const POLICY_VERSION: &str = "2012-10-17";

/// イベントソースのストリーム読み取りに必要なアクション
pub const STREAM_READ_ACTIONS: &[&str] = &[
    "kinesis:DescribeStreamSummary",
    "kinesis:GetRecords",
    "kinesis:GetShardIterator",
    "kinesis:ListShards",
    "kinesis:SubscribeToShard",
    "kinesis:DescribeStream",
    "kinesis:ListStreams",
];

/// ロールごとの DefaultPolicy ステートメントを集める
///
/// ロールのインラインステートメントに、実行する関数のイベントソース読み取り権限を足す。
pub fn collect_default_statements(synth: &mut Synthesizer<'_>) {
    let blueprint = synth.blueprint;

    for (id, role) in &blueprint.roles {
        let statements: Vec<Value> = role
            .statements
            .iter()
            .map(|s| statement_json(synth, s))
            .collect();
        synth.default_statements.insert(id.clone(), statements);
    }

    for function in blueprint.functions.values() {
        let Some(role_id) = function.role.as_deref() else {
            continue;
        };
        for source in &function.event_sources {
            let grant = json!({
                "Effect": "Allow",
                "Action": STREAM_READ_ACTIONS,
                "Resource": get_att(&synth.id(&source.stream), "Arn"),
            });
            let statements = synth
                .default_statements
                .entry(role_id.to_string())
                .or_default();
            if !statements.contains(&grant) {
                statements.push(grant);
            }
        }
    }
}

/// AWS::IAM::Role と、必要なら DefaultPolicy を追加
pub fn add_role(synth: &mut Synthesizer<'_>, id: &str, role: &Role) -> Result<()> {
    let logical = synth.id(id);

    let trust: Vec<Value> = role
        .assumed_by
        .iter()
        .map(|principal| {
            json!({
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": principal_json(synth, principal),
            })
        })
        .collect();

    let managed: Vec<Value> = role
        .managed_policies
        .iter()
        .map(|name| managed_policy_arn(name))
        .collect();

    let resource = Resource::new("AWS::IAM::Role")
        .with(
            "AssumeRolePolicyDocument",
            json!({ "Statement": trust, "Version": POLICY_VERSION }),
        )
        .with_opt("Description", role.description.clone().map(Value::from))
        .with_opt(
            "ManagedPolicyArns",
            (!managed.is_empty()).then(|| Value::Array(managed)),
        )
        .with_opt("RoleName", role.name.clone().map(Value::from));
    synth.add(logical.clone(), resource)?;

    if let Some(policy_id) = synth.default_policy_of(id) {
        let statements = synth
            .default_statements
            .get(id)
            .cloned()
            .unwrap_or_default();
        let policy = Resource::new("AWS::IAM::Policy")
            .with(
                "PolicyDocument",
                json!({ "Statement": statements, "Version": POLICY_VERSION }),
            )
            .with("PolicyName", json!(policy_id))
            .with("Roles", json!([ref_(&logical)]));
        synth.add(policy_id, policy)?;
    }

    Ok(())
}

/// 単独宣言の AWS::IAM::Policy を追加
pub fn add_policy(synth: &mut Synthesizer<'_>, id: &str, policy: &Policy) -> Result<()> {
    let logical = synth.id(id);
    let statements: Vec<Value> = policy
        .statements
        .iter()
        .map(|s| statement_json(synth, s))
        .collect();
    let roles: Vec<Value> = policy
        .attach_to
        .iter()
        .map(|role| ref_(&synth.id(role)))
        .collect();

    let resource = Resource::new("AWS::IAM::Policy")
        .with(
            "PolicyDocument",
            json!({ "Statement": statements, "Version": POLICY_VERSION }),
        )
        .with(
            "PolicyName",
            json!(policy.name.clone().unwrap_or_else(|| logical.clone())),
        )
        .with("Roles", Value::Array(roles));
    synth.add(logical, resource)
}

/// ステートメントを JSON に（要素が1つなら配列にしない）
pub(crate) fn statement_json(synth: &Synthesizer<'_>, statement: &PolicyStatement) -> Value {
    let actions: Vec<Value> = statement.actions.iter().map(|a| json!(a)).collect();
    let resources: Vec<Value> = statement
        .resources
        .iter()
        .map(|r| match r {
            ResourceRef::Literal(arn) => json!(arn),
            ResourceRef::ArnOf(target) => arn_of(synth, target),
        })
        .collect();

    json!({
        "Action": single_or_array(actions),
        "Effect": statement.effect.as_str(),
        "Resource": single_or_array(resources),
    })
}

fn single_or_array(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// ブループリント内リソースの ARN
pub(crate) fn arn_of(synth: &Synthesizer<'_>, target: &str) -> Value {
    let logical = synth.id(target);
    match synth.blueprint.kind_of(target) {
        // SNS トピックは Ref が ARN を返す
        Some(ResourceKind::Topic) => ref_(&logical),
        _ => get_att(&logical, "Arn"),
    }
}

fn principal_json(synth: &Synthesizer<'_>, principal: &Principal) -> Value {
    match principal {
        Principal::Service(service) => json!({ "Service": service }),
        Principal::Arn(arn) => json!({ "AWS": arn }),
        Principal::Account(account) => json!({
            "AWS": join("", vec![
                json!("arn:"), ref_(PARTITION), json!(format!(":iam::{}:root", account)),
            ])
        }),
        Principal::FunctionRole(function_id) => {
            // arn:<partition>:sts::<account>:assumed-role/<role name>/<function name>
            let role_id = synth.blueprint.role_of_function(function_id).unwrap_or_default();
            json!({
                "AWS": arn("sts", false, true, vec![
                    json!("assumed-role/"),
                    ref_(&synth.id(role_id)),
                    json!("/"),
                    ref_(&synth.id(function_id)),
                ])
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{SynthOptions, synthesize_with_options};
    use stackflow_core::parse_kdl_string;

    #[test]
    fn test_account_principal_and_default_policy_name() {
        let blueprint = parse_kdl_string(
            r#"
role "cross-account" {
    assumed-by account="111122223333"
    statement {
        actions "s3:GetObject" "s3:PutObject"
        resources "arn:aws:s3:::bucket/*"
    }
}
"#,
            "test".to_string(),
        )
        .unwrap();
        let options = SynthOptions {
            skip_validation: true,
            ..Default::default()
        };
        let template = synthesize_with_options(&blueprint, &options).unwrap().template;

        let role = template.resource("CrossAccount").unwrap();
        assert_eq!(
            role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["AWS"],
            json!({ "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, ":iam::111122223333:root"]] })
        );
        let policy = template.resource("CrossAccountDefaultPolicy").unwrap();
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Action"],
            json!(["s3:GetObject", "s3:PutObject"])
        );
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Resource"],
            json!("arn:aws:s3:::bucket/*")
        );
    }
}
