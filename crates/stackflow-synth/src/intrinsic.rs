//! 組み込み関数と疑似パラメータ

use serde_json::{Value, json};
use std::collections::BTreeSet;

pub const ACCOUNT_ID: &str = "AWS::AccountId";
pub const REGION: &str = "AWS::Region";
pub const PARTITION: &str = "AWS::Partition";
pub const URL_SUFFIX: &str = "AWS::URLSuffix";
pub const STACK_NAME: &str = "AWS::StackName";

/// { "Ref": id }
pub fn ref_(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// { "Fn::GetAtt": [id, attr] }
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// { "Fn::Join": [delimiter, parts] }
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// arn:{partition}:{service}:{region}:{account}:{resource}
///
/// regional / with_account が false の部分は空になる（IAM や STS など）
pub fn arn(service: &str, regional: bool, with_account: bool, resource: Vec<Value>) -> Value {
    let mut parts = vec![json!("arn:"), ref_(PARTITION), json!(format!(":{}:", service))];
    if regional {
        parts.push(ref_(REGION));
    }
    parts.push(json!(":"));
    if with_account {
        parts.push(ref_(ACCOUNT_ID));
    }
    parts.push(json!(":"));
    parts.extend(resource);
    join("", merge_literals(parts))
}

/// AWS マネージドポリシーの ARN
pub fn managed_policy_arn(name: &str) -> Value {
    join(
        "",
        vec![
            json!("arn:"),
            ref_(PARTITION),
            json!(format!(":iam::aws:policy/{}", name)),
        ],
    )
}

/// 隣り合う文字列リテラルを結合する
fn merge_literals(parts: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(parts.len());
    for part in parts {
        if let (Some(Value::String(last)), Value::String(next)) = (merged.last_mut(), &part) {
            last.push_str(next);
            continue;
        }
        merged.push(part);
    }
    merged
}

pub fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// 値に含まれる Ref / Fn::GetAtt の参照先（疑似パラメータを除く）
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    collect_references(value, &mut refs);
    refs
}

fn collect_references(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    if !is_pseudo_parameter(target) {
                        refs.insert(target.clone());
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt")
                    && let Some(Value::String(target)) = args.first()
                {
                    refs.insert(target.clone());
                    return;
                }
            }
            for v in map.values() {
                collect_references(v, refs);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, refs);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_skip_pseudo_parameters() {
        let value = json!({
            "Role": get_att("CreateCustomerLambdaRole", "Arn"),
            "Uri": join("", vec![json!("arn:"), ref_(PARTITION), ref_("CreateCustomerLambda")]),
        });
        let refs = references(&value);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["CreateCustomerLambda".to_string(), "CreateCustomerLambdaRole".to_string()]
        );
    }

    #[test]
    fn test_managed_policy_arn() {
        assert_eq!(
            managed_policy_arn("IAMFullAccess"),
            json!({ "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, ":iam::aws:policy/IAMFullAccess"]] })
        );
    }

    #[test]
    fn test_arn_merges_literals() {
        let value = arn("sts", false, true, vec![json!("assumed-role/"), ref_("Role")]);
        assert_eq!(
            value,
            json!({ "Fn::Join": ["", [
                "arn:", { "Ref": "AWS::Partition" }, ":sts::", { "Ref": "AWS::AccountId" },
                ":assumed-role/", { "Ref": "Role" }
            ]] })
        );
    }
}
