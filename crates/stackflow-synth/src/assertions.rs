//! テンプレートのアサーション
//!
//! 生成したテンプレートに対して「このタイプのリソースがこのプロパティを持つ」を
//! 検査します。オブジェクトは部分一致（期待側のキーだけを比較）、配列は完全一致、
//! 期待値の `null` は「キーが存在しない」を意味します。

use crate::error::{Result, SynthError};
use crate::template::{Resource, Template};
use serde_json::Value;
use std::collections::BTreeMap;

impl Template {
    /// 指定タイプで、プロパティが部分一致するリソースが1つ以上ある
    pub fn has_resource_properties(&self, resource_type: &str, expected: &Value) -> Result<()> {
        let candidates: Vec<(&String, &Resource)> =
            self.resources_of_type(resource_type).collect();
        if candidates.is_empty() {
            return Err(SynthError::Assertion(format!(
                "no resource of type {}",
                resource_type
            )));
        }

        let mut mismatches = Vec::new();
        for (id, resource) in &candidates {
            let actual = Value::Object(resource.properties.clone());
            match mismatch(expected, &actual, "Properties") {
                None => return Ok(()),
                Some(reason) => mismatches.push(format!("{}: {}", id, reason)),
            }
        }

        Err(SynthError::Assertion(format!(
            "no {} matches the expected properties\n  {}",
            resource_type,
            mismatches.join("\n  ")
        )))
    }

    /// 指定タイプで、リソース定義全体（Properties, DeletionPolicy など）が部分一致する
    pub fn has_resource(&self, resource_type: &str, expected: &Value) -> Result<()> {
        if self.find_resources(resource_type, expected).is_empty() {
            return Err(SynthError::Assertion(format!(
                "no {} matches {}",
                resource_type, expected
            )));
        }
        Ok(())
    }

    /// 指定タイプのリソース数が一致する
    pub fn resource_count_is(&self, resource_type: &str, count: usize) -> Result<()> {
        let actual = self.resources_of_type(resource_type).count();
        if actual != count {
            return Err(SynthError::Assertion(format!(
                "expected {} resources of type {}, found {}",
                count, resource_type, actual
            )));
        }
        Ok(())
    }

    /// 指定タイプで、リソース定義全体が部分一致するものを集める
    pub fn find_resources(&self, resource_type: &str, expected: &Value) -> BTreeMap<String, Value> {
        self.resources_of_type(resource_type)
            .filter_map(|(id, resource)| {
                let actual = serde_json::to_value(resource).ok()?;
                mismatch(expected, &actual, id)
                    .is_none()
                    .then(|| (id.clone(), actual))
            })
            .collect()
    }

    /// 出力が存在し、値が部分一致する
    pub fn has_output(&self, name: &str, expected: &Value) -> Result<()> {
        let output = self
            .outputs
            .get(name)
            .ok_or_else(|| SynthError::Assertion(format!("no output named {}", name)))?;
        let actual = serde_json::to_value(output)?;
        match mismatch(expected, &actual, name) {
            None => Ok(()),
            Some(reason) => Err(SynthError::Assertion(reason)),
        }
    }
}

/// 部分一致を判定し、一致しなければ理由を返す
pub fn mismatch(expected: &Value, actual: &Value, path: &str) -> Option<String> {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            for (key, exp_value) in exp {
                let child_path = format!("{}.{}", path, key);
                match (exp_value, act.get(key)) {
                    (Value::Null, None) => {}
                    (Value::Null, Some(found)) => {
                        return Some(format!("{} should be absent, found {}", child_path, found));
                    }
                    (_, None) => return Some(format!("{} is missing", child_path)),
                    (_, Some(act_value)) => {
                        if let Some(reason) = mismatch(exp_value, act_value, &child_path) {
                            return Some(reason);
                        }
                    }
                }
            }
            None
        }
        (Value::Array(exp), Value::Array(act)) => {
            if exp.len() != act.len() {
                return Some(format!(
                    "{} has {} elements, expected {}",
                    path,
                    act.len(),
                    exp.len()
                ));
            }
            exp.iter()
                .zip(act)
                .enumerate()
                .find_map(|(i, (e, a))| mismatch(e, a, &format!("{}[{}]", path, i)))
        }
        (exp, act) if exp == act => None,
        (exp, act) => Some(format!("{} is {}, expected {}", path, act, exp)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_template() -> Template {
        let mut template = Template::default();
        template.resources.insert(
            "CustomerTable".to_string(),
            Resource::new("AWS::DynamoDB::Table")
                .with("TableName", json!("customer-table"))
                .with(
                    "KeySchema",
                    json!([{ "AttributeName": "customerName", "KeyType": "HASH" }]),
                )
                .with("BillingMode", json!("PAY_PER_REQUEST"))
                .with_removal("Delete"),
        );
        template
    }

    #[test]
    fn test_partial_object_match() {
        let template = table_template();
        template
            .has_resource_properties(
                "AWS::DynamoDB::Table",
                &json!({ "BillingMode": "PAY_PER_REQUEST" }),
            )
            .unwrap();
    }

    #[test]
    fn test_arrays_match_exactly() {
        let template = table_template();
        let with_range = json!({ "KeySchema": [
            { "AttributeName": "customerName", "KeyType": "HASH" },
            { "AttributeName": "createdAt", "KeyType": "RANGE" }
        ]});
        let err = template
            .has_resource_properties("AWS::DynamoDB::Table", &with_range)
            .unwrap_err();
        assert!(err.to_string().contains("KeySchema has 1 elements"));
    }

    #[test]
    fn test_null_means_absent() {
        let template = table_template();
        template
            .has_resource_properties(
                "AWS::DynamoDB::Table",
                &json!({ "ProvisionedThroughput": null }),
            )
            .unwrap();
        assert!(
            template
                .has_resource_properties("AWS::DynamoDB::Table", &json!({ "TableName": null }))
                .is_err()
        );
    }

    #[test]
    fn test_has_resource_checks_policies() {
        let template = table_template();
        template
            .has_resource(
                "AWS::DynamoDB::Table",
                &json!({ "DeletionPolicy": "Delete", "UpdateReplacePolicy": "Delete" }),
            )
            .unwrap();
        assert!(
            template
                .has_resource("AWS::DynamoDB::Table", &json!({ "DeletionPolicy": "Retain" }))
                .is_err()
        );
        assert_eq!(
            template
                .find_resources("AWS::DynamoDB::Table", &json!({}))
                .len(),
            1
        );
    }

    #[test]
    fn test_resource_count() {
        let template = table_template();
        template.resource_count_is("AWS::DynamoDB::Table", 1).unwrap();
        template.resource_count_is("AWS::SNS::Topic", 0).unwrap();
        assert!(template.resource_count_is("AWS::DynamoDB::Table", 2).is_err());
    }
}
