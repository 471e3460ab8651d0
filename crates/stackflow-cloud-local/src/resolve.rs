//! Intrinsic function resolution
//!
//! Turns `Ref`, `Fn::GetAtt` and `Fn::Join` into concrete values using the
//! physical resources created so far, the stack parameters and the pseudo
//! parameters of the sandbox account.

use crate::error::{Result, SandboxError};
use crate::sandbox::PhysicalResource;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub(crate) struct Resolver<'a> {
    pub resources: &'a BTreeMap<String, PhysicalResource>,
    pub parameters: &'a BTreeMap<String, String>,
    pub account_id: &'a str,
    pub region: &'a str,
    pub stack_name: &'a str,
}

impl Resolver<'_> {
    pub fn resolve(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Object(map) => {
                if map.len() == 1
                    && let Some((key, arg)) = map.iter().next()
                {
                    match key.as_str() {
                        "Ref" => return self.resolve_ref(arg),
                        "Fn::GetAtt" => return self.resolve_get_att(arg),
                        "Fn::Join" => return self.resolve_join(arg),
                        _ => {}
                    }
                }
                self.resolve_map(map)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_map(&self, map: &Map<String, Value>) -> Result<Value> {
        let mut resolved = Map::new();
        for (key, value) in map {
            resolved.insert(key.clone(), self.resolve(value)?);
        }
        Ok(Value::Object(resolved))
    }

    fn resolve_ref(&self, arg: &Value) -> Result<Value> {
        let name = arg
            .as_str()
            .ok_or_else(|| SandboxError::Template(format!("Ref expects a string, got {}", arg)))?;

        let pseudo = match name {
            "AWS::AccountId" => Some(self.account_id),
            "AWS::Region" => Some(self.region),
            "AWS::Partition" => Some("aws"),
            "AWS::URLSuffix" => Some("amazonaws.com"),
            "AWS::StackName" => Some(self.stack_name),
            _ => None,
        };
        if let Some(value) = pseudo {
            return Ok(Value::from(value));
        }
        if let Some(value) = self.parameters.get(name) {
            return Ok(Value::from(value.as_str()));
        }
        self.resources
            .get(name)
            .map(|resource| Value::from(resource.physical_id.as_str()))
            .ok_or_else(|| SandboxError::UnresolvedReference(name.to_string()))
    }

    fn resolve_get_att(&self, arg: &Value) -> Result<Value> {
        let (logical_id, attribute) = match arg {
            Value::Array(parts) if parts.len() == 2 => (
                parts[0].as_str().unwrap_or_default().to_string(),
                parts[1].as_str().unwrap_or_default().to_string(),
            ),
            Value::String(dotted) => match dotted.split_once('.') {
                Some((id, attr)) => (id.to_string(), attr.to_string()),
                None => (dotted.clone(), String::new()),
            },
            other => {
                return Err(SandboxError::Template(format!(
                    "Fn::GetAtt expects [logicalId, attribute], got {}",
                    other
                )));
            }
        };

        let resource = self
            .resources
            .get(&logical_id)
            .ok_or_else(|| SandboxError::UnresolvedReference(logical_id.clone()))?;
        resource.attributes.get(&attribute).cloned().ok_or_else(|| {
            SandboxError::UnresolvedReference(format!("{}.{}", logical_id, attribute))
        })
    }

    fn resolve_join(&self, arg: &Value) -> Result<Value> {
        let (delimiter, parts) = match arg {
            Value::Array(args) if args.len() == 2 => (args[0].as_str(), args[1].as_array()),
            _ => (None, None),
        };
        let (Some(delimiter), Some(parts)) = (delimiter, parts) else {
            return Err(SandboxError::Template(format!(
                "Fn::Join expects [delimiter, [parts]], got {}",
                arg
            )));
        };

        let mut strings = Vec::with_capacity(parts.len());
        for part in parts {
            strings.push(match self.resolve(part)? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(SandboxError::Template(format!(
                        "Fn::Join part did not resolve to a string: {}",
                        other
                    )));
                }
            });
        }
        Ok(Value::from(strings.join(delimiter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resources() -> BTreeMap<String, PhysicalResource> {
        let mut resources = BTreeMap::new();
        resources.insert(
            "Role".to_string(),
            PhysicalResource::new("AWS::IAM::Role", "AppAdmin")
                .with_attribute("Arn", json!("arn:aws:iam::123456789012:role/AppAdmin")),
        );
        resources
    }

    #[test]
    fn test_resolves_nested_intrinsics() {
        let resources = resources();
        let mut parameters = BTreeMap::new();
        parameters.insert("Bucket".to_string(), "local-assets".to_string());
        let resolver = Resolver {
            resources: &resources,
            parameters: &parameters,
            account_id: "123456789012",
            region: "us-east-1",
            stack_name: "CdkStack",
        };

        let value = json!({
            "RoleName": { "Ref": "Role" },
            "RoleArn": { "Fn::GetAtt": ["Role", "Arn"] },
            "Code": { "S3Bucket": { "Ref": "Bucket" } },
            "Principal": { "Fn::Join": ["", [
                "arn:", { "Ref": "AWS::Partition" }, ":iam::", { "Ref": "AWS::AccountId" }, ":root"
            ]] },
        });
        assert_eq!(
            resolver.resolve(&value).unwrap(),
            json!({
                "RoleName": "AppAdmin",
                "RoleArn": "arn:aws:iam::123456789012:role/AppAdmin",
                "Code": { "S3Bucket": "local-assets" },
                "Principal": "arn:aws:iam::123456789012:root",
            })
        );
    }

    #[test]
    fn test_unknown_reference_is_error() {
        let resources = resources();
        let parameters = BTreeMap::new();
        let resolver = Resolver {
            resources: &resources,
            parameters: &parameters,
            account_id: "123456789012",
            region: "us-east-1",
            stack_name: "CdkStack",
        };
        assert!(matches!(
            resolver.resolve(&json!({ "Ref": "Missing" })),
            Err(SandboxError::UnresolvedReference(_))
        ));
        assert!(matches!(
            resolver.resolve(&json!({ "Fn::GetAtt": ["Role", "RoleId"] })),
            Err(SandboxError::UnresolvedReference(_))
        ));
    }
}
