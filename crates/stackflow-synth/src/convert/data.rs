//! テーブルとトピックの変換

use crate::error::Result;
use crate::intrinsic::{get_att, ref_};
use crate::synth::Synthesizer;
use crate::template::Resource;
use serde_json::{Value, json};
use stackflow_core::{BillingMode, Table, Topic};

/// AWS::DynamoDB::Table を追加
pub fn add_table(synth: &mut Synthesizer<'_>, id: &str, table: &Table) -> Result<()> {
    let logical = synth.id(id);

    let mut key_schema = Vec::new();
    let mut definitions = Vec::new();
    for (key, key_type) in [(&table.partition_key, "HASH"), (&table.sort_key, "RANGE")] {
        if let Some(key) = key {
            key_schema.push(json!({ "AttributeName": key.name, "KeyType": key_type }));
            definitions.push(json!({
                "AttributeName": key.name,
                "AttributeType": key.attribute_type.as_str(),
            }));
        }
    }

    let mut resource = Resource::new("AWS::DynamoDB::Table")
        .with_opt("TableName", table.name.clone().map(Value::from))
        .with("KeySchema", Value::Array(key_schema))
        .with("AttributeDefinitions", Value::Array(definitions))
        .with("BillingMode", json!(table.billing_mode.as_str()));

    if let BillingMode::Provisioned { read, write } = table.billing_mode {
        resource = resource.with(
            "ProvisionedThroughput",
            json!({ "ReadCapacityUnits": read, "WriteCapacityUnits": write }),
        );
    }

    if let Some(stream) = &table.kinesis_stream {
        resource = resource.with(
            "KinesisStreamSpecification",
            json!({ "StreamArn": get_att(&synth.id(stream), "Arn") }),
        );
    }

    resource = resource.with_removal(table.removal_policy.deletion_policy());
    synth.add(logical.clone(), resource)?;
    synth.add_output(format!("{}Name", logical), ref_(&logical), "Table name");
    Ok(())
}

/// AWS::SNS::Topic と関数サブスクリプションを追加
pub fn add_topic(synth: &mut Synthesizer<'_>, id: &str, topic: &Topic) -> Result<()> {
    let logical = synth.id(id);

    let resource = Resource::new("AWS::SNS::Topic")
        .with_opt("TopicName", topic.name.clone().map(Value::from))
        .with_opt("DisplayName", topic.display_name.clone().map(Value::from));
    synth.add(logical.clone(), resource)?;
    synth.add_output(format!("{}Arn", logical), ref_(&logical), "Topic ARN");

    for subscription in &topic.subscriptions {
        let function = synth.id(&subscription.function);

        let resource = Resource::new("AWS::SNS::Subscription")
            .with("Endpoint", get_att(&function, "Arn"))
            .with("Protocol", json!("lambda"))
            .with("TopicArn", ref_(&logical));
        synth.add(format!("{}{}Subscription", logical, function), resource)?;

        // SNS からの呼び出しを許可
        let permission = Resource::new("AWS::Lambda::Permission")
            .with("Action", json!("lambda:InvokeFunction"))
            .with("FunctionName", get_att(&function, "Arn"))
            .with("Principal", json!("sns.amazonaws.com"))
            .with("SourceArn", ref_(&logical));
        synth.add(format!("{}AllowInvoke{}", function, logical), permission)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::synth::synthesize;
    use serde_json::json;
    use stackflow_core::parse_kdl_string;

    #[test]
    fn test_provisioned_table_with_sort_key() {
        let blueprint = parse_kdl_string(
            r#"
table "orders" {
    partition-key "customerName"
    sort-key "createdAt" type="number"
    billing-mode "provisioned" read=10 write=2
}
"#,
            "test".to_string(),
        )
        .unwrap();
        let template = synthesize(&blueprint).unwrap().template;

        template
            .has_resource_properties(
                "AWS::DynamoDB::Table",
                &json!({
                    "KeySchema": [
                        { "AttributeName": "customerName", "KeyType": "HASH" },
                        { "AttributeName": "createdAt", "KeyType": "RANGE" },
                    ],
                    "AttributeDefinitions": [
                        { "AttributeName": "customerName", "AttributeType": "S" },
                        { "AttributeName": "createdAt", "AttributeType": "N" },
                    ],
                    "BillingMode": "PROVISIONED",
                    "ProvisionedThroughput": { "ReadCapacityUnits": 10, "WriteCapacityUnits": 2 },
                    "KinesisStreamSpecification": null,
                }),
            )
            .unwrap();
        template
            .has_resource("AWS::DynamoDB::Table", &json!({ "DeletionPolicy": "Retain" }))
            .unwrap();
    }

    #[test]
    fn test_topic_subscription_grants_invoke() {
        let blueprint = parse_kdl_string(
            r#"
role "worker-role" {
    assumed-by service="lambda.amazonaws.com"
}
function "worker" {
    code "resources/worker"
    role "worker-role"
}
topic "created" {
    name "CustomerCreated"
    subscription function="worker"
}
"#,
            "test".to_string(),
        )
        .unwrap();
        let template = synthesize(&blueprint).unwrap().template;

        template
            .has_resource_properties(
                "AWS::SNS::Subscription",
                &json!({
                    "Protocol": "lambda",
                    "TopicArn": { "Ref": "Created" },
                    "Endpoint": { "Fn::GetAtt": ["Worker", "Arn"] },
                }),
            )
            .unwrap();
        template
            .has_resource_properties(
                "AWS::Lambda::Permission",
                &json!({ "Principal": "sns.amazonaws.com", "SourceArn": { "Ref": "Created" } }),
            )
            .unwrap();
        assert!(template.resource("WorkerAllowInvokeCreated").is_some());
    }
}
