//! table / topic ノードのパース

use super::{first_string, invalid, node_id, parse_first, parse_value, prop_string, prop_u32};
use crate::error::Result;
use crate::model::{AttributeType, BillingMode, KeyAttribute, Subscription, Table, Topic};
use kdl::KdlNode;

/// table ノードをパース
pub fn parse_table(node: &KdlNode) -> Result<Table> {
    let mut table = Table::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => table.name = first_string(child),
                "partition-key" | "partition_key" => {
                    table.partition_key = Some(parse_key(child)?);
                }
                "sort-key" | "sort_key" => {
                    table.sort_key = Some(parse_key(child)?);
                }
                "billing-mode" | "billing_mode" => {
                    table.billing_mode = match first_string(child).as_deref() {
                        Some("pay-per-request") | Some("PAY_PER_REQUEST") => {
                            BillingMode::PayPerRequest
                        }
                        Some("provisioned") | Some("PROVISIONED") => BillingMode::Provisioned {
                            read: prop_u32(child, "read")?.unwrap_or(5),
                            write: prop_u32(child, "write")?.unwrap_or(5),
                        },
                        Some(other) => {
                            return Err(invalid(
                                child,
                                &format!("unknown billing mode: {}", other),
                            ));
                        }
                        None => return Err(invalid(child, "requires a value")),
                    };
                }
                "removal-policy" | "removal_policy" => {
                    table.removal_policy = parse_first(child)?;
                }
                "kinesis-stream" | "kinesis_stream" => {
                    table.kinesis_stream = first_string(child);
                }
                _ => {}
            }
        }
    }

    Ok(table)
}

/// partition-key "name" type="string"
fn parse_key(node: &KdlNode) -> Result<KeyAttribute> {
    let name = node_id(node)?;
    let attribute_type = match prop_string(node, "type") {
        Some(t) => parse_value::<AttributeType>(node, &t)?,
        None => AttributeType::String,
    };
    Ok(KeyAttribute {
        name,
        attribute_type,
    })
}

/// topic ノードをパース
pub fn parse_topic(node: &KdlNode) -> Result<Topic> {
    let mut topic = Topic::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => topic.name = first_string(child),
                "display-name" | "display_name" => topic.display_name = first_string(child),
                "subscription" => {
                    let function = prop_string(child, "function")
                        .or_else(|| first_string(child))
                        .ok_or_else(|| invalid(child, "requires function=\"<id>\""))?;
                    topic.subscriptions.push(Subscription { function });
                }
                _ => {}
            }
        }
    }

    Ok(topic)
}
