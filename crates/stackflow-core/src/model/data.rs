//! テーブルとトピック定義

use super::removal::RemovalPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// キー・バリューテーブル
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub partition_key: Option<KeyAttribute>,
    #[serde(default)]
    pub sort_key: Option<KeyAttribute>,
    #[serde(default)]
    pub billing_mode: BillingMode,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    /// 変更フィードを送るストリームID
    #[serde(default)]
    pub kinesis_stream: Option<String>,
}

/// キー属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    #[serde(default)]
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_type: AttributeType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttributeType {
    #[default]
    String,
    Number,
    Binary,
}

impl AttributeType {
    /// AttributeType 値（S / N / B）
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "S",
            AttributeType::Number => "N",
            AttributeType::Binary => "B",
        }
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "string" => Ok(AttributeType::String),
            "n" | "number" => Ok(AttributeType::Number),
            "b" | "binary" => Ok(AttributeType::Binary),
            other => Err(format!("unknown attribute type: {}", other)),
        }
    }
}

/// 課金モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingMode {
    #[default]
    PayPerRequest,
    Provisioned { read: u32, write: u32 },
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMode::PayPerRequest => "PAY_PER_REQUEST",
            BillingMode::Provisioned { .. } => "PROVISIONED",
        }
    }
}

/// 通知トピック
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// トピックの購読者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// 呼び出す関数ID
    pub function: String,
}
