//! IAM ロールとポリシー定義

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 実行ロール
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    /// プロバイダー上のロール名
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// 信頼ポリシーのプリンシパル
    #[serde(default)]
    pub assumed_by: Vec<Principal>,
    /// 付与するマネージドポリシー名（AmazonDynamoDBFullAccess など）
    #[serde(default)]
    pub managed_policies: Vec<String>,
    /// インラインのステートメント
    #[serde(default)]
    pub statements: Vec<PolicyStatement>,
}

/// ロールを引き受けられる主体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", content = "value")]
pub enum Principal {
    /// AWS サービス（lambda.amazonaws.com など）
    Service(String),
    /// 指定した関数の実行セッション
    FunctionRole(String),
    /// 任意の ARN
    Arn(String),
    /// アカウント
    Account(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Service(s) => write!(f, "service:{}", s),
            Principal::FunctionRole(id) => write!(f, "function-role:{}", id),
            Principal::Arn(arn) => write!(f, "arn:{}", arn),
            Principal::Account(account) => write!(f, "account:{}", account),
        }
    }
}

/// 単独で宣言されたポリシー
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub name: Option<String>,
    /// アタッチ先のロールID
    #[serde(default)]
    pub attach_to: Vec<String>,
    #[serde(default)]
    pub statements: Vec<PolicyStatement>,
}

/// ポリシーステートメント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(default)]
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<ResourceRef>,
}

impl PolicyStatement {
    pub fn allow(actions: Vec<String>, resources: Vec<ResourceRef>) -> Self {
        Self {
            effect: Effect::Allow,
            actions,
            resources,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(format!("unknown effect: {}", other)),
        }
    }
}

/// ステートメントの対象リソース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", content = "value")]
pub enum ResourceRef {
    /// ARN パターン（"*" を含む）
    Literal(String),
    /// ブループリント内リソースの ARN
    ArnOf(String),
}

impl ResourceRef {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, ResourceRef::Literal(s) if s == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_parse() {
        assert_eq!("Allow".parse::<Effect>(), Ok(Effect::Allow));
        assert_eq!("deny".parse::<Effect>(), Ok(Effect::Deny));
        assert!("maybe".parse::<Effect>().is_err());
    }

    #[test]
    fn test_wildcard_resource() {
        assert!(ResourceRef::Literal("*".to_string()).is_wildcard());
        assert!(!ResourceRef::ArnOf("UserPoolRole".to_string()).is_wildcard());
    }
}
