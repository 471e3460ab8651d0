//! 削除ポリシー

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ブループリントからリソースを外したときの扱い
///
/// ステートフルなリソース（ユーザープール、テーブル、ストリーム）のデフォルトは Retain。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// プロバイダー側のリソースを残す
    #[default]
    Retain,
    /// プロバイダー側のリソースも削除する
    Destroy,
}

impl RemovalPolicy {
    /// CloudFormation の DeletionPolicy 値
    pub fn deletion_policy(&self) -> &'static str {
        match self {
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Destroy => "Delete",
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(RemovalPolicy::Retain),
            "destroy" | "delete" => Ok(RemovalPolicy::Destroy),
            other => Err(format!("unknown removal policy: {}", other)),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalPolicy::Retain => write!(f, "retain"),
            RemovalPolicy::Destroy => write!(f, "destroy"),
        }
    }
}
