//! 関数とストリーム定義

use super::removal::RemovalPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// サーバーレス関数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    #[serde(default)]
    pub name: Option<String>,
    pub runtime: String,
    pub handler: String,
    /// コードディレクトリ（プロジェクトルート相対）
    pub code: PathBuf,
    /// 実行ロールID
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_memory")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub event_sources: Vec<EventSource>,
}

impl Default for Function {
    fn default() -> Self {
        Self {
            name: None,
            runtime: "nodejs14.x".to_string(),
            handler: "index.handler".to_string(),
            code: PathBuf::new(),
            role: None,
            memory_mb: default_memory(),
            timeout_secs: default_timeout(),
            environment: BTreeMap::new(),
            event_sources: Vec::new(),
        }
    }
}

fn default_memory() -> u32 {
    128
}

fn default_timeout() -> u32 {
    3
}

/// ストリームからのイベントソース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// ストリームID
    pub stream: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub starting_position: StartingPosition,
}

impl EventSource {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            batch_size: default_batch_size(),
            starting_position: StartingPosition::default(),
        }
    }
}

fn default_batch_size() -> u32 {
    100
}

/// 読み取り開始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartingPosition {
    /// 保持されている最古のレコードから
    #[default]
    TrimHorizon,
    /// マッピング作成後のレコードから
    Latest,
}

impl StartingPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
            StartingPosition::Latest => "LATEST",
        }
    }
}

impl fmt::Display for StartingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartingPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "trim-horizon" => Ok(StartingPosition::TrimHorizon),
            "latest" => Ok(StartingPosition::Latest),
            other => Err(format!("unknown starting position: {}", other)),
        }
    }
}

/// 順序付きレコードストリーム
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    #[serde(default = "default_retention")]
    pub retention_hours: u32,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            name: None,
            shard_count: default_shard_count(),
            retention_hours: default_retention(),
            removal_policy: RemovalPolicy::Retain,
        }
    }
}

fn default_shard_count() -> u32 {
    1
}

fn default_retention() -> u32 {
    24
}
