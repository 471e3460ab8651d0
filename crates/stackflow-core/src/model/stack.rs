//! ブループリント定義

use super::api::RestApi;
use super::compute::{Function, Stream};
use super::data::{Table, Topic};
use super::iam::{Policy, Role};
use super::identity::UserPool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Blueprint - スタックの設計図
///
/// マネージドサービスのリソース宣言と、それらを結ぶ権限を保持します。
/// リソースは種類ごとに ID をキーとして格納され、ID はブループリント全体で一意です。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blueprint {
    /// スタック名
    pub name: String,
    /// スタックの説明
    #[serde(default)]
    pub description: Option<String>,
    /// 宣言されたステージ名
    #[serde(default)]
    pub stages: Vec<String>,
    /// プロジェクト共通の変数
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub user_pools: BTreeMap<String, UserPool>,
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
    #[serde(default)]
    pub policies: BTreeMap<String, Policy>,
    #[serde(default)]
    pub functions: BTreeMap<String, Function>,
    #[serde(default)]
    pub streams: BTreeMap<String, Stream>,
    #[serde(default)]
    pub rest_apis: BTreeMap<String, RestApi>,
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
    #[serde(default)]
    pub topics: BTreeMap<String, Topic>,
}

/// トップレベルリソースの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    UserPool,
    Role,
    Policy,
    Function,
    Stream,
    RestApi,
    Table,
    Topic,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::UserPool => "user-pool",
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::Function => "function",
            ResourceKind::Stream => "stream",
            ResourceKind::RestApi => "rest-api",
            ResourceKind::Table => "table",
            ResourceKind::Topic => "topic",
        };
        f.write_str(name)
    }
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// ID からリソースの種類を引く
    pub fn kind_of(&self, id: &str) -> Option<ResourceKind> {
        if self.user_pools.contains_key(id) {
            Some(ResourceKind::UserPool)
        } else if self.roles.contains_key(id) {
            Some(ResourceKind::Role)
        } else if self.policies.contains_key(id) {
            Some(ResourceKind::Policy)
        } else if self.functions.contains_key(id) {
            Some(ResourceKind::Function)
        } else if self.streams.contains_key(id) {
            Some(ResourceKind::Stream)
        } else if self.rest_apis.contains_key(id) {
            Some(ResourceKind::RestApi)
        } else if self.tables.contains_key(id) {
            Some(ResourceKind::Table)
        } else if self.topics.contains_key(id) {
            Some(ResourceKind::Topic)
        } else {
            None
        }
    }

    /// 宣言されたトップレベルリソースの数
    pub fn resource_count(&self) -> usize {
        self.user_pools.len()
            + self.roles.len()
            + self.policies.len()
            + self.functions.len()
            + self.streams.len()
            + self.rest_apis.len()
            + self.tables.len()
            + self.topics.len()
    }

    /// 全リソースの (ID, 種類) を種類順・ID順で列挙
    pub fn resource_ids(&self) -> Vec<(&str, ResourceKind)> {
        let mut ids = Vec::with_capacity(self.resource_count());
        ids.extend(self.user_pools.keys().map(|k| (k.as_str(), ResourceKind::UserPool)));
        ids.extend(self.roles.keys().map(|k| (k.as_str(), ResourceKind::Role)));
        ids.extend(self.policies.keys().map(|k| (k.as_str(), ResourceKind::Policy)));
        ids.extend(self.functions.keys().map(|k| (k.as_str(), ResourceKind::Function)));
        ids.extend(self.streams.keys().map(|k| (k.as_str(), ResourceKind::Stream)));
        ids.extend(self.rest_apis.keys().map(|k| (k.as_str(), ResourceKind::RestApi)));
        ids.extend(self.tables.keys().map(|k| (k.as_str(), ResourceKind::Table)));
        ids.extend(self.topics.keys().map(|k| (k.as_str(), ResourceKind::Topic)));
        ids
    }

    /// 指定した関数を実行するロールIDを返す
    pub fn role_of_function(&self, function_id: &str) -> Option<&str> {
        self.functions
            .get(function_id)
            .and_then(|f| f.role.as_deref())
    }
}
