//! HTTP API 定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApi {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_stage_name")]
    pub stage_name: String,
    #[serde(default)]
    pub authorizers: Vec<Authorizer>,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl Default for RestApi {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            stage_name: default_stage_name(),
            authorizers: Vec::new(),
            methods: Vec::new(),
        }
    }
}

fn default_stage_name() -> String {
    "prod".to_string()
}

impl RestApi {
    pub fn authorizer(&self, id: &str) -> Option<&Authorizer> {
        self.authorizers.iter().find(|a| a.id == id)
    }

    /// ルート以外のパス（重複なし、宣言順）
    pub fn resource_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for method in &self.methods {
            let path = method.path.as_str();
            if path != "/" && !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }
}

/// リクエスト認可
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Authorizer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: AuthorizerKind,
    #[serde(default = "default_identity_source")]
    pub identity_source: String,
    /// トークンを発行するユーザープールID
    #[serde(default)]
    pub user_pools: Vec<String>,
}

fn default_identity_source() -> String {
    "method.request.header.Authorization".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizerKind {
    #[default]
    CognitoUserPools,
}

impl AuthorizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizerKind::CognitoUserPools => "COGNITO_USER_POOLS",
        }
    }
}

/// HTTP メソッドと統合先
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    /// GET / POST などの大文字表記
    pub http_method: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// 統合先の関数ID
    pub function: String,
    /// 認可ID（なしなら認証不要）
    #[serde(default)]
    pub authorizer: Option<String>,
    /// コンテンツタイプごとのリクエストテンプレート
    #[serde(default)]
    pub request_templates: BTreeMap<String, String>,
}

fn default_path() -> String {
    "/".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(verb: &str, path: &str) -> Method {
        Method {
            http_method: verb.to_string(),
            path: path.to_string(),
            function: "Fn".to_string(),
            authorizer: None,
            request_templates: BTreeMap::new(),
        }
    }

    #[test]
    fn test_resource_paths_skip_root_and_duplicates() {
        let api = RestApi {
            methods: vec![
                method("POST", "/"),
                method("GET", "/customers"),
                method("POST", "/customers"),
            ],
            ..Default::default()
        };
        assert_eq!(api.resource_paths(), vec!["/customers"]);
        assert_eq!(api.stage_name, "prod");
    }
}
