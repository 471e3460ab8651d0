//! ユーザー設定 (config.yaml)
//!
//! `~/.config/stackflow/config.yaml` を読み込み、環境変数で上書きします。
//!
//! ```yaml
//! region: ap-northeast-1
//! profile: dev
//! account_id: "123456789012"
//! output_dir: cdk.out
//! asset_bucket: my-assets
//! ```

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SETTINGS_FILE: &str = "config.yaml";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";
pub const DEFAULT_OUTPUT_DIR: &str = "cdk.out";

/// ユーザー設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// デプロイ先リージョン
    pub region: String,
    /// AWS プロファイル名
    pub profile: Option<String>,
    /// ローカルサンドボックスのアカウントID
    pub account_id: String,
    /// synth の出力先
    pub output_dir: PathBuf,
    /// 関数コードを置くバケット
    pub asset_bucket: Option<String>,
    /// ステージ未指定時のステージ
    pub default_stage: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            profile: None,
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            asset_bucket: None,
            default_stage: None,
        }
    }
}

impl Settings {
    /// グローバル設定を読み込み、環境変数を適用
    pub fn load() -> Result<Self> {
        let path = crate::get_config_dir()?.join(SETTINGS_FILE);
        let settings = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        settings.with_env_overrides()
    }

    /// 指定ファイルから読み込む（環境変数は適用しない）
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading settings");
        Self::parse(&content).map_err(|message| ConfigError::InvalidSettings {
            path: path.display().to_string(),
            message,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// STACKFLOW_REGION / STACKFLOW_PROFILE / STACKFLOW_ACCOUNT_ID / STACKFLOW_OUTPUT_DIR で上書き
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(region) = env_value("STACKFLOW_REGION") {
            self.region = region;
        }
        if let Some(profile) = env_value("STACKFLOW_PROFILE") {
            self.profile = Some(profile);
        }
        if let Some(account_id) = env_value("STACKFLOW_ACCOUNT_ID") {
            if account_id.len() != 12 || !account_id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::InvalidEnv {
                    name: "STACKFLOW_ACCOUNT_ID",
                    value: account_id,
                });
            }
            self.account_id = account_id;
        }
        if let Some(output_dir) = env_value("STACKFLOW_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(output_dir);
        }
        Ok(self)
    }

    /// 設定ファイルへ書き出す
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::InvalidSettings {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
