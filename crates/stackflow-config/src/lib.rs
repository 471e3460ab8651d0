pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{DEFAULT_ACCOUNT_ID, DEFAULT_OUTPUT_DIR, DEFAULT_REGION, SETTINGS_FILE, Settings};

use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ディレクトリ名
pub const APP_DIR: &str = "stackflow";

/// StackFlowの設定ディレクトリを取得（なければ作成）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join(APP_DIR);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// ディレクトリごとの候補ファイル名（優先順）
///
/// ローカル上書き → ステージ専用 `stack.{stage}.kdl` → 共有の stack.kdl
fn candidate_names(stage: Option<&str>) -> Vec<String> {
    let mut names = vec!["stack.local.kdl".to_string(), ".stack.local.kdl".to_string()];
    if let Some(stage) = stage {
        names.push(format!("stack.{}.kdl", stage));
        names.push(format!(".stack.{}.kdl", stage));
    }
    names.push("stack.kdl".to_string());
    names.push(".stack.kdl".to_string());
    names
}

/// `dir` と `dir/.stackflow` から最初に見つかった候補
fn find_in_dir(dir: &Path, names: &[String]) -> Option<PathBuf> {
    [dir.to_path_buf(), dir.join(".stackflow")]
        .into_iter()
        .flat_map(|base| names.iter().map(move |name| base.join(name)))
        .find(|path| path.is_file())
}

/// プロジェクトのstack.kdlファイルを探す（ステージ指定なし）
pub fn find_stack_file() -> Result<PathBuf> {
    find_stack_file_for_stage(None)
}

/// ステージを考慮してスタックファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリから親へ向かって、各ディレクトリとその `.stackflow/` で
///    stack.local.kdl, .stack.local.kdl, stack.{stage}.kdl, .stack.{stage}.kdl, stack.kdl, .stack.kdl
/// 3. ~/.config/stackflow/stack.{stage}.kdl, ~/.config/stackflow/stack.kdl (グローバル設定)
pub fn find_stack_file_for_stage(stage: Option<&str>) -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("STACKFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        debug!(path = %path.display(), "STACKFLOW_CONFIG_PATH does not exist, searching");
    }

    let names = candidate_names(stage);
    let current_dir = std::env::current_dir()?;
    for dir in current_dir.ancestors() {
        if let Some(path) = find_in_dir(dir, &names) {
            debug!(path = %path.display(), stage = ?stage, "Found stack file");
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_dir = config_dir.join(APP_DIR);
        let global = stage
            .map(|stage| global_dir.join(format!("stack.{}.kdl", stage)))
            .filter(|path| path.is_file())
            .unwrap_or_else(|| global_dir.join("stack.kdl"));
        if global.is_file() {
            return Ok(global);
        }
    }

    Err(ConfigError::StackFileNotFound)
}
