//! ファイル自動発見
//!
//! 規約ベースのディレクトリ構造からブループリントファイルを発見します。
//!
//! ```text
//! project/
//! ├── stack.kdl              # ルート（または .stackflow/stack.kdl）
//! ├── stack.{stage}.kdl      # ステージ固有の上書き
//! ├── stack.local.kdl        # ローカル上書き（コミットしない）
//! ├── resources/**/*.kdl     # 分割したリソース定義
//! ├── variables/**/*.kdl     # 変数定義
//! ├── .env / .env.{stage}
//! └── resources/createCustomer/   # 関数コード
//! ```

use crate::error::{Result, StackError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// ルートファイル名
pub const ROOT_FILE: &str = "stack.kdl";
/// プロジェクト設定ディレクトリ
pub const PROJECT_DIR: &str = ".stackflow";

/// 発見されたファイル群
#[derive(Debug, Clone, Default)]
pub struct DiscoveredFiles {
    /// ルートファイル (stack.kdl)
    pub root: Option<PathBuf>,
    /// リソース定義ファイル (resources/**/*.kdl)
    pub resources: Vec<PathBuf>,
    /// 変数定義ファイル (variables/**/*.kdl)
    pub variables: Vec<PathBuf>,
    /// ステージ固有オーバーライド (stack.{stage}.kdl)
    pub stage_override: Option<PathBuf>,
    /// ローカルオーバーライド (stack.local.kdl)
    pub local_override: Option<PathBuf>,
    /// 環境変数ファイル (.env)
    pub env_file: Option<PathBuf>,
    /// ステージ固有の環境変数ファイル (.env.{stage})
    pub stage_env_file: Option<PathBuf>,
}

impl DiscoveredFiles {
    /// 展開・結合する順にKDLファイルを並べる
    ///
    /// variables → root → resources → stage override → local override
    pub fn ordered_kdl_files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self.variables.iter().map(PathBuf::as_path).collect();
        files.extend(self.root.as_deref());
        files.extend(self.resources.iter().map(PathBuf::as_path));
        files.extend(self.stage_override.as_deref());
        files.extend(self.local_override.as_deref());
        files
    }
}

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_PROJECT_ROOT
/// 2. カレントディレクトリから上に向かって stack.kdl / .stackflow/stack.kdl を探す
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("STACKFLOW_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking STACKFLOW_PROJECT_ROOT");
        if has_root_file(&path) {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    let start_dir = std::env::current_dir()?;
    find_project_root_from(&start_dir)
}

/// 指定ディレクトリから上に向かってプロジェクトルートを探す
pub fn find_project_root_from(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if has_root_file(&current) {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }
        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(StackError::ProjectRootNotFound(start_dir.to_path_buf()))
}

fn has_root_file(dir: &Path) -> bool {
    dir.join(ROOT_FILE).exists() || dir.join(PROJECT_DIR).join(ROOT_FILE).exists()
}

/// `name` または `.stackflow/name` のうち存在する方
fn locate(project_root: &Path, name: &str) -> Option<PathBuf> {
    [project_root.join(name), project_root.join(PROJECT_DIR).join(name)]
        .into_iter()
        .find(|p| p.is_file())
}

/// プロジェクトルートからファイルを自動発見
pub fn discover_files(project_root: &Path) -> Result<DiscoveredFiles> {
    discover_files_with_stage(project_root, None)
}

/// ステージ指定でファイルを自動発見
///
/// stage が指定されている場合、stack.{stage}.kdl と .env.{stage} も検出します。
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_files_with_stage(
    project_root: &Path,
    stage: Option<&str>,
) -> Result<DiscoveredFiles> {
    debug!("Starting file discovery");
    let mut discovered = DiscoveredFiles {
        root: locate(project_root, ROOT_FILE),
        ..Default::default()
    };

    let resources_dir = project_root.join("resources");
    if resources_dir.is_dir() {
        discovered.resources = discover_kdl_files(&resources_dir)?;
        info!(
            resource_file_count = discovered.resources.len(),
            "Discovered resource files"
        );
    }

    let variables_dir = project_root.join("variables");
    if variables_dir.is_dir() {
        discovered.variables = discover_kdl_files(&variables_dir)?;
        info!(
            variable_file_count = discovered.variables.len(),
            "Discovered variable files"
        );
    }

    if let Some(stage_name) = stage {
        discovered.stage_override = locate(project_root, &format!("stack.{}.kdl", stage_name));
        discovered.stage_env_file = locate(project_root, &format!(".env.{}", stage_name));
        if let Some(file) = &discovered.stage_override {
            debug!(file = %file.display(), stage = %stage_name, "Found stage override file");
        }
    }

    discovered.local_override = locate(project_root, "stack.local.kdl");
    discovered.env_file = locate(project_root, ".env");

    Ok(discovered)
}

/// ディレクトリ配下の .kdl ファイルを再帰的に発見（パス順）
pub fn discover_kdl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();

    visit_dir(dir, &mut files, &mut visited)?;
    files.sort();

    Ok(files)
}

fn visit_dir(dir: &Path, files: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    // シンボリックリンクのループ検出
    let canonical_dir = dir.canonicalize().map_err(|e| StackError::DiscoveryError {
        path: dir.to_path_buf(),
        message: format!("パスの正規化に失敗: {}", e),
    })?;
    if !visited.insert(canonical_dir.clone()) {
        warn!(dir = %canonical_dir.display(), "Symlink loop detected, skipping");
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| StackError::DiscoveryError {
        path: dir.to_path_buf(),
        message: format!("ディレクトリの読み込みに失敗: {}", e),
    })?;

    for entry in entries {
        let path = entry
            .map_err(|e| StackError::DiscoveryError {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?
            .path();

        if path.is_dir() {
            visit_dir(&path, files, visited)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("kdl") {
            debug!(file = %path.display(), "Found KDL file");
            files.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_discover_root_and_overrides() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("stack.kdl"), "stack \"demo\"").unwrap();
        fs::write(root.join("stack.prod.kdl"), "").unwrap();
        fs::write(root.join("stack.local.kdl"), "").unwrap();
        fs::write(root.join(".env"), "A=1").unwrap();
        fs::write(root.join(".env.prod"), "A=2").unwrap();

        let discovered = discover_files_with_stage(root, Some("prod")).unwrap();
        assert_eq!(discovered.root, Some(root.join("stack.kdl")));
        assert_eq!(discovered.stage_override, Some(root.join("stack.prod.kdl")));
        assert_eq!(discovered.local_override, Some(root.join("stack.local.kdl")));
        assert_eq!(discovered.env_file, Some(root.join(".env")));
        assert_eq!(discovered.stage_env_file, Some(root.join(".env.prod")));

        let without_stage = discover_files(root).unwrap();
        assert!(without_stage.stage_override.is_none());
        assert!(without_stage.stage_env_file.is_none());
    }

    #[test]
    fn test_discover_in_project_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".stackflow")).unwrap();
        fs::write(root.join(".stackflow/stack.kdl"), "").unwrap();

        let discovered = discover_files(root).unwrap();
        assert_eq!(discovered.root, Some(root.join(".stackflow/stack.kdl")));
        assert!(find_project_root_from(root).is_ok());
    }

    #[test]
    fn test_resource_files_are_sorted_and_skip_code() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("stack.kdl"), "").unwrap();
        fs::create_dir_all(root.join("resources/api")).unwrap();
        fs::create_dir_all(root.join("resources/createCustomer")).unwrap();
        fs::write(root.join("resources/table.kdl"), "").unwrap();
        fs::write(root.join("resources/api/rest.kdl"), "").unwrap();
        fs::write(root.join("resources/createCustomer/createCustomer.js"), "").unwrap();

        let discovered = discover_files(root).unwrap();
        assert_eq!(
            discovered.resources,
            vec![
                root.join("resources/api/rest.kdl"),
                root.join("resources/table.kdl")
            ]
        );
    }

    #[test]
    fn test_ordered_kdl_files() {
        let discovered = DiscoveredFiles {
            root: Some(PathBuf::from("stack.kdl")),
            resources: vec![PathBuf::from("resources/a.kdl")],
            variables: vec![PathBuf::from("variables/common.kdl")],
            local_override: Some(PathBuf::from("stack.local.kdl")),
            ..Default::default()
        };
        let order: Vec<&Path> = discovered.ordered_kdl_files();
        assert_eq!(
            order,
            vec![
                Path::new("variables/common.kdl"),
                Path::new("stack.kdl"),
                Path::new("resources/a.kdl"),
                Path::new("stack.local.kdl"),
            ]
        );
    }

    #[test]
    fn test_project_root_not_found() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        // tempdir の上位に stack.kdl が無い前提
        let result = find_project_root_from(&nested);
        assert!(matches!(result, Err(StackError::ProjectRootNotFound(_))));
    }
}
