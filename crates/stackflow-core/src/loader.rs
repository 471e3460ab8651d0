//! 統合ローダー
//!
//! ファイル発見、テンプレート展開、パースを統合

use crate::discovery::{DiscoveredFiles, discover_files_with_stage, find_project_root};
use crate::error::{Result, StackError};
use crate::model::Blueprint;
use crate::parser::parse_kdl_string_with_stage;
use crate::template::{TemplateProcessor, Variables, extract_variables_with_stage};
use std::path::Path;
use tracing::{debug, info, instrument};

/// プロジェクト全体をロードしてBlueprintを生成
///
/// 1. プロジェクトルートの検出
/// 2. ファイルの自動発見
/// 3. 変数の収集
/// 4. テンプレート展開
/// 5. KDLパース
#[instrument]
pub fn load_project() -> Result<Blueprint> {
    info!("Starting project load");
    let project_root = find_project_root()?;
    load_project_from_root(&project_root)
}

/// 指定されたルートディレクトリからプロジェクトをロード
pub fn load_project_from_root(project_root: &Path) -> Result<Blueprint> {
    load_project_from_root_with_stage(project_root, None)
}

/// ステージ指定でプロジェクトをロード
///
/// 読み込み順序: variables/** → stack.kdl → resources/** → stack.{stage}.kdl → stack.local.kdl
#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_project_from_root_with_stage(
    project_root: &Path,
    stage: Option<&str>,
) -> Result<Blueprint> {
    debug!("Step 1: Discovering files");
    let discovered = discover_files_with_stage(project_root, stage)?;
    if discovered.root.is_none() {
        return Err(StackError::ProjectRootNotFound(project_root.to_path_buf()));
    }

    debug!("Step 2: Preparing template processor");
    let mut processor = prepare_template_processor(&discovered, project_root, stage)?;

    debug!("Step 3: Expanding templates");
    let files = discovered.ordered_kdl_files();
    let expanded = processor.render_files(&files)?;
    info!(
        file_count = files.len(),
        content_size = expanded.len(),
        "Template expansion complete"
    );

    debug!("Step 4: Parsing KDL");
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let blueprint = parse_kdl_string_with_stage(&expanded, name, stage)?;
    info!(
        stack = %blueprint.name,
        resources = blueprint.resource_count(),
        "Project loaded successfully"
    );

    Ok(blueprint)
}

/// 単一のKDL文字列を展開してパース
///
/// 文書内の variables ブロックだけを変数源とする（環境変数は読まない）。
#[instrument(skip(content))]
pub fn load_blueprint_str(content: &str, default_name: &str, stage: Option<&str>) -> Result<Blueprint> {
    let mut processor = TemplateProcessor::new();
    if let Some(stage) = stage {
        processor.add_variable("STAGE", serde_json::Value::String(stage.to_string()));
    }
    processor.add_variables(extract_variables_with_stage(content, stage)?);

    let expanded = processor.render_str(content)?;
    parse_kdl_string_with_stage(&expanded, default_name.to_string(), stage)
}

/// テンプレートプロセッサを準備
///
/// 優先度（後勝ち）: .env → .env.{stage} → 環境変数 → KDLの variables
fn prepare_template_processor(
    discovered: &DiscoveredFiles,
    project_root: &Path,
    stage: Option<&str>,
) -> Result<TemplateProcessor> {
    let mut processor = TemplateProcessor::new();
    let mut all_variables = Variables::new();

    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    if let Some(stage) = stage {
        processor.add_variable("STAGE", serde_json::Value::String(stage.to_string()));
    }

    for file in discovered.ordered_kdl_files() {
        let content = std::fs::read_to_string(file).map_err(|e| StackError::IoError {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        all_variables.extend(extract_variables_with_stage(&content, stage)?);
    }

    if let Some(env_file) = &discovered.env_file {
        processor.add_env_file_variables(env_file)?;
    }
    if let Some(stage_env_file) = &discovered.stage_env_file {
        processor.add_env_file_variables(stage_env_file)?;
    }

    processor.add_env_variables();

    debug!(vars = ?all_variables, "Adding collected variables to processor");
    processor.add_variables(all_variables);

    Ok(processor)
}
