use crate::ProviderKind;
use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{CloudProvider, DeployRequest};
use stackflow_cloud_aws::CloudFormationProvider;
use stackflow_cloud_local::{LocalProvider, Sandbox, asset_parameters};
use stackflow_config::Settings;
use stackflow_core::{Blueprint, StackError};
use stackflow_synth::{SynthOptions, Synthesis};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ローカルデプロイで使うバケット名
pub const LOCAL_ASSET_BUCKET: &str = "local-assets";

/// ロード済みのプロジェクト
pub struct Project {
    /// プロジェクトルート（状態ファイルの置き場所）
    pub root: PathBuf,
    /// 単一ファイルから読んだ場合のファイルパス
    pub file: Option<PathBuf>,
    pub blueprint: Blueprint,
    pub stage: String,
    pub settings: Settings,
}

impl Project {
    /// `{スタック名}-{ステージ}`
    pub fn stack_name(&self) -> String {
        stack_name(&self.blueprint, &self.stage)
    }

    pub fn synthesize(&self) -> anyhow::Result<Synthesis> {
        let options = SynthOptions {
            asset_root: Some(self.root.clone()),
            skip_validation: false,
        };
        stackflow_synth::synthesize_with_options(&self.blueprint, &options)
            .context("テンプレートの合成に失敗しました")
    }
}

pub fn stack_name(blueprint: &Blueprint, stage: &str) -> String {
    format!("{}-{}", blueprint.name, stage)
}

/// ステージ名を決定する（共通ロジック）
///
/// 明示指定 → 設定の default_stage → 宣言が1つならそれ → 宣言がなければ "dev"
pub fn determine_stage_name(
    stage: Option<String>,
    settings: &Settings,
    blueprint: &Blueprint,
) -> anyhow::Result<String> {
    if let Some(s) = stage.or_else(|| settings.default_stage.clone()) {
        return Ok(s);
    }
    match blueprint.stages.as_slice() {
        [] => Ok("dev".to_string()),
        [only] => Ok(only.clone()),
        stages => Err(anyhow::anyhow!(
            "ステージ名を指定してください: stackflow <command> <stage> または STACKFLOW_STAGE=<stage>\n利用可能なステージ: {}",
            stages.join(", ")
        )),
    }
}

/// ブループリントの置き場所
enum Source {
    Project(PathBuf),
    File(PathBuf),
}

fn locate(stage: Option<&str>) -> anyhow::Result<Source> {
    if let Ok(path) = std::env::var("STACKFLOW_CONFIG_PATH")
        && Path::new(&path).is_file()
    {
        return Ok(Source::File(PathBuf::from(path)));
    }

    match stackflow_core::find_project_root() {
        Ok(root) => Ok(Source::Project(root)),
        Err(StackError::ProjectRootNotFound(dir)) => {
            debug!(dir = %dir.display(), "No project root, falling back to stack file lookup");
            let file = stackflow_config::find_stack_file_for_stage(stage).with_context(|| {
                format!(
                    "stack.kdl が見つかりません: {}\n`stackflow init` でプロジェクトを作成してください",
                    dir.display()
                )
            })?;
            Ok(Source::File(file))
        }
        Err(e) => Err(e.into()),
    }
}

fn load_source(source: &Source, stage: Option<&str>) -> anyhow::Result<Blueprint> {
    let blueprint = match source {
        Source::Project(root) => stackflow_core::load_project_from_root_with_stage(root, stage)?,
        Source::File(file) => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("読み込みに失敗しました: {}", file.display()))?;
            let name = file
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("unnamed");
            stackflow_core::load_blueprint_str(&content, name, stage)?
        }
    };
    Ok(blueprint)
}

/// 設定とブループリントを読み込み、ステージを確定する
pub fn load_project(stage: Option<String>) -> anyhow::Result<Project> {
    let settings = Settings::load()?;
    let requested = stage.or_else(|| settings.default_stage.clone());
    let source = locate(requested.as_deref())?;

    let mut blueprint = load_source(&source, requested.as_deref())?;
    let stage = determine_stage_name(requested.clone(), &settings, &blueprint)?;
    if requested.is_none() && !blueprint.stages.is_empty() {
        // 宣言から決まったステージで上書きを反映し直す
        blueprint = load_source(&source, Some(&stage))?;
    }

    let (root, file) = match source {
        Source::Project(root) => (root, None),
        Source::File(file) => {
            let root = file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (root, Some(file))
        }
    };

    Ok(Project {
        root,
        file,
        blueprint,
        stage,
        settings,
    })
}

/// 読み込んだ設定ファイル情報を表示
pub fn print_loaded_files(project: &Project) {
    println!("📄 読み込んだ設定ファイル:");

    if let Some(file) = &project.file {
        println!("  • {}", file.display().to_string().cyan());
        return;
    }

    for name in ["stack.kdl", ".stackflow/stack.kdl"] {
        let path = project.root.join(name);
        if path.exists() {
            println!("  • {}", path.display().to_string().cyan());
        }
    }
    for name in [
        format!("stack.{}.kdl", project.stage),
        format!(".stackflow/stack.{}.kdl", project.stage),
    ] {
        let path = project.root.join(name);
        if path.exists() {
            println!(
                "  • {} (ステージオーバーライド)",
                path.display().to_string().cyan()
            );
        }
    }
    let local = project.root.join("stack.local.kdl");
    if local.exists() {
        println!(
            "  • {} (ローカルオーバーライド)",
            local.display().to_string().cyan()
        );
    }
}

/// 合成結果からデプロイ要求を組み立てる
pub fn deploy_request(
    project: &Project,
    synthesis: &Synthesis,
    provider: ProviderKind,
    bucket: Option<String>,
) -> anyhow::Result<DeployRequest> {
    let parameters: BTreeMap<String, String> = match provider {
        ProviderKind::Aws => {
            let bucket = bucket
                .or_else(|| project.settings.asset_bucket.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "関数コードのバケットを指定してください: --bucket <name> または config.yaml の asset_bucket"
                    )
                })?;
            synthesis.default_parameters(&bucket)
        }
        ProviderKind::Local => {
            let bucket = bucket.unwrap_or_else(|| LOCAL_ASSET_BUCKET.to_string());
            asset_parameters(&synthesis.assets, &bucket)
        }
    };

    Ok(DeployRequest::new(project.stack_name(), synthesis.template.to_json()?)
        .with_parameters(parameters))
}

/// デプロイ先のプロバイダーを作る
pub async fn make_provider(
    kind: ProviderKind,
    settings: &Settings,
) -> Box<dyn CloudProvider> {
    match kind {
        ProviderKind::Aws => Box::new(
            CloudFormationProvider::from_env(
                Some(settings.region.clone()),
                settings.profile.clone(),
            )
            .await,
        ),
        ProviderKind::Local => Box::new(LocalProvider::new(local_sandbox(settings))),
    }
}

pub fn local_sandbox(settings: &Settings) -> Sandbox {
    Sandbox::new(settings.account_id.clone(), settings.region.clone())
}

pub fn provider_label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Aws => "aws",
        ProviderKind::Local => "local",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint_with_stages(stages: &[&str]) -> Blueprint {
        let mut blueprint = stackflow_core::blueprints::customer_onboarding().unwrap();
        blueprint.stages = stages.iter().map(|s| s.to_string()).collect();
        blueprint
    }

    #[test]
    fn test_explicit_stage_wins() {
        let settings = Settings {
            default_stage: Some("stg".to_string()),
            ..Settings::default()
        };
        let blueprint = blueprint_with_stages(&["dev", "prod"]);
        let stage = determine_stage_name(Some("prod".to_string()), &settings, &blueprint).unwrap();
        assert_eq!(stage, "prod");
    }

    #[test]
    fn test_settings_default_stage() {
        let settings = Settings {
            default_stage: Some("stg".to_string()),
            ..Settings::default()
        };
        let blueprint = blueprint_with_stages(&["dev", "prod"]);
        assert_eq!(determine_stage_name(None, &settings, &blueprint).unwrap(), "stg");
    }

    #[test]
    fn test_single_declared_stage() {
        let blueprint = blueprint_with_stages(&["prod"]);
        let stage = determine_stage_name(None, &Settings::default(), &blueprint).unwrap();
        assert_eq!(stage, "prod");
    }

    #[test]
    fn test_no_declared_stage_is_dev() {
        let blueprint = blueprint_with_stages(&[]);
        let stage = determine_stage_name(None, &Settings::default(), &blueprint).unwrap();
        assert_eq!(stage, "dev");
    }

    #[test]
    fn test_ambiguous_stage_lists_candidates() {
        let blueprint = blueprint_with_stages(&["dev", "prod"]);
        let err = determine_stage_name(None, &Settings::default(), &blueprint).unwrap_err();
        assert!(err.to_string().contains("dev, prod"));
    }

    #[test]
    fn test_stack_name_includes_stage() {
        let blueprint = blueprint_with_stages(&[]);
        assert_eq!(stack_name(&blueprint, "prod"), "CdkStack-prod");
    }
}
