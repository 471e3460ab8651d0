use crate::{ProviderKind, utils};
use colored::Colorize;
use stackflow_cloud::{CloudProvider, StateManager};
use tracing::info;

pub async fn handle(
    stage: Option<String>,
    provider_kind: ProviderKind,
    bucket: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    println!("{}", "デプロイを開始します...".blue().bold());
    let project = utils::load_project(stage)?;
    utils::print_loaded_files(&project);
    println!("ステージ: {}", project.stage.cyan());

    let synthesis = project.synthesize()?;
    let request = utils::deploy_request(&project, &synthesis, provider_kind, bucket)?;
    let missing = request.missing_parameters();
    if !missing.is_empty() {
        anyhow::bail!(
            "パラメータが不足しています: {}\n関数コードのディレクトリが存在するか確認してください",
            missing.join(", ")
        );
    }

    let provider = utils::make_provider(provider_kind, &project.settings).await;
    let auth = provider.check_auth().await?;
    if !auth.authenticated {
        anyhow::bail!(
            "{} の認証に失敗しました: {}",
            provider.display_name(),
            auth.error.unwrap_or_default()
        );
    }
    if let Some(account) = &auth.account_info {
        println!("アカウント: {}", account.cyan());
    }

    let plan = provider.plan(&request).await?;
    super::plan::print_plan(&plan);
    if !plan.has_changes {
        return Ok(());
    }

    // 確認（--yesが指定されていない場合）
    if !yes {
        println!();
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    println!();
    println!("{}", "適用中...".blue());
    let result = provider.apply(&request, &plan).await?;
    for failure in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.action_id,
            failure.error.as_deref().unwrap_or(&failure.message)
        );
    }
    if !result.is_success() {
        anyhow::bail!("デプロイに失敗しました（失敗 {}件）", result.failed.len());
    }

    record(provider.as_ref(), &project.root, &request.stack_name).await?;
    info!(stack = %request.stack_name, duration_ms = result.duration_ms, "Deployed");

    println!(
        "{} ({}ms)",
        "✓ デプロイが完了しました".green().bold(),
        result.duration_ms
    );
    if !result.outputs.is_empty() {
        println!("出力:");
        for (key, value) in &result.outputs {
            println!("  {} = {}", key.cyan(), value);
        }
    }
    Ok(())
}

/// デプロイ結果を状態ファイルに記録
async fn record(
    provider: &dyn CloudProvider,
    root: &std::path::Path,
    stack_name: &str,
) -> anyhow::Result<()> {
    let current = provider.get_state(stack_name).await?;
    let manager = StateManager::new(root);
    let lock = manager.acquire_lock().await?;

    let saved = async {
        let mut state = manager.load().await?;
        state.record_deploy(provider.name(), stack_name, current);
        manager.save(&state).await
    }
    .await;

    lock.release().await?;
    saved?;
    Ok(())
}
