use crate::{ProviderKind, utils};
use colored::Colorize;
use stackflow_cloud::{CloudProvider, StateManager};

pub async fn handle(
    stage: Option<String>,
    provider_kind: ProviderKind,
    yes: bool,
) -> anyhow::Result<()> {
    let project = utils::load_project(stage)?;
    let stack_name = project.stack_name();
    println!("{} {}", "スタックを削除します:".blue().bold(), stack_name.cyan());

    let manager = StateManager::new(&project.root);
    let recorded = manager.load().await?;
    let Some(record) = recorded.get_stack(&stack_name) else {
        anyhow::bail!("{} は記録されていません（stackflow status で確認できます）", stack_name);
    };
    if record.provider != utils::provider_label(provider_kind) {
        anyhow::bail!(
            "{} は {} にデプロイされています（--provider {} を指定してください）",
            stack_name,
            record.provider,
            record.provider
        );
    }

    let retained: Vec<&String> = record
        .state
        .iter()
        .filter(|(_, r)| r.is_retained_on_delete())
        .map(|(id, _)| id)
        .collect();
    println!("  リソース: {}個", record.state.resources.len());
    if !retained.is_empty() {
        println!(
            "  {} 削除後も残るリソース: {}",
            "⚠".yellow(),
            retained
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if !yes {
        println!();
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    // ローカルのサンドボックスはプロセス終了で消えているので記録だけを消す
    if provider_kind == ProviderKind::Aws {
        let provider = utils::make_provider(provider_kind, &project.settings).await;
        let result = provider.destroy(&stack_name).await?;
        for entry in &result.succeeded {
            println!("  {} {}", "-".red(), entry.message);
        }
        if !result.is_success() {
            anyhow::bail!("削除に失敗しました（失敗 {}件）", result.failed.len());
        }
    }

    let lock = manager.acquire_lock().await?;
    let saved = async {
        let mut state = manager.load().await?;
        state.record_destroy(&stack_name);
        manager.save(&state).await
    }
    .await;
    lock.release().await?;
    saved?;

    println!("{}", "✓ 削除が完了しました".green().bold());
    Ok(())
}
