use colored::Colorize;
use stackflow_cloud::StateManager;

pub async fn handle() -> anyhow::Result<()> {
    let root = match stackflow_core::find_project_root() {
        Ok(root) => root,
        Err(_) => std::env::current_dir()?,
    };
    let state = StateManager::new(&root).load().await?;

    if state.stacks.is_empty() && state.orphans.is_empty() {
        println!("デプロイ済みのスタックはありません");
        return Ok(());
    }

    println!("{}", "スタック:".bold());
    for record in state.stacks.values() {
        println!(
            "  {} [{}] {}個のリソース, 最終デプロイ {}",
            record.stack_name.cyan(),
            record.provider,
            record.state.resources.len(),
            record.deployed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        for (key, value) in &record.state.outputs {
            println!("    {} = {}", key, value);
        }
    }

    if !state.orphans.is_empty() {
        println!();
        println!("{}", "残存リソース (Retain):".yellow().bold());
        for orphan in &state.orphans {
            println!("  {} ({})", orphan.id, orphan.resource_type);
        }
    }
    Ok(())
}
