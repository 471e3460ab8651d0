use crate::{ProviderKind, utils};
use colored::Colorize;
use stackflow_cloud::{ActionType, CloudProvider, Plan};

pub async fn handle(
    stage: Option<String>,
    provider_kind: ProviderKind,
    bucket: Option<String>,
) -> anyhow::Result<()> {
    let project = utils::load_project(stage)?;
    println!("ステージ: {}", project.stage.cyan());

    let synthesis = project.synthesize()?;
    let request = utils::deploy_request(&project, &synthesis, provider_kind, bucket)?;
    let provider = utils::make_provider(provider_kind, &project.settings).await;

    println!(
        "{} {} ({})",
        "計画を作成中...".blue(),
        request.stack_name.cyan(),
        provider.display_name()
    );
    let plan = provider.plan(&request).await?;
    print_plan(&plan);
    Ok(())
}

/// 計画を表示
pub fn print_plan(plan: &Plan) {
    if !plan.has_changes {
        println!("{}", "変更はありません".green());
        return;
    }

    for action in plan.actions.iter().filter(|a| a.action_type != ActionType::NoOp) {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::Replace => "±".yellow(),
            ActionType::Delete => "-".red(),
            ActionType::Retain => "=".cyan(),
            ActionType::NoOp => " ".normal(),
        };
        println!(
            "  {} {} ({})",
            marker,
            action.resource_id.bold(),
            action.resource_type
        );
    }
    println!();
    println!("{}", plan.summary());
    if let Some(reference) = &plan.reference {
        println!("変更セット: {}", reference.cyan());
    }
}
