use crate::utils;
use colored::Colorize;
use stackflow_core::validate_blueprint;

pub fn handle(stage: Option<String>) -> anyhow::Result<()> {
    println!("{}", "ブループリントを検証中...".blue());

    let project = utils::load_project(stage)?;
    println!(
        "プロジェクトルート: {}",
        project.root.display().to_string().cyan()
    );
    utils::print_loaded_files(&project);

    let report = validate_blueprint(&project.blueprint);
    for warning in report.warnings() {
        println!("  {} {}: {}", "⚠".yellow(), warning.resource.yellow(), warning.message);
    }

    if !report.is_valid() {
        for error in report.errors() {
            println!("  {} {}: {}", "✗".red(), error.resource.red(), error.message);
        }
        anyhow::bail!(
            "検証に失敗しました（エラー {}件）",
            report.errors().count()
        );
    }

    let blueprint = &project.blueprint;
    println!("{}", "✓ ブループリントは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  スタック: {}", project.stack_name().cyan());
    println!("  リソース: {}個", blueprint.resource_count());
    let groups: [(&str, usize); 8] = [
        ("ユーザープール", blueprint.user_pools.len()),
        ("ロール", blueprint.roles.len()),
        ("ポリシー", blueprint.policies.len()),
        ("関数", blueprint.functions.len()),
        ("ストリーム", blueprint.streams.len()),
        ("テーブル", blueprint.tables.len()),
        ("トピック", blueprint.topics.len()),
        ("REST API", blueprint.rest_apis.len()),
    ];
    for (label, count) in groups.iter().filter(|(_, count)| *count > 0) {
        println!("    - {}: {}個", label, count);
    }
    Ok(())
}
