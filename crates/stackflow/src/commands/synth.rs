use crate::utils;
use colored::Colorize;
use std::path::PathBuf;

pub fn handle(stage: Option<String>, output: Option<PathBuf>, stdout: bool) -> anyhow::Result<()> {
    let project = utils::load_project(stage)?;
    let synthesis = project.synthesize()?;
    let body = synthesis.template.to_json_pretty()?;

    if stdout {
        println!("{}", body);
        return Ok(());
    }

    let dir = output.unwrap_or_else(|| project.root.join(&project.settings.output_dir));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.template.json", project.stack_name()));
    std::fs::write(&path, &body)?;

    println!("{}", "✓ テンプレートを合成しました".green().bold());
    println!("  • {}", path.display().to_string().cyan());
    println!("  リソース: {}個", synthesis.template.resources.len());
    println!("  パラメータ: {}個", synthesis.template.parameters.len());
    if body.len() > stackflow_cloud_aws::MAX_TEMPLATE_BODY {
        println!(
            "  {} テンプレートが {} バイトを超えています。AWS へのデプロイ前に S3 経由にしてください",
            "⚠".yellow(),
            stackflow_cloud_aws::MAX_TEMPLATE_BODY
        );
    }

    if !synthesis.assets.assets.is_empty() {
        println!("  アセット:");
        for asset in &synthesis.assets.assets {
            let fingerprint = asset.fingerprint.as_deref().unwrap_or("(未計算)");
            println!(
                "    - {} {} ({})",
                asset.function.cyan(),
                asset.path.display(),
                fingerprint
            );
        }
    }
    Ok(())
}
