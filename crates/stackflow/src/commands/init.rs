use colored::Colorize;
use stackflow_core::blueprints::CUSTOMER_ONBOARDING;
use std::path::Path;

pub fn handle(dir: &Path, force: bool) -> anyhow::Result<()> {
    let path = dir.join("stack.kdl");

    if path.exists() && !force {
        anyhow::bail!(
            "{} は既に存在します（上書きするには --force を指定してください）",
            path.display()
        );
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, CUSTOMER_ONBOARDING)?;

    println!("{}", "✓ プロジェクトを作成しました".green().bold());
    println!("  • {}", path.display().to_string().cyan());
    println!();
    println!("次のステップ:");
    println!("  stackflow validate");
    println!("  stackflow synth");
    Ok(())
}
