use crate::utils;
use colored::Colorize;
use stackflow_synth::DependencyGraph;

pub fn handle(stage: Option<String>) -> anyhow::Result<()> {
    let project = utils::load_project(stage)?;
    let synthesis = project.synthesize()?;
    let template = &synthesis.template;
    let graph = DependencyGraph::from_template(template)?;

    println!("{} {}", "配備順序:".blue().bold(), project.stack_name().cyan());
    for (i, id) in graph.deployment_order()?.iter().enumerate() {
        let resource_type = template
            .resource(id)
            .map(|r| r.resource_type.as_str())
            .unwrap_or("?");
        let deps = graph.dependencies_of(id);
        if deps.is_empty() {
            println!("  {:>2}. {} ({})", i + 1, id.cyan(), resource_type);
        } else {
            println!(
                "  {:>2}. {} ({}) ← {}",
                i + 1,
                id.cyan(),
                resource_type,
                deps.join(", ")
            );
        }
    }
    Ok(())
}
