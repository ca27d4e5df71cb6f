use crate::utils;
use colored::Colorize;
use stratus_cloud::{ActionType, CloudProvider};
use stratus_cloudstack::CloudStackProvider;

pub async fn handle(provider: &CloudStackProvider, vms: usize) -> anyhow::Result<()> {
    let desired = utils::machines(provider.naming(), vms, serde_json::json!({}));
    let plan = provider.plan(&desired).await?;

    println!(
        "{}",
        format!("Plan for run {}:", provider.naming().run_uri())
            .blue()
            .bold()
    );
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::Delete => "-".red(),
            ActionType::NoOp => "=".dimmed(),
        };
        println!("  {} {}", marker, action.description);
    }
    println!();
    println!("{}", plan.summary());

    Ok(())
}
