use colored::Colorize;
use stratus_cloud::{CloudProvider, ResourceStatus};
use stratus_cloudstack::CloudStackProvider;

pub async fn handle(provider: &CloudStackProvider) -> anyhow::Result<()> {
    let run_uri = provider.naming().run_uri();
    println!("{}", format!("Run {}:", run_uri).blue().bold());

    let state = provider.get_state().await?;
    if state.is_empty() {
        println!("{}", "No machines".dimmed());
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!(
            "{:<24} {:<10} {:<16} {:<16}",
            "NAME", "STATUS", "INTERNAL IP", "PUBLIC IP"
        )
        .bold()
    );
    println!("{}", "─".repeat(68).dimmed());

    let mut names = state.names();
    names.sort();
    for name in names {
        let Some(vm) = state.get(name) else {
            continue;
        };
        let status = format!("{:<10}", vm.status.to_string());
        let status = match vm.status {
            ResourceStatus::Running => status.green(),
            ResourceStatus::Error => status.red(),
            _ => status.yellow(),
        };
        println!(
            "{:<24} {} {:<16} {:<16}",
            name,
            status,
            vm.get_attribute::<String>("internal_ip")
                .unwrap_or_else(|| "-".to_string()),
            vm.get_attribute::<String>("public_ip")
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}
