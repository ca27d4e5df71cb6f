use crate::utils;
use colored::Colorize;
use stratus_cloud::CloudProvider;
use stratus_cloudstack::CloudStackProvider;

pub async fn handle(
    provider: &CloudStackProvider,
    vm: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let run_uri = provider.naming().run_uri();
    let target = match &vm {
        Some(name) => format!("machine {}", name),
        None => format!("every resource of run {}", run_uri),
    };

    if !yes {
        println!("{}", format!("This removes {}.", target).yellow().bold());
        println!("  Disks are deleted with their data. Pass --yes to continue.");
        return Ok(());
    }

    println!("{}", format!("Removing {}...", target).yellow());
    match vm {
        Some(name) => {
            provider.destroy(&name).await?;
            println!("  {} {}", "✓".green(), name);
        }
        None => {
            let result = provider.destroy_all().await?;
            utils::print_result(&result);
            if !result.is_success() {
                anyhow::bail!(
                    "{} resources of run {} could not be removed",
                    result.failed.len(),
                    run_uri
                );
            }
        }
    }

    Ok(())
}
