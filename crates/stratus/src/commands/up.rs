use crate::CloudArgs;
use crate::utils;
use anyhow::Context;
use colored::Colorize;
use std::path::PathBuf;
use stratus_cloud::CloudProvider;

/// Shape of every machine `up` creates
pub struct Machine {
    pub machine_type: String,
    pub image: String,
    pub disks: usize,
    pub disk_size: u64,
}

pub async fn handle(
    cloud: &CloudArgs,
    vms: usize,
    machine: Machine,
    ssh_key: Option<PathBuf>,
) -> anyhow::Result<()> {
    if vms == 0 {
        anyhow::bail!("--vms must be at least 1");
    }
    if machine.disks > 0 && machine.disk_size == 0 {
        anyhow::bail!("--disk-size must be at least 1 GB");
    }

    let public_key = match &ssh_key {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read SSH key {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };

    let run_uri = match &cloud.run_uri {
        Some(run_uri) => run_uri.clone(),
        None => {
            let run_uri = utils::fresh_run_uri();
            println!("{}", format!("New run {}", run_uri).cyan());
            run_uri
        }
    };

    let mut provider = cloud.provider_for(&run_uri)?;
    if let Some(key) = public_key {
        provider = provider.with_public_key(key);
    }

    let desired = utils::machines(
        provider.naming(),
        vms,
        serde_json::json!({
            "machine_type": machine.machine_type,
            "image": machine.image,
            "disk_count": machine.disks,
            "disk_size_gb": machine.disk_size,
        }),
    );

    let plan = provider.plan(&desired).await?;
    if !plan.has_changes {
        println!("{}", "All machines already exist".dimmed());
        return Ok(());
    }
    println!("{}", format!("Provisioning run {}...", run_uri).blue());
    println!("  {}", plan.summary());

    let result = provider.apply(&plan).await?;
    println!();
    utils::print_result(&result);
    if !result.is_success() {
        anyhow::bail!("provisioning run {} failed", run_uri);
    }

    println!();
    println!("{}", "Tear down with:".bold());
    println!("  STRATUS_RUN_URI={} stratus down --yes", run_uri);
    Ok(())
}
