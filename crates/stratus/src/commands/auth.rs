use crate::CloudArgs;
use crate::utils;
use colored::Colorize;
use stratus_cloud::CloudProvider;

pub async fn handle(cloud: &CloudArgs) -> anyhow::Result<()> {
    // Auth needs no run; any valid id will do for the check.
    let run_uri = cloud.run_uri.clone().unwrap_or_else(utils::fresh_run_uri);
    let provider = cloud.provider_for(&run_uri)?;

    println!("{}", format!("Checking {}...", cloud.api_url).blue());
    let status = provider.check_auth().await?;

    if status.authenticated {
        println!(
            "  {} {}",
            "✓".green(),
            status.account_info.as_deref().unwrap_or("authenticated")
        );
        Ok(())
    } else {
        println!(
            "  {} {}",
            "✗".red(),
            status.error.as_deref().unwrap_or("authentication failed")
        );
        anyhow::bail!("authentication failed")
    }
}
