mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stratus_cloudstack::config::{
    DEFAULT_API_URL, DEFAULT_IMAGE, DEFAULT_MACHINE_TYPE, DEFAULT_NETWORK_OFFERING,
    DEFAULT_VPC_OFFERING, DEFAULT_ZONE,
};
use stratus_cloudstack::{CloudStackConfig, CloudStackProvider, Naming};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Provision benchmark machines on CloudStack", long_about = None)]
struct Cli {
    #[command(flatten)]
    cloud: CloudArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Connection and placement flags shared by every command
#[derive(Args, Debug, Clone)]
struct CloudArgs {
    /// Command endpoint of the control plane
    #[arg(long, env = "CS_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,
    #[arg(long, env = "CS_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,
    #[arg(long, env = "CS_API_SECRET", hide_env_values = true, global = true)]
    api_secret: Option<String>,
    /// Project to create everything in (account scope when unset)
    #[arg(long, env = "CS_PROJECT", global = true)]
    project: Option<String>,
    #[arg(long, env = "CS_ZONE", default_value = DEFAULT_ZONE, global = true)]
    zone: String,
    #[arg(long, env = "CS_NETWORK_OFFERING", default_value = DEFAULT_NETWORK_OFFERING, global = true)]
    network_offering: String,
    #[arg(long, env = "CS_VPC_OFFERING", default_value = DEFAULT_VPC_OFFERING, global = true)]
    vpc_offering: String,
    /// Put the run's network inside a VPC
    #[arg(long, env = "CS_USE_VPC", global = true)]
    use_vpc: bool,
    /// Disk offering by name (smallest fitting offering when unset)
    #[arg(long, env = "CS_DISK_OFFERING", global = true)]
    disk_offering: Option<String>,
    /// Run id that every resource name is derived from
    #[arg(long, env = "STRATUS_RUN_URI", global = true)]
    run_uri: Option<String>,
}

impl CloudArgs {
    fn config(&self) -> anyhow::Result<CloudStackConfig> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("API key is required (--api-key or CS_API_KEY)"))?;
        let api_secret = self.api_secret.clone().ok_or_else(|| {
            anyhow::anyhow!("API secret is required (--api-secret or CS_API_SECRET)")
        })?;

        let mut config = CloudStackConfig::new(api_key, api_secret).with_vpc(self.use_vpc);
        config.api_url = self.api_url.clone();
        config.project = self.project.clone();
        config.zone = self.zone.clone();
        config.network_offering = self.network_offering.clone();
        config.vpc_offering = self.vpc_offering.clone();
        config.disk_offering = self.disk_offering.clone();
        config.validate()?;
        Ok(config)
    }

    /// Provider for the run given by `--run-uri`
    fn provider(&self) -> anyhow::Result<CloudStackProvider> {
        let run_uri = self.run_uri.as_deref().ok_or_else(|| {
            anyhow::anyhow!("a run id is required (--run-uri or STRATUS_RUN_URI)")
        })?;
        self.provider_for(run_uri)
    }

    fn provider_for(&self, run_uri: &str) -> anyhow::Result<CloudStackProvider> {
        let naming = Naming::new(run_uri)?;
        Ok(CloudStackProvider::new(self.config()?, naming)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials against the control plane
    Auth,
    /// Show the machines of a run
    Status,
    /// Show what `up` would create
    Plan {
        /// Number of machines
        #[arg(long, default_value = "1")]
        vms: usize,
    },
    /// Provision machines with their network, public IPs and disks
    Up {
        /// Number of machines
        #[arg(long, default_value = "1")]
        vms: usize,
        /// Data disks per machine
        #[arg(long, default_value = "0")]
        disks: usize,
        /// Size of each data disk in GB
        #[arg(long, default_value = "10")]
        disk_size: u64,
        /// Service offering name
        #[arg(long, default_value = DEFAULT_MACHINE_TYPE)]
        machine_type: String,
        /// Template name
        #[arg(long, default_value = DEFAULT_IMAGE)]
        image: String,
        /// OpenSSH public key to register for the run
        #[arg(long)]
        ssh_key: Option<PathBuf>,
    },
    /// Tear down a run, or one machine of it, found by name
    Down {
        /// Remove only this machine
        #[arg(long)]
        vm: Option<String>,
        /// Skip the confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("stratus {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Auth => {
            commands::auth::handle(&cli.cloud).await?;
        }
        Commands::Status => {
            commands::status::handle(&cli.cloud.provider()?).await?;
        }
        Commands::Plan { vms } => {
            commands::plan::handle(&cli.cloud.provider()?, vms).await?;
        }
        Commands::Up {
            vms,
            disks,
            disk_size,
            machine_type,
            image,
            ssh_key,
        } => {
            let machine = commands::up::Machine {
                machine_type,
                image,
                disks,
                disk_size,
            };
            commands::up::handle(&cli.cloud, vms, machine, ssh_key).await?;
        }
        Commands::Down { vm, yes } => {
            commands::down::handle(&cli.cloud.provider()?, vm, yes).await?;
        }
    }

    Ok(())
}
