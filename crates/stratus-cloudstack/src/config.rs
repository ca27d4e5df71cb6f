//! Provider configuration
//!
//! Everything has an environment-variable default so that a benchmark
//! harness can run without passing credentials on the command line.

use crate::error::{CloudStackError, Result};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/client/api";
pub const DEFAULT_ZONE: &str = "QC-1";
pub const DEFAULT_NETWORK_OFFERING: &str = "DefaultIsolatedNetworkOfferingForVpcNetworks";
pub const DEFAULT_VPC_OFFERING: &str = "Default VPC offering";
pub const DEFAULT_MACHINE_TYPE: &str = "1vCPU.1GB";
pub const DEFAULT_IMAGE: &str = "Ubuntu 14.04.2 HVM base (64bit)";
pub const DEFAULT_USER_NAME: &str = "cca-user";

/// Connection and placement settings for a CloudStack control plane
#[derive(Debug, Clone)]
pub struct CloudStackConfig {
    /// Command endpoint, e.g. `https://cloud.example.com/client/api`
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,

    /// Project to scope every resource to; `None` means account scope
    pub project: Option<String>,
    pub zone: String,

    pub network_offering: String,
    pub vpc_offering: String,
    /// Create a VPC and place the network inside it
    pub use_vpc: bool,
    /// Named disk offering; when unset the smallest offering that fits
    /// the requested size is used
    pub disk_offering: Option<String>,

    pub http_timeout: Duration,
    pub poll: PollConfig,
}

/// How async jobs are polled
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

impl CloudStackConfig {
    /// Config with defaults for everything but credentials
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            project: None,
            zone: DEFAULT_ZONE.to_string(),
            network_offering: DEFAULT_NETWORK_OFFERING.to_string(),
            vpc_offering: DEFAULT_VPC_OFFERING.to_string(),
            use_vpc: false,
            disk_offering: None,
            http_timeout: Duration::from_secs(60),
            poll: PollConfig::default(),
        }
    }

    /// Create CloudStackConfig from environment variables
    ///
    /// `CS_API_KEY` and `CS_API_SECRET` are required; `CS_API_URL`,
    /// `CS_PROJECT`, `CS_ZONE`, `CS_NETWORK_OFFERING`, `CS_VPC_OFFERING`,
    /// `CS_USE_VPC` and `CS_DISK_OFFERING` are optional.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("CS_API_KEY")
            .map_err(|_| CloudStackError::MissingEnvVar("CS_API_KEY".to_string()))?;
        let api_secret = std::env::var("CS_API_SECRET")
            .map_err(|_| CloudStackError::MissingEnvVar("CS_API_SECRET".to_string()))?;

        let mut config = Self::new(api_key, api_secret);
        if let Some(url) = env_opt("CS_API_URL") {
            config.api_url = url;
        }
        config.project = env_opt("CS_PROJECT");
        if let Some(zone) = env_opt("CS_ZONE") {
            config.zone = zone;
        }
        if let Some(offering) = env_opt("CS_NETWORK_OFFERING") {
            config.network_offering = offering;
        }
        if let Some(offering) = env_opt("CS_VPC_OFFERING") {
            config.vpc_offering = offering;
        }
        if let Some(flag) = env_opt("CS_USE_VPC") {
            config.use_vpc = parse_bool(&flag).ok_or_else(|| {
                CloudStackError::InvalidConfig(format!("CS_USE_VPC must be a boolean, got {flag}"))
            })?;
        }
        config.disk_offering = env_opt("CS_DISK_OFFERING");

        config.validate()?;
        Ok(config)
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_vpc(mut self, use_vpc: bool) -> Self {
        self.use_vpc = use_vpc;
        self
    }

    /// Reject configurations that cannot produce a working client
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(CloudStackError::InvalidConfig("API key is empty".into()));
        }
        if self.api_secret.trim().is_empty() {
            return Err(CloudStackError::InvalidConfig("API secret is empty".into()));
        }
        url::Url::parse(&self.api_url).map_err(|e| {
            CloudStackError::InvalidConfig(format!("invalid API URL {}: {}", self.api_url, e))
        })?;
        if self.use_vpc && self.vpc_offering.trim().is_empty() {
            return Err(CloudStackError::InvalidConfig(
                "VPC mode needs a VPC offering".into(),
            ));
        }
        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
