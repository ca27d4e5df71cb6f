//! CloudStack provider for Stratus
//!
//! This crate implements the CloudProvider trait for CloudStack-compatible
//! control planes, provisioning benchmark machines with their networks,
//! public IPs and data disks through the signed command API.
//!
//! # Features
//!
//! - Request signing and async-job polling
//! - VM, disk, network, VPC and keypair lifecycle
//! - Dependency-ordered deploy with rollback on partial failure
//! - Teardown by name, with no local state
//!
//! # Example
//!
//! ```ignore
//! use stratus_cloudstack::{CloudStackConfig, CloudStackProvider, Naming, VmSpec};
//!
//! let config = CloudStackConfig::from_env()?;
//! let provider = CloudStackProvider::new(config, Naming::new("a1b2c3")?)?
//!     .with_public_key(std::fs::read_to_string("id_rsa.pub")?);
//!
//! let deployment = provider.deploy(vec![VmSpec::default(); 2]).await?;
//! provider.orchestrator().teardown(deployment).await;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod resources;
pub mod signing;

pub use api::{ControlPlane, CreateNetwork, CreateVolume, CreateVpc, DeployVm, IpScope, VpcTier};
pub use client::{Command, CsClient};
pub use config::{CloudStackConfig, PollConfig};
pub use error::{CloudStackError, Result};
pub use orchestrator::{Created, Deployment, DeploymentSpec, Orchestrator, VmSpec};
pub use provider::CloudStackProvider;
pub use resources::{
    Disk, Keypair, Naming, Network, Placement, PublicIp, Resource, VirtualMachine, Vpc,
};
