//! Network descriptor, optionally placed inside a VPC

use super::vpc::Vpc;
use super::{Placement, Resource};
use crate::api::{ControlPlane, CreateNetwork, IpScope, VpcTier};
use crate::error::{CloudStackError, Result};
use async_trait::async_trait;
use stratus_cloud::{RetryConfig, retry};

/// Gateway of the single tier created inside a VPC
pub const VPC_GATEWAY: &str = "10.0.0.1";
pub const VPC_NETMASK: &str = "255.255.255.0";
/// Network ACL attached to VPC tiers
pub const DEFAULT_ACL: &str = "default_allow";

#[derive(Debug, Clone)]
pub struct Network {
    pub name: String,
    pub id: Option<String>,
    /// Network offering name, resolved to `offering_id` on create
    pub offering: String,
    pub offering_id: Option<String>,
    /// Found by name rather than created by this descriptor
    pub adopted: bool,
    /// Owning VPC in VPC mode
    pub vpc: Option<Vpc>,
    placement: Placement,
    retry: RetryConfig,
}

impl Network {
    pub fn new(name: impl Into<String>, offering: impl Into<String>, placement: Placement) -> Self {
        Self {
            name: name.into(),
            id: None,
            offering: offering.into(),
            offering_id: None,
            adopted: false,
            vpc: None,
            placement,
            retry: RetryConfig::default(),
        }
    }

    /// Place the network inside `vpc`
    pub fn with_vpc(mut self, vpc: Vpc) -> Self {
        self.vpc = Some(vpc);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Create the owning VPC, if any
    pub async fn create_vpc(&mut self, api: &dyn ControlPlane) -> Result<()> {
        match self.vpc.as_mut() {
            Some(vpc) => vpc.create(api).await,
            None => Ok(()),
        }
    }

    /// Find or create the network itself
    ///
    /// In VPC mode the VPC must already exist. The whole step is retried:
    /// a lookup by name precedes every create, so a retry after a create
    /// that actually went through adopts the network instead of making a
    /// second one.
    pub async fn create_network(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();

        let offering = api
            .get_network_offering(&self.offering)
            .await?
            .ok_or_else(|| CloudStackError::not_found("network offering", &self.offering))?;

        let tier = match &self.vpc {
            Some(vpc) => {
                let vpc_id = vpc
                    .resolve_id(api)
                    .await?
                    .ok_or_else(|| CloudStackError::not_found("vpc", &vpc.name))?;
                // Default ACLs are system-wide, not owned by the project.
                let acl = api
                    .get_network_acl(DEFAULT_ACL, None)
                    .await?
                    .ok_or_else(|| CloudStackError::not_found("network acl", DEFAULT_ACL))?;
                Some(VpcTier {
                    vpc_id,
                    gateway: VPC_GATEWAY.to_string(),
                    netmask: VPC_NETMASK.to_string(),
                    acl_id: acl.id,
                })
            }
            None => None,
        };

        let request = CreateNetwork {
            name: self.name.clone(),
            offering_id: offering.id.clone(),
            zone_id: self.placement.zone_id().to_string(),
            project_id: project_id.map(str::to_string),
            tier,
        };

        let request = &request;
        let (network, adopted) = retry(&self.retry, "create network", || async move {
            if let Some(existing) = api.get_network(&request.name, project_id).await? {
                tracing::info!("Network {} already exists ({}), reusing it", existing.name, existing.id);
                return Ok((existing, true));
            }
            let created = api.create_network(request).await?;
            tracing::info!("Created network {} ({})", created.name, created.id);
            Ok::<_, CloudStackError>((created, false))
        })
        .await?;

        self.offering_id = Some(offering.id);
        self.adopted = adopted;
        self.id = Some(network.id);
        Ok(())
    }

    /// Delete only the network, leaving the VPC in place
    pub async fn delete_network(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let id = match &self.id {
            Some(id) => Some(id.clone()),
            None => api
                .get_network(&self.name, self.placement.project_id())
                .await?
                .map(|n| n.id),
        };
        let Some(id) = id else {
            tracing::debug!("Network {} already gone", self.name);
            return Ok(());
        };

        match api.delete_network(&id).await {
            Ok(()) => tracing::info!("Deleted network {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("Network {} already gone", self.name),
            Err(e) => return Err(e),
        }
        self.id = None;
        Ok(())
    }

    /// Delete the owning VPC, if any
    pub async fn delete_vpc(&mut self, api: &dyn ControlPlane) -> Result<()> {
        match self.vpc.as_mut() {
            Some(vpc) => vpc.delete(api).await,
            None => Ok(()),
        }
    }

    /// Where public IPs for machines on this network are allocated
    pub fn ip_scope(&self) -> Result<IpScope> {
        if let Some(vpc) = &self.vpc {
            let id = vpc
                .id
                .clone()
                .ok_or_else(|| CloudStackError::not_found("vpc", &vpc.name))?;
            return Ok(IpScope::Vpc(id));
        }
        let id = self
            .id
            .clone()
            .ok_or_else(|| CloudStackError::not_found("network", &self.name))?;
        Ok(IpScope::Network(id))
    }
}

#[async_trait]
impl Resource for Network {
    fn kind(&self) -> &'static str {
        "network"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        self.create_vpc(api).await?;
        self.create_network(api).await
    }

    /// Network first, then the VPC that contains it
    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()> {
        self.delete_network(api).await?;
        self.delete_vpc(api).await
    }

    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool> {
        Ok(api
            .get_network(&self.name, self.placement.project_id())
            .await?
            .is_some())
    }
}
