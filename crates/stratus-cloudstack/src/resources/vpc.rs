//! VPC descriptor

use super::{Placement, Resource};
use crate::api::{ControlPlane, CreateVpc};
use crate::error::{CloudStackError, Result};
use async_trait::async_trait;

/// Address range every VPC is created with
pub const VPC_CIDR: &str = "10.0.0.0/16";

#[derive(Debug, Clone)]
pub struct Vpc {
    pub name: String,
    pub id: Option<String>,
    pub cidr: String,
    /// VPC offering name, resolved to `offering_id` on create
    pub offering: String,
    pub offering_id: Option<String>,
    /// Found by name rather than created by this descriptor
    pub adopted: bool,
    placement: Placement,
}

impl Vpc {
    pub fn new(name: impl Into<String>, offering: impl Into<String>, placement: Placement) -> Self {
        Self {
            name: name.into(),
            id: None,
            cidr: VPC_CIDR.to_string(),
            offering: offering.into(),
            offering_id: None,
            adopted: false,
            placement,
        }
    }

    /// Id of the VPC, looking it up by name when it is not known yet
    pub async fn resolve_id(&self, api: &dyn ControlPlane) -> Result<Option<String>> {
        if let Some(id) = &self.id {
            return Ok(Some(id.clone()));
        }
        let found = api.get_vpc(&self.name, self.placement.project_id()).await?;
        Ok(found.map(|v| v.id))
    }
}

#[async_trait]
impl Resource for Vpc {
    fn kind(&self) -> &'static str {
        "vpc"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();
        if let Some(existing) = api.get_vpc(&self.name, project_id).await? {
            tracing::info!("VPC {} already exists ({}), reusing it", self.name, existing.id);
            self.id = Some(existing.id);
            self.adopted = true;
            return Ok(());
        }

        let offering = api
            .get_vpc_offering(&self.offering)
            .await?
            .ok_or_else(|| CloudStackError::not_found("vpc offering", &self.offering))?;

        let request = CreateVpc {
            name: self.name.clone(),
            zone_id: self.placement.zone_id().to_string(),
            cidr: self.cidr.clone(),
            offering_id: offering.id.clone(),
            project_id: project_id.map(str::to_string),
        };
        let vpc = api.create_vpc(&request).await?;
        tracing::info!("Created VPC {} ({})", self.name, vpc.id);

        self.offering_id = Some(offering.id);
        self.id = Some(vpc.id);
        Ok(())
    }

    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let Some(id) = self.resolve_id(api).await? else {
            tracing::debug!("VPC {} already gone", self.name);
            return Ok(());
        };

        match api.delete_vpc(&id).await {
            Ok(()) => tracing::info!("Deleted VPC {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("VPC {} already gone", self.name),
            Err(e) => return Err(e),
        }
        self.id = None;
        Ok(())
    }

    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool> {
        Ok(api
            .get_vpc(&self.name, self.placement.project_id())
            .await?
            .is_some())
    }
}
