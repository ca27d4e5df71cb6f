//! SSH keypair descriptor

use super::{Placement, Resource};
use crate::api::ControlPlane;
use crate::error::{CloudStackError, Result};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Keypair {
    pub name: String,
    /// OpenSSH public key; only needed to register
    pub public_key: Option<String>,
    pub fingerprint: Option<String>,
    placement: Placement,
}

impl Keypair {
    pub fn new(name: impl Into<String>, placement: Placement) -> Self {
        Self {
            name: name.into(),
            public_key: None,
            fingerprint: None,
            placement,
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

#[async_trait]
impl Resource for Keypair {
    fn kind(&self) -> &'static str {
        "keypair"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();
        if let Some(existing) = api.get_ssh_keypair(&self.name, project_id).await? {
            tracing::debug!("Keypair {} already registered", self.name);
            self.fingerprint = existing.fingerprint;
            return Ok(());
        }

        let public_key = self.public_key.as_deref().ok_or_else(|| {
            CloudStackError::InvalidConfig(format!("keypair {} has no public key", self.name))
        })?;
        let registered = api
            .register_ssh_keypair(&self.name, public_key, project_id)
            .await?;
        tracing::info!("Registered keypair {}", self.name);
        self.fingerprint = registered.fingerprint;
        Ok(())
    }

    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();
        if api.get_ssh_keypair(&self.name, project_id).await?.is_none() {
            tracing::debug!("Keypair {} already gone", self.name);
            return Ok(());
        }

        match api.delete_ssh_keypair(&self.name, project_id).await {
            Ok(()) => tracing::info!("Deleted keypair {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("Keypair {} already gone", self.name),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool> {
        Ok(api
            .get_ssh_keypair(&self.name, self.placement.project_id())
            .await?
            .is_some())
    }
}
