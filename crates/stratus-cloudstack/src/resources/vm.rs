//! Virtual machine descriptor
//!
//! A machine is reachable from outside through a public IP bound to it
//! with static NAT. Allocation of that IP happens after the machine is
//! deployed, in [`VirtualMachine::post_create`].

use super::keypair::Keypair;
use super::network::Network;
use super::{Placement, Resource};
use crate::api::{ControlPlane, DeployVm, IpScope};
use crate::config::{DEFAULT_IMAGE, DEFAULT_MACHINE_TYPE, DEFAULT_USER_NAME};
use crate::error::{CloudStackError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_cloud::{RetryConfig, retry};

/// Public IP allocation bound to a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIp {
    /// Allocation id, used to release the address
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct VirtualMachine {
    pub name: String,
    pub id: Option<String>,
    /// Service offering name
    pub machine_type: String,
    /// Template name
    pub image: String,
    /// Login user baked into the image
    pub user_name: String,
    pub service_offering_id: Option<String>,
    pub template_id: Option<String>,
    pub network_id: Option<String>,
    pub ip_scope: Option<IpScope>,
    pub keypair: Option<Keypair>,
    pub internal_ip: Option<String>,
    pub public_ip: Option<PublicIp>,
    /// Whether `public_ip` is bound to this machine with static NAT
    pub static_nat: bool,
    placement: Placement,
    retry: RetryConfig,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, placement: Placement) -> Self {
        Self {
            name: name.into(),
            id: None,
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            user_name: DEFAULT_USER_NAME.to_string(),
            service_offering_id: None,
            template_id: None,
            network_id: None,
            ip_scope: None,
            keypair: None,
            internal_ip: None,
            public_ip: None,
            static_nat: false,
            placement,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = machine_type.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_keypair(mut self, keypair: Option<Keypair>) -> Self {
        self.keypair = keypair;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Put the machine on `network`; the network must already exist
    pub fn join_network(&mut self, network: &Network) -> Result<()> {
        let id = network
            .id
            .clone()
            .ok_or_else(|| CloudStackError::not_found("network", &network.name))?;
        self.ip_scope = Some(network.ip_scope()?);
        self.network_id = Some(id);
        Ok(())
    }

    fn vm_id(&self) -> Result<String> {
        self.id
            .clone()
            .ok_or_else(|| CloudStackError::not_found("virtual machine", &self.name))
    }

    /// Register the keypair if it is not registered yet
    ///
    /// Returns true when this call registered it.
    pub async fn create_dependencies(&mut self, api: &dyn ControlPlane) -> Result<bool> {
        let Some(keypair) = self.keypair.as_mut() else {
            return Ok(false);
        };
        if keypair.exists(api).await? {
            return Ok(false);
        }
        keypair.create(api).await?;
        Ok(true)
    }

    /// Unregister the keypair if it is still present
    pub async fn delete_dependencies(&mut self, api: &dyn ControlPlane) -> Result<()> {
        match self.keypair.as_mut() {
            Some(keypair) => keypair.delete(api).await,
            None => Ok(()),
        }
    }

    /// Allocate and bind the public IP
    ///
    /// Each step is retried on its own and skipped when already done, so
    /// calling this again after a failure picks up where it stopped.
    pub async fn post_create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let vm_id = self.vm_id()?;
        let scope = self
            .ip_scope
            .clone()
            .ok_or_else(|| CloudStackError::not_found("network", format!("of {}", self.name)))?;
        let project_id = self.placement.project_id();

        if self.internal_ip.is_none() {
            let name = self.name.as_str();
            let address = retry(&self.retry, "read internal IP", || async move {
                let vm = api
                    .get_virtual_machine(name, project_id)
                    .await?
                    .ok_or_else(|| CloudStackError::not_found("virtual machine", name))?;
                vm.internal_ip()
                    .map(str::to_string)
                    .ok_or_else(|| CloudStackError::NotReady(format!("NIC of {}", name)))
            })
            .await?;
            self.internal_ip = Some(address);
        }

        if self.public_ip.is_none() {
            let scope = &scope;
            let mut attempts = 0;
            let allocated = retry(&self.retry, "associate public IP", || {
                attempts += 1;
                let retrying = attempts > 1;
                async move {
                    // An earlier attempt may have completed on the plane after
                    // the client stopped waiting for it.
                    if retrying {
                        let unbound = api
                            .list_public_ips(scope, project_id)
                            .await?
                            .into_iter()
                            .find(|ip| {
                                !ip.issourcenat && !ip.isstaticnat && ip.virtualmachineid.is_none()
                            });
                        if let Some(ip) = unbound {
                            return Ok(ip);
                        }
                    }
                    api.associate_ip(scope, project_id).await
                }
            })
            .await?;
            tracing::info!("Allocated {} for {}", allocated.ipaddress, self.name);
            self.public_ip = Some(PublicIp {
                id: allocated.id,
                address: allocated.ipaddress,
            });
        }

        if !self.static_nat {
            let ip_id = self
                .public_ip
                .as_ref()
                .map(|ip| ip.id.clone())
                .ok_or_else(|| CloudStackError::not_found("public ip", format!("of {}", self.name)))?;
            let ip_id = ip_id.as_str();
            let vm_id = vm_id.as_str();
            // Inside a VPC the plane needs to know which tier the NIC is on.
            let network_id = match scope {
                IpScope::Vpc(_) => self.network_id.as_deref(),
                IpScope::Network(_) => None,
            };
            retry(&self.retry, "enable static NAT", || async move {
                api.enable_static_nat(ip_id, vm_id, network_id).await
            })
            .await?;
            tracing::info!("Enabled static NAT for {}", self.name);
            self.static_nat = true;
        }

        Ok(())
    }

    pub async fn disable_static_nat(&mut self, api: &dyn ControlPlane) -> Result<()> {
        if !self.static_nat {
            return Ok(());
        }
        if let Some(ip) = &self.public_ip {
            match api.disable_static_nat(&ip.id).await {
                Ok(()) => tracing::info!("Disabled static NAT on {}", ip.address),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.static_nat = false;
        Ok(())
    }

    pub async fn release_public_ip(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let Some(ip) = &self.public_ip else {
            return Ok(());
        };
        match api.disassociate_ip(&ip.id).await {
            Ok(()) => tracing::info!("Released {}", ip.address),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.public_ip = None;
        Ok(())
    }

    /// Destroy and expunge the instance
    pub async fn destroy(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let id = match &self.id {
            Some(id) => Some(id.clone()),
            None => api
                .get_virtual_machine(&self.name, self.placement.project_id())
                .await?
                .map(|vm| vm.id),
        };
        let Some(id) = id else {
            tracing::debug!("VM {} already gone", self.name);
            return Ok(());
        };

        match api.destroy_vm(&id).await {
            Ok(()) => tracing::info!("Destroyed VM {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("VM {} already gone", self.name),
            Err(e) => return Err(e),
        }
        self.id = None;
        self.internal_ip = None;
        Ok(())
    }

    /// Reload id, internal IP and static NAT binding from the plane
    ///
    /// Returns false when no machine has this name.
    pub async fn refresh(&mut self, api: &dyn ControlPlane) -> Result<bool> {
        let project_id = self.placement.project_id();
        let Some(vm) = api.get_virtual_machine(&self.name, project_id).await? else {
            return Ok(false);
        };

        if let Some(scope) = &self.ip_scope {
            let bound = api
                .list_public_ips(scope, project_id)
                .await?
                .into_iter()
                .find(|ip| ip.isstaticnat && ip.virtualmachineid.as_deref() == Some(vm.id.as_str()));
            if let Some(ip) = bound {
                self.public_ip = Some(PublicIp {
                    id: ip.id,
                    address: ip.ipaddress,
                });
                self.static_nat = true;
            }
        }

        self.internal_ip = vm.internal_ip().map(str::to_string);
        self.id = Some(vm.id);
        Ok(true)
    }
}

#[async_trait]
impl Resource for VirtualMachine {
    fn kind(&self) -> &'static str {
        "vm"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();
        if api.get_virtual_machine(&self.name, project_id).await?.is_some() {
            return Err(CloudStackError::AlreadyExists {
                kind: "virtual machine",
                name: self.name.clone(),
            });
        }

        let offering = api
            .get_service_offering(&self.machine_type)
            .await?
            .ok_or_else(|| CloudStackError::not_found("service offering", &self.machine_type))?;
        let template = api
            .get_template(&self.image, project_id)
            .await?
            .ok_or_else(|| CloudStackError::not_found("template", &self.image))?;
        let network_id = self
            .network_id
            .clone()
            .ok_or_else(|| CloudStackError::not_found("network", format!("of {}", self.name)))?;

        let request = DeployVm {
            name: self.name.clone(),
            zone_id: self.placement.zone_id().to_string(),
            service_offering_id: offering.id.clone(),
            template_id: template.id.clone(),
            network_ids: vec![network_id],
            keypair: self.keypair.as_ref().map(|k| k.name.clone()),
            project_id: project_id.map(str::to_string),
        };
        let vm = api.deploy_vm(&request).await?;
        tracing::info!("Deployed VM {} ({})", self.name, vm.id);

        self.service_offering_id = Some(offering.id);
        self.template_id = Some(template.id);
        self.internal_ip = vm.internal_ip().map(str::to_string);
        self.id = Some(vm.id);
        Ok(())
    }

    /// Static NAT, then the IP, then the instance
    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()> {
        self.disable_static_nat(api).await?;
        self.release_public_ip(api).await?;
        self.destroy(api).await
    }

    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool> {
        Ok(api
            .get_virtual_machine(&self.name, self.placement.project_id())
            .await?
            .is_some())
    }
}
