//! Typed control-plane operations
//!
//! [`ControlPlane`] is the seam between resource logic and the wire.
//! [`CsClient`] implements it over HTTP; tests implement it in memory.

use crate::client::{Command, CsClient, decode_list, decode_object};
use crate::error::Result;
use crate::model::{
    DiskOffering, Network, NetworkAcl, NetworkOffering, Project, PublicIpAddress,
    ServiceOffering, SshKeyPair, Template, VirtualMachine, Volume, Vpc, VpcOffering, Zone,
};
use async_trait::async_trait;

/// Parameters for `deployVirtualMachine`
#[derive(Debug, Clone)]
pub struct DeployVm {
    pub name: String,
    pub zone_id: String,
    pub service_offering_id: String,
    pub template_id: String,
    pub network_ids: Vec<String>,
    pub keypair: Option<String>,
    pub project_id: Option<String>,
}

/// Parameters for `createVPC`
#[derive(Debug, Clone)]
pub struct CreateVpc {
    pub name: String,
    pub zone_id: String,
    pub cidr: String,
    pub offering_id: String,
    pub project_id: Option<String>,
}

/// Tier settings for a network created inside a VPC
#[derive(Debug, Clone)]
pub struct VpcTier {
    pub vpc_id: String,
    pub gateway: String,
    pub netmask: String,
    pub acl_id: String,
}

/// Parameters for `createNetwork`
#[derive(Debug, Clone)]
pub struct CreateNetwork {
    pub name: String,
    pub offering_id: String,
    pub zone_id: String,
    pub project_id: Option<String>,
    pub tier: Option<VpcTier>,
}

/// Parameters for `createVolume`
#[derive(Debug, Clone)]
pub struct CreateVolume {
    pub name: String,
    pub disk_offering_id: String,
    pub zone_id: String,
    pub project_id: Option<String>,
}

/// Where a public IP is allocated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpScope {
    Network(String),
    Vpc(String),
}

/// Control-plane operations used by the provider
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_zone(&self, name: &str) -> Result<Option<Zone>>;
    async fn get_project(&self, name: &str) -> Result<Option<Project>>;
    async fn get_template(&self, name: &str, project_id: Option<&str>) -> Result<Option<Template>>;
    async fn get_service_offering(&self, name: &str) -> Result<Option<ServiceOffering>>;
    async fn list_disk_offerings(&self) -> Result<Vec<DiskOffering>>;
    async fn get_network_offering(&self, name: &str) -> Result<Option<NetworkOffering>>;
    async fn get_vpc_offering(&self, name: &str) -> Result<Option<VpcOffering>>;
    async fn get_network_acl(&self, name: &str, project_id: Option<&str>)
    -> Result<Option<NetworkAcl>>;

    async fn get_network(&self, name: &str, project_id: Option<&str>) -> Result<Option<Network>>;
    async fn create_network(&self, request: &CreateNetwork) -> Result<Network>;
    async fn delete_network(&self, id: &str) -> Result<()>;

    async fn get_vpc(&self, name: &str, project_id: Option<&str>) -> Result<Option<Vpc>>;
    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc>;
    async fn delete_vpc(&self, id: &str) -> Result<()>;

    async fn get_virtual_machine(
        &self,
        name: &str,
        project_id: Option<&str>,
    ) -> Result<Option<VirtualMachine>>;
    async fn list_virtual_machines(&self, project_id: Option<&str>) -> Result<Vec<VirtualMachine>>;
    async fn deploy_vm(&self, request: &DeployVm) -> Result<VirtualMachine>;
    async fn destroy_vm(&self, id: &str) -> Result<()>;

    async fn get_volume(&self, name: &str, project_id: Option<&str>) -> Result<Option<Volume>>;
    async fn list_volumes(&self, project_id: Option<&str>) -> Result<Vec<Volume>>;
    async fn create_volume(&self, request: &CreateVolume) -> Result<Volume>;
    async fn delete_volume(&self, id: &str) -> Result<()>;
    async fn attach_volume(&self, volume_id: &str, vm_id: &str) -> Result<Volume>;
    async fn detach_volume(&self, volume_id: &str) -> Result<Volume>;

    async fn get_ssh_keypair(&self, name: &str, project_id: Option<&str>)
    -> Result<Option<SshKeyPair>>;
    async fn register_ssh_keypair(
        &self,
        name: &str,
        public_key: &str,
        project_id: Option<&str>,
    ) -> Result<SshKeyPair>;
    async fn delete_ssh_keypair(&self, name: &str, project_id: Option<&str>) -> Result<()>;

    async fn list_public_ips(
        &self,
        scope: &IpScope,
        project_id: Option<&str>,
    ) -> Result<Vec<PublicIpAddress>>;
    async fn associate_ip(&self, scope: &IpScope, project_id: Option<&str>)
    -> Result<PublicIpAddress>;
    async fn disassociate_ip(&self, id: &str) -> Result<()>;
    async fn enable_static_nat(
        &self,
        ip_id: &str,
        vm_id: &str,
        network_id: Option<&str>,
    ) -> Result<()>;
    async fn disable_static_nat(&self, ip_id: &str) -> Result<()>;
}

#[async_trait]
impl ControlPlane for CsClient {
    async fn get_zone(&self, name: &str) -> Result<Option<Zone>> {
        self.find_by_name(Command::new("listZones"), "zone", name).await
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let command = Command::new("listProjects").param("listall", true);
        self.find_by_name(command, "project", name).await
    }

    async fn get_template(&self, name: &str, project_id: Option<&str>) -> Result<Option<Template>> {
        let command = Command::new("listTemplates")
            .param("templatefilter", "executable")
            .param_opt("projectid", project_id);
        self.find_by_name(command, "template", name).await
    }

    async fn get_service_offering(&self, name: &str) -> Result<Option<ServiceOffering>> {
        self.find_by_name(Command::new("listServiceOfferings"), "serviceoffering", name)
            .await
    }

    async fn list_disk_offerings(&self) -> Result<Vec<DiskOffering>> {
        self.list(&Command::new("listDiskOfferings"), "diskoffering")
            .await
    }

    async fn get_network_offering(&self, name: &str) -> Result<Option<NetworkOffering>> {
        self.find_by_name(Command::new("listNetworkOfferings"), "networkoffering", name)
            .await
    }

    async fn get_vpc_offering(&self, name: &str) -> Result<Option<VpcOffering>> {
        self.find_by_name(Command::new("listVPCOfferings"), "vpcoffering", name)
            .await
    }

    async fn get_network_acl(
        &self,
        name: &str,
        project_id: Option<&str>,
    ) -> Result<Option<NetworkAcl>> {
        let command = Command::new("listNetworkACLLists").param_opt("projectid", project_id);
        self.find_by_name(command, "networkacllist", name).await
    }

    async fn get_network(&self, name: &str, project_id: Option<&str>) -> Result<Option<Network>> {
        let command = Command::new("listNetworks").param_opt("projectid", project_id);
        self.find_by_name(command, "network", name).await
    }

    async fn create_network(&self, request: &CreateNetwork) -> Result<Network> {
        let mut command = Command::new("createNetwork")
            .param("name", &request.name)
            .param("displaytext", &request.name)
            .param("networkofferingid", &request.offering_id)
            .param("zoneid", &request.zone_id)
            .param_opt("projectid", request.project_id.as_deref());
        if let Some(tier) = &request.tier {
            command = command
                .param("vpcid", &tier.vpc_id)
                .param("gateway", &tier.gateway)
                .param("netmask", &tier.netmask)
                .param("aclid", &tier.acl_id);
        }

        let body = self.execute(&command).await?;
        decode_object(command.name(), &body, "network")
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.execute_async(&Command::new("deleteNetwork").param("id", id))
            .await?;
        Ok(())
    }

    async fn get_vpc(&self, name: &str, project_id: Option<&str>) -> Result<Option<Vpc>> {
        let command = Command::new("listVPCs").param_opt("projectid", project_id);
        self.find_by_name(command, "vpc", name).await
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc> {
        let command = Command::new("createVPC")
            .param("name", &request.name)
            .param("displaytext", &request.name)
            .param("zoneid", &request.zone_id)
            .param("cidr", &request.cidr)
            .param("vpcofferingid", &request.offering_id)
            .param_opt("projectid", request.project_id.as_deref());

        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "vpc")
    }

    async fn delete_vpc(&self, id: &str) -> Result<()> {
        self.execute_async(&Command::new("deleteVPC").param("id", id))
            .await?;
        Ok(())
    }

    async fn get_virtual_machine(
        &self,
        name: &str,
        project_id: Option<&str>,
    ) -> Result<Option<VirtualMachine>> {
        let command = Command::new("listVirtualMachines").param_opt("projectid", project_id);
        self.find_by_name(command, "virtualmachine", name).await
    }

    async fn list_virtual_machines(&self, project_id: Option<&str>) -> Result<Vec<VirtualMachine>> {
        let command = Command::new("listVirtualMachines").param_opt("projectid", project_id);
        let body = self.execute(&command).await?;
        decode_list(body, "virtualmachine")
    }

    async fn deploy_vm(&self, request: &DeployVm) -> Result<VirtualMachine> {
        let command = Command::new("deployVirtualMachine")
            .param("name", &request.name)
            .param("displayname", &request.name)
            .param("zoneid", &request.zone_id)
            .param("serviceofferingid", &request.service_offering_id)
            .param("templateid", &request.template_id)
            .param("networkids", request.network_ids.join(","))
            .param_opt("keypair", request.keypair.as_deref())
            .param_opt("projectid", request.project_id.as_deref());

        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "virtualmachine")
    }

    async fn destroy_vm(&self, id: &str) -> Result<()> {
        let command = Command::new("destroyVirtualMachine")
            .param("id", id)
            .param("expunge", true);
        self.execute_async(&command).await?;
        Ok(())
    }

    async fn get_volume(&self, name: &str, project_id: Option<&str>) -> Result<Option<Volume>> {
        let command = Command::new("listVolumes").param_opt("projectid", project_id);
        self.find_by_name(command, "volume", name).await
    }

    async fn list_volumes(&self, project_id: Option<&str>) -> Result<Vec<Volume>> {
        let command = Command::new("listVolumes").param_opt("projectid", project_id);
        let body = self.execute(&command).await?;
        decode_list(body, "volume")
    }

    async fn create_volume(&self, request: &CreateVolume) -> Result<Volume> {
        let command = Command::new("createVolume")
            .param("name", &request.name)
            .param("diskofferingid", &request.disk_offering_id)
            .param("zoneid", &request.zone_id)
            .param_opt("projectid", request.project_id.as_deref());

        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "volume")
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.execute(&Command::new("deleteVolume").param("id", id))
            .await?;
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, vm_id: &str) -> Result<Volume> {
        let command = Command::new("attachVolume")
            .param("id", volume_id)
            .param("virtualmachineid", vm_id);
        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "volume")
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<Volume> {
        let command = Command::new("detachVolume").param("id", volume_id);
        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "volume")
    }

    async fn get_ssh_keypair(
        &self,
        name: &str,
        project_id: Option<&str>,
    ) -> Result<Option<SshKeyPair>> {
        let command = Command::new("listSSHKeyPairs").param_opt("projectid", project_id);
        self.find_by_name(command, "sshkeypair", name).await
    }

    async fn register_ssh_keypair(
        &self,
        name: &str,
        public_key: &str,
        project_id: Option<&str>,
    ) -> Result<SshKeyPair> {
        let command = Command::new("registerSSHKeyPair")
            .param("name", name)
            .param("publickey", public_key.trim())
            .param_opt("projectid", project_id);
        let body = self.execute(&command).await?;
        decode_object(command.name(), &body, "keypair")
    }

    async fn delete_ssh_keypair(&self, name: &str, project_id: Option<&str>) -> Result<()> {
        let command = Command::new("deleteSSHKeyPair")
            .param("name", name)
            .param_opt("projectid", project_id);
        self.execute(&command).await?;
        Ok(())
    }

    async fn list_public_ips(
        &self,
        scope: &IpScope,
        project_id: Option<&str>,
    ) -> Result<Vec<PublicIpAddress>> {
        let command = scope_param(Command::new("listPublicIpAddresses"), scope, true)
            .param_opt("projectid", project_id);
        self.list(&command, "publicipaddress").await
    }

    async fn associate_ip(
        &self,
        scope: &IpScope,
        project_id: Option<&str>,
    ) -> Result<PublicIpAddress> {
        let command = scope_param(Command::new("associateIpAddress"), scope, false)
            .param_opt("projectid", project_id);
        let result = self.execute_async(&command).await?;
        decode_object(command.name(), &result, "ipaddress")
    }

    async fn disassociate_ip(&self, id: &str) -> Result<()> {
        self.execute_async(&Command::new("disassociateIpAddress").param("id", id))
            .await?;
        Ok(())
    }

    async fn enable_static_nat(
        &self,
        ip_id: &str,
        vm_id: &str,
        network_id: Option<&str>,
    ) -> Result<()> {
        let command = Command::new("enableStaticNat")
            .param("ipaddressid", ip_id)
            .param("virtualmachineid", vm_id)
            .param_opt("networkid", network_id);
        self.execute(&command).await?;
        Ok(())
    }

    async fn disable_static_nat(&self, ip_id: &str) -> Result<()> {
        let command = Command::new("disableStaticNat").param("ipaddressid", ip_id);
        self.execute_async(&command).await?;
        Ok(())
    }
}

/// `associateIpAddress` takes `networkid`, listings take `associatednetworkid`
fn scope_param(command: Command, scope: &IpScope, listing: bool) -> Command {
    match (scope, listing) {
        (IpScope::Network(id), true) => command.param("associatednetworkid", id),
        (IpScope::Network(id), false) => command.param("networkid", id),
        (IpScope::Vpc(id), _) => command.param("vpcid", id),
    }
}
