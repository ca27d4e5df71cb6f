use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use stratus_cloud::RetryConfig;
use stratus_cloudstack::config::{
    DEFAULT_IMAGE, DEFAULT_MACHINE_TYPE, DEFAULT_NETWORK_OFFERING, DEFAULT_VPC_OFFERING,
};
use stratus_cloudstack::model::{
    DiskOffering, Network, NetworkAcl, NetworkOffering, Nic, Project, PublicIpAddress,
    ServiceOffering, SshKeyPair, Template, VirtualMachine, Volume, Vpc, VpcOffering, Zone,
};
use stratus_cloudstack::{
    CloudStackConfig, CloudStackError, ControlPlane, CreateNetwork, CreateVolume, CreateVpc,
    DeployVm, IpScope, Result,
};

pub const ZONE: &str = "QC-1";
pub const PROJECT: &str = "bench";

/// In-memory control plane that records the calls it serves
#[derive(Default)]
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    calls: Vec<String>,
    failures: HashMap<String, (u32, usize)>,
    late: HashMap<String, usize>,
    nic_lag: usize,
    projects: Vec<Project>,
    disk_offerings: Vec<DiskOffering>,
    networks: Vec<Network>,
    vpcs: Vec<Vpc>,
    vms: Vec<VirtualMachine>,
    volumes: Vec<Volume>,
    keypairs: Vec<SshKeyPair>,
    ips: Vec<PublicIpAddress>,
}

impl Inner {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn call(&mut self, command: &str, subject: &str) -> Result<()> {
        self.calls.push(format!("{} {}", command, subject));
        if let Some((code, remaining)) = self.failures.get_mut(command) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudStackError::Api {
                    command: command.to_string(),
                    code: *code,
                    cs_code: Some(4250),
                    text: format!("injected failure for {}", subject),
                });
            }
        }
        Ok(())
    }

    /// Whether `command` should report a job timeout after taking effect
    fn late(&mut self, command: &str) -> bool {
        match self.late.get_mut(command) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn job_timeout(command: &str) -> CloudStackError {
    CloudStackError::JobTimeout {
        job_id: format!("job-{}", command),
        seconds: 1,
    }
}

#[allow(dead_code)]
impl FakeControlPlane {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.set_disk_offerings(&[10, 20, 50]);
        fake
    }

    pub fn with_project(self) -> Self {
        self.lock().projects.push(Project {
            id: "project-1".to_string(),
            name: PROJECT.to_string(),
        });
        self
    }

    pub fn set_disk_offerings(&self, sizes: &[u64]) {
        self.lock().disk_offerings = sizes
            .iter()
            .map(|size| DiskOffering {
                id: format!("do-{}", size),
                name: format!("{}GB", size),
                disksize: *size,
            })
            .collect();
    }

    /// Make the next `times` calls of `command` fail with `code`
    pub fn fail(&self, command: &str, code: u32, times: usize) {
        self.lock()
            .failures
            .insert(command.to_string(), (code, times));
    }

    /// The next `times` calls of `command` take effect but report a job timeout
    pub fn time_out_after(&self, command: &str, times: usize) {
        self.lock().late.insert(command.to_string(), times);
    }

    /// Machines report no NIC address for the next `lookups` reads
    pub fn delay_nics(&self, lookups: usize) {
        self.lock().nic_lag = lookups;
    }

    /// Recorded calls in order, as `"<command> <subject>"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, command: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(command))
            .collect()
    }

    /// Position of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn counts(&self) -> Counts {
        let inner = self.lock();
        Counts {
            networks: inner.networks.len(),
            vpcs: inner.vpcs.len(),
            vms: inner.vms.len(),
            volumes: inner.volumes.len(),
            keypairs: inner.keypairs.len(),
            ips: inner.ips.iter().filter(|ip| !ip.issourcenat).count(),
        }
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.lock().volumes.iter().find(|v| v.name == name).cloned()
    }

    pub fn ip(&self, address: &str) -> Option<PublicIpAddress> {
        self.lock().ips.iter().find(|ip| ip.ipaddress == address).cloned()
    }

    /// Allocate a public IP nothing is bound to
    pub fn leak_ip(&self, scope: &IpScope) -> String {
        let mut inner = self.lock();
        let id = inner.id("ip");
        let address = format!("203.0.113.{}", inner.next_id);
        let (network, vpc) = scope_ids(scope);
        inner.ips.push(PublicIpAddress {
            id: id.clone(),
            ipaddress: address,
            issourcenat: false,
            isstaticnat: false,
            virtualmachineid: None,
            associatednetworkid: network,
            vpcid: vpc,
        });
        id
    }

    /// Add a machine that belongs to somebody else
    pub fn add_foreign_vm(&self, name: &str) {
        let mut inner = self.lock();
        let id = inner.id("vm");
        inner.vms.push(VirtualMachine {
            id,
            name: name.to_string(),
            state: Some("Running".to_string()),
            nic: Vec::new(),
            publicip: None,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub networks: usize,
    pub vpcs: usize,
    pub vms: usize,
    pub volumes: usize,
    pub keypairs: usize,
    pub ips: usize,
}

#[allow(dead_code)]
pub fn config() -> CloudStackConfig {
    CloudStackConfig::new("test-key", "test-secret")
}

/// Same attempt count as the default, without the waiting
#[allow(dead_code)]
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

fn scope_ids(scope: &IpScope) -> (Option<String>, Option<String>) {
    match scope {
        IpScope::Network(id) => (Some(id.clone()), None),
        IpScope::Vpc(id) => (None, Some(id.clone())),
    }
}

fn in_scope(ip: &PublicIpAddress, scope: &IpScope) -> bool {
    match scope {
        IpScope::Network(id) => ip.associatednetworkid.as_deref() == Some(id.as_str()),
        IpScope::Vpc(id) => ip.vpcid.as_deref() == Some(id.as_str()),
    }
}

fn gone(command: &str, id: &str) -> CloudStackError {
    CloudStackError::Api {
        command: command.to_string(),
        code: 431,
        cs_code: Some(4350),
        text: format!("Unable to find resource with ID {}", id),
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_zone(&self, name: &str) -> Result<Option<Zone>> {
        self.lock().call("listZones", name)?;
        Ok((name == ZONE).then(|| Zone {
            id: "zone-1".to_string(),
            name: ZONE.to_string(),
        }))
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.lock().projects.iter().find(|p| p.name == name).cloned())
    }

    async fn get_template(&self, name: &str, _project_id: Option<&str>) -> Result<Option<Template>> {
        Ok((name == DEFAULT_IMAGE).then(|| Template {
            id: "template-1".to_string(),
            name: name.to_string(),
            isready: true,
        }))
    }

    async fn get_service_offering(&self, name: &str) -> Result<Option<ServiceOffering>> {
        Ok((name == DEFAULT_MACHINE_TYPE).then(|| ServiceOffering {
            id: "so-1".to_string(),
            name: name.to_string(),
            cpunumber: Some(1),
            memory: Some(1024),
        }))
    }

    async fn list_disk_offerings(&self) -> Result<Vec<DiskOffering>> {
        Ok(self.lock().disk_offerings.clone())
    }

    async fn get_network_offering(&self, name: &str) -> Result<Option<NetworkOffering>> {
        Ok((name == DEFAULT_NETWORK_OFFERING).then(|| NetworkOffering {
            id: "no-1".to_string(),
            name: name.to_string(),
        }))
    }

    async fn get_vpc_offering(&self, name: &str) -> Result<Option<VpcOffering>> {
        Ok((name == DEFAULT_VPC_OFFERING).then(|| VpcOffering {
            id: "vo-1".to_string(),
            name: name.to_string(),
        }))
    }

    async fn get_network_acl(
        &self,
        name: &str,
        _project_id: Option<&str>,
    ) -> Result<Option<NetworkAcl>> {
        Ok((name == "default_allow").then(|| NetworkAcl {
            id: "acl-1".to_string(),
            name: name.to_string(),
        }))
    }

    async fn get_network(&self, name: &str, _project_id: Option<&str>) -> Result<Option<Network>> {
        Ok(self.lock().networks.iter().find(|n| n.name == name).cloned())
    }

    async fn create_network(&self, request: &CreateNetwork) -> Result<Network> {
        let mut inner = self.lock();
        inner.call("createNetwork", &request.name)?;
        let id = inner.id("net");
        let network = Network {
            id: id.clone(),
            name: request.name.clone(),
            vpcid: request.tier.as_ref().map(|t| t.vpc_id.clone()),
        };
        inner.networks.push(network.clone());

        // Isolated networks come with a source NAT address
        if request.tier.is_none() {
            let ip_id = inner.id("ip");
            inner.ips.push(PublicIpAddress {
                id: ip_id,
                ipaddress: "198.51.100.1".to_string(),
                issourcenat: true,
                isstaticnat: false,
                virtualmachineid: None,
                associatednetworkid: Some(id),
                vpcid: None,
            });
        }
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("deleteNetwork", id)?;
        let before = inner.networks.len();
        inner.networks.retain(|n| n.id != id);
        if inner.networks.len() == before {
            return Err(gone("deleteNetwork", id));
        }
        inner
            .ips
            .retain(|ip| ip.associatednetworkid.as_deref() != Some(id));
        Ok(())
    }

    async fn get_vpc(&self, name: &str, _project_id: Option<&str>) -> Result<Option<Vpc>> {
        Ok(self.lock().vpcs.iter().find(|v| v.name == name).cloned())
    }

    async fn create_vpc(&self, request: &CreateVpc) -> Result<Vpc> {
        let mut inner = self.lock();
        inner.call("createVPC", &request.name)?;
        let vpc = Vpc {
            id: inner.id("vpc"),
            name: request.name.clone(),
            cidr: Some(request.cidr.clone()),
        };
        inner.vpcs.push(vpc.clone());
        Ok(vpc)
    }

    async fn delete_vpc(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("deleteVPC", id)?;
        if inner.networks.iter().any(|n| n.vpcid.as_deref() == Some(id)) {
            return Err(CloudStackError::Api {
                command: "deleteVPC".to_string(),
                code: 431,
                cs_code: Some(4350),
                text: "VPC still has network tiers".to_string(),
            });
        }
        let before = inner.vpcs.len();
        inner.vpcs.retain(|v| v.id != id);
        if inner.vpcs.len() == before {
            return Err(gone("deleteVPC", id));
        }
        Ok(())
    }

    async fn get_virtual_machine(
        &self,
        name: &str,
        _project_id: Option<&str>,
    ) -> Result<Option<VirtualMachine>> {
        let mut inner = self.lock();
        let Some(mut vm) = inner.vms.iter().find(|v| v.name == name).cloned() else {
            return Ok(None);
        };
        if inner.nic_lag > 0 {
            inner.nic_lag -= 1;
            vm.nic.clear();
        }
        Ok(Some(vm))
    }

    async fn list_virtual_machines(&self, _project_id: Option<&str>) -> Result<Vec<VirtualMachine>> {
        Ok(self.lock().vms.clone())
    }

    async fn deploy_vm(&self, request: &DeployVm) -> Result<VirtualMachine> {
        let mut inner = self.lock();
        inner.call("deployVirtualMachine", &request.name)?;
        let id = inner.id("vm");
        let host = inner.vms.len() + 10;
        let vm = VirtualMachine {
            id,
            name: request.name.clone(),
            state: Some("Running".to_string()),
            nic: vec![Nic {
                id: None,
                networkid: request.network_ids.first().cloned(),
                ipaddress: Some(format!("10.0.0.{}", host)),
            }],
            publicip: None,
        };
        inner.vms.push(vm.clone());

        let mut reply = vm;
        if inner.nic_lag > 0 {
            reply.nic.clear();
        }
        Ok(reply)
    }

    async fn destroy_vm(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("destroyVirtualMachine", id)?;
        let before = inner.vms.len();
        inner.vms.retain(|v| v.id != id);
        if inner.vms.len() == before {
            return Err(gone("destroyVirtualMachine", id));
        }
        Ok(())
    }

    async fn get_volume(&self, name: &str, _project_id: Option<&str>) -> Result<Option<Volume>> {
        Ok(self.lock().volumes.iter().find(|v| v.name == name).cloned())
    }

    async fn list_volumes(&self, _project_id: Option<&str>) -> Result<Vec<Volume>> {
        Ok(self.lock().volumes.clone())
    }

    async fn create_volume(&self, request: &CreateVolume) -> Result<Volume> {
        let mut inner = self.lock();
        inner.call("createVolume", &request.name)?;
        let size = inner
            .disk_offerings
            .iter()
            .find(|o| o.id == request.disk_offering_id)
            .map(|o| o.disksize << 30);
        let volume = Volume {
            id: inner.id("vol"),
            name: request.name.clone(),
            virtualmachineid: None,
            deviceid: None,
            size,
        };
        inner.volumes.push(volume.clone());
        Ok(volume)
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("deleteVolume", id)?;
        let Some(volume) = inner.volumes.iter().find(|v| v.id == id) else {
            return Err(gone("deleteVolume", id));
        };
        if volume.virtualmachineid.is_some() {
            return Err(CloudStackError::Api {
                command: "deleteVolume".to_string(),
                code: 431,
                cs_code: Some(4350),
                text: "Please specify a volume that is not attached to any VM".to_string(),
            });
        }
        inner.volumes.retain(|v| v.id != id);
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, vm_id: &str) -> Result<Volume> {
        let mut inner = self.lock();
        inner.call("attachVolume", volume_id)?;
        // Device 0 is the root disk
        let device = 1 + inner
            .volumes
            .iter()
            .filter(|v| v.virtualmachineid.as_deref() == Some(vm_id))
            .count() as u32;
        let volume = inner
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| gone("attachVolume", volume_id))?;
        volume.virtualmachineid = Some(vm_id.to_string());
        volume.deviceid = Some(device);
        Ok(volume.clone())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<Volume> {
        let mut inner = self.lock();
        inner.call("detachVolume", volume_id)?;
        let volume = inner
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| gone("detachVolume", volume_id))?;
        volume.virtualmachineid = None;
        volume.deviceid = None;
        Ok(volume.clone())
    }

    async fn get_ssh_keypair(
        &self,
        name: &str,
        _project_id: Option<&str>,
    ) -> Result<Option<SshKeyPair>> {
        Ok(self.lock().keypairs.iter().find(|k| k.name == name).cloned())
    }

    async fn register_ssh_keypair(
        &self,
        name: &str,
        _public_key: &str,
        _project_id: Option<&str>,
    ) -> Result<SshKeyPair> {
        let mut inner = self.lock();
        inner.call("registerSSHKeyPair", name)?;
        let keypair = SshKeyPair {
            name: name.to_string(),
            fingerprint: Some("aa:bb:cc".to_string()),
        };
        inner.keypairs.push(keypair.clone());
        Ok(keypair)
    }

    async fn delete_ssh_keypair(&self, name: &str, _project_id: Option<&str>) -> Result<()> {
        let mut inner = self.lock();
        inner.call("deleteSSHKeyPair", name)?;
        inner.keypairs.retain(|k| k.name != name);
        Ok(())
    }

    async fn list_public_ips(
        &self,
        scope: &IpScope,
        _project_id: Option<&str>,
    ) -> Result<Vec<PublicIpAddress>> {
        Ok(self
            .lock()
            .ips
            .iter()
            .filter(|ip| in_scope(ip, scope))
            .cloned()
            .collect())
    }

    async fn associate_ip(
        &self,
        scope: &IpScope,
        _project_id: Option<&str>,
    ) -> Result<PublicIpAddress> {
        let mut inner = self.lock();
        let (network, vpc) = scope_ids(scope);
        inner.call("associateIpAddress", network.as_deref().or(vpc.as_deref()).unwrap_or("-"))?;
        let id = inner.id("ip");
        let ip = PublicIpAddress {
            id,
            ipaddress: format!("203.0.113.{}", inner.next_id),
            issourcenat: false,
            isstaticnat: false,
            virtualmachineid: None,
            associatednetworkid: network,
            vpcid: vpc,
        };
        inner.ips.push(ip.clone());
        if inner.late("associateIpAddress") {
            return Err(job_timeout("associateIpAddress"));
        }
        Ok(ip)
    }

    async fn disassociate_ip(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("disassociateIpAddress", id)?;
        let before = inner.ips.len();
        inner.ips.retain(|ip| ip.id != id);
        if inner.ips.len() == before {
            return Err(gone("disassociateIpAddress", id));
        }
        Ok(())
    }

    async fn enable_static_nat(
        &self,
        ip_id: &str,
        vm_id: &str,
        _network_id: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.call("enableStaticNat", ip_id)?;
        let ip = inner
            .ips
            .iter_mut()
            .find(|ip| ip.id == ip_id)
            .ok_or_else(|| gone("enableStaticNat", ip_id))?;
        ip.isstaticnat = true;
        ip.virtualmachineid = Some(vm_id.to_string());
        let address = ip.ipaddress.clone();
        if let Some(vm) = inner.vms.iter_mut().find(|v| v.id == vm_id) {
            vm.publicip = Some(address);
        }
        Ok(())
    }

    async fn disable_static_nat(&self, ip_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call("disableStaticNat", ip_id)?;
        let ip = inner
            .ips
            .iter_mut()
            .find(|ip| ip.id == ip_id)
            .ok_or_else(|| gone("disableStaticNat", ip_id))?;
        ip.isstaticnat = false;
        ip.virtualmachineid = None;
        Ok(())
    }
}
