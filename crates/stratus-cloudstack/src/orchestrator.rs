//! Lifecycle orchestration
//!
//! A deployment is built in dependency order: VPC, network, keypair, then
//! per machine the instance, its public IP, static NAT, volumes and their
//! attachments. Every completed step is appended to a journal. Rollback
//! and teardown both walk that journal backwards, so resources are always
//! released in reverse creation order.

use crate::api::ControlPlane;
use crate::config::{CloudStackConfig, DEFAULT_IMAGE, DEFAULT_MACHINE_TYPE};
use crate::error::{CloudStackError, Result};
use crate::model::Volume;
use crate::resources::disk::DiskLock;
use crate::resources::{
    Disk, Keypair, Naming, Network, Placement, Resource, VirtualMachine, Vpc,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use stratus_cloud::{ApplyResult, RetryConfig, retry};
use tokio::sync::Mutex;

/// Shape of one machine in a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Explicit machine name; derived from the run id and position when unset
    #[serde(default)]
    pub name: Option<String>,
    pub machine_type: String,
    pub image: String,
    #[serde(default)]
    pub disk_count: usize,
    #[serde(default)]
    pub disk_size_gb: u64,
}

impl Default for VmSpec {
    fn default() -> Self {
        Self {
            name: None,
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            disk_count: 0,
            disk_size_gb: 0,
        }
    }
}

/// Everything needed to build, or find again, one run's resources
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub naming: Naming,
    pub zone: String,
    pub project: Option<String>,
    pub network_offering: String,
    /// VPC offering; `Some` puts the network inside a VPC
    pub vpc_offering: Option<String>,
    pub disk_offering: Option<String>,
    /// OpenSSH public key to register; `None` deploys without a keypair
    pub public_key: Option<String>,
    pub vms: Vec<VmSpec>,
}

impl DeploymentSpec {
    pub fn from_config(config: &CloudStackConfig, naming: Naming) -> Self {
        Self {
            naming,
            zone: config.zone.clone(),
            project: config.project.clone(),
            network_offering: config.network_offering.clone(),
            vpc_offering: config.use_vpc.then(|| config.vpc_offering.clone()),
            disk_offering: config.disk_offering.clone(),
            public_key: None,
            vms: Vec::new(),
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// `count` identical machines
    pub fn with_vms(mut self, count: usize, vm: VmSpec) -> Self {
        self.vms = vec![vm; count];
        self
    }
}

/// One completed creation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    Vpc,
    Network,
    /// Keypair registered through the machine at this index
    Keypair(usize),
    Vm(usize),
    PublicIp(usize),
    StaticNat(usize),
    /// Volume `.1` of machine `.0`
    Volume(usize, usize),
    Attachment(usize, usize),
}

impl Created {
    /// Human-readable name of what this step created
    pub fn label(&self, deployment: &Deployment) -> String {
        let vm = |i: usize| deployment.vms[i].name.as_str();
        let disk = |i: usize, j: usize| deployment.disks[i][j].name.as_str();
        match *self {
            Created::Vpc => format!(
                "vpc {}",
                deployment.network.vpc.as_ref().map_or("-", |v| v.name.as_str())
            ),
            Created::Network => format!("network {}", deployment.network.name),
            Created::Keypair(i) => format!(
                "keypair {}",
                deployment.vms[i].keypair.as_ref().map_or("-", |k| k.name.as_str())
            ),
            Created::Vm(i) => format!("vm {}", vm(i)),
            Created::PublicIp(i) => format!("public ip of {}", vm(i)),
            Created::StaticNat(i) => format!("static nat of {}", vm(i)),
            Created::Volume(i, j) => format!("volume {}", disk(i, j)),
            Created::Attachment(i, j) => format!("attachment of {} to {}", disk(i, j), vm(i)),
        }
    }

    /// Reverse this step
    pub async fn undo(&self, deployment: &mut Deployment, api: &dyn ControlPlane) -> Result<()> {
        match *self {
            Created::Vpc => deployment.network.delete_vpc(api).await,
            Created::Network => deployment.network.delete_network(api).await,
            Created::Keypair(i) => deployment.vms[i].delete_dependencies(api).await,
            Created::Vm(i) => deployment.vms[i].destroy(api).await,
            Created::PublicIp(i) => deployment.vms[i].release_public_ip(api).await,
            Created::StaticNat(i) => deployment.vms[i].disable_static_nat(api).await,
            Created::Volume(i, j) => deployment.disks[i][j].delete(api).await,
            Created::Attachment(i, j) => deployment.disks[i][j].detach(api).await,
        }
    }
}

/// Resources of one run plus the journal of what has been created
#[derive(Debug)]
pub struct Deployment {
    pub naming: Naming,
    pub placement: Placement,
    pub network: Network,
    pub vms: Vec<VirtualMachine>,
    /// Data disks, indexed like `vms`
    pub disks: Vec<Vec<Disk>>,
    journal: Vec<Created>,
}

impl Deployment {
    pub fn journal(&self) -> &[Created] {
        &self.journal
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    /// Labels of every journaled step, in creation order
    pub fn created(&self) -> Vec<String> {
        self.journal.iter().map(|step| step.label(self)).collect()
    }
}

/// Builds and tears down deployments against one control plane
pub struct Orchestrator {
    api: Arc<dyn ControlPlane>,
    retry: RetryConfig,
    disk_lock: DiskLock,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self {
            api,
            retry: RetryConfig::default(),
            disk_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn api(&self) -> &dyn ControlPlane {
        self.api.as_ref()
    }

    async fn placement(&self, spec: &DeploymentSpec) -> Result<Placement> {
        let api = self.api();
        let zone = spec.zone.as_str();
        let project = spec.project.as_deref();
        retry(&self.retry, "resolve placement", || {
            Placement::resolve(api, zone, project)
        })
        .await
    }

    /// Descriptors for every resource `spec` names, nothing created yet
    fn describe(&self, spec: &DeploymentSpec, placement: Placement) -> Deployment {
        let naming = spec.naming.clone();

        let mut network = Network::new(naming.network(), &spec.network_offering, placement.clone())
            .with_retry(self.retry.clone());
        if let Some(offering) = &spec.vpc_offering {
            network = network.with_vpc(Vpc::new(naming.vpc(), offering, placement.clone()));
        }

        let keypair = spec.public_key.as_ref().map(|key| {
            Keypair::new(naming.keypair(), placement.clone()).with_public_key(key.clone())
        });

        let mut vms = Vec::with_capacity(spec.vms.len());
        let mut disks = Vec::with_capacity(spec.vms.len());
        for (i, vm_spec) in spec.vms.iter().enumerate() {
            let name = vm_spec.name.clone().unwrap_or_else(|| naming.vm(i));
            let vm = self.vm_descriptor(name, &placement, keypair.clone(), vm_spec);
            let vm_disks = (0..vm_spec.disk_count)
                .map(|j| {
                    self.disk_descriptor(&vm.name, j, vm_spec.disk_size_gb, &placement, spec)
                })
                .collect();
            vms.push(vm);
            disks.push(vm_disks);
        }

        Deployment {
            naming,
            placement,
            network,
            vms,
            disks,
            journal: Vec::new(),
        }
    }

    fn vm_descriptor(
        &self,
        name: String,
        placement: &Placement,
        keypair: Option<Keypair>,
        spec: &VmSpec,
    ) -> VirtualMachine {
        VirtualMachine::new(name, placement.clone())
            .with_machine_type(&spec.machine_type)
            .with_image(&spec.image)
            .with_keypair(keypair)
            .with_retry(self.retry.clone())
    }

    fn disk_descriptor(
        &self,
        vm_name: &str,
        index: usize,
        size_gb: u64,
        placement: &Placement,
        spec: &DeploymentSpec,
    ) -> Disk {
        Disk::new(
            Naming::disk(vm_name, index),
            size_gb,
            placement.clone(),
            Arc::clone(&self.disk_lock),
        )
        .with_offering(spec.disk_offering.clone())
        .with_retry(self.retry.clone())
    }

    /// Build everything `spec` describes
    ///
    /// On failure every step already taken is undone in reverse order and
    /// the original error is returned. Steps that could not be undone are
    /// reported through [`CloudStackError::Rollback`].
    pub async fn deploy(&self, spec: &DeploymentSpec) -> Result<Deployment> {
        if spec.vms.is_empty() {
            return Err(CloudStackError::InvalidConfig(
                "a deployment needs at least one machine".into(),
            ));
        }

        let placement = self.placement(spec).await?;
        let mut deployment = self.describe(spec, placement);
        tracing::info!(
            "Deploying run {} ({} machines) in zone {}",
            deployment.naming.run_uri(),
            deployment.vms.len(),
            deployment.placement.zone.name
        );

        match self.build(&mut deployment).await {
            Ok(()) => {
                tracing::info!("Run {} deployed", deployment.naming.run_uri());
                Ok(deployment)
            }
            Err(cause) => Err(self.rollback(&mut deployment, cause).await),
        }
    }

    async fn build(&self, d: &mut Deployment) -> Result<()> {
        let api = self.api();

        // A network or VPC found by name belongs to machines deployed
        // earlier in the run, so it is never rolled back here.
        d.network.create_vpc(api).await?;
        if d.network.vpc.as_ref().is_some_and(|vpc| !vpc.adopted) {
            d.journal.push(Created::Vpc);
        }
        d.network.create_network(api).await?;
        if !d.network.adopted {
            d.journal.push(Created::Network);
        }

        for i in 0..d.vms.len() {
            d.vms[i].join_network(&d.network)?;

            if d.vms[i].create_dependencies(api).await? {
                d.journal.push(Created::Keypair(i));
            }

            d.vms[i].create(api).await?;
            d.journal.push(Created::Vm(i));

            let outcome = d.vms[i].post_create(api).await;
            if d.vms[i].public_ip.is_some() {
                d.journal.push(Created::PublicIp(i));
            }
            if d.vms[i].static_nat {
                d.journal.push(Created::StaticNat(i));
            }
            outcome?;

            let vm_id = d.vms[i]
                .id
                .clone()
                .ok_or_else(|| CloudStackError::not_found("virtual machine", &d.vms[i].name))?;
            for j in 0..d.disks[i].len() {
                d.disks[i][j].create(api).await?;
                d.journal.push(Created::Volume(i, j));

                d.disks[i][j].attach(api, &vm_id).await?;
                d.journal.push(Created::Attachment(i, j));
            }
        }
        Ok(())
    }

    async fn rollback(&self, d: &mut Deployment, cause: CloudStackError) -> CloudStackError {
        tracing::warn!(
            "Run {} failed: {}; rolling back {} steps",
            d.naming.run_uri(),
            cause,
            d.journal.len()
        );

        let outcome = self.unwind(d).await;
        if outcome.failed.is_empty() {
            return cause;
        }
        CloudStackError::Rollback {
            cause: Box::new(cause),
            leaked: outcome.failed.into_iter().map(|r| r.action_id).collect(),
        }
    }

    /// Undo the journal newest-first, continuing past failures
    async fn unwind(&self, d: &mut Deployment) -> ApplyResult {
        let started = Instant::now();
        let api = self.api();
        let mut result = ApplyResult::new();

        while let Some(step) = d.journal.pop() {
            let label = step.label(d);
            match step.undo(d, api).await {
                Ok(()) => result.add_success(label, "removed".to_string()),
                Err(e) => {
                    tracing::error!("Failed to remove {}: {}", label, e);
                    result.add_failure(label, e.to_string());
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// Remove everything in `deployment`, best effort
    pub async fn teardown(&self, mut deployment: Deployment) -> ApplyResult {
        tracing::info!("Tearing down run {}", deployment.naming.run_uri());
        self.unwind(&mut deployment).await
    }

    /// Find every resource of the run described by `spec` by name
    ///
    /// The returned deployment's journal lists what exists, in creation
    /// order, so that tearing it down releases it in reverse.
    pub async fn recover(&self, spec: &DeploymentSpec) -> Result<Deployment> {
        let api = self.api();
        let placement = self.placement(spec).await?;
        let mut d = self.describe(&DeploymentSpec { vms: Vec::new(), ..spec.clone() }, placement);

        if let Some(vpc) = d.network.vpc.as_mut() {
            if let Some(found) = api.get_vpc(&vpc.name, d.placement.project_id()).await? {
                vpc.id = Some(found.id);
                d.journal.push(Created::Vpc);
            }
        }
        if let Some(found) = api
            .get_network(&d.network.name, d.placement.project_id())
            .await?
        {
            d.network.id = Some(found.id);
            d.journal.push(Created::Network);
        }

        let keypair = Keypair::new(d.naming.keypair(), d.placement.clone());
        let has_keypair = keypair.exists(api).await?;

        let naming = d.naming.clone();
        let project_id = d.placement.project_id().map(str::to_string);
        let project_id = project_id.as_deref();
        let mut names: Vec<String> = retry(&self.retry, "list machines", || {
            api.list_virtual_machines(project_id)
        })
        .await?
        .into_iter()
        .map(|vm| vm.name)
        .filter(|name| naming.owns_vm(name))
        .collect();
        names.sort_by_key(|name| naming.vm_number(name));

        // Volumes are matched by name rather than through their machine,
        // so disks of a machine that is already gone are found too.
        let mut volumes: Vec<(String, usize, Volume)> = retry(&self.retry, "list volumes", || {
            api.list_volumes(project_id)
        })
        .await?
        .into_iter()
        .filter_map(|volume| {
            let (vm, number) = naming.disk_owner(&volume.name)?;
            Some((vm, number, volume))
        })
        .collect();
        volumes.sort_by_key(|(vm, number, _)| (naming.vm_number(vm), *number));

        if names.is_empty() && has_keypair {
            // Keypair teardown hangs off a machine descriptor.
            let vm = self.vm_descriptor(
                naming.vm(0),
                &d.placement,
                Some(keypair.clone()),
                &VmSpec::default(),
            );
            d.vms.push(vm);
            d.disks.push(Vec::new());
            d.journal.push(Created::Keypair(0));
        }

        for (i, name) in names.into_iter().enumerate() {
            let keypair = has_keypair.then(|| keypair.clone());
            let mut vm = self.vm_descriptor(name, &d.placement, keypair, &VmSpec::default());
            if let Ok(scope) = d.network.ip_scope() {
                vm.ip_scope = Some(scope);
            }
            if i == 0 && has_keypair {
                d.journal.push(Created::Keypair(0));
            }
            self.recover_vm(&mut d, vm).await?;
        }

        for (vm_name, number, volume) in volumes {
            let i = match d.vms.iter().position(|vm| vm.name == vm_name) {
                Some(i) => i,
                None => {
                    tracing::debug!("Found volume {} of missing machine {}", volume.name, vm_name);
                    let holder =
                        self.vm_descriptor(vm_name.clone(), &d.placement, None, &VmSpec::default());
                    d.vms.push(holder);
                    d.disks.push(Vec::new());
                    d.vms.len() - 1
                }
            };
            let mut disk = self.disk_descriptor(&vm_name, number - 1, 0, &d.placement, spec);
            disk.track(volume);

            let j = d.disks[i].len();
            d.journal.push(Created::Volume(i, j));
            if disk.is_attached() {
                d.journal.push(Created::Attachment(i, j));
            }
            d.disks[i].push(disk);
        }

        self.recover_stray_ips(&mut d).await?;

        tracing::info!(
            "Run {}: found {} resources",
            d.naming.run_uri(),
            d.journal.len()
        );
        Ok(d)
    }

    async fn recover_vm(&self, d: &mut Deployment, mut vm: VirtualMachine) -> Result<()> {
        let api = self.api();
        let i = d.vms.len();

        if vm.refresh(api).await? {
            d.journal.push(Created::Vm(i));
            if vm.public_ip.is_some() {
                d.journal.push(Created::PublicIp(i));
                d.journal.push(Created::StaticNat(i));
            }
        }

        d.vms.push(vm);
        d.disks.push(Vec::new());
        Ok(())
    }

    /// Public IPs left in the run's network or VPC that are not bound to
    /// a machine, e.g. from a deploy that stopped before static NAT.
    async fn recover_stray_ips(&self, d: &mut Deployment) -> Result<()> {
        let api = self.api();
        let Ok(scope) = d.network.ip_scope() else {
            return Ok(());
        };

        let known: Vec<String> = d
            .vms
            .iter()
            .filter_map(|vm| vm.public_ip.as_ref().map(|ip| ip.id.clone()))
            .collect();
        let strays: Vec<_> = api
            .list_public_ips(&scope, d.placement.project_id())
            .await?
            .into_iter()
            .filter(|ip| !ip.issourcenat && !known.contains(&ip.id))
            .collect();

        for ip in strays {
            tracing::debug!("Found unbound public IP {}", ip.ipaddress);
            let i = d.vms.len();
            let mut holder = self.vm_descriptor(
                format!("{} (unbound)", ip.ipaddress),
                &d.placement,
                None,
                &VmSpec::default(),
            );
            holder.public_ip = Some(crate::resources::PublicIp {
                id: ip.id,
                address: ip.ipaddress,
            });
            d.vms.push(holder);
            d.disks.push(Vec::new());
            d.journal.push(Created::PublicIp(i));
        }
        Ok(())
    }

    /// Tear down everything of the run, found by name
    pub async fn teardown_by_name(&self, spec: &DeploymentSpec) -> Result<ApplyResult> {
        let deployment = self.recover(spec).await?;
        Ok(self.teardown(deployment).await)
    }

    /// Tear down one machine with its IP and disks, leaving shared
    /// resources (network, VPC, keypair) in place
    pub async fn teardown_vm(&self, spec: &DeploymentSpec, name: &str) -> Result<ApplyResult> {
        if !spec.naming.owns_vm(name) {
            return Err(CloudStackError::not_found("virtual machine", name));
        }

        let mut deployment = self.recover(spec).await?;
        let Some(index) = deployment.vms.iter().position(|vm| vm.name == name) else {
            return Err(CloudStackError::not_found("virtual machine", name));
        };
        deployment.journal.retain(|step| match *step {
            Created::Vm(i) | Created::PublicIp(i) | Created::StaticNat(i) => i == index,
            Created::Volume(i, _) | Created::Attachment(i, _) => i == index,
            _ => false,
        });
        Ok(self.teardown(deployment).await)
    }
}
