//! CloudStack provider implementation

use crate::api::ControlPlane;
use crate::client::CsClient;
use crate::config::CloudStackConfig;
use crate::error::{CloudStackError, Result};
use crate::orchestrator::{Deployment, DeploymentSpec, Orchestrator, VmSpec};
use crate::resources::Naming;
use async_trait::async_trait;
use std::sync::Arc;
use stratus_cloud::{
    Action, ActionType, ApplyResult, AuthStatus, CloudProvider, Plan, ProviderState,
    ResourceConfig, ResourceSet, ResourceState, ResourceStatus, RetryConfig,
};

/// Resource type handled by [`CloudStackProvider::plan`]
pub const VM_RESOURCE: &str = "vm";

/// CloudStack provider for one run
pub struct CloudStackProvider {
    config: CloudStackConfig,
    naming: Naming,
    public_key: Option<String>,
    orchestrator: Orchestrator,
}

impl CloudStackProvider {
    /// Provider talking to the endpoint in `config` over HTTP
    pub fn new(config: CloudStackConfig, naming: Naming) -> Result<Self> {
        let client = CsClient::new(&config)?;
        Ok(Self::with_control_plane(config, naming, Arc::new(client)))
    }

    pub fn with_control_plane(
        config: CloudStackConfig,
        naming: Naming,
        api: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            config,
            naming,
            public_key: None,
            orchestrator: Orchestrator::new(api),
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.orchestrator = self.orchestrator.with_retry(retry);
        self
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Spec of this run with the given machines
    pub fn spec(&self, vms: Vec<VmSpec>) -> DeploymentSpec {
        let mut spec = DeploymentSpec::from_config(&self.config, self.naming.clone());
        spec.public_key = self.public_key.clone();
        spec.vms = vms;
        spec
    }

    /// Deploy `vms` into this run's network
    pub async fn deploy(&self, vms: Vec<VmSpec>) -> Result<Deployment> {
        self.orchestrator.deploy(&self.spec(vms)).await
    }

    async fn machines(&self) -> Result<Vec<crate::model::VirtualMachine>> {
        let project = match &self.config.project {
            Some(name) => Some(
                self.orchestrator
                    .api()
                    .get_project(name)
                    .await?
                    .ok_or_else(|| CloudStackError::not_found("project", name))?,
            ),
            None => None,
        };
        let machines = self
            .orchestrator
            .api()
            .list_virtual_machines(project.as_ref().map(|p| p.id.as_str()))
            .await?;
        Ok(machines
            .into_iter()
            .filter(|vm| self.naming.owns_vm(&vm.name))
            .collect())
    }
}

fn vm_spec_from(resource: &ResourceConfig) -> VmSpec {
    let defaults = VmSpec::default();
    VmSpec {
        name: Some(resource.id.clone()),
        machine_type: resource
            .get_config("machine_type")
            .unwrap_or(defaults.machine_type),
        image: resource.get_config("image").unwrap_or(defaults.image),
        disk_count: resource.get_config("disk_count").unwrap_or(0),
        disk_size_gb: resource.get_config("disk_size_gb").unwrap_or(0),
    }
}

fn status_of(state: Option<&str>) -> ResourceStatus {
    match state {
        Some("Running") => ResourceStatus::Running,
        Some("Stopped") => ResourceStatus::Stopped,
        Some("Starting") | Some("Creating") => ResourceStatus::Creating,
        Some("Stopping") | Some("Destroying") | Some("Expunging") => ResourceStatus::Deleting,
        Some("Destroyed") | Some("Expunged") => ResourceStatus::Deleted,
        Some("Error") => ResourceStatus::Error,
        _ => ResourceStatus::Unknown,
    }
}

#[async_trait]
impl CloudProvider for CloudStackProvider {
    fn name(&self) -> &str {
        "cloudstack"
    }

    fn display_name(&self) -> &str {
        "CloudStack"
    }

    async fn check_auth(&self) -> stratus_cloud::Result<AuthStatus> {
        match self.orchestrator.api().get_zone(&self.config.zone).await {
            Ok(Some(zone)) => Ok(AuthStatus::ok(format!(
                "{} (zone {})",
                self.config.api_url, zone.name
            ))),
            Ok(None) => Ok(AuthStatus::ok(format!(
                "{} (zone {} not visible)",
                self.config.api_url, self.config.zone
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn get_state(&self) -> stratus_cloud::Result<ProviderState> {
        let mut state = ProviderState::new();

        for vm in self.machines().await? {
            let mut resource = ResourceState::new(&vm.id, VM_RESOURCE)
                .with_status(status_of(vm.state.as_deref()));
            resource.set_attribute("name", serde_json::json!(vm.name));
            if let Some(ip) = vm.internal_ip() {
                resource.set_attribute("internal_ip", serde_json::json!(ip));
            }
            if let Some(ip) = &vm.publicip {
                resource.set_attribute("public_ip", serde_json::json!(ip));
            }
            state.add(vm.name.clone(), resource);
        }

        Ok(state)
    }

    async fn plan(&self, desired: &ResourceSet) -> stratus_cloud::Result<Plan> {
        let current = self.get_state().await?;
        let mut actions = Vec::new();

        let mut wanted = desired.by_type(VM_RESOURCE);
        wanted.sort_by(|a, b| a.id.cmp(&b.id));

        for resource in wanted {
            if !self.naming.owns_vm(&resource.id) {
                return Err(CloudStackError::InvalidConfig(format!(
                    "{} is not a machine name of run {}",
                    resource.id,
                    self.naming.run_uri()
                ))
                .into());
            }

            let action = match current.get(&resource.id) {
                None => Action::new(
                    ActionType::Create,
                    VM_RESOURCE,
                    &resource.id,
                    format!("Create VM {}", resource.id),
                )
                .with_detail("provider", serde_json::json!("cloudstack"))
                .with_detail("zone", serde_json::json!(self.config.zone))
                .with_detail("spec", serde_json::to_value(vm_spec_from(resource))?),
                Some(_) => Action::new(
                    ActionType::NoOp,
                    VM_RESOURCE,
                    &resource.id,
                    format!("VM {} already exists", resource.id),
                ),
            };
            actions.push(action);
        }

        for name in current.names() {
            if desired.get(VM_RESOURCE, name).is_none() {
                tracing::debug!("VM {} exists but is not desired (will not auto-delete)", name);
            }
        }

        Ok(Plan::new(actions))
    }

    async fn apply(&self, plan: &Plan) -> stratus_cloud::Result<ApplyResult> {
        let start = std::time::Instant::now();
        let mut result = ApplyResult::new();

        let creates = plan.actions_by_type(ActionType::Create);
        let mut vms = Vec::with_capacity(creates.len());
        for action in &creates {
            let spec = match action.details.get("spec") {
                Some(value) => serde_json::from_value(value.clone())?,
                None => VmSpec {
                    name: Some(action.resource_id.clone()),
                    ..VmSpec::default()
                },
            };
            vms.push(spec);
        }

        if !vms.is_empty() {
            match self.deploy(vms).await {
                Ok(deployment) => {
                    for vm in &deployment.vms {
                        let address = vm
                            .public_ip
                            .as_ref()
                            .map_or("-", |ip| ip.address.as_str());
                        result.add_success(
                            format!("create-{}", vm.name),
                            format!("Created VM {} ({})", vm.name, address),
                        );
                    }
                }
                Err(e) => {
                    for action in &creates {
                        result.add_failure(action.id.clone(), e.to_string());
                    }
                }
            }
        }

        for action in plan.actions_by_type(ActionType::Delete) {
            match self.destroy(&action.resource_id).await {
                Ok(()) => result.add_success(
                    action.id.clone(),
                    format!("Deleted VM {}", action.resource_id),
                ),
                Err(e) => result.add_failure(action.id.clone(), e.to_string()),
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn destroy(&self, resource_id: &str) -> stratus_cloud::Result<()> {
        let result = self
            .orchestrator
            .teardown_vm(&self.spec(Vec::new()), resource_id)
            .await?;
        match result.failed.first() {
            None => Ok(()),
            Some(failure) => Err(stratus_cloud::CloudError::ApiError(format!(
                "{}: {}",
                failure.action_id,
                failure.error.as_deref().unwrap_or("unknown error")
            ))),
        }
    }

    async fn destroy_all(&self) -> stratus_cloud::Result<ApplyResult> {
        Ok(self
            .orchestrator
            .teardown_by_name(&self.spec(Vec::new()))
            .await?)
    }
}
