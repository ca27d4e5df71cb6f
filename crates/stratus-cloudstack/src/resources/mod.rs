//! Resource descriptors
//!
//! Each descriptor carries the names it was built with plus whatever ids
//! the control plane assigned. Nothing is cached between runs: a
//! descriptor whose id is unknown finds itself again by name.

pub mod disk;
pub mod keypair;
pub mod network;
pub mod vm;
pub mod vpc;

pub use disk::{Disk, best_offering, device_path};
pub use keypair::Keypair;
pub use network::Network;
pub use vm::{PublicIp, VirtualMachine};
pub use vpc::Vpc;

use crate::api::ControlPlane;
use crate::error::{CloudStackError, Result};
use crate::model::{Project, Zone};
use async_trait::async_trait;

const NAME_PREFIX: &str = "stratus";
const MAX_RUN_URI_LEN: usize = 12;

/// Create / delete / exists lifecycle shared by every descriptor
#[async_trait]
pub trait Resource: Send + Sync {
    /// Short type label used in logs and errors ("vm", "disk", ...)
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str;

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()>;

    /// Remove the resource; removing something already gone succeeds
    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()>;

    /// Name lookup against the plane, never cached
    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool>;
}

/// Zone and optional project every resource of a deployment lives in
#[derive(Debug, Clone)]
pub struct Placement {
    pub zone: Zone,
    pub project: Option<Project>,
}

impl Placement {
    /// Resolve names to ids; an unknown zone or a configured project
    /// that does not resolve is an error.
    pub async fn resolve(
        api: &dyn ControlPlane,
        zone: &str,
        project: Option<&str>,
    ) -> Result<Self> {
        let zone = api
            .get_zone(zone)
            .await?
            .ok_or_else(|| CloudStackError::not_found("zone", zone))?;

        let project = match project {
            Some(name) => Some(
                api.get_project(name)
                    .await?
                    .ok_or_else(|| CloudStackError::not_found("project", name))?,
            ),
            None => None,
        };

        tracing::debug!(
            "Placement: zone {} ({}), project {:?}",
            zone.name,
            zone.id,
            project.as_ref().map(|p| &p.name)
        );
        Ok(Self { zone, project })
    }

    pub fn zone_id(&self) -> &str {
        &self.zone.id
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.id.as_str())
    }
}

/// Resource names derived from a run id
///
/// Names are the only identity that survives a restart, so every
/// resource of a run must be derivable from the run id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    run_uri: String,
}

impl Naming {
    pub fn new(run_uri: impl Into<String>) -> Result<Self> {
        let run_uri = run_uri.into();
        let valid = !run_uri.is_empty()
            && run_uri.len() <= MAX_RUN_URI_LEN
            && run_uri
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(CloudStackError::InvalidConfig(format!(
                "run id must be 1-{} lowercase letters or digits, got '{}'",
                MAX_RUN_URI_LEN, run_uri
            )));
        }
        Ok(Self { run_uri })
    }

    pub fn run_uri(&self) -> &str {
        &self.run_uri
    }

    pub fn network(&self) -> String {
        format!("{}-network-{}", NAME_PREFIX, self.run_uri)
    }

    pub fn vpc(&self) -> String {
        format!("{}-vpc-{}", NAME_PREFIX, self.run_uri)
    }

    pub fn keypair(&self) -> String {
        format!("{}-sshkey-{}", NAME_PREFIX, self.run_uri)
    }

    /// VM names are 1-based: `stratus-<run>-1`, `stratus-<run>-2`, ...
    pub fn vm(&self, index: usize) -> String {
        format!("{}{}", self.vm_prefix(), index + 1)
    }

    pub fn disk(vm_name: &str, index: usize) -> String {
        format!("disk-{}-{}", vm_name, index + 1)
    }

    fn vm_prefix(&self) -> String {
        format!("{}-{}-", NAME_PREFIX, self.run_uri)
    }

    /// Whether a VM name belongs to this run
    pub fn owns_vm(&self, name: &str) -> bool {
        self.vm_number(name).is_some()
    }

    /// 1-based position of a machine of this run, taken from its name
    pub fn vm_number(&self, name: &str) -> Option<usize> {
        name.strip_prefix(&self.vm_prefix()).and_then(parse_number)
    }

    /// Owning machine name and 1-based disk number of a data disk of
    /// this run, e.g. `disk-stratus-run1-2-3` is disk 3 of `stratus-run1-2`
    pub fn disk_owner(&self, name: &str) -> Option<(String, usize)> {
        let (vm, number) = name.strip_prefix("disk-")?.rsplit_once('-')?;
        if !self.owns_vm(vm) {
            return None;
        }
        Some((vm.to_string(), parse_number(number)?))
    }
}

/// Positive number written as plain ASCII digits
fn parse_number(text: &str) -> Option<usize> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        let naming = Naming::new("a1b2c3d4").unwrap();
        assert_eq!(naming.network(), "stratus-network-a1b2c3d4");
        assert_eq!(naming.vpc(), "stratus-vpc-a1b2c3d4");
        assert_eq!(naming.keypair(), "stratus-sshkey-a1b2c3d4");
        assert_eq!(naming.vm(0), "stratus-a1b2c3d4-1");
        assert_eq!(Naming::disk("stratus-a1b2c3d4-1", 1), "disk-stratus-a1b2c3d4-1-2");
    }

    #[test]
    fn test_owns_vm() {
        let naming = Naming::new("run1").unwrap();
        assert!(naming.owns_vm("stratus-run1-1"));
        assert!(naming.owns_vm("stratus-run1-12"));
        assert!(!naming.owns_vm("stratus-run1-"));
        assert!(!naming.owns_vm("stratus-run10-1"));
        assert!(!naming.owns_vm("stratus-run1-1-extra"));
        assert!(!naming.owns_vm("web-1"));
    }

    #[test]
    fn test_vm_number() {
        let naming = Naming::new("run1").unwrap();
        assert_eq!(naming.vm_number("stratus-run1-2"), Some(2));
        assert_eq!(naming.vm_number("stratus-run1-10"), Some(10));
        assert_eq!(naming.vm_number("stratus-run1-x"), None);
    }

    #[test]
    fn test_disk_owner() {
        let naming = Naming::new("run1").unwrap();
        assert_eq!(
            naming.disk_owner("disk-stratus-run1-2-3"),
            Some(("stratus-run1-2".to_string(), 3))
        );
        assert_eq!(
            naming.disk_owner(&Naming::disk(&naming.vm(9), 0)),
            Some(("stratus-run1-10".to_string(), 1))
        );
        assert_eq!(naming.disk_owner("disk-stratus-run2-1-1"), None);
        assert_eq!(naming.disk_owner("disk-stratus-run1-1-"), None);
        assert_eq!(naming.disk_owner("disk-stratus-run1-1-0"), None);
        assert_eq!(naming.disk_owner("disk-web-1-1"), None);
        assert_eq!(naming.disk_owner("stratus-run1-1-1"), None);
    }

    #[test]
    fn test_invalid_run_uri() {
        assert!(Naming::new("").is_err());
        assert!(Naming::new("Has-Caps").is_err());
        assert!(Naming::new("waytoolongrunid").is_err());
    }
}
