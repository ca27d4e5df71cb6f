//! Data disk descriptor
//!
//! Attach, detach and delete of every disk built by one orchestrator go
//! through a single shared lock; the plane rejects concurrent volume
//! operations against the same machine with "resource in use".

use super::{Placement, Resource};
use crate::api::{ControlPlane, CreateVolume};
use crate::error::{CloudStackError, Result};
use crate::model::{DiskOffering, Volume};
use async_trait::async_trait;
use std::sync::Arc;
use stratus_cloud::{RetryConfig, retry};
use tokio::sync::Mutex;

/// Lock shared by all disks of one orchestrator
pub type DiskLock = Arc<Mutex<()>>;

const DEVICE_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Smallest fixed-size offering that holds `size_gb`
///
/// Custom-size offerings (size 0) never match.
pub fn best_offering(offerings: &[DiskOffering], size_gb: u64) -> Option<&DiskOffering> {
    offerings
        .iter()
        .filter(|o| o.disksize > 0 && o.disksize >= size_gb)
        .min_by_key(|o| o.disksize)
}

/// Guest device path for a device index: 0 is `/dev/xvda`, 1 `/dev/xvdb`, ...
pub fn device_path(index: u32) -> Result<String> {
    DEVICE_LETTERS
        .get(index as usize)
        .map(|letter| format!("/dev/xvd{}", *letter as char))
        .ok_or(CloudStackError::InvalidDevice(index))
}

#[derive(Debug, Clone)]
pub struct Disk {
    pub name: String,
    pub id: Option<String>,
    pub size_gb: u64,
    /// Named offering that overrides size-based selection
    pub offering: Option<String>,
    pub offering_id: Option<String>,
    /// Machine the disk is attached to
    pub vm_id: Option<String>,
    pub device_id: Option<u32>,
    placement: Placement,
    lock: DiskLock,
    retry: RetryConfig,
}

impl Disk {
    pub fn new(name: impl Into<String>, size_gb: u64, placement: Placement, lock: DiskLock) -> Self {
        Self {
            name: name.into(),
            id: None,
            size_gb,
            offering: None,
            offering_id: None,
            vm_id: None,
            device_id: None,
            placement,
            lock,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_offering(mut self, offering: Option<String>) -> Self {
        self.offering = offering;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.vm_id.is_some()
    }

    /// Device path inside the guest, once attached
    pub fn mount_device(&self) -> Result<Option<String>> {
        self.device_id.map(device_path).transpose()
    }

    /// Reload id and attachment from the plane by name
    ///
    /// Returns false when no volume has this name.
    pub async fn refresh(&mut self, api: &dyn ControlPlane) -> Result<bool> {
        match api.get_volume(&self.name, self.placement.project_id()).await? {
            Some(volume) => {
                self.track(volume);
                Ok(true)
            }
            None => {
                self.id = None;
                self.vm_id = None;
                self.device_id = None;
                Ok(false)
            }
        }
    }

    /// Take id and attachment from a volume the plane reported
    pub fn track(&mut self, volume: Volume) {
        self.id = Some(volume.id);
        self.vm_id = volume.virtualmachineid;
        self.device_id = volume.deviceid;
    }

    async fn pick_offering(&self, api: &dyn ControlPlane) -> Result<DiskOffering> {
        let offerings = api.list_disk_offerings().await?;
        match &self.offering {
            Some(name) => offerings
                .into_iter()
                .find(|o| &o.name == name)
                .ok_or_else(|| CloudStackError::not_found("disk offering", name)),
            None => best_offering(&offerings, self.size_gb)
                .cloned()
                .ok_or(CloudStackError::NoDiskOffering {
                    size_gb: self.size_gb,
                }),
        }
    }

    fn volume_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| CloudStackError::not_found("volume", &self.name))
    }

    /// Attach to `vm_id` and record the device index the plane chose
    ///
    /// "Resource in use" answers are retried; the machine may still be
    /// settling after deploy.
    pub async fn attach(&mut self, api: &dyn ControlPlane, vm_id: &str) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock().await;

        let volume_id = self.volume_id()?;
        let volume = retry(&self.retry, "attach volume", || async move {
            api.attach_volume(volume_id, vm_id).await
        })
        .await?;
        tracing::info!(
            "Attached {} to {} as device {:?}",
            self.name,
            vm_id,
            volume.deviceid
        );
        self.vm_id = Some(vm_id.to_string());
        self.device_id = volume.deviceid;
        Ok(())
    }

    pub async fn detach(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock().await;
        self.detach_locked(api).await
    }

    async fn detach_locked(&mut self, api: &dyn ControlPlane) -> Result<()> {
        if !self.is_attached() {
            return Ok(());
        }
        match api.detach_volume(self.volume_id()?).await {
            Ok(_) => tracing::info!("Detached {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("{} already detached", self.name),
            Err(e) => return Err(e),
        }
        self.vm_id = None;
        self.device_id = None;
        Ok(())
    }
}

#[async_trait]
impl Resource for Disk {
    fn kind(&self) -> &'static str {
        "disk"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let project_id = self.placement.project_id();
        if let Some(existing) = api.get_volume(&self.name, project_id).await? {
            tracing::info!("Volume {} already exists ({}), reusing it", self.name, existing.id);
            self.track(existing);
            return Ok(());
        }

        let offering = self.pick_offering(api).await?;
        let request = CreateVolume {
            name: self.name.clone(),
            disk_offering_id: offering.id.clone(),
            zone_id: self.placement.zone_id().to_string(),
            project_id: project_id.map(str::to_string),
        };
        let volume = api.create_volume(&request).await?;
        tracing::info!(
            "Created volume {} ({}) from offering {}",
            self.name,
            volume.id,
            offering.name
        );

        self.offering_id = Some(offering.id);
        self.id = Some(volume.id);
        Ok(())
    }

    /// Detaches first when still attached
    async fn delete(&mut self, api: &dyn ControlPlane) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.lock().await;

        if self.id.is_none() && !self.refresh(api).await? {
            tracing::debug!("Volume {} already gone", self.name);
            return Ok(());
        }

        self.detach_locked(api).await?;
        match api.delete_volume(self.volume_id()?).await {
            Ok(()) => tracing::info!("Deleted volume {}", self.name),
            Err(e) if e.is_not_found() => tracing::debug!("Volume {} already gone", self.name),
            Err(e) => return Err(e),
        }
        self.id = None;
        Ok(())
    }

    async fn exists(&self, api: &dyn ControlPlane) -> Result<bool> {
        Ok(api
            .get_volume(&self.name, self.placement.project_id())
            .await?
            .is_some())
    }
}
