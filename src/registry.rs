//! Process-wide entry point
//!
//! A [`Registry`] holds the device catalogs, the LiveData handle generator shared by
//! every session it creates, and the most recent error text of any of them.
//! Construct one explicitly and clone it freely; clones share state.

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::catalog::{DeviceCatalog, DeviceDescriptor};
use crate::config::SessionConfig;
use crate::device::{Device, ErrorSlot};
use crate::livedata::{HandleGenerator, LiveDataHandle};
use crate::{DeviceError, Result};

struct RegistryInner {
    catalogs: Mutex<Vec<Arc<dyn DeviceCatalog>>>,
    handles: Arc<HandleGenerator>,
    last_error: ErrorSlot,
    config: SessionConfig,
}

/// Catalogs, shared LiveData handles and last-error reporting.
///
/// # Example
///
/// ```rust,no_run
/// use vnetlink::{Registry, sim::SimCatalog};
///
/// # #[tokio::main]
/// # async fn main() -> vnetlink::Result<()> {
/// let registry = Registry::new();
/// registry.add_catalog(SimCatalog::with_units(["SIM001"]));
///
/// if let Some(device) = registry.find_device("SIM001").await? {
///     device.open().await?;
///     device.go_online().await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("catalogs", &self.lock_catalogs().len())
            .field("last_error", &self.last_error())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Sessions created by this registry use `config`.
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                catalogs: Mutex::new(Vec::new()),
                handles: Arc::new(HandleGenerator::new()),
                last_error: Arc::new(Mutex::new(None)),
                config,
            }),
        }
    }

    fn lock_catalogs(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn DeviceCatalog>>> {
        self.inner.catalogs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn add_catalog(&self, catalog: impl DeviceCatalog) {
        self.lock_catalogs().push(Arc::new(catalog));
    }

    fn catalogs(&self) -> Vec<Arc<dyn DeviceCatalog>> {
        self.lock_catalogs().clone()
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            let mut last_error =
                self.inner.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *last_error = Some(error.to_string());
        }
        result
    }

    /// Every unit visible through any catalog, in catalog order.
    pub async fn find_all_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut found = Vec::new();
        for catalog in self.catalogs() {
            found.extend(self.record(catalog.find_all_devices().await)?);
        }
        debug!(count = found.len(), "Enumerated devices");
        Ok(found)
    }

    /// A closed session for the unit with `serial`, or `None` if no catalog lists it.
    pub async fn find_device(&self, serial: &str) -> Result<Option<Device>> {
        for catalog in self.catalogs() {
            let descriptors = self.record(catalog.find_all_devices().await)?;
            if let Some(descriptor) = descriptors.into_iter().find(|d| d.serial == serial) {
                let transport = self.record(catalog.connect(&descriptor).await)?;
                info!(%descriptor, "Device found");
                return Ok(Some(self.session(descriptor, transport)));
            }
        }
        Ok(None)
    }

    /// Like [`find_device`](Self::find_device), but a missing unit is an error.
    pub async fn device(&self, serial: &str) -> Result<Device> {
        let found = self.find_device(serial).await?;
        self.record(found.ok_or_else(|| DeviceError::not_found(format!("device {}", serial))))
    }

    fn session(
        &self,
        descriptor: DeviceDescriptor,
        transport: Arc<dyn crate::Transport>,
    ) -> Device {
        Device::with_context(
            descriptor,
            transport,
            self.inner.config.clone(),
            self.inner.handles.clone(),
            Some(self.inner.last_error.clone()),
        )
    }

    /// Allocate a LiveData handle unique across every session of this registry.
    pub fn new_live_data_handle(&self) -> LiveDataHandle {
        self.inner.handles.next_handle()
    }

    /// Text of the most recent failure in this registry or any of its sessions.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn clear_last_error(&self) {
        *self.inner.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCatalog;

    #[tokio::test]
    async fn finds_units_across_catalogs() {
        let registry = Registry::new();
        registry.add_catalog(SimCatalog::with_units(["A1", "A2"]));
        registry.add_catalog(SimCatalog::with_units(["B1"]));

        let devices = registry.find_all_devices().await.unwrap();
        let serials: Vec<_> = devices.into_iter().map(|d| d.serial).collect();
        assert_eq!(serials, vec!["A1", "A2", "B1"]);

        let device = registry.find_device("B1").await.unwrap().unwrap();
        assert_eq!(device.serial(), "B1");
        assert!(registry.find_device("C9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_device_records_last_error() {
        let registry = Registry::new();
        let err = registry.device("NOPE").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(registry.last_error().unwrap().contains("NOPE"));
        registry.clear_last_error();
        assert!(registry.last_error().is_none());
    }

    #[tokio::test]
    async fn device_errors_reach_the_registry() {
        let registry = Registry::new();
        registry.add_catalog(SimCatalog::with_units(["A1"]));
        let device = registry.device("A1").await.unwrap();
        assert!(device.go_online().await.is_err());
        assert_eq!(registry.last_error(), device.last_error());
    }

    #[test]
    fn handles_are_shared_between_clones() {
        let registry = Registry::new();
        let clone = registry.clone();
        assert_eq!(registry.new_live_data_handle(), 1);
        assert_eq!(clone.new_live_data_handle(), 2);
    }
}
