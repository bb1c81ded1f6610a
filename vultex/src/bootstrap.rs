//! The ordered startup sequence from a ready window to a usable graphics
//! queue.
//!
//! [`Bootstrap::new`] walks [`BootstrapStage`] forward one step at a time and
//! stops at the first failure. Every Vulkan object acquired so far is owned by
//! an RAII wrapper, so an early return releases them in reverse order. A
//! finished [`Bootstrap`] owns the device, and through it the instance, until
//! [`Bootstrap::teardown`].

use std::sync::Arc;

use raw_window_handle::HasDisplayHandle;
use thiserror::Error;

use crate::device::{CreateDeviceError, Device};
use crate::instance::{
    FetchPhysicalDeviceError, Instance, InstanceConfig, InstanceCreationError,
    negotiate_capabilities,
};
use crate::physical::{SelectDeviceError, select_physical_device};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapStage {
    Uninitialized,
    WindowReady,
    CapabilitiesChecked,
    InstanceCreated,
    DebugMessengerReady,
    DeviceSelected,
    LogicalDeviceReady,
    QueueReady,
    Running,
    TornDown,
}

/// Tracks the current stage and refuses to go backwards or repeat.
#[derive(Debug)]
pub struct StageTracker {
    current: BootstrapStage,
}

#[derive(Debug, Error)]
#[error("Invalid bootstrap transition {from:?} -> {to:?}")]
pub struct StageOrderError {
    pub from: BootstrapStage,
    pub to: BootstrapStage,
}

impl StageTracker {
    pub fn new(start: BootstrapStage) -> Self {
        Self { current: start }
    }

    pub fn current(&self) -> BootstrapStage {
        self.current
    }

    /// Move to `next`. Optional stages may be skipped, but a stage can never
    /// be entered twice or after a later one.
    pub fn advance(
        &mut self,
        next: BootstrapStage,
    ) -> Result<(), StageOrderError> {
        if next <= self.current {
            return Err(StageOrderError {
                from: self.current,
                to: next,
            });
        }
        tracing::debug!("Bootstrap stage: {:?} -> {:?}", self.current, next);
        self.current = next;
        Ok(())
    }
}

/// Fatal bootstrap failures. None of them are retried.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Could not load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("Missing required instance extensions: {0:?}")]
    MissingRequiredCapability(Vec<String>),
    #[error("Validation layers requested, but not available: {0:?}")]
    MissingRequestedDiagnosticLayer(Vec<String>),
    #[error("Instance creation failed: {0}")]
    InstanceCreationFailed(InstanceCreationError),
    #[error("Failed to find GPUs with Vulkan support")]
    NoDevicesFound,
    #[error("Failed to find a suitable GPU among {0} candidates")]
    NoSuitableDevice(usize),
    #[error("Error enumerating GPUs: {0}")]
    DeviceEnumeration(#[from] FetchPhysicalDeviceError),
    #[error("Logical device creation failed: {0}")]
    LogicalDeviceCreationFailed(#[from] CreateDeviceError),
    #[error(transparent)]
    StageOrder(#[from] StageOrderError),
}

impl From<InstanceCreationError> for BootstrapError {
    fn from(value: InstanceCreationError) -> Self {
        match value {
            InstanceCreationError::MissingExtensions(names) => {
                Self::MissingRequiredCapability(names)
            }
            InstanceCreationError::MissingLayers(names) => {
                Self::MissingRequestedDiagnosticLayer(names)
            }
            other => Self::InstanceCreationFailed(other),
        }
    }
}

impl From<SelectDeviceError> for BootstrapError {
    fn from(value: SelectDeviceError) -> Self {
        match value {
            SelectDeviceError::NoDevicesFound => Self::NoDevicesFound,
            SelectDeviceError::NoSuitableDevice(count) => {
                Self::NoSuitableDevice(count)
            }
            SelectDeviceError::Fetch(e) => Self::DeviceEnumeration(e),
        }
    }
}

/// Everything acquired during startup.
///
/// The device holds the only remaining `Arc<Instance>`, so dropping it
/// releases the device, then the debug messenger, then the instance.
#[derive(Debug)]
pub struct Bootstrap {
    device: Device,
    score: i64,
    stages: StageTracker,
}

impl Bootstrap {
    /// Run every stage from `WindowReady` to `QueueReady` against the window
    /// behind `display_handle_source`, which must already be open.
    pub fn new(
        config: &InstanceConfig,
        display_handle_source: &impl HasDisplayHandle,
    ) -> Result<Self, BootstrapError> {
        let _span = tracing::info_span!("bootstrap").entered();
        tracing::info!("Initialize Vulkan");
        let mut stages = StageTracker::new(BootstrapStage::Uninitialized);
        stages.advance(BootstrapStage::WindowReady)?;

        //SAFETY: Loading the Vulkan library runs its initialization code. We
        //trust the system loader. Every object derived from the entry is
        //owned by the Instance that takes this entry.
        let entry = unsafe { ash::Entry::load() }?;

        let capabilities =
            negotiate_capabilities(&entry, config, display_handle_source)?;
        stages.advance(BootstrapStage::CapabilitiesChecked)?;

        //SAFETY: see the entry load above
        let instance = Arc::new(unsafe {
            Instance::new(entry, config, &capabilities)
        }?);
        stages.advance(BootstrapStage::InstanceCreated)?;
        if instance.has_debug_messenger() {
            tracing::info!("Initialize debug messenger");
            stages.advance(BootstrapStage::DebugMessengerReady)?;
        }

        let selected = select_physical_device(instance.gpu_candidates()?)?;
        stages.advance(BootstrapStage::DeviceSelected)?;

        let device = Device::new(&instance, &selected)?;
        stages.advance(BootstrapStage::LogicalDeviceReady)?;
        tracing::debug!(
            "Graphics queue {:?} from family {}",
            device.graphics_queue(),
            device.graphics_queue_family()
        );
        stages.advance(BootstrapStage::QueueReady)?;

        Ok(Self {
            device,
            score: selected.score,
            stages,
        })
    }

    pub fn stage(&self) -> BootstrapStage {
        self.stages.current()
    }

    /// Suitability score of the selected GPU.
    pub fn device_score(&self) -> i64 {
        self.score
    }

    pub fn mark_running(&mut self) -> Result<(), StageOrderError> {
        self.stages.advance(BootstrapStage::Running)
    }

    /// Release the device, the debug messenger and the instance, in that
    /// order.
    pub fn teardown(mut self) {
        tracing::info!("Cleanup resources");
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Error while waiting for device idle: {e}");
        }
        if let Err(e) = self.stages.advance(BootstrapStage::TornDown) {
            tracing::warn!("{e}");
        }
    }
}
