use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::instance::Instance;
use crate::physical::SelectedDevice;

/// A logical device with a single graphics queue.
///
/// Holds its parent instance, so the instance is destroyed only after every
/// device created from it.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    graphics_queue: (vk::Queue, u32),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("graphics_queue_family", &self.graphics_queue.1)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: All objects derived from this device should be dropped
        //before this device is dropped. Queues need no destruction.
        unsafe { self.handle.destroy_device(None) };
    }
}

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),
}

/// Device features the application turns on. Selection already rejected
/// devices without geometry shaders.
pub fn required_device_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default().geometry_shader(true)
}

impl Device {
    /// Create a logical device on the selected physical device with one
    /// queue from its graphics family.
    pub fn new(
        instance: &Arc<Instance>,
        selected: &SelectedDevice,
    ) -> Result<Self, CreateDeviceError> {
        let physical_device = selected.candidate.handle;
        let family = selected.graphics_queue_family;

        let priorities = [1.0_f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family)
            .queue_priorities(&priorities)];
        let features = required_device_features();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&features);

        //SAFETY: physical_device was enumerated from instance, create_info
        //is valid and outlives the call
        let handle =
            unsafe { instance.create_ash_device(physical_device, &create_info) }
                .map_err(CreateDeviceError::DeviceCreationFailed)?;
        tracing::debug!(
            "Logical device {:?} created on {}",
            handle.handle(),
            selected.candidate.name
        );

        //SAFETY: the device was just created with one queue in this family
        let queue = unsafe { handle.get_device_queue(family, 0) };

        Ok(Self {
            parent: Arc::clone(instance),
            handle,
            graphics_queue: (queue, family),
        })
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue.0
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue.1
    }

    /// Wait until all submitted work on this device has completed.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_features_only_enable_geometry_shader() {
        let features = required_device_features();

        assert_eq!(features.geometry_shader, vk::TRUE);
        assert_eq!(features.tessellation_shader, vk::FALSE);
        assert_eq!(features.sampler_anisotropy, vk::FALSE);
    }
}
