//! Physical device scoring and selection.
//!
//! Everything here works on [`GpuCandidate`], a snapshot of the facts read
//! from a `VkPhysicalDevice`. Querying happens once per device in
//! [`Instance::gpu_candidates`](crate::instance::Instance::gpu_candidates);
//! the policy below never calls into Vulkan.

use ash::vk;
use thiserror::Error;

use crate::instance::FetchPhysicalDeviceError;

/// Score reserved for devices that cannot run the application.
pub const DISQUALIFIED: i64 = 0;

/// Flat bonus for discrete GPUs.
pub const DISCRETE_GPU_BONUS: i64 = 1000;

/// Closed set of device classes reported by Vulkan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceClass {
    fn from(value: vk::PhysicalDeviceType) -> Self {
        match value {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceClass::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceClass::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceClass::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceClass::Cpu,
            _ => DeviceClass::Other,
        }
    }
}

/// A physical device plus the properties the selection policy looks at.
///
/// The handle is owned by the parent instance and is only valid while it
/// lives.
#[derive(Debug, Clone)]
pub struct GpuCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub class: DeviceClass,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl GpuCandidate {
    pub fn from_raw_parts(
        handle: vk::PhysicalDevice,
        properties: &vk::PhysicalDeviceProperties,
        features: &vk::PhysicalDeviceFeatures,
        queue_families: Vec<vk::QueueFamilyProperties>,
    ) -> Self {
        let name = properties
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy()
            .into_owned();

        Self {
            handle,
            name,
            class: properties.device_type.into(),
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
            queue_families,
        }
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: find_graphics_queue_family(&self.queue_families),
        }
    }
}

/// Queue families the application needs on a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some()
    }
}

/// Index of the first queue family that supports graphics, in reported
/// order.
pub fn find_graphics_queue_family(
    queue_families: &[vk::QueueFamilyProperties],
) -> Option<u32> {
    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|idx| idx as u32)
}

/// Rate how well a device fits the application. `0` means unusable.
///
/// Vulkan requires `maxImageDimension2D >= 4096`, so a qualifying device
/// never scores `0` on a conformant driver. A driver reporting `0` is
/// flagged, and a non-discrete device doing so ends up disqualified.
pub fn rate_suitability(candidate: &GpuCandidate) -> i64 {
    tracing::debug!(
        "Device GPU {} of type: {:?}, max image dimension 2d: {}",
        candidate.name,
        candidate.class,
        candidate.max_image_dimension_2d
    );
    tracing::debug!(
        "Device GPU {} support geometry shader: {}",
        candidate.name,
        candidate.geometry_shader
    );

    if !candidate.geometry_shader {
        return DISQUALIFIED;
    }

    let indices = candidate.queue_family_indices();
    tracing::debug!(
        "Device GPU {} support graphics queue: {}",
        candidate.name,
        indices.is_complete()
    );
    if !indices.is_complete() {
        return DISQUALIFIED;
    }

    if candidate.max_image_dimension_2d == 0 {
        tracing::warn!(
            "Device GPU {} reports a max image dimension 2d of 0, which \
             no conformant driver does",
            candidate.name
        );
    }

    let mut score = 0;
    if candidate.class == DeviceClass::Discrete {
        score += DISCRETE_GPU_BONUS;
    }
    score += i64::from(candidate.max_image_dimension_2d);

    tracing::debug!("Device GPU {} got score: {}", candidate.name, score);
    score
}

#[derive(Debug, Error)]
pub enum SelectDeviceError {
    #[error("Failed to find GPUs with Vulkan support")]
    NoDevicesFound,
    #[error("Failed to find a suitable GPU among {0} candidates")]
    NoSuitableDevice(usize),
    #[error(transparent)]
    Fetch(#[from] FetchPhysicalDeviceError),
}

/// The device chosen by [`select_physical_device`].
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub candidate: GpuCandidate,
    pub score: i64,
    pub graphics_queue_family: u32,
}

/// Pick the highest scoring candidate. On a tie the one enumerated first
/// wins.
pub fn select_physical_device(
    candidates: Vec<GpuCandidate>,
) -> Result<SelectedDevice, SelectDeviceError> {
    if candidates.is_empty() {
        return Err(SelectDeviceError::NoDevicesFound);
    }
    tracing::debug!("Detected {} devices", candidates.len());

    let candidate_count = candidates.len();
    let mut best: Option<SelectedDevice> = None;
    for candidate in candidates {
        let score = rate_suitability(&candidate);
        if score <= DISQUALIFIED {
            continue;
        }
        let Some(graphics_queue_family) =
            candidate.queue_family_indices().graphics
        else {
            continue;
        };
        // Strictly greater keeps the earliest candidate on ties.
        if best.as_ref().is_none_or(|current| score > current.score) {
            best = Some(SelectedDevice {
                candidate,
                score,
                graphics_queue_family,
            });
        }
    }

    let selected =
        best.ok_or(SelectDeviceError::NoSuitableDevice(candidate_count))?;
    tracing::info!(
        "Device chosen: {} with score: {}",
        selected.candidate.name,
        selected.score
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(
        raw: u64,
        class: DeviceClass,
        max_image_dimension_2d: u32,
        geometry_shader: bool,
    ) -> GpuCandidate {
        GpuCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            class,
            max_image_dimension_2d,
            geometry_shader,
            queue_families: vec![family(vk::QueueFlags::GRAPHICS)],
        }
    }

    #[test]
    fn locator_returns_first_graphics_family() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];

        assert_eq!(find_graphics_queue_family(&families), Some(1));
    }

    #[test]
    fn locator_is_absent_without_graphics() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];

        assert_eq!(find_graphics_queue_family(&families), None);
        assert_eq!(find_graphics_queue_family(&[]), None);
    }

    #[test]
    fn device_class_maps_vulkan_types() {
        assert_eq!(
            DeviceClass::from(vk::PhysicalDeviceType::DISCRETE_GPU),
            DeviceClass::Discrete
        );
        assert_eq!(
            DeviceClass::from(vk::PhysicalDeviceType::INTEGRATED_GPU),
            DeviceClass::Integrated
        );
        assert_eq!(
            DeviceClass::from(vk::PhysicalDeviceType::OTHER),
            DeviceClass::Other
        );
    }

    #[test]
    fn candidate_from_raw_parts_reads_limits_and_features() {
        let properties = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: 16384,
                ..Default::default()
            },
            ..Default::default()
        };
        let features = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            ..Default::default()
        };

        let candidate = GpuCandidate::from_raw_parts(
            vk::PhysicalDevice::from_raw(7),
            &properties,
            &features,
            vec![family(vk::QueueFlags::GRAPHICS)],
        );

        assert_eq!(candidate.class, DeviceClass::Discrete);
        assert_eq!(candidate.max_image_dimension_2d, 16384);
        assert!(candidate.geometry_shader);
        assert_eq!(candidate.queue_family_indices().graphics, Some(0));
    }

    #[test]
    fn no_geometry_shader_is_disqualified() {
        let gpu = candidate(1, DeviceClass::Discrete, 16384, false);
        assert_eq!(rate_suitability(&gpu), DISQUALIFIED);
    }

    #[test]
    fn no_graphics_family_is_disqualified() {
        let mut gpu = candidate(1, DeviceClass::Discrete, 16384, true);
        gpu.queue_families = vec![family(vk::QueueFlags::COMPUTE)];
        assert_eq!(rate_suitability(&gpu), DISQUALIFIED);
    }

    #[test]
    fn discrete_gpu_gets_bonus() {
        let gpu = candidate(1, DeviceClass::Discrete, 4096, true);
        assert_eq!(rate_suitability(&gpu), 1000 + 4096);
    }

    #[test]
    fn integrated_gpu_scores_its_image_dimension() {
        let gpu = candidate(1, DeviceClass::Integrated, 4096, true);
        assert_eq!(rate_suitability(&gpu), 4096);
    }

    #[test]
    fn zero_image_dimension_integrated_gpu_cannot_be_selected() {
        let gpu = candidate(1, DeviceClass::Integrated, 0, true);
        assert_eq!(rate_suitability(&gpu), DISQUALIFIED);
        assert!(matches!(
            select_physical_device(vec![gpu]),
            Err(SelectDeviceError::NoSuitableDevice(1))
        ));
    }

    #[test]
    fn zero_image_dimension_discrete_gpu_keeps_only_its_bonus() {
        let gpu = candidate(1, DeviceClass::Discrete, 0, true);
        assert_eq!(rate_suitability(&gpu), DISCRETE_GPU_BONUS);
    }

    #[test]
    fn selector_picks_highest_score() {
        let candidates = vec![
            candidate(1, DeviceClass::Discrete, 16384, false),
            candidate(2, DeviceClass::Discrete, 96, true),
            candidate(3, DeviceClass::Integrated, 4096, true),
            candidate(4, DeviceClass::Integrated, 800, true),
        ];

        let selected = select_physical_device(candidates).unwrap();

        assert_eq!(selected.candidate.handle, vk::PhysicalDevice::from_raw(3));
        assert_eq!(selected.score, 4096);
        assert_eq!(selected.graphics_queue_family, 0);
    }

    #[test]
    fn selector_prefers_first_on_tie() {
        let candidates = vec![
            candidate(1, DeviceClass::Discrete, 96, true),
            candidate(2, DeviceClass::Discrete, 96, true),
        ];

        let selected = select_physical_device(candidates).unwrap();

        assert_eq!(selected.candidate.handle, vk::PhysicalDevice::from_raw(1));
        assert_eq!(selected.score, 1096);
    }

    #[test]
    fn selector_reports_graphics_family_of_winner() {
        let mut gpu = candidate(1, DeviceClass::Integrated, 8192, true);
        gpu.queue_families = vec![
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];

        let selected = select_physical_device(vec![gpu]).unwrap();
        assert_eq!(selected.graphics_queue_family, 2);
    }

    #[test]
    fn selector_fails_when_all_disqualified() {
        let candidates = vec![
            candidate(1, DeviceClass::Discrete, 16384, false),
            candidate(2, DeviceClass::Integrated, 4096, false),
        ];

        assert!(matches!(
            select_physical_device(candidates),
            Err(SelectDeviceError::NoSuitableDevice(2))
        ));
    }

    #[test]
    fn selector_fails_without_devices() {
        assert!(matches!(
            select_physical_device(Vec::new()),
            Err(SelectDeviceError::NoDevicesFound)
        ));
    }
}
