//! Vulkan instance creation and physical device enumeration.
//!
//! Instance creation happens in two steps so each one can fail on its own:
//! [`negotiate_capabilities`] checks the requested extensions and layers
//! against what the loader reports, and [`Instance::new`] creates the
//! instance (plus an optional debug messenger) from the negotiated lists.
//!
//! [`VkVersion`] is a thin newtype over the packed Vulkan version word.

use std::ffi::{CStr, CString};
use std::fmt::{self, Debug};

use ash::vk;
use raw_window_handle::HasDisplayHandle;
use thiserror::Error;

use crate::capability::{CapabilityKind, CapabilityRegistry, RequirementCheck};
use crate::log::{VulkanLogLevel, message_type_label};
use crate::physical::GpuCandidate;

pub const KHRONOS_VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A packed Vulkan API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VkVersion(u32);

impl VkVersion {
    pub const V1_0: VkVersion = VkVersion(vk::API_VERSION_1_0);
    pub const V1_2: VkVersion = VkVersion(vk::API_VERSION_1_2);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(0, major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for VkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// Settings for [`negotiate_capabilities`] and [`Instance::new`].
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub app_name: String,
    /// Highest API version the application asks for. The loader's
    /// supported version caps it.
    pub api_version: VkVersion,
    /// `None` disables validation layers and the debug messenger.
    pub diagnostics: Option<VulkanLogLevel>,
    /// Layers to enable when `diagnostics` is set.
    pub validation_layers: Vec<CString>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "Hello vultex!".to_owned(),
            api_version: VkVersion::V1_2,
            diagnostics: cfg!(debug_assertions)
                .then_some(VulkanLogLevel::Verbose),
            validation_layers: vec![KHRONOS_VALIDATION_LAYER.to_owned()],
        }
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Error enumerating instance capabilities: {0}")]
    Enumeration(vk::Result),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Validation layers requested, but not available: {0:?}")]
    MissingLayers(Vec<String>),
    #[error("Cannot create vulkan instance: {0}")]
    CreationFailed(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
    #[error("Failed to set up debug messenger: {0}")]
    DebugMessengerFailed(vk::Result),
}

/// Extension and layer names for instance creation. Built by
/// [`requested_capabilities`] and handed to [`Instance::new`] once
/// [`negotiate_capabilities`] has checked them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledCapabilities {
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    pub debug_utils: bool,
}

/// Names of every instance extension the loader reports.
fn available_instance_extensions(
    entry: &ash::Entry,
) -> Result<Vec<String>, vk::Result> {
    // SAFETY: entry is a live Vulkan entry; passing None queries global
    // extensions and does not dereference any layer name.
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }?;
    Ok(props
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

/// Names of every instance layer the loader reports.
fn available_instance_layers(
    entry: &ash::Entry,
) -> Result<Vec<String>, vk::Result> {
    // SAFETY: entry is a live Vulkan entry;
    // vkEnumerateInstanceLayerProperties has no additional preconditions.
    let props = unsafe { entry.enumerate_instance_layer_properties() }?;
    Ok(props
        .iter()
        .filter_map(|layer| layer.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

fn lossy_names(names: &[CString]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Compose what instance creation asks for: the window system's extensions,
/// plus `VK_EXT_debug_utils` and the configured validation layers when
/// diagnostics are on. With diagnostics off no layer is requested.
pub fn requested_capabilities(
    window_extensions: Vec<CString>,
    config: &InstanceConfig,
) -> EnabledCapabilities {
    let debug_utils = config.diagnostics.is_some();
    let mut extensions = window_extensions;
    let layers = if debug_utils {
        extensions.push(ash::ext::debug_utils::NAME.to_owned());
        config.validation_layers.clone()
    } else {
        Vec::new()
    };

    EnabledCapabilities {
        extensions,
        layers,
        debug_utils,
    }
}

/// Check the extensions the window system needs (plus debug utils when
/// diagnostics are on) and the configured validation layers against what the
/// loader offers. Both status tables are logged before any failure is
/// returned.
pub fn negotiate_capabilities(
    entry: &ash::Entry,
    config: &InstanceConfig,
    display_handle_source: &impl HasDisplayHandle,
) -> Result<EnabledCapabilities, InstanceCreationError> {
    use InstanceCreationError as Error;

    let display_handle = display_handle_source
        .display_handle()
        .map_err(Error::InvalidDisplayHandle)?;
    let window_exts =
        ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(Error::Enumeration)?;

    let window_exts = window_exts
        .iter()
        .map(|ext_cstr_ptr| {
            //SAFETY: ash_window promises to hand us null terminated C strings
            //with static lifetime
            unsafe { CStr::from_ptr(*ext_cstr_ptr) }.to_owned()
        })
        .collect();
    let requested = requested_capabilities(window_exts, config);
    let extensions = &requested.extensions;

    let extension_check = RequirementCheck::new(
        CapabilityKind::Extensions,
        CapabilityRegistry::from_available(
            available_instance_extensions(entry).map_err(Error::Enumeration)?,
        ),
        lossy_names(extensions),
    );
    tracing::info!("EnabledExtensionCount: {}", extensions.len());
    extension_check.log_statuses();
    if !extension_check.all_supported() {
        return Err(Error::MissingExtensions(extension_check.missing()));
    }

    if !requested.layers.is_empty() {
        let layer_check = RequirementCheck::new(
            CapabilityKind::Layers,
            CapabilityRegistry::from_available(
                available_instance_layers(entry).map_err(Error::Enumeration)?,
            ),
            lossy_names(&requested.layers),
        );
        layer_check.log_statuses();
        if !layer_check.all_supported() {
            return Err(Error::MissingLayers(layer_check.missing()));
        }
    }

    Ok(requested)
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }
        .to_string_lossy();
    let type_str = message_type_label(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::debug!(
                target: "vultex-debug-messenger",
                "VK [{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(
                target: "vultex-debug-messenger",
                "VK [{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(
                target: "vultex-debug-messenger",
                "VK [{}] {}",
                type_str,
                message
            );
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(
                target: "vultex-debug-messenger",
                "VK [{}] {}",
                type_str,
                message
            );
        }
        _ => {}
    }

    vk::FALSE
}

fn debug_messenger_create_info(
    level: VulkanLogLevel,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(level.message_severity())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// The root Vulkan object.
///
/// Owns the `ash::Entry` loader, the `ash::Instance` handle and an optional
/// debug messenger. Objects derived from an instance hold an
/// `Arc<Instance>` to keep it alive.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger:
        Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    ver: VkVersion,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("api_version", &self.ver)
            .finish_non_exhaustive()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some((debug_messenger, debug_utils_instance)) =
            self.debug_messenger.take()
        {
            tracing::debug!("Dropping debug messenger {:?}", debug_messenger);
            //SAFETY: last use of this debug messenger. We made this debug
            //messenger from this instance. debug_utils_instance is derived from
            //this instance
            unsafe {
                debug_utils_instance
                    .destroy_debug_utils_messenger(debug_messenger, None)
            };
        }
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        //SAFETY: We are in drop so this is the last use of instance. Any given
        //derived object should be gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl Instance {
    /// Create an instance with the negotiated extensions and layers.
    ///
    /// When `capabilities.debug_utils` is set and `config.diagnostics` names
    /// a level, the debug messenger create info is chained into instance
    /// creation and a persistent messenger is created afterwards. Failing to
    /// create that messenger fails the whole call.
    ///
    /// # Safety
    /// `entry` was loaded through `libloading`; the caller accepts whatever
    /// the loaded library does.
    pub unsafe fn new(
        entry: ash::Entry,
        config: &InstanceConfig,
        capabilities: &EnabledCapabilities,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name = CString::new(config.app_name.as_str())
            .map_err(|_| Error::InvalidAppName)?;

        // SAFETY: entry is a live Vulkan entry; vkEnumerateInstanceVersion
        // has no preconditions beyond a valid entry point.
        let supported = unsafe { entry.try_enumerate_instance_version() }
            .ok()
            .flatten()
            .map(VkVersion::from_raw)
            .unwrap_or(VkVersion::V1_0);
        let api_version = supported.min(config.api_version);
        tracing::debug!(
            "Loader supports Vulkan {}, requesting {}",
            supported,
            api_version
        );

        let ext_ptrs: Vec<*const std::ffi::c_char> =
            capabilities.extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            capabilities.layers.iter().map(|l| l.as_ptr()).collect();

        let mut debug_info = config
            .diagnostics
            .filter(|_| capabilities.debug_utils)
            .map(debug_messenger_create_info);

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(api_version.to_raw());

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if let Some(ref mut debug_info) = debug_info {
            create_info = create_info.push_next(debug_info);
        }

        //SAFETY: We made a valid create_info and every pointer in it outlives
        //this call
        let handle = unsafe { entry.create_instance(&create_info, None) }
            .map_err(Error::CreationFailed)?;
        tracing::debug!("Instance created");

        let mut instance = Instance {
            entry,
            handle,
            debug_messenger: None,
            ver: api_version,
        };
        if let Some(mut debug_info) = debug_info {
            debug_info.p_next = std::ptr::null();
            let debug_utils_instance = ash::ext::debug_utils::Instance::new(
                &instance.entry,
                &instance.handle,
            );
            //SAFETY: Valid CI, debug utils was enabled on this instance. On
            //failure the instance is destroyed by its Drop.
            let messenger = unsafe {
                debug_utils_instance
                    .create_debug_utils_messenger(&debug_info, None)
            }
            .map_err(Error::DebugMessengerFailed)?;
            instance.debug_messenger = Some((messenger, debug_utils_instance));
        }

        Ok(instance)
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Get a vector of handles to available physical devices. These handles
    /// are ONLY valid in the context of this instance.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        //SAFETY: Pretty much always fine
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(v) => Ok(v),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                Err(FetchPhysicalDeviceError::MemoryExhaustion)
            }
            Err(e) => Err(FetchPhysicalDeviceError::UnknownVulkan(e)),
        }
    }

    /// Snapshot every physical device with the properties, features and
    /// queue families selection needs. Enumeration order is preserved.
    pub fn gpu_candidates(
        &self,
    ) -> Result<Vec<GpuCandidate>, FetchPhysicalDeviceError> {
        Ok(self
            .fetch_raw_physical_devices()?
            .into_iter()
            .map(|dev| {
                //SAFETY: dev was enumerated from this instance
                let (props, features, families) = unsafe {
                    (
                        self.handle.get_physical_device_properties(dev),
                        self.handle.get_physical_device_features(dev),
                        self.handle
                            .get_physical_device_queue_family_properties(dev),
                    )
                };
                GpuCandidate::from_raw_parts(dev, &props, &features, families)
            })
            .collect())
    }

    /// Create a logical device from a physical device.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    /// `create_info` must be a valid DeviceCreateInfo.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: physical_device was derived from this instance,
        //create_info is valid
        unsafe {
            self.handle
                .create_device(physical_device, create_info, None)
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Error fetching physical devices, memory exhaustion")]
    MemoryExhaustion,
    #[error("Error fetching physical devices, Unknown vulkan: {0}")]
    UnknownVulkan(vk::Result),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_version_components() {
        let version = VkVersion::new(1, 3, 275);

        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 3);
        assert_eq!(version.patch(), 275);
        assert_eq!(version.to_string(), "1.3.275");
    }

    #[test]
    fn requested_version_is_capped_by_loader() {
        let loader = VkVersion::from_raw(vk::API_VERSION_1_1);

        assert_eq!(loader.min(VkVersion::V1_2), loader);
        assert_eq!(
            VkVersion::new(1, 3, 0).min(VkVersion::V1_2),
            VkVersion::V1_2
        );
    }

    #[test]
    fn default_config_requests_khronos_validation() {
        let config = InstanceConfig::default();

        assert_eq!(config.api_version, VkVersion::V1_2);
        assert_eq!(
            config.validation_layers,
            vec![KHRONOS_VALIDATION_LAYER.to_owned()]
        );
        assert_eq!(config.diagnostics.is_some(), cfg!(debug_assertions));
    }

    fn window_extensions() -> Vec<CString> {
        vec![c"VK_KHR_surface".to_owned(), c"VK_KHR_xcb_surface".to_owned()]
    }

    #[test]
    fn diagnostics_request_debug_utils_and_validation_layers() {
        let config = InstanceConfig {
            diagnostics: Some(VulkanLogLevel::Warning),
            ..InstanceConfig::default()
        };

        let requested = requested_capabilities(window_extensions(), &config);

        assert_eq!(
            requested.extensions,
            vec![
                c"VK_KHR_surface".to_owned(),
                c"VK_KHR_xcb_surface".to_owned(),
                ash::ext::debug_utils::NAME.to_owned(),
            ]
        );
        assert_eq!(
            requested.layers,
            vec![KHRONOS_VALIDATION_LAYER.to_owned()]
        );
        assert!(requested.debug_utils);
    }

    #[test]
    fn without_diagnostics_only_window_extensions_are_requested() {
        let config = InstanceConfig {
            diagnostics: None,
            ..InstanceConfig::default()
        };

        let requested = requested_capabilities(window_extensions(), &config);

        assert_eq!(requested.extensions, window_extensions());
        assert!(requested.layers.is_empty());
        assert!(!requested.debug_utils);
    }

    #[test]
    fn diagnostics_without_validation_layers_skip_the_layer_check() {
        let config = InstanceConfig {
            diagnostics: Some(VulkanLogLevel::Verbose),
            validation_layers: Vec::new(),
            ..InstanceConfig::default()
        };

        let requested = requested_capabilities(window_extensions(), &config);

        assert!(
            requested
                .extensions
                .contains(&ash::ext::debug_utils::NAME.to_owned())
        );
        assert!(requested.layers.is_empty());
        assert!(requested.debug_utils);
    }

    #[test]
    fn debug_messenger_uses_configured_severity() {
        let info = debug_messenger_create_info(VulkanLogLevel::Warning);

        assert_eq!(
            info.message_severity,
            VulkanLogLevel::Warning.message_severity()
        );
        assert!(info.message_type.contains(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        ));
        assert!(info.pfn_user_callback.is_some());
    }
}
