use ash::vk;

/// Minimum severity level for Vulkan validation layer messages.
///
/// Messages at or above the chosen level are forwarded to the [`tracing`]
/// subscriber. Variants are ordered least-to-most severe:
/// `Verbose < Info < Warning < Error`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    /// Severity mask for a debug messenger that reports this level and
    /// everything above it.
    pub fn message_severity(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        match self {
            VulkanLogLevel::Verbose => {
                Severity::VERBOSE
                    | Severity::INFO
                    | Severity::WARNING
                    | Severity::ERROR
            }
            VulkanLogLevel::Info => {
                Severity::INFO | Severity::WARNING | Severity::ERROR
            }
            VulkanLogLevel::Warning => Severity::WARNING | Severity::ERROR,
            VulkanLogLevel::Error => Severity::ERROR,
        }
    }
}

pub(crate) fn message_type_label(
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Default",
    }
}
