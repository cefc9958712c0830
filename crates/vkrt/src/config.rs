//! Context configuration
//!
//! Options can be built in code or deserialized from a pipeline manifest's
//! `context` section. Every field has a default, so an empty section is valid.

use serde::{Deserialize, Serialize};

/// Graphics APIs the device search may use
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    /// Every backend wgpu supports on this platform
    #[default]
    All,
    /// Vulkan, Metal, DX12 and WebGPU
    Primary,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl BackendSelection {
    /// Converts to wgpu backend flags
    pub fn to_wgpu(self) -> wgpu::Backends {
        match self {
            BackendSelection::All => wgpu::Backends::all(),
            BackendSelection::Primary => wgpu::Backends::PRIMARY,
            BackendSelection::Vulkan => wgpu::Backends::VULKAN,
            BackendSelection::Metal => wgpu::Backends::METAL,
            BackendSelection::Dx12 => wgpu::Backends::DX12,
            BackendSelection::Gl => wgpu::Backends::GL,
        }
    }
}

/// Which adapters are tried first
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    /// Discrete GPUs first
    #[default]
    HighPerformance,
    /// Integrated GPUs first
    LowPower,
}

/// Options for [`crate::Context::with_options`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Number of devices to open; 0 opens every adapter found
    pub device_count: usize,
    /// Graphics APIs to search
    pub backends: BackendSelection,
    /// Adapter ordering
    pub power_preference: PowerPreference,
    /// Debug label attached to opened devices
    pub label: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            device_count: 1,
            backends: BackendSelection::default(),
            power_preference: PowerPreference::default(),
            label: None,
        }
    }
}

impl ContextOptions {
    /// Default options requesting `device_count` devices
    pub fn with_device_count(device_count: usize) -> Self {
        Self {
            device_count,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ContextOptions::default();
        assert_eq!(options.device_count, 1);
        assert_eq!(options.backends, BackendSelection::All);
        assert_eq!(options.power_preference, PowerPreference::HighPerformance);
        assert_eq!(ContextOptions::with_device_count(0).device_count, 0);
    }

    #[test]
    fn test_options_from_yaml() {
        let options: ContextOptions = serde_norway::from_str("device_count: 2\nbackends: vulkan\npower_preference: low_power\n").unwrap();
        assert_eq!(options.device_count, 2);
        assert_eq!(options.backends, BackendSelection::Vulkan);
        assert_eq!(options.power_preference, PowerPreference::LowPower);
        assert_eq!(options.label, None);

        let empty: ContextOptions = serde_norway::from_str("{}").unwrap();
        assert_eq!(empty, ContextOptions::default());
    }
}
