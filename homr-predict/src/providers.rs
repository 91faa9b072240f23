//! Compute provider detection
//!
//! Reports which inference backends are visible to this process. The result
//! is logged at setup and exposed by the health check; nothing depends on it.

use std::path::Path;

pub const CUDA_PROVIDER: &str = "CUDAExecutionProvider";
pub const CPU_PROVIDER: &str = "CPUExecutionProvider";

const NVIDIA_PROBES: &[&str] = &["/proc/driver/nvidia/version", "/dev/nvidia0"];

/// Detect providers for the current host, preferred first
pub fn detect() -> Vec<String> {
    let driver_present = NVIDIA_PROBES.iter().any(|p| Path::new(p).exists());
    let visible_devices = std::env::var("CUDA_VISIBLE_DEVICES").ok();
    available_providers(driver_present, visible_devices.as_deref())
}

/// Provider list from probe results
///
/// `CUDA_VISIBLE_DEVICES` set to an empty string or `-1` hides every GPU.
pub fn available_providers(driver_present: bool, cuda_visible_devices: Option<&str>) -> Vec<String> {
    let gpus_hidden = matches!(cuda_visible_devices.map(str::trim), Some("") | Some("-1"));

    let mut providers = Vec::with_capacity(2);
    if driver_present && !gpus_hidden {
        providers.push(CUDA_PROVIDER.to_string());
    }
    providers.push(CPU_PROVIDER.to_string());
    providers
}
