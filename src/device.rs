//! Device capability detection
//!
//! Probes available accelerators once at startup: NVIDIA GPUs via nvidia-smi
//! (which correctly reports only the devices allocated to this container in
//! multi-tenant environments) and Metal on Apple hardware.

use std::process::Command;
use std::sync::OnceLock;

/// Cached device information detected at startup
static DEVICE_INFO: OnceLock<DeviceInfo> = OnceLock::new();

/// What this host can run inference on
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Logical CPU count
    pub cpu_count: usize,
    /// CUDA GPU indices visible to this process (from nvidia-smi)
    pub gpu_indices: Vec<u32>,
    /// Metal acceleration available (Apple hardware)
    pub supports_metal: bool,
}

impl DeviceInfo {
    pub fn gpu_count(&self) -> usize {
        self.gpu_indices.len()
    }

    pub fn supports_cuda(&self) -> bool {
        !self.gpu_indices.is_empty()
    }
}

/// Probe the host for CPUs and accelerators
pub fn detect() -> DeviceInfo {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let gpu_indices = detect_nvidia_gpus();
    let supports_metal = cfg!(target_os = "macos");

    tracing::info!(
        cpu_count,
        gpu_count = gpu_indices.len(),
        supports_metal,
        "Detected device capabilities"
    );

    DeviceInfo {
        cpu_count,
        gpu_indices,
        supports_metal,
    }
}

fn detect_nvidia_gpus() -> Vec<u32> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .filter_map(|line| line.trim().parse::<u32>().ok())
                .collect()
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(stderr = %stderr, "nvidia-smi failed, assuming no CUDA GPUs");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to run nvidia-smi, assuming no CUDA GPUs");
            Vec::new()
        }
    }
}

/// Initialize device detection (call once at startup)
pub fn init() -> &'static DeviceInfo {
    DEVICE_INFO.get_or_init(detect)
}

/// Get cached device info, or detect if not initialized
pub fn get_or_init() -> &'static DeviceInfo {
    DEVICE_INFO.get_or_init(detect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_reports_cpus() {
        let info = detect();
        assert!(info.cpu_count >= 1);
    }

    #[test]
    fn test_empty_device_info() {
        let info = DeviceInfo::default();
        assert_eq!(info.gpu_count(), 0);
        assert!(!info.supports_cuda());
    }

    #[test]
    fn test_get_or_init_is_stable() {
        let first = get_or_init() as *const DeviceInfo;
        let second = get_or_init() as *const DeviceInfo;
        assert_eq!(first, second);
    }
}
