// Location: src/gpu/device.rs

use candle_core::{DType, Device};
use tracing::{info, warn};

use crate::config::WeightDType;
use crate::error::{BrelloError, Result};

/// A parsed device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl std::str::FromStr for DevicePreference {
    type Err = BrelloError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        let (kind, index) = match name.split_once(':') {
            Some((kind, index)) => {
                let index = index.parse::<usize>().map_err(|_| {
                    BrelloError::configuration("device", format!("invalid device index in '{}'", s))
                })?;
                (kind.to_string(), index)
            }
            None => (name, 0),
        };

        match kind.as_str() {
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(index)),
            "metal" | "mps" => Ok(DevicePreference::Metal(index)),
            _ => Err(BrelloError::configuration("device", format!("unknown device '{}'", s))),
        }
    }
}

/// Resolves the compute device.
///
/// An explicit name must be honoured; asking for a GPU that cannot be opened
/// is an error. Without a name, CUDA then Metal are tried before falling back
/// to the CPU.
pub fn resolve_device(preference: Option<&str>) -> Result<Device> {
    match preference {
        Some(name) => open_device(name.parse()?),
        None => Ok(auto_device()),
    }
}

fn open_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda(index) => Device::new_cuda(index).map_err(|e| {
            BrelloError::configuration("device", format!("CUDA device {} unavailable: {}", index, e))
        })?,
        DevicePreference::Metal(index) => Device::new_metal(index).map_err(|e| {
            BrelloError::configuration("device", format!("Metal device {} unavailable: {}", index, e))
        })?,
    };
    info!(device = device_name(&device), "Using requested device");
    Ok(device)
}

fn auto_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("CUDA device detected");
                return device;
            }
            Err(e) => warn!(error = %e, "CUDA initialization failed, trying other devices"),
        }
    }

    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Metal device detected");
                return device;
            }
            Err(e) => warn!(error = %e, "Metal initialization failed"),
        }
    }

    info!("No GPU detected, using CPU");
    Device::Cpu
}

/// Weight dtype for `device`: the explicit choice when given, otherwise
/// half precision on GPUs and full precision on the CPU.
pub fn resolve_dtype(device: &Device, explicit: Option<WeightDType>) -> DType {
    match explicit {
        Some(dtype) => dtype.to_dtype(),
        None if device.is_cpu() => DType::F32,
        None => DType::F16,
    }
}

pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_names() {
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("CUDA".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(0));
        assert_eq!("cuda:1".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(1));
        assert_eq!("mps".parse::<DevicePreference>().unwrap(), DevicePreference::Metal(0));
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert!("cuda:x".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_explicit_cpu() {
        let device = resolve_device(Some("cpu")).unwrap();
        assert!(device.is_cpu());
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn test_auto_device_falls_back_to_cpu() {
        let device = resolve_device(None).unwrap();
        assert!(device.is_cpu());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_explicit_cuda_without_support_fails() {
        assert!(resolve_device(Some("cuda")).is_err());
    }

    #[test]
    fn test_dtype_resolution() {
        assert_eq!(resolve_dtype(&Device::Cpu, None), DType::F32);
        assert_eq!(resolve_dtype(&Device::Cpu, Some(WeightDType::Bf16)), DType::BF16);
    }
}
