//! Compute device selection

mod device;

pub use device::{device_name, resolve_device, resolve_dtype, DevicePreference};
