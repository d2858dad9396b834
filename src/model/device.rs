use candle_core::Device;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which device the host should load the model onto.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
}

/// The kind of device a ready host runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Accelerator,
}

impl From<&Device> for DeviceKind {
    fn from(device: &Device) -> Self {
        if device.is_cpu() {
            DeviceKind::Cpu
        } else {
            DeviceKind::Accelerator
        }
    }
}

/// Pick the compute device.
///
/// With the `cuda` / `metal` features compiled in, the candle constructors
/// fail on machines without that hardware; such failures are logged and the
/// next backend is tried, ending at the CPU.
pub fn select_device(preference: DevicePreference) -> anyhow::Result<Device> {
    if preference == DevicePreference::Cpu {
        return Ok(Device::Cpu);
    }
    Ok(first_available_device([
        ("CUDA", Box::new(|| Device::cuda_if_available(0)) as DeviceProbe),
        ("Metal", Box::new(|| Device::metal_if_available(0)) as DeviceProbe),
    ]))
}

type DeviceProbe = Box<dyn FnOnce() -> candle_core::Result<Device>>;

fn first_available_device<const N: usize>(probes: [(&str, DeviceProbe); N]) -> Device {
    for (name, probe) in probes {
        match probe() {
            Ok(device) if !device.is_cpu() => return device,
            Ok(_) => crate::debug!("{} backend not available", name),
            Err(e) => crate::warn!("{} device initialization failed: {}", name, e),
        }
    }
    Device::Cpu
}
