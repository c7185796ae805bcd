//! Device limits used by template validation.

/// Class of the device, as reported by `CL_DEVICE_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    Gpu,
    #[default]
    Cpu,
    Accelerator,
}

impl std::str::FromStr for DeviceType {
    type Err = crate::FuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            "accelerator" => Ok(DeviceType::Accelerator),
            _ => Err(crate::FuseError::parse_error(format!("Unknown device type {s}"))),
        }
    }
}

/// Vendor id of AMD devices, which schedule 64 wide wavefronts
pub const AMD_VENDOR_ID: u32 = 4098;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    pub device_type: DeviceType,
    pub vendor_id: u32,
    /// Local memory size in bytes
    pub local_mem_size: usize,
    /// Maximum local work size threads
    pub max_work_group_size: usize,
    /// Maximum local work size along each dimension
    pub max_work_item_sizes: Vec<usize>,
}

impl DeviceInfo {
    /// Granularity in which the device schedules work items.
    /// Advice from Intel, Nvidia and AMD guides, not a hard limit.
    pub fn warp_size(&self) -> usize {
        match self.device_type {
            DeviceType::Gpu if self.vendor_id == AMD_VENDOR_ID => 64,
            DeviceType::Gpu => 32,
            DeviceType::Cpu | DeviceType::Accelerator => 8,
        }
    }

    /// Maximum local size along dimension, 1 for dimensions the device does not have
    pub fn max_work_item_size(&self, dim: usize) -> usize {
        self.max_work_item_sizes.get(dim).copied().unwrap_or(1)
    }
}

#[test]
fn warp_sizes() {
    let mut dev = DeviceInfo { device_type: DeviceType::Gpu, vendor_id: 0x10DE, ..Default::default() };
    assert_eq!(dev.warp_size(), 32);
    dev.vendor_id = AMD_VENDOR_ID;
    assert_eq!(dev.warp_size(), 64);
    dev.device_type = DeviceType::Cpu;
    assert_eq!(dev.warp_size(), 8);
}
