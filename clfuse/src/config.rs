//! Template presets and offline device profiles read from `clfuse/config.json`.

use std::path::Path;

use nanoserde::DeJson;

use crate::{
    backend::opencl::OpenCLConfig,
    binder::BindingPolicy,
    device::DeviceInfo,
    emit::FetchingPolicy,
    error::FuseError,
    template::{AxpyFamily, ReductionFamily, Template, TemplateParameters},
};

#[derive(Debug, Default, Clone, DeJson)]
pub struct Config {
    /// Preset for fused elementwise kernels
    pub axpy: Option<FamilyConfig>,
    /// Preset for vector reductions
    pub reduction: Option<FamilyConfig>,
    /// Devices to validate against without `OpenCL` runtime
    pub devices: Option<Vec<DeviceProfile>>,
    pub opencl: Option<OpenCLConfig>,
}

#[derive(Debug, Clone, DeJson)]
pub struct FamilyConfig {
    pub parameters: TemplateParameters,
    /// "strided" or "contiguous", default strided
    pub fetching_policy: Option<String>,
    pub num_groups: Option<usize>,
    /// "bind_to_handle" or "bind_all_unique", default bind to handle
    pub binding_policy: Option<String>,
}

#[derive(Debug, Clone, DeJson)]
pub struct DeviceProfile {
    pub name: String,
    /// "gpu", "cpu" or "accelerator"
    pub device_type: String,
    pub vendor_id: u32,
    pub local_mem_size: usize,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: Vec<usize>,
}

impl TryFrom<&DeviceProfile> for DeviceInfo {
    type Error = FuseError;

    fn try_from(profile: &DeviceProfile) -> Result<Self, Self::Error> {
        Ok(DeviceInfo {
            name: profile.name.clone(),
            device_type: profile.device_type.parse()?,
            vendor_id: profile.vendor_id,
            local_mem_size: profile.local_mem_size,
            max_work_group_size: profile.max_work_group_size,
            max_work_item_sizes: profile.max_work_item_sizes.clone(),
        })
    }
}

fn binding_policy(policy: Option<&str>) -> Result<BindingPolicy, FuseError> {
    match policy {
        None | Some("bind_to_handle") => Ok(BindingPolicy::BindToHandle),
        Some("bind_all_unique") => Ok(BindingPolicy::BindAllUnique),
        Some(x) => Err(FuseError::parse_error(format!("Unknown binding policy {x}"))),
    }
}

impl FamilyConfig {
    fn fetching_policy(&self) -> Result<FetchingPolicy, FuseError> {
        self.fetching_policy.as_deref().map_or(Ok(FetchingPolicy::default()), str::parse)
    }

    pub fn axpy_template(&self) -> Result<Template<AxpyFamily>, FuseError> {
        let family = AxpyFamily {
            fetching_policy: self.fetching_policy()?,
            num_groups: self.num_groups.unwrap_or(AxpyFamily::default().num_groups),
        };
        Ok(Template::new(family, self.parameters, binding_policy(self.binding_policy.as_deref())?))
    }

    pub fn reduction_template(&self) -> Result<Template<ReductionFamily>, FuseError> {
        let family = ReductionFamily {
            fetching_policy: self.fetching_policy()?,
            num_groups: self.num_groups.unwrap_or(ReductionFamily::default().num_groups),
        };
        Ok(Template::new(family, self.parameters, binding_policy(self.binding_policy.as_deref())?))
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, FuseError> {
        Config::deserialize_json(json).map_err(|e| FuseError::parse_error(format!("config.json, {e}")))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Config, FuseError> {
        Config::from_json(&std::fs::read_to_string(path)?)
    }

    /// Searches through config directories and finds clfuse/config.json.
    /// If not found or failed to parse, uses defaults.
    pub fn load() -> Config {
        let debug_dev = crate::debug_dev();
        xdg::BaseDirectories::new()
            .map_err(|e| {
                if debug_dev {
                    println!("Failed to find config directories for config.json, {e}");
                }
            })
            .ok()
            .map(|bd| {
                let mut dirs = bd.get_config_dirs();
                dirs.push(bd.get_config_home());
                dirs
            })
            .and_then(|paths| {
                paths.into_iter().find_map(|mut path| {
                    path.push("clfuse/config.json");
                    std::fs::read_to_string(&path).ok()
                })
            })
            .and_then(|file| {
                Config::from_json(&file)
                    .map_err(|e| {
                        if debug_dev {
                            println!("Failed to parse config.json, {e}");
                        }
                    })
                    .ok()
            })
            .inspect(|_| {
                if debug_dev {
                    println!("Config successfully read and parsed.");
                }
            })
            .unwrap_or_else(|| {
                if debug_dev {
                    println!("Failed to get config, using defaults.");
                }
                Config::default()
            })
    }

    /// Elementwise template from config or with default parameters
    pub fn axpy(&self) -> Result<Template<AxpyFamily>, FuseError> {
        match &self.axpy {
            Some(config) => config.axpy_template(),
            None => Ok(Template::new(
                AxpyFamily::default(),
                TemplateParameters::default(),
                BindingPolicy::default(),
            )),
        }
    }

    /// Reduction template from config or with default parameters
    pub fn reduction(&self) -> Result<Template<ReductionFamily>, FuseError> {
        match &self.reduction {
            Some(config) => config.reduction_template(),
            None => Ok(Template::new(
                ReductionFamily::default(),
                TemplateParameters::default(),
                BindingPolicy::default(),
            )),
        }
    }

    /// Platform selection for [`crate::backend::opencl::OpenCLRuntime::from_config`]
    pub fn opencl(&self) -> OpenCLConfig {
        self.opencl.clone().unwrap_or_default()
    }

    pub fn device_profiles(&self) -> Result<Vec<DeviceInfo>, FuseError> {
        self.devices.iter().flatten().map(DeviceInfo::try_from).collect()
    }
}
