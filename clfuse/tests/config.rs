use clfuse::{
    BindingPolicy, Config, DeviceType, FetchingPolicy, FuseError, ReductionFamily, TemplateParameters,
};

const CONFIG: &str = r#"{
    "axpy": {
        "parameters": { "simd_width": 4, "local_size_0": 64, "local_size_1": 1, "num_kernels": 2 },
        "fetching_policy": "contiguous",
        "num_groups": 32,
        "binding_policy": "bind_all_unique"
    },
    "devices": [
        {
            "name": "gfx1100",
            "device_type": "GPU",
            "vendor_id": 4098,
            "local_mem_size": 65536,
            "max_work_group_size": 1024,
            "max_work_item_sizes": [1024, 1024, 1024]
        }
    ]
}"#;

#[test]
fn presets_from_json() -> Result<(), FuseError> {
    let config = Config::from_json(CONFIG)?;
    let axpy = config.axpy()?;
    assert_eq!(
        *axpy.parameters(),
        TemplateParameters { simd_width: 4, local_size_0: 64, local_size_1: 1, num_kernels: 2 }
    );
    assert_eq!(axpy.family().fetching_policy, FetchingPolicy::Contiguous);
    assert_eq!(axpy.family().num_groups, 32);
    assert_eq!(axpy.binding_policy(), BindingPolicy::BindAllUnique);

    // Missing preset falls back to defaults
    let reduction = config.reduction()?;
    assert_eq!(*reduction.family(), ReductionFamily::default());
    assert_eq!(*reduction.parameters(), TemplateParameters::default());
    assert_eq!(reduction.binding_policy(), BindingPolicy::BindToHandle);
    Ok(())
}

#[test]
fn device_profiles() -> Result<(), FuseError> {
    let devices = Config::from_json(CONFIG)?.device_profiles()?;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_type, DeviceType::Gpu);
    assert_eq!(devices[0].warp_size(), 64);
    assert_eq!(devices[0].max_work_item_size(2), 1024);
    assert_eq!(devices[0].max_work_item_size(3), 1);
    assert!(Config::default().device_profiles()?.is_empty());
    Ok(())
}

#[test]
fn invalid_config() -> Result<(), FuseError> {
    assert!(matches!(Config::from_json("{ \"axpy\": 3 }"), Err(FuseError::ParseError(_))));
    let config = Config::from_json(&CONFIG.replace("contiguous", "diagonal"))?;
    assert!(matches!(config.axpy(), Err(FuseError::ParseError(_))));
    let config = Config::from_json(&CONFIG.replace("\"GPU\"", "\"fpga\""))?;
    assert!(matches!(config.device_profiles(), Err(FuseError::ParseError(_))));
    assert!(matches!(Config::read("/nonexistent/clfuse/config.json"), Err(FuseError::IOError(_))));
    Ok(())
}

#[test]
fn opencl_platforms() -> Result<(), FuseError> {
    let config = Config::from_json(r#"{ "opencl": { "platform_ids": [1, 3] } }"#)?;
    assert_eq!(config.opencl().platform_ids, Some(vec![1, 3]));
    assert_eq!(Config::default().opencl().platform_ids, None);
    Ok(())
}
