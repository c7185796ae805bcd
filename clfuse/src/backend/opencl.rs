//! `OpenCL` runtime, loaded dynamically.
//! Covers device introspection, program compilation and setting of kernel arguments.
//! Buffers and launches belong to the array library.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::{
    ffi::{c_void, CString},
    ptr,
    sync::Arc,
};

use libloading::Library;
use nanoserde::DeJson;

use crate::{
    arguments::{KernelArg, KernelArguments},
    config::Config,
    device::{DeviceInfo, DeviceType},
    error::{BackendError, ErrorStatus},
    FuseError,
};

type cl_int = i32;
type cl_uint = u32;
type cl_bitfield = u64;

#[derive(Debug, Default, Clone, DeJson)]
pub struct OpenCLConfig {
    /// Select which platforms will be used.
    /// If set to None, uses all available platforms.
    pub platform_ids: Option<Vec<usize>>,
}

/// Loaded `OpenCL` library with one context per platform.
#[derive(Debug)]
pub struct OpenCLRuntime {
    library: Arc<Library>,
    contexts: Vec<*mut c_void>,
    devices: Vec<OpenCLDevice>,
    clReleaseContext: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clGetProgramBuildInfo:
        unsafe extern "C" fn(*mut c_void, *mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const i8,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> cl_int,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const i8, *mut cl_int) -> *mut c_void,
    clReleaseKernel: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> cl_int,
    clCreateProgramWithSource:
        unsafe extern "C" fn(*mut c_void, cl_uint, *const *const i8, *const usize, *mut cl_int) -> *mut c_void,
}

#[derive(Debug)]
pub struct OpenCLDevice {
    ptr: *mut c_void,
    context: *mut c_void,
    info: DeviceInfo,
}

/// Compiled kernel, arguments can be set through [`KernelArguments`].
#[derive(Debug)]
pub struct OpenCLKernel {
    name: String,
    program: *mut c_void,
    kernel: *mut c_void,
    // Keeps function pointers valid
    _library: Arc<Library>,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> cl_int,
    clReleaseKernel: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> cl_int,
}

fn load<T: Copy>(library: &Library, name: &[u8]) -> Result<T, BackendError> {
    unsafe { library.get::<T>(name) }.map(|f| *f).map_err(|e| BackendError {
        status: ErrorStatus::DyLibNotFound,
        context: format!("{}, {e}", String::from_utf8_lossy(name).trim_end_matches('\0')).into(),
    })
}

fn query_error(param_name: cl_uint) -> BackendError {
    BackendError {
        status: ErrorStatus::DeviceQuery,
        context: format!("Device info {param_name:#x} has unexpected size").into(),
    }
}

fn read_bytes<const N: usize>(data: &[u8], param_name: cl_uint) -> Result<[u8; N], BackendError> {
    data.get(..N).and_then(|x| x.try_into().ok()).ok_or_else(|| query_error(param_name))
}

impl OpenCLRuntime {
    /// Loads the `OpenCL` library and creates context for every selected platform.
    /// Platforms which fail to initialize are skipped.
    pub fn initialize(config: &OpenCLConfig) -> Result<OpenCLRuntime, BackendError> {
        let debug_dev = crate::debug_dev();
        let opencl_paths = [
            "/lib/libOpenCL.so",
            "/lib64/libOpenCL.so",
            "/lib/x86_64-linux-gnu/libOpenCL.so",
            "/lib64/x86_64-linux-gnu/libOpenCL.so",
            "/usr/lib/libOpenCL.so",
            "/usr/lib64/libOpenCL.so",
            "/usr/lib/x86_64-linux-gnu/libOpenCL.so",
            "/usr/lib64/x86_64-linux-gnu/libOpenCL.so",
            "/usr/lib/x86_64-linux-gnu/libOpenCL.so.1",
        ];
        let opencl = opencl_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
        let Some(opencl) = opencl else {
            return Err(BackendError {
                status: ErrorStatus::DyLibNotFound,
                context: "OpenCL runtime not found.".into(),
            });
        };
        let clGetPlatformIDs: unsafe extern "C" fn(cl_uint, *mut *mut c_void, *mut cl_uint) -> cl_int =
            load(&opencl, b"clGetPlatformIDs\0")?;
        let clGetPlatformInfo: unsafe extern "C" fn(
            *mut c_void,
            cl_uint,
            usize,
            *mut c_void,
            *mut usize,
        ) -> cl_int = load(&opencl, b"clGetPlatformInfo\0")?;
        let clGetDeviceIDs: unsafe extern "C" fn(
            *mut c_void,
            cl_bitfield,
            cl_uint,
            *mut *mut c_void,
            *mut cl_uint,
        ) -> cl_int = load(&opencl, b"clGetDeviceIDs\0")?;
        let clGetDeviceInfo: unsafe extern "C" fn(
            *mut c_void,
            cl_uint,
            usize,
            *mut c_void,
            *mut usize,
        ) -> cl_int = load(&opencl, b"clGetDeviceInfo\0")?;
        let clCreateContext: unsafe extern "C" fn(
            *const isize,
            cl_uint,
            *const *mut c_void,
            Option<unsafe extern "C" fn(*const i8, *const c_void, usize, *mut c_void)>,
            *mut c_void,
            *mut cl_int,
        ) -> *mut c_void = load(&opencl, b"clCreateContext\0")?;
        let mut runtime = OpenCLRuntime {
            clReleaseContext: load(&opencl, b"clReleaseContext\0")?,
            clGetProgramBuildInfo: load(&opencl, b"clGetProgramBuildInfo\0")?,
            clBuildProgram: load(&opencl, b"clBuildProgram\0")?,
            clReleaseProgram: load(&opencl, b"clReleaseProgram\0")?,
            clCreateKernel: load(&opencl, b"clCreateKernel\0")?,
            clReleaseKernel: load(&opencl, b"clReleaseKernel\0")?,
            clSetKernelArg: load(&opencl, b"clSetKernelArg\0")?,
            clCreateProgramWithSource: load(&opencl, b"clCreateProgramWithSource\0")?,
            library: Arc::new(opencl),
            contexts: Vec::new(),
            devices: Vec::new(),
        };

        let platform_ids = {
            // Get the number of platforms
            let mut count: cl_uint = 0;
            OpenCLStatus::from(unsafe { clGetPlatformIDs(0, ptr::null_mut(), &mut count) })
                .check(ErrorStatus::DeviceEnumeration)?;
            let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
            if count > 0 {
                OpenCLStatus::from(unsafe { clGetPlatformIDs(count, ids.as_mut_ptr(), ptr::null_mut()) })
                    .check(ErrorStatus::DeviceEnumeration)?;
            }
            ids
        };
        for (platform_id, platform) in platform_ids
            .iter()
            .copied()
            .enumerate()
            .filter(|(id, _)| config.platform_ids.as_ref().is_none_or(|ids| ids.contains(id)))
        {
            let device_ids = {
                let mut count: cl_uint = 0;
                let status = OpenCLStatus::from(unsafe {
                    clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count)
                });
                if status != OpenCLStatus::CL_SUCCESS || count == 0 {
                    continue;
                }
                let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
                let Ok(()) = OpenCLStatus::from(unsafe {
                    clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, count, ids.as_mut_ptr(), ptr::null_mut())
                })
                .check(ErrorStatus::DeviceEnumeration) else {
                    continue;
                };
                ids
            };
            let mut status: cl_int = 0;
            let context = unsafe {
                clCreateContext(
                    ptr::null(),
                    device_ids.len() as cl_uint,
                    device_ids.as_ptr(),
                    None,
                    ptr::null_mut(),
                    &mut status,
                )
            };
            let Ok(()) = OpenCLStatus::from(status).check(ErrorStatus::Initialization) else {
                continue;
            };
            runtime.contexts.push(context);
            if debug_dev {
                let mut name = vec![0u8; 256];
                let _ = unsafe {
                    clGetPlatformInfo(platform, CL_PLATFORM_NAME, name.len(), name.as_mut_ptr().cast(), ptr::null_mut())
                };
                println!(
                    "Using OpenCL platform, platform id {platform_id}, name {} on devices:",
                    String::from_utf8_lossy(&name).trim_end_matches('\0')
                );
            }
            for dev in device_ids {
                let device_data = |param_name: cl_uint| -> Result<Vec<u8>, BackendError> {
                    let mut size: usize = 0;
                    OpenCLStatus::from(unsafe { clGetDeviceInfo(dev, param_name, 0, ptr::null_mut(), &mut size) })
                        .check(ErrorStatus::DeviceQuery)?;
                    let mut data = vec![0u8; size];
                    if size > 0 {
                        OpenCLStatus::from(unsafe {
                            clGetDeviceInfo(dev, param_name, size, data.as_mut_ptr().cast(), ptr::null_mut())
                        })
                        .check(ErrorStatus::DeviceQuery)?;
                    }
                    Ok(data)
                };
                let Ok(info) = device_info(device_data) else {
                    continue;
                };
                if debug_dev {
                    println!("{info:?}");
                }
                runtime.devices.push(OpenCLDevice { ptr: dev, context, info });
            }
        }
        if runtime.devices.is_empty() {
            return Err(BackendError {
                status: ErrorStatus::Initialization,
                context: "No OpenCL device could be initialized.".into(),
            });
        }
        Ok(runtime)
    }

    /// Initializes with the `opencl` section of config
    pub fn from_config(config: &Config) -> Result<OpenCLRuntime, BackendError> {
        OpenCLRuntime::initialize(&config.opencl())
    }

    pub fn devices(&self) -> &[OpenCLDevice] {
        &self.devices
    }

    /// Compiles one generated kernel for device `device_id`.
    pub fn compile(&self, device_id: usize, name: &str, source: &str) -> Result<OpenCLKernel, BackendError> {
        let Some(device) = self.devices.get(device_id) else {
            return Err(BackendError {
                status: ErrorStatus::KernelCompilation,
                context: format!("Device {device_id} does not exist").into(),
            });
        };
        let mut pragma = String::new();
        if source.contains("half") {
            pragma += "#pragma OPENCL EXTENSION cl_khr_fp16 : enable\n";
        }
        if source.contains("double") {
            pragma += "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n";
        }
        let source = format!("{pragma}{source}");
        if crate::debug_source() {
            println!("{source}");
        }
        let source_ptr: *const i8 = source.as_ptr().cast();
        let mut status: cl_int = 0;
        let program = unsafe {
            (self.clCreateProgramWithSource)(device.context, 1, &source_ptr, &source.len(), &mut status)
        };
        OpenCLStatus::from(status).check(ErrorStatus::KernelCompilation)?;
        let mut kernel = OpenCLKernel {
            name: name.into(),
            program,
            kernel: ptr::null_mut(),
            _library: self.library.clone(),
            clSetKernelArg: self.clSetKernelArg,
            clReleaseKernel: self.clReleaseKernel,
            clReleaseProgram: self.clReleaseProgram,
        };
        if let Err(e) = OpenCLStatus::from(unsafe {
            (self.clBuildProgram)(
                program,
                1,
                [device.ptr].as_ptr(),
                c"-cl-fast-relaxed-math".as_ptr().cast(),
                None,
                ptr::null_mut(),
            )
        })
        .check(ErrorStatus::KernelCompilation)
        {
            let build_log = self.program_build_log(device, program).unwrap_or_default();
            return Err(BackendError { status: e.status, context: format!("{} {build_log}", e.context).into() });
        }
        let Ok(kernel_name) = CString::new(name) else {
            return Err(BackendError {
                status: ErrorStatus::KernelCompilation,
                context: format!("Invalid kernel name {name}").into(),
            });
        };
        let mut status: cl_int = 0;
        kernel.kernel = unsafe { (self.clCreateKernel)(program, kernel_name.as_ptr().cast(), &mut status) };
        OpenCLStatus::from(status).check(ErrorStatus::KernelCompilation)?;
        Ok(kernel)
    }

    fn program_build_log(&self, device: &OpenCLDevice, program: *mut c_void) -> Result<String, BackendError> {
        let mut size: usize = 0;
        OpenCLStatus::from(unsafe {
            (self.clGetProgramBuildInfo)(program, device.ptr, CL_PROGRAM_BUILD_LOG, 0, ptr::null_mut(), &mut size)
        })
        .check(ErrorStatus::KernelCompilation)?;
        let mut data = vec![0u8; size];
        if size > 0 {
            OpenCLStatus::from(unsafe {
                (self.clGetProgramBuildInfo)(
                    program,
                    device.ptr,
                    CL_PROGRAM_BUILD_LOG,
                    size,
                    data.as_mut_ptr().cast(),
                    ptr::null_mut(),
                )
            })
            .check(ErrorStatus::KernelCompilation)?;
        }
        Ok(String::from_utf8_lossy(&data).trim_end_matches('\0').into())
    }
}

fn device_info(
    mut device_data: impl FnMut(cl_uint) -> Result<Vec<u8>, BackendError>,
) -> Result<DeviceInfo, BackendError> {
    let name = device_data(CL_DEVICE_NAME)?;
    let device_type = u64::from_ne_bytes(read_bytes(&device_data(CL_DEVICE_TYPE)?, CL_DEVICE_TYPE)?);
    let device_type = if device_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if device_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else {
        DeviceType::Cpu
    };
    let vendor_id = u32::from_ne_bytes(read_bytes(&device_data(CL_DEVICE_VENDOR_ID)?, CL_DEVICE_VENDOR_ID)?);
    let local_mem_size = u64::from_ne_bytes(read_bytes(
        &device_data(CL_DEVICE_LOCAL_MEM_SIZE)?,
        CL_DEVICE_LOCAL_MEM_SIZE,
    )?);
    let max_work_group_size = usize::from_ne_bytes(read_bytes(
        &device_data(CL_DEVICE_MAX_WORK_GROUP_SIZE)?,
        CL_DEVICE_MAX_WORK_GROUP_SIZE,
    )?);
    let max_work_item_sizes = device_data(CL_DEVICE_MAX_WORK_ITEM_SIZES)?
        .chunks_exact(core::mem::size_of::<usize>())
        .map(|x| read_bytes(x, CL_DEVICE_MAX_WORK_ITEM_SIZES).map(usize::from_ne_bytes))
        .collect::<Result<Vec<usize>, BackendError>>()?;
    Ok(DeviceInfo {
        name: String::from_utf8_lossy(&name).trim_end_matches('\0').into(),
        device_type,
        vendor_id,
        local_mem_size: usize::try_from(local_mem_size).unwrap_or(usize::MAX),
        max_work_group_size,
        max_work_item_sizes,
    })
}

impl OpenCLDevice {
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl Drop for OpenCLRuntime {
    fn drop(&mut self) {
        for context in self.contexts.drain(..) {
            let _ = OpenCLStatus::from(unsafe { (self.clReleaseContext)(context) })
                .check(ErrorStatus::Deinitialization);
        }
    }
}

impl OpenCLKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl KernelArguments for OpenCLKernel {
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<(), FuseError> {
        let status = match arg {
            KernelArg::Buffer(handle) => {
                let mem = handle.0 as usize as *mut c_void;
                unsafe {
                    (self.clSetKernelArg)(self.kernel, index, core::mem::size_of::<*mut c_void>(), ptr::from_ref(&mem).cast())
                }
            }
            KernelArg::Scalar(value) => {
                let Some(bytes) = value.to_ne_bytes() else {
                    return Err(FuseError::UnknownDType(value.dtype()));
                };
                unsafe { (self.clSetKernelArg)(self.kernel, index, bytes.len(), bytes.as_ptr().cast()) }
            }
            KernelArg::UInt(x) => unsafe {
                (self.clSetKernelArg)(self.kernel, index, core::mem::size_of::<cl_uint>(), ptr::from_ref(&x).cast())
            },
        };
        OpenCLStatus::from(status).check(ErrorStatus::IncorrectKernelArg)?;
        Ok(())
    }
}

impl Drop for OpenCLKernel {
    fn drop(&mut self) {
        if !self.kernel.is_null() {
            let _ = OpenCLStatus::from(unsafe { (self.clReleaseKernel)(self.kernel) })
                .check(ErrorStatus::Deinitialization);
        }
        let _ = OpenCLStatus::from(unsafe { (self.clReleaseProgram)(self.program) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl OpenCLStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CL_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

const CL_PLATFORM_NAME: cl_uint = 0x0902; // 2306
const CL_DEVICE_TYPE: cl_uint = 0x1000; // 4096
const CL_DEVICE_VENDOR_ID: cl_uint = 0x1001; // 4097
const CL_DEVICE_MAX_WORK_GROUP_SIZE: cl_uint = 0x1004; // 4100
const CL_DEVICE_MAX_WORK_ITEM_SIZES: cl_uint = 0x1005; // 4101
const CL_DEVICE_LOCAL_MEM_SIZE: cl_uint = 0x1023; // 4131
const CL_DEVICE_NAME: cl_uint = 0x102B; // 4139
const CL_DEVICE_TYPE_GPU: cl_bitfield = 1 << 2;
const CL_DEVICE_TYPE_ACCELERATOR: cl_bitfield = 1 << 3;
const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183; // 4483

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, PartialEq, Debug, Eq)]
enum OpenCLStatus {
    CL_SUCCESS,
    CL_DEVICE_NOT_FOUND,
    CL_DEVICE_NOT_AVAILABLE,
    CL_COMPILER_NOT_AVAILABLE,
    CL_OUT_OF_RESOURCES,
    CL_OUT_OF_HOST_MEMORY,
    CL_BUILD_PROGRAM_FAILURE,
    CL_INVALID_VALUE,
    CL_INVALID_PLATFORM,
    CL_INVALID_DEVICE,
    CL_INVALID_CONTEXT,
    CL_INVALID_MEM_OBJECT,
    CL_INVALID_BINARY,
    CL_INVALID_BUILD_OPTIONS,
    CL_INVALID_PROGRAM,
    CL_INVALID_PROGRAM_EXECUTABLE,
    CL_INVALID_KERNEL_NAME,
    CL_INVALID_KERNEL_DEFINITION,
    CL_INVALID_KERNEL,
    CL_INVALID_ARG_INDEX,
    CL_INVALID_ARG_VALUE,
    CL_INVALID_ARG_SIZE,
    CL_INVALID_OPERATION,
    UNKNOWN,
}

impl From<cl_int> for OpenCLStatus {
    fn from(status: cl_int) -> Self {
        match status {
            0 => Self::CL_SUCCESS,
            -1 => Self::CL_DEVICE_NOT_FOUND,
            -2 => Self::CL_DEVICE_NOT_AVAILABLE,
            -3 => Self::CL_COMPILER_NOT_AVAILABLE,
            -5 => Self::CL_OUT_OF_RESOURCES,
            -6 => Self::CL_OUT_OF_HOST_MEMORY,
            -11 => Self::CL_BUILD_PROGRAM_FAILURE,
            -30 => Self::CL_INVALID_VALUE,
            -32 => Self::CL_INVALID_PLATFORM,
            -33 => Self::CL_INVALID_DEVICE,
            -34 => Self::CL_INVALID_CONTEXT,
            -38 => Self::CL_INVALID_MEM_OBJECT,
            -42 => Self::CL_INVALID_BINARY,
            -43 => Self::CL_INVALID_BUILD_OPTIONS,
            -44 => Self::CL_INVALID_PROGRAM,
            -45 => Self::CL_INVALID_PROGRAM_EXECUTABLE,
            -46 => Self::CL_INVALID_KERNEL_NAME,
            -47 => Self::CL_INVALID_KERNEL_DEFINITION,
            -48 => Self::CL_INVALID_KERNEL,
            -49 => Self::CL_INVALID_ARG_INDEX,
            -50 => Self::CL_INVALID_ARG_VALUE,
            -51 => Self::CL_INVALID_ARG_SIZE,
            -59 => Self::CL_INVALID_OPERATION,
            _ => Self::UNKNOWN,
        }
    }
}

#[test]
fn status_codes() {
    assert_eq!(OpenCLStatus::from(0), OpenCLStatus::CL_SUCCESS);
    assert_eq!(OpenCLStatus::from(-11), OpenCLStatus::CL_BUILD_PROGRAM_FAILURE);
    assert_eq!(OpenCLStatus::from(-1234), OpenCLStatus::UNKNOWN);
    let err = OpenCLStatus::from(-46).check(ErrorStatus::KernelCompilation);
    assert!(matches!(err, Err(BackendError { status: ErrorStatus::KernelCompilation, .. })));
}
