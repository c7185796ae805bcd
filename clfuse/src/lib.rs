//! Generator of fused `OpenCL` kernels for array expressions.
//!
//! An array library describes one computation as an [`Expression`] tree, picks a [`Template`]
//! and asks it for kernel source. Generated kernels are compiled by the caller, or by
//! [`backend::opencl::OpenCLRuntime`], and their arguments are set with [`Template::set_arguments`].
//!
//! Set `CLFUSE_DEBUG` environment variable to print diagnostics:
//! 1 - devices and config, 2 - generated source, 4 - bound arguments, 8 - mappings.
//! Values can be combined, e.g. 3 prints devices and source.

use std::sync::OnceLock;

pub mod arguments;
pub mod backend;
pub mod binder;
pub mod config;
pub mod device;
mod dtype;
pub mod emit;
mod error;
pub mod expression;
pub mod mapping;
pub mod template;

pub use arguments::{KernelArg, KernelArguments, RecordedArguments};
pub use binder::{Binder, BindingPolicy};
pub use config::Config;
pub use device::{DeviceInfo, DeviceType};
pub use dtype::{DType, Value};
pub use emit::FetchingPolicy;
pub use error::{BackendError, ErrorStatus, FuseError};
pub use expression::{
    ArrayInfo, BufferHandle, Expression, ExpressionBuilder, Leaf, OpFamily, OpKind, Operand, Operator,
    RepeatInfo, Transposition,
};
pub use template::{AxpyFamily, InvalidTemplate, ReductionFamily, Template, TemplateFamily, TemplateParameters};

static DEBUG: OnceLock<u32> = OnceLock::new();

fn debug() -> u32 {
    *DEBUG.get_or_init(|| {
        std::env::var("CLFUSE_DEBUG").ok().and_then(|x| x.parse::<u32>().ok()).unwrap_or(0)
    })
}

pub(crate) fn debug_dev() -> bool {
    debug() % 2 == 1
}

pub(crate) fn debug_source() -> bool {
    (debug() >> 1) % 2 == 1
}

pub(crate) fn debug_args() -> bool {
    (debug() >> 2) % 2 == 1
}

pub(crate) fn debug_mapping() -> bool {
    (debug() >> 3) % 2 == 1
}
