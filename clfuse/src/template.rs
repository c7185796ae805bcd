//! Template dispatch framework.
//!
//! A [`Template`] couples launch parameters with a [`TemplateFamily`], the plug-in which
//! writes kernel bodies. The framework does validation against device limits, mapping of
//! expressions and binding of kernel arguments, families only write source.

mod axpy;
mod reduction;

pub use axpy::AxpyFamily;
pub use reduction::ReductionFamily;

use nanoserde::DeJson;

use crate::{
    arguments::{bind_expression, KernelArg, KernelArguments},
    binder::{Binder, BindingPolicy},
    device::DeviceInfo,
    error::FuseError,
    expression::{BufferHandle, Expression},
    mapping::{map_expression, Mapping},
};

/// Launch parameters shared by all families
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeJson)]
pub struct TemplateParameters {
    /// Vector width of loads and stores, one of 1, 2, 4, 8, 16
    pub simd_width: u32,
    pub local_size_0: usize,
    pub local_size_1: usize,
    /// Number of kernel variants to generate
    pub num_kernels: usize,
}

impl Default for TemplateParameters {
    fn default() -> Self {
        TemplateParameters { simd_width: 1, local_size_0: 128, local_size_1: 1, num_kernels: 1 }
    }
}

/// Failed check of template parameters against device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTemplate {
    LocalMemoryOverflow,
    WorkGroupSizeOverflow,
    LocalSize0Overflow,
    LocalSize1Overflow,
    /// Local size of zero along some dimension
    EmptyLocalSize,
    LocalSizeNotWarpMultiple,
    InvalidSimdWidth,
    /// Family works with one dimensional work groups only
    OneDimensionalLocalSize,
    /// Tree reduction in local memory needs power of two work group
    LocalSize0NotPowerOfTwo,
    /// Arrays with offset or stride can not be loaded with vector loads
    StridedAccessRequiresUnitSimd,
}

impl InvalidTemplate {
    /// Stable error code
    pub const fn code(self) -> i32 {
        match self {
            InvalidTemplate::LocalMemoryOverflow => -1,
            InvalidTemplate::WorkGroupSizeOverflow => -2,
            InvalidTemplate::LocalSize0Overflow => -3,
            InvalidTemplate::LocalSize1Overflow => -4,
            InvalidTemplate::EmptyLocalSize => -5,
            InvalidTemplate::LocalSizeNotWarpMultiple => -6,
            InvalidTemplate::InvalidSimdWidth => -7,
            InvalidTemplate::OneDimensionalLocalSize => -8,
            InvalidTemplate::LocalSize0NotPowerOfTwo => -12,
            InvalidTemplate::StridedAccessRequiresUnitSimd => -13,
        }
    }
}

/// Kernel shape generator plugged into [`Template`].
pub trait TemplateFamily: Clone + std::fmt::Debug {
    /// Writes source of all kernels of this family for the batch.
    /// Mappings are in the same order as expressions.
    fn generate_impl(
        &self,
        label: u32,
        expressions: &[Expression],
        mappings: &[Mapping],
        parameters: &TemplateParameters,
    ) -> Result<Vec<String>, FuseError>;

    /// Local memory used by one work group in bytes
    fn lmem_usage(&self, expressions: &[Expression], parameters: &TemplateParameters) -> usize {
        let _ = (expressions, parameters);
        0
    }

    /// Registers used by one work item
    fn registers_usage(&self, expressions: &[Expression], parameters: &TemplateParameters) -> usize {
        let _ = (expressions, parameters);
        0
    }

    /// Family specific validation, runs after the generic checks passed
    fn check_invalid_impl(
        &self,
        expressions: &[Expression],
        device: &DeviceInfo,
        parameters: &TemplateParameters,
    ) -> Result<(), InvalidTemplate> {
        let _ = (expressions, device, parameters);
        Ok(())
    }

    /// Arguments which precede the expression arguments, e.g. problem size
    fn leading_arguments(
        &self,
        expressions: &[Expression],
        temp: Option<BufferHandle>,
    ) -> Result<Vec<KernelArg>, FuseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<F: TemplateFamily> {
    family: F,
    parameters: TemplateParameters,
    binding_policy: BindingPolicy,
}

impl<F: TemplateFamily> Template<F> {
    pub const fn new(family: F, parameters: TemplateParameters, binding_policy: BindingPolicy) -> Self {
        Template { family, parameters, binding_policy }
    }

    pub const fn family(&self) -> &F {
        &self.family
    }

    pub const fn parameters(&self) -> &TemplateParameters {
        &self.parameters
    }

    pub const fn binding_policy(&self) -> BindingPolicy {
        self.binding_policy
    }

    pub fn lmem_usage(&self, expressions: &[Expression]) -> usize {
        self.family.lmem_usage(expressions, &self.parameters)
    }

    pub fn registers_usage(&self, expressions: &[Expression]) -> usize {
        self.family.registers_usage(expressions, &self.parameters)
    }

    /// Checks parameters against device limits, first failed check is returned
    pub fn check_invalid(&self, expressions: &[Expression], device: &DeviceInfo) -> Result<(), InvalidTemplate> {
        let p = &self.parameters;
        if self.lmem_usage(expressions) > device.local_mem_size {
            return Err(InvalidTemplate::LocalMemoryOverflow);
        }
        if p.local_size_0 == 0 || p.local_size_1 == 0 {
            return Err(InvalidTemplate::EmptyLocalSize);
        }
        let Some(local_size) = p.local_size_0.checked_mul(p.local_size_1) else {
            return Err(InvalidTemplate::WorkGroupSizeOverflow);
        };
        if local_size > device.max_work_group_size {
            return Err(InvalidTemplate::WorkGroupSizeOverflow);
        }
        if p.local_size_0 > device.max_work_item_size(0) {
            return Err(InvalidTemplate::LocalSize0Overflow);
        }
        if p.local_size_1 > device.max_work_item_size(1) {
            return Err(InvalidTemplate::LocalSize1Overflow);
        }
        if local_size % device.warp_size() > 0 {
            return Err(InvalidTemplate::LocalSizeNotWarpMultiple);
        }
        if !matches!(p.simd_width, 1 | 2 | 4 | 8 | 16) {
            return Err(InvalidTemplate::InvalidSimdWidth);
        }
        self.family.check_invalid_impl(expressions, device, p)
    }

    /// Generates source of all kernels for the batch, named `k{label}{suffix}`
    pub fn generate(
        &self,
        label: u32,
        expressions: &[Expression],
        device: &DeviceInfo,
    ) -> Result<Vec<String>, FuseError> {
        if expressions.is_empty() {
            return Err(FuseError::invalid_expression("Can not generate kernels for empty batch"));
        }
        self.check_invalid(expressions, device)?;
        let mut binder = Binder::new(self.binding_policy);
        let mappings = expressions
            .iter()
            .map(|expression| map_expression(expression, &mut binder))
            .collect::<Result<Vec<Mapping>, FuseError>>()?;
        if crate::debug_mapping() {
            for (i, mapping) in mappings.iter().enumerate() {
                println!("Mapping of expression {i}");
                for ((idx, leaf), object) in mapping.iter() {
                    println!("  ({idx}, {leaf:?}) -> {} {}", object.type_key(), object.name());
                }
            }
        }
        let sources = self.family.generate_impl(label, expressions, &mappings, &self.parameters)?;
        if crate::debug_source() {
            for source in &sources {
                println!("{source}");
            }
        }
        Ok(sources)
    }

    /// Binds runtime values of the batch starting at `current_arg`.
    /// Uses fresh binder, so identical buffers collapse exactly as in [`Template::generate`].
    pub fn set_arguments<K: KernelArguments>(
        &self,
        expressions: &[Expression],
        kernel: &mut K,
        current_arg: &mut u32,
    ) -> Result<(), FuseError> {
        let mut binder = Binder::new(self.binding_policy);
        for expression in expressions {
            bind_expression(expression, &mut binder, current_arg, kernel)?;
        }
        Ok(())
    }

    /// Binds leading arguments of the family and then all expression arguments.
    /// Returns number of set arguments.
    pub fn set_all_arguments<K: KernelArguments>(
        &self,
        expressions: &[Expression],
        temp: Option<BufferHandle>,
        kernel: &mut K,
    ) -> Result<u32, FuseError> {
        let mut current_arg = 0;
        for arg in self.family.leading_arguments(expressions, temp)? {
            kernel.set_arg(current_arg, arg)?;
            current_arg += 1;
        }
        self.set_arguments(expressions, kernel, &mut current_arg)?;
        Ok(current_arg)
    }
}
