use clfuse::{
    device::AMD_VENDOR_ID, emit::kernel_name, mapping::Mapping, ArrayInfo, AxpyFamily, BindingPolicy,
    BufferHandle, DType, DeviceInfo, DeviceType, Expression, ExpressionBuilder, FetchingPolicy, FuseError,
    InvalidTemplate, KernelArg, OpKind, ReductionFamily, Template, TemplateFamily, TemplateParameters,
};

/// Family without own restrictions, checks only the generic limits
#[derive(Debug, Clone, PartialEq, Eq)]
struct Unrestricted;

impl TemplateFamily for Unrestricted {
    fn generate_impl(
        &self,
        label: u32,
        _: &[Expression],
        _: &[Mapping],
        _: &TemplateParameters,
    ) -> Result<Vec<String>, FuseError> {
        Ok(vec![kernel_name(label, "noop")])
    }

    fn leading_arguments(&self, _: &[Expression], _: Option<BufferHandle>) -> Result<Vec<KernelArg>, FuseError> {
        Ok(Vec::new())
    }
}

fn gpu() -> DeviceInfo {
    DeviceInfo {
        name: "test gpu".into(),
        device_type: DeviceType::Gpu,
        vendor_id: 0x10DE,
        local_mem_size: 49152,
        max_work_group_size: 1024,
        max_work_item_sizes: vec![1024, 1024, 64],
    }
}

fn params(simd_width: u32, local_size_0: usize, local_size_1: usize) -> TemplateParameters {
    TemplateParameters { simd_width, local_size_0, local_size_1, num_kernels: 1 }
}

fn axpy_batch() -> Result<Vec<Expression>, FuseError> {
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 4096);
    let y = ArrayInfo::vector(BufferHandle(2), DType::F32, 4096);
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.binary(x, OpKind::Add, y);
    let root = b.assign(x, sum);
    Ok(vec![b.build(root)?])
}

fn sum_batch() -> Result<Vec<Expression>, FuseError> {
    let s = ArrayInfo::scalar(BufferHandle(1), DType::F32);
    let x = ArrayInfo::vector(BufferHandle(2), DType::F32, 4096);
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.reduce(OpKind::Add, x);
    let root = b.assign(s, sum);
    Ok(vec![b.build(root)?])
}

#[test]
fn warp_multiple() -> Result<(), FuseError> {
    let batch = axpy_batch()?;
    let ok = Template::new(Unrestricted, params(1, 16, 16), BindingPolicy::BindToHandle);
    assert_eq!(ok.check_invalid(&batch, &gpu()), Ok(()));
    let bad = Template::new(Unrestricted, params(1, 15, 15), BindingPolicy::BindToHandle);
    let err = bad.check_invalid(&batch, &gpu());
    assert_eq!(err, Err(InvalidTemplate::LocalSizeNotWarpMultiple));
    assert_eq!(err.map_err(InvalidTemplate::code), Err(-6));

    let amd = DeviceInfo { vendor_id: AMD_VENDOR_ID, ..gpu() };
    let template = Template::new(Unrestricted, params(1, 32, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &amd), Err(InvalidTemplate::LocalSizeNotWarpMultiple));
    let cpu = DeviceInfo { device_type: DeviceType::Cpu, ..gpu() };
    let template = Template::new(Unrestricted, params(1, 8, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &cpu), Ok(()));
    Ok(())
}

#[test]
fn simd_width() -> Result<(), FuseError> {
    let batch = axpy_batch()?;
    for (simd_width, res) in [(1, Ok(())), (3, Err(InvalidTemplate::InvalidSimdWidth)), (16, Ok(()))] {
        let template = Template::new(Unrestricted, params(simd_width, 64, 1), BindingPolicy::BindToHandle);
        assert_eq!(template.check_invalid(&batch, &gpu()), res);
    }
    assert_eq!(InvalidTemplate::InvalidSimdWidth.code(), -7);
    Ok(())
}

#[test]
fn device_limits() -> Result<(), FuseError> {
    let batch = axpy_batch()?;
    let template = Template::new(Unrestricted, params(1, 2048, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Err(InvalidTemplate::WorkGroupSizeOverflow));

    let narrow = DeviceInfo { max_work_group_size: 4096, max_work_item_sizes: vec![256, 4, 1], ..gpu() };
    let template = Template::new(Unrestricted, params(1, 512, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &narrow), Err(InvalidTemplate::LocalSize0Overflow));
    let template = Template::new(Unrestricted, params(1, 32, 8), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &narrow), Err(InvalidTemplate::LocalSize1Overflow));
    Ok(())
}

#[test]
fn local_memory_is_checked_first() -> Result<(), FuseError> {
    let batch = sum_batch()?;
    let small = DeviceInfo { local_mem_size: 4096, ..gpu() };
    // 2048 floats do not fit into local memory and 2048 work items do not fit into a work group
    let template = Template::new(ReductionFamily::default(), params(1, 2048, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.lmem_usage(&batch), 8192);
    let err = template.check_invalid(&batch, &small);
    assert_eq!(err, Err(InvalidTemplate::LocalMemoryOverflow));
    assert_eq!(err.map_err(InvalidTemplate::code), Err(-1));
    Ok(())
}

#[test]
fn family_checks_run_last() -> Result<(), FuseError> {
    let batch = sum_batch()?;
    let template = Template::new(ReductionFamily::default(), params(1, 16, 16), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Err(InvalidTemplate::OneDimensionalLocalSize));
    let template = Template::new(ReductionFamily::default(), params(1, 96, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Err(InvalidTemplate::LocalSize0NotPowerOfTwo));
    // Generic check wins over the family check
    let template = Template::new(ReductionFamily::default(), params(3, 96, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Err(InvalidTemplate::InvalidSimdWidth));
    Ok(())
}

#[test]
fn strided_access_needs_unit_simd() -> Result<(), FuseError> {
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 4096).slice((1, 0), (2, 1));
    let y = ArrayInfo::vector(BufferHandle(2), DType::F32, 4096);
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.binary(y, OpKind::Add, y);
    let root = b.assign(x, sum);
    let batch = [b.build(root)?];
    let family = AxpyFamily::new(FetchingPolicy::Strided, 64);
    let template = Template::new(family, params(4, 128, 1), BindingPolicy::BindToHandle);
    let err = template.generate(0, &batch, &gpu());
    assert!(matches!(err, Err(FuseError::OperationNotSupported(InvalidTemplate::StridedAccessRequiresUnitSimd))));
    let template = Template::new(family, params(1, 128, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Ok(()));
    Ok(())
}

#[test]
fn invalid_template_is_not_generated() -> Result<(), FuseError> {
    let batch = axpy_batch()?;
    let template = Template::new(AxpyFamily::default(), params(1, 48, 1), BindingPolicy::BindToHandle);
    match template.generate(0, &batch, &gpu()) {
        Err(FuseError::OperationNotSupported(e)) => assert_eq!(e.code(), -6),
        res => panic!("Expected invalid template, got {res:?}"),
    }
    Ok(())
}

#[test]
fn degenerate_local_sizes() -> Result<(), FuseError> {
    let batch = axpy_batch()?;
    let template = Template::new(Unrestricted, params(1, usize::MAX, 2), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&batch, &gpu()), Err(InvalidTemplate::WorkGroupSizeOverflow));
    for (local_size_0, local_size_1) in [(0, 1), (32, 0), (0, 0)] {
        let template = Template::new(Unrestricted, params(1, local_size_0, local_size_1), BindingPolicy::BindToHandle);
        let err = template.check_invalid(&batch, &gpu());
        assert_eq!(err, Err(InvalidTemplate::EmptyLocalSize));
        assert_eq!(err.map_err(InvalidTemplate::code), Err(-5));
    }
    let template = Template::new(ReductionFamily::default(), params(1, usize::MAX, 1), BindingPolicy::BindToHandle);
    assert_eq!(template.check_invalid(&sum_batch()?, &gpu()), Err(InvalidTemplate::LocalMemoryOverflow));
    Ok(())
}
