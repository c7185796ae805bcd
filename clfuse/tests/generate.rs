use clfuse::{
    ArrayInfo, AxpyFamily, BindingPolicy, BufferHandle, DType, DeviceInfo, DeviceType, Expression,
    ExpressionBuilder, FetchingPolicy, FuseError, KernelArg, OpKind, RecordedArguments, ReductionFamily, Template,
    TemplateParameters, Value,
};

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

fn vector(handle: u64) -> ArrayInfo {
    ArrayInfo::vector(BufferHandle(handle), DType::F32, 1000)
}

/// x = y + z
fn vector_add(x: ArrayInfo) -> Result<Expression, FuseError> {
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.binary(vector(2), OpKind::Add, vector(3));
    let root = b.assign(x, sum);
    b.build(root)
}

/// s = sum(x .* y)
fn dot() -> Result<Expression, FuseError> {
    let s = ArrayInfo::scalar(BufferHandle(3), DType::F32);
    let mut b = ExpressionBuilder::new(DType::F32);
    let prod = b.binary(vector(1), OpKind::ElementProd, vector(2));
    let sum = b.reduce(OpKind::Add, prod);
    let root = b.assign(s, sum);
    b.build(root)
}

/// Parameters of the kernel declared in source
fn parameters_of<'a>(source: &'a str, name: &str) -> Option<Vec<&'a str>> {
    let start = source.find(&format!("{name}("))? + name.len() + 1;
    let end = start + source[start..].find(')')?;
    Some(source[start..end].split(", ").collect())
}

#[test]
fn vector_addition() -> Result<(), FuseError> {
    let parameters = TemplateParameters { simd_width: 4, local_size_0: 128, local_size_1: 1, num_kernels: 1 };
    let family = AxpyFamily::new(FetchingPolicy::Contiguous, 64);
    let template = Template::new(family, parameters, BindingPolicy::BindToHandle);
    let batch = [vector_add(vector(1))?];
    let sources = template.generate(0, &batch, &gpu())?;
    assert_eq!(sources.len(), 1);
    let source = &sources[0];
    assert!(source.contains(
        "__kernel __attribute__((reqd_work_group_size(128,1,1))) void k0vaxpy(uint N, \
         __global float* float_0_pointer, uint float_0_start, uint float_0_stride, "
    ));
    assert!(source.contains("unsigned int chunk_size = (N/4+get_global_size(0)-1)/get_global_size(0);"));
    assert!(source.contains("for(unsigned int i = chunk_start; i < chunk_end; i += 1)"));
    assert!(source.contains("float4 float_1_reg = vload4(i, float_1_pointer + float_1_start);"));
    assert!(source.contains("float_0_reg = (float_1_reg+float_2_reg);"));
    assert!(source.contains("vstore4(float_0_reg, i, float_0_pointer + float_0_start);"));
    assert!(source.contains("for(unsigned int i = N/4*4 + get_global_id(0); i < N; i += get_global_size(0))"));
    assert!(source.contains("float float_1_reg = float_1_pointer[i*float_1_stride+float_1_start];"));
    // Output is loaded too, it can appear on the right hand side
    assert!(source.contains("float4 float_0_reg = vload4(i, float_0_pointer + float_0_start);"));

    let mut args = RecordedArguments::new();
    let count = template.set_all_arguments(&batch, None, &mut args)?;
    assert_eq!(Some(count as usize), parameters_of(source, "k0vaxpy").map(|p| p.len()));
    assert_eq!(args.args()[0], (0, KernelArg::UInt(1000)));
    assert_eq!(template.family().launch_size(template.parameters()), (8192, 128));
    Ok(())
}

#[test]
fn fallback_kernel() -> Result<(), FuseError> {
    let parameters = TemplateParameters { simd_width: 4, local_size_0: 64, local_size_1: 1, num_kernels: 2 };
    let template = Template::new(AxpyFamily::default(), parameters, BindingPolicy::BindToHandle);
    let contiguous = [vector_add(vector(1))?];
    let strided = [vector_add(ArrayInfo::vector(BufferHandle(1), DType::F32, 2000).slice((0, 0), (2, 1)))?];
    let sources = template.generate(3, &strided, &gpu())?;
    assert_eq!(sources.len(), 2);
    assert!(sources[0].contains("void k3vaxpy("));
    assert!(sources[1].contains("void k3vaxpyf("));
    assert!(!sources[1].contains("vload"));
    assert!(sources[1].contains("float_0_pointer[i*float_0_stride+float_0_start] = float_0_reg;"));
    assert_eq!(template.select_kernel(&strided), 1);
    assert_eq!(template.select_kernel(&contiguous), 0);
    Ok(())
}

#[test]
fn sum_of_products() -> Result<(), FuseError> {
    let parameters = TemplateParameters { simd_width: 1, local_size_0: 256, local_size_1: 1, num_kernels: 1 };
    let family = ReductionFamily::new(FetchingPolicy::Strided, 64);
    let template = Template::new(family, parameters, BindingPolicy::BindToHandle);
    let batch = [dot()?];
    let sources = template.generate(7, &batch, &gpu())?;
    assert_eq!(sources.len(), 2);
    let (first, second) = (&sources[0], &sources[1]);
    assert!(first.contains("void k7reduction0(uint N, __global float* temp, __global float* float_0_pointer"));
    assert!(first.contains("__local float float_3_buf[256];"));
    assert!(first.contains("float float_3_acc = 0;"));
    assert!(first.contains("float float_3_cur = (float_1_reg*float_2_reg);"));
    assert!(first.contains("float_3_acc= (float_3_acc)+(float_3_cur);"));
    assert!(first.contains("barrier(CLK_LOCAL_MEM_FENCE);"));
    assert!(first.contains("if (lid == 0) temp[get_group_id(0)] = float_3_buf[0];"));
    assert!(second.contains("void k7reduction1("));
    assert!(second.contains("for(unsigned int i = lid; i < 64; i += 256)"));
    assert!(second.contains("float_0_reg = float_3_buf[0];"));
    assert!(second.contains("float_0_pointer[float_0_start] = float_0_reg;"));

    let mut args = RecordedArguments::new();
    let count = template.set_all_arguments(&batch, Some(BufferHandle(99)), &mut args)?;
    assert_eq!(Some(count as usize), parameters_of(first, "k7reduction0").map(|p| p.len()));
    assert_eq!(args.args()[..2], [(0, KernelArg::UInt(1000)), (1, KernelArg::Buffer(BufferHandle(99)))]);
    assert!(matches!(
        template.set_all_arguments(&batch, None, &mut RecordedArguments::new()),
        Err(FuseError::InvalidExpression(_))
    ));
    assert_eq!(template.family().temp_bytes(DType::F32), 256);
    Ok(())
}

#[test]
fn max_reduction_is_seeded_with_negative_infinity() -> Result<(), FuseError> {
    let s = ArrayInfo::scalar(BufferHandle(3), DType::F32);
    let mut b = ExpressionBuilder::new(DType::F32);
    let max = b.reduce(OpKind::ElementFmax, vector(1));
    let root = b.assign(s, max);
    let batch = [b.build(root)?];
    let parameters = TemplateParameters { simd_width: 4, local_size_0: 128, local_size_1: 1, num_kernels: 1 };
    let template = Template::new(ReductionFamily::default(), parameters, BindingPolicy::BindToHandle);
    let sources = template.generate(0, &batch, &gpu())?;
    assert!(sources[0].contains("float float_2_acc = -INFINITY;"));
    assert!(sources[0].contains("float_2_acc=fmax(float_2_acc,float_2_cur.s3);"));
    Ok(())
}

#[test]
fn generation_is_reproducible() -> Result<(), FuseError> {
    let template = Template::new(AxpyFamily::default(), TemplateParameters::default(), BindingPolicy::BindAllUnique);
    let copy = template.clone();
    assert_eq!(template, copy);
    let batch = [vector_add(vector(1))?, vector_add(vector(4))?];
    assert_eq!(template.generate(1, &batch, &gpu())?, copy.generate(1, &batch, &gpu())?);
    Ok(())
}

#[test]
fn empty_batch() {
    let template = Template::new(AxpyFamily::default(), TemplateParameters::default(), BindingPolicy::BindToHandle);
    assert!(matches!(template.generate(0, &[], &gpu()), Err(FuseError::InvalidExpression(_))));
}

#[test]
fn family_must_fit_expression() -> Result<(), FuseError> {
    let device = gpu();
    let axpy = Template::new(AxpyFamily::default(), TemplateParameters::default(), BindingPolicy::BindToHandle);
    let reduction =
        Template::new(ReductionFamily::default(), TemplateParameters::default(), BindingPolicy::BindToHandle);

    assert!(matches!(axpy.generate(0, &[dot()?], &device), Err(FuseError::TemplateNotApplicable(_))));
    assert!(matches!(
        reduction.generate(0, &[vector_add(vector(1))?], &device),
        Err(FuseError::TemplateNotApplicable(_))
    ));

    // Not an assignment
    let mut b = ExpressionBuilder::new(DType::F32);
    let root = b.binary(vector(1), OpKind::Add, vector(2));
    assert!(matches!(axpy.generate(0, &[b.build(root)?], &device), Err(FuseError::TemplateNotApplicable(_))));

    // Index reductions are not supported
    let s = ArrayInfo::scalar(BufferHandle(3), DType::F32);
    let mut b = ExpressionBuilder::new(DType::F32);
    let arg = b.reduce(OpKind::ElementArgMax, vector(1));
    let root = b.assign(s, arg);
    assert!(matches!(
        reduction.generate(0, &[b.build(root)?], &device),
        Err(FuseError::TemplateNotApplicable(_))
    ));

    // Subtraction has no neutral element
    let mut b = ExpressionBuilder::new(DType::F32);
    let diff = b.reduce(OpKind::Sub, vector(1));
    let root = b.assign(s, diff);
    assert!(matches!(
        reduction.generate(0, &[b.build(root)?], &device),
        Err(FuseError::UnsupportedReduction(OpKind::Sub))
    ));
    Ok(())
}

#[test]
fn reduction_size_from_first_array() -> Result<(), FuseError> {
    let template =
        Template::new(ReductionFamily::default(), TemplateParameters::default(), BindingPolicy::BindToHandle);
    let s = ArrayInfo::scalar(BufferHandle(3), DType::F32);

    // s = sum(2 * x)
    let mut b = ExpressionBuilder::new(DType::F32);
    let scaled = b.binary(Value::F32(2.0), OpKind::Mult, vector(1));
    let sum = b.reduce(OpKind::Add, scaled);
    let root = b.assign(s, sum);
    let batch = [b.build(root)?];
    assert_eq!(template.generate(0, &batch, &gpu())?.len(), 2);
    let mut args = RecordedArguments::new();
    template.set_all_arguments(&batch, Some(BufferHandle(99)), &mut args)?;
    assert_eq!(args.args()[0], (0, KernelArg::UInt(1000)));

    // Nothing to take the size from
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.reduce(OpKind::Add, Value::F32(2.0));
    let root = b.assign(s, sum);
    let batch = [b.build(root)?];
    assert!(matches!(template.generate(0, &batch, &gpu()), Err(FuseError::InvalidExpression(_))));
    Ok(())
}
