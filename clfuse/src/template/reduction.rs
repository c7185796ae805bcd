//! Reduction of a whole vector into a scalar, in two kernels.
//!
//! First kernel reduces chunks of the vector into one partial result per work group,
//! second kernel reduces the partial results and evaluates the rest of the expressions.

use std::collections::BTreeSet;

use crate::{
    arguments::KernelArg,
    device::DeviceInfo,
    emit::{
        append_simd_suffix, append_width, compute_reduction, element_wise_loop_1d, evaluate,
        evaluate_operand, generate_arguments, kernel_name, neutral_element, process_all,
        requires_fallback, vector_size, vload, Accessors, FetchingPolicy, KernelStream,
    },
    error::FuseError,
    expression::{traverse, BufferHandle, Expression, Leaf, OpFamily, OpKind, Operand},
    mapping::{MappedObject, Mapping},
    DType,
};

use super::{InvalidTemplate, TemplateFamily, TemplateParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionFamily {
    pub fetching_policy: FetchingPolicy,
    /// Number of work groups of the first kernel, also number of partial results
    pub num_groups: usize,
}

impl Default for ReductionFamily {
    fn default() -> Self {
        ReductionFamily { fetching_policy: FetchingPolicy::Strided, num_groups: 256 }
    }
}

/// The one reduction of the batch
struct Target<'a> {
    expression: &'a Expression,
    mapping: &'a Mapping,
    node: usize,
    object: &'a MappedObject,
    op: OpKind,
}

impl ReductionFamily {
    pub const fn new(fetching_policy: FetchingPolicy, num_groups: usize) -> ReductionFamily {
        ReductionFamily { fetching_policy, num_groups }
    }

    /// Global and local work size of both kernels
    pub const fn launch_sizes(&self, parameters: &TemplateParameters) -> [(usize, usize); 2] {
        let ls0 = parameters.local_size_0;
        [(self.num_groups * ls0, ls0), (ls0, ls0)]
    }

    /// Size of the temporary buffer for partial results
    pub fn temp_bytes(&self, dtype: DType) -> usize {
        self.num_groups * dtype.byte_size()
    }

    fn target<'a>(expressions: &'a [Expression], mappings: &'a [Mapping]) -> Result<Target<'a>, FuseError> {
        let mut target = None;
        for (expression, mapping) in expressions.iter().zip(mappings) {
            for ((idx, leaf), object) in mapping.iter() {
                if *leaf != Leaf::Parent {
                    continue;
                }
                if object.type_key() != "scalar_reduction" {
                    return Err(FuseError::not_applicable(format!(
                        "reduction can not evaluate {}",
                        object.type_key()
                    )));
                }
                let op = expression.tree()[*idx].op.kind;
                if op.is_index_reduction() {
                    return Err(FuseError::not_applicable(format!("reduction does not support {op:?}")));
                }
                if target.is_some() {
                    return Err(FuseError::not_applicable("reduction supports one reduction per batch"));
                }
                target = Some(Target { expression, mapping, node: *idx, object, op });
            }
        }
        target.ok_or_else(|| FuseError::not_applicable("batch does not contain reduction"))
    }

    /// Number of elements reduced by node `idx`, the size of the first array below it
    fn reduced_size(expression: &Expression, idx: usize) -> Result<u32, FuseError> {
        let mut size = None;
        traverse(expression, idx, true, &mut |expression, idx, leaf| {
            if size.is_some() {
                return Ok(());
            }
            let node = &expression.tree()[idx];
            if let Some(Operand::Array(array)) = node.operand(leaf) {
                size = Some(if leaf == Leaf::Lhs {
                    vector_size(node)?
                } else {
                    array.shape.0.max(array.shape.1)
                });
            }
            Ok(())
        })?;
        let Some(n) = size else {
            return Err(FuseError::invalid_expression("Reduction does not read any array"));
        };
        let Ok(n) = u32::try_from(n) else {
            return Err(FuseError::invalid_expression(format!("Size {n} does not fit into uint")));
        };
        Ok(n)
    }

    fn header(stream: &mut KernelStream, name: &str, arguments: &str, scalartype: &str, local_size_0: usize) {
        stream.line(format!(
            "__kernel __attribute__((reqd_work_group_size({local_size_0},1,1))) void {name}(uint N, __global {scalartype}* temp{}{arguments})",
            if arguments.is_empty() { "" } else { ", " }
        ));
        stream.line("{");
        stream.inc_tab();
        stream.line("unsigned int lid = get_local_id(0);");
    }

    /// Reduces `#buf` in local memory, result ends in `#buf[0]`
    fn local_reduction(
        stream: &mut KernelStream,
        target: &Target,
        local_size_0: usize,
    ) -> Result<(), FuseError> {
        stream.line(target.object.process("#buf[lid] = #acc;"));
        stream.line(format!(
            "for(unsigned int stride = {}; stride > 0; stride /= 2)",
            local_size_0 / 2
        ));
        stream.line("{");
        stream.inc_tab();
        stream.line("barrier(CLK_LOCAL_MEM_FENCE);");
        stream.line("if (lid < stride)");
        stream.inc_tab();
        compute_reduction(
            stream,
            &target.object.process("#buf[lid]"),
            &target.object.process("#buf[lid+stride]"),
            target.op,
        )?;
        stream.dec_tab();
        stream.dec_tab();
        stream.line("}");
        Ok(())
    }

    fn first_kernel(
        &self,
        name: &str,
        arguments: &str,
        target: &Target,
        mappings: &[Mapping],
        parameters: &TemplateParameters,
    ) -> Result<String, FuseError> {
        let ls0 = parameters.local_size_0;
        let scalartype = target.object.scalartype();
        let neutral = neutral_element(target.op)?;
        let mut stream = KernelStream::new();
        Self::header(&mut stream, name, arguments, scalartype, ls0);
        stream.line(target.object.process(&format!("__local #scalartype #buf[{ls0}];")));
        process_all(&mut stream, "array0", "#scalartype #namereg = #pointer[#start];", mappings);
        stream.line(target.object.process(&format!("#scalartype #acc = {neutral};")));

        let accessors = Accessors::new()
            .with("array0", "#namereg")
            .with("array1", "#namereg")
            .with("host_scalar", "#name");
        let acc = target.object.process("#acc");
        let cur = target.object.process("#name_cur");
        element_wise_loop_1d(
            &mut stream,
            self.fetching_policy,
            parameters.simd_width,
            "i",
            "N",
            "get_global_id(0)",
            "get_global_size(0)",
            |stream, w| {
                let load = if w > 1 {
                    format!("{} #namereg = {};", append_width("#scalartype", w), vload(w, "i", "#pointer + #start"))
                } else {
                    "#scalartype #namereg = #pointer[i*#stride+#start];".into()
                };
                process_all(stream, "array1", &load, mappings);
                let value = evaluate_operand(target.expression, target.node, Leaf::Lhs, target.mapping, &accessors)?;
                stream.line(format!("{} {cur} = {value};", append_width(scalartype, w)));
                if w == 1 {
                    compute_reduction(stream, &acc, &cur, target.op)
                } else {
                    for k in 0..w {
                        compute_reduction(stream, &acc, &append_simd_suffix(&format!("{cur}.s"), k), target.op)?;
                    }
                    Ok(())
                }
            },
        )?;

        Self::local_reduction(&mut stream, target, ls0)?;
        stream.line(target.object.process("if (lid == 0) temp[get_group_id(0)] = #buf[0];"));
        stream.dec_tab();
        stream.line("}");
        Ok(stream.into_source())
    }

    fn second_kernel(
        &self,
        name: &str,
        arguments: &str,
        target: &Target,
        expressions: &[Expression],
        mappings: &[Mapping],
        parameters: &TemplateParameters,
    ) -> Result<String, FuseError> {
        let ls0 = parameters.local_size_0;
        let neutral = neutral_element(target.op)?;
        let mut stream = KernelStream::new();
        Self::header(&mut stream, name, arguments, target.object.scalartype(), ls0);
        stream.line(target.object.process(&format!("__local #scalartype #buf[{ls0}];")));
        stream.line(target.object.process(&format!("#scalartype #acc = {neutral};")));
        stream.line(format!("for(unsigned int i = lid; i < {}; i += {ls0})", self.num_groups));
        stream.line("{");
        stream.inc_tab();
        compute_reduction(&mut stream, &target.object.process("#acc"), "temp[i]", target.op)?;
        stream.dec_tab();
        stream.line("}");
        Self::local_reduction(&mut stream, target, ls0)?;

        stream.line("barrier(CLK_LOCAL_MEM_FENCE);");
        stream.line("if (lid == 0)");
        stream.line("{");
        stream.inc_tab();
        process_all(&mut stream, "array0", "#scalartype #namereg = #pointer[#start];", mappings);
        let accessors = Accessors::new()
            .with("scalar_reduction", "#buf[0]")
            .with("array0", "#namereg")
            .with("host_scalar", "#name");
        for (expression, mapping) in expressions.iter().zip(mappings) {
            stream.line(format!("{};", evaluate(expression, mapping, &accessors)?));
        }
        let mut stored = BTreeSet::new();
        for (expression, mapping) in expressions.iter().zip(mappings) {
            if let Some(object) = mapping.get(expression.root(), Leaf::Lhs) {
                if stored.insert(object.name()) {
                    stream.line(object.process("#pointer[#start] = #namereg;"));
                }
            }
        }
        stream.dec_tab();
        stream.line("}");
        stream.dec_tab();
        stream.line("}");
        Ok(stream.into_source())
    }
}

impl TemplateFamily for ReductionFamily {
    fn generate_impl(
        &self,
        label: u32,
        expressions: &[Expression],
        mappings: &[Mapping],
        parameters: &TemplateParameters,
    ) -> Result<Vec<String>, FuseError> {
        for (expression, mapping) in expressions.iter().zip(mappings) {
            if !expression.root_node().op.kind.is_assignment() {
                return Err(FuseError::not_applicable("reduction expressions must be assignments"));
            }
            if mapping.get(expression.root(), Leaf::Lhs).map(|o| o.type_key()) != Some("array0") {
                return Err(FuseError::not_applicable("reduction can only assign to scalars"));
            }
        }
        let target = Self::target(expressions, mappings)?;
        // N is bound as the first argument
        Self::reduced_size(target.expression, target.node)?;
        let arguments = generate_arguments(expressions, mappings)?;
        Ok(vec![
            self.first_kernel(&kernel_name(label, "reduction0"), &arguments, &target, mappings, parameters)?,
            self.second_kernel(
                &kernel_name(label, "reduction1"),
                &arguments,
                &target,
                expressions,
                mappings,
                parameters,
            )?,
        ])
    }

    fn lmem_usage(&self, expressions: &[Expression], parameters: &TemplateParameters) -> usize {
        expressions.first().map_or(0, |e| parameters.local_size_0.saturating_mul(e.dtype().byte_size()))
    }

    fn check_invalid_impl(
        &self,
        expressions: &[Expression],
        _: &DeviceInfo,
        parameters: &TemplateParameters,
    ) -> Result<(), InvalidTemplate> {
        if parameters.local_size_1 != 1 {
            return Err(InvalidTemplate::OneDimensionalLocalSize);
        }
        if !parameters.local_size_0.is_power_of_two() {
            return Err(InvalidTemplate::LocalSize0NotPowerOfTwo);
        }
        if parameters.simd_width > 1 && requires_fallback(expressions) {
            return Err(InvalidTemplate::StridedAccessRequiresUnitSimd);
        }
        Ok(())
    }

    fn leading_arguments(
        &self,
        expressions: &[Expression],
        temp: Option<BufferHandle>,
    ) -> Result<Vec<KernelArg>, FuseError> {
        let Some(temp) = temp else {
            return Err(FuseError::invalid_expression("Reduction needs buffer for partial results"));
        };
        let Some((expression, idx)) = expressions.iter().find_map(|expression| {
            expression
                .tree()
                .iter()
                .position(|node| node.op.family == OpFamily::VectorReduction)
                .map(|idx| (expression, idx))
        }) else {
            return Err(FuseError::invalid_expression("Batch does not contain reduction"));
        };
        Ok(vec![KernelArg::UInt(Self::reduced_size(expression, idx)?), KernelArg::Buffer(temp)])
    }
}
