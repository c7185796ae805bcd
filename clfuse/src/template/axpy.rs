//! Fused elementwise vector kernels, `x = a*y + b*z` and friends.

use std::collections::BTreeSet;

use crate::{
    arguments::KernelArg,
    device::DeviceInfo,
    emit::{
        append_width, element_wise_loop_1d, evaluate, generate_arguments, kernel_name, process_all,
        requires_fallback, vector_size, vload, vstore, Accessors, FetchingPolicy, KernelStream,
    },
    error::FuseError,
    expression::{BufferHandle, Expression, Leaf},
    mapping::Mapping,
};

use super::{InvalidTemplate, Template, TemplateFamily, TemplateParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxpyFamily {
    pub fetching_policy: FetchingPolicy,
    /// Number of work groups the kernel is launched with
    pub num_groups: usize,
}

impl Default for AxpyFamily {
    fn default() -> Self {
        AxpyFamily { fetching_policy: FetchingPolicy::Strided, num_groups: 64 }
    }
}

impl AxpyFamily {
    pub const fn new(fetching_policy: FetchingPolicy, num_groups: usize) -> AxpyFamily {
        AxpyFamily { fetching_policy, num_groups }
    }

    /// Global and local work size
    pub const fn launch_size(&self, parameters: &TemplateParameters) -> (usize, usize) {
        (self.num_groups * parameters.local_size_0, parameters.local_size_0)
    }

    fn kernel(
        &self,
        name: &str,
        arguments: &str,
        expressions: &[Expression],
        mappings: &[Mapping],
        simd_width: u32,
        local_size_0: usize,
    ) -> Result<String, FuseError> {
        let mut stream = KernelStream::new();
        let arguments = if arguments.is_empty() { "uint N".into() } else { format!("uint N, {arguments}") };
        stream.line(format!(
            "__kernel __attribute__((reqd_work_group_size({local_size_0},1,1))) void {name}({arguments})"
        ));
        stream.line("{");
        stream.inc_tab();

        process_all(&mut stream, "array0", "#scalartype #namereg = #pointer[#start];", mappings);

        let accessors = Accessors::new()
            .with("array0", "#namereg")
            .with("array1", "#namereg")
            .with("host_scalar", "#name");
        element_wise_loop_1d(
            &mut stream,
            self.fetching_policy,
            simd_width,
            "i",
            "N",
            "get_global_id(0)",
            "get_global_size(0)",
            |stream, w| {
                let (load, store) = if w > 1 {
                    (
                        format!(
                            "{} #namereg = {};",
                            append_width("#scalartype", w),
                            vload(w, "i", "#pointer + #start")
                        ),
                        format!("{};", vstore(w, "#namereg", "i", "#pointer + #start")),
                    )
                } else {
                    (
                        "#scalartype #namereg = #pointer[i*#stride+#start];".into(),
                        "#pointer[i*#stride+#start] = #namereg;".into(),
                    )
                };
                process_all(stream, "array1", &load, mappings);
                for (expression, mapping) in expressions.iter().zip(mappings) {
                    stream.line(format!("{};", evaluate(expression, mapping, &accessors)?));
                }
                let mut stored = BTreeSet::new();
                for (expression, mapping) in expressions.iter().zip(mappings) {
                    if let Some(object) = mapping.get(expression.root(), Leaf::Lhs) {
                        if stored.insert(object.name()) {
                            stream.line(object.process(&store));
                        }
                    }
                }
                Ok(())
            },
        )?;

        stream.dec_tab();
        stream.line("}");
        Ok(stream.into_source())
    }
}

impl TemplateFamily for AxpyFamily {
    fn generate_impl(
        &self,
        label: u32,
        expressions: &[Expression],
        mappings: &[Mapping],
        parameters: &TemplateParameters,
    ) -> Result<Vec<String>, FuseError> {
        for (expression, mapping) in expressions.iter().zip(mappings) {
            if !expression.root_node().op.kind.is_assignment() {
                return Err(FuseError::not_applicable("vaxpy expressions must be assignments"));
            }
            if mapping.get(expression.root(), Leaf::Lhs).map(|o| o.type_key()) != Some("array1") {
                return Err(FuseError::not_applicable("vaxpy can only assign to vectors"));
            }
            if let Some((_, object)) = mapping.iter().find(|((_, leaf), _)| *leaf == Leaf::Parent) {
                return Err(FuseError::not_applicable(format!(
                    "vaxpy can not evaluate {}",
                    object.type_key()
                )));
            }
        }
        let arguments = generate_arguments(expressions, mappings)?;
        let ls0 = parameters.local_size_0;
        let mut sources = vec![self.kernel(
            &kernel_name(label, "vaxpy"),
            &arguments,
            expressions,
            mappings,
            parameters.simd_width,
            ls0,
        )?];
        if parameters.num_kernels > 1 {
            sources.push(self.kernel(&kernel_name(label, "vaxpyf"), &arguments, expressions, mappings, 1, ls0)?);
        }
        Ok(sources)
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
        if parameters.simd_width > 1 && parameters.num_kernels < 2 && requires_fallback(expressions) {
            return Err(InvalidTemplate::StridedAccessRequiresUnitSimd);
        }
        Ok(())
    }

    fn leading_arguments(
        &self,
        expressions: &[Expression],
        _: Option<BufferHandle>,
    ) -> Result<Vec<KernelArg>, FuseError> {
        let Some(expression) = expressions.first() else {
            return Err(FuseError::invalid_expression("Empty batch has no size"));
        };
        let n = vector_size(expression.root_node())?;
        let Ok(n) = u32::try_from(n) else {
            return Err(FuseError::invalid_expression(format!("Size {n} does not fit into uint")));
        };
        Ok(vec![KernelArg::UInt(n)])
    }
}

impl Template<AxpyFamily> {
    /// Index of the kernel, out of those returned by generate, which must be launched for this batch
    pub fn select_kernel(&self, expressions: &[Expression]) -> usize {
        usize::from(self.parameters().num_kernels > 1 && requires_fallback(expressions))
    }
}
