//! Text emission helpers shared by all template families.

use std::{collections::BTreeSet, fmt::Display};

use crate::{
    error::FuseError,
    expression::{traverse, Expression, Leaf, Node, OpKind, Operand},
    mapping::{MappedObject, Mapping},
};

/// Indented kernel source sink.
#[derive(Debug, Default, Clone)]
pub struct KernelStream {
    source: String,
    tab_count: usize,
}

impl KernelStream {
    pub const fn new() -> KernelStream {
        KernelStream { source: String::new(), tab_count: 0 }
    }

    pub fn inc_tab(&mut self) {
        self.tab_count += 1;
    }

    pub fn dec_tab(&mut self) {
        self.tab_count = self.tab_count.saturating_sub(1);
    }

    /// Writes text at current indentation, every line of it gets indented
    pub fn line(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            for _ in 0..self.tab_count {
                self.source.push_str("  ");
            }
            self.source.push_str(line);
            self.source.push('\n');
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

impl Display for KernelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// How work items split a 1D domain between themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchingPolicy {
    /// Work item `id` visits `id, id + size, id + 2*size, ...`
    #[default]
    Strided,
    /// Work item `id` visits one contiguous chunk
    Contiguous,
}

impl std::str::FromStr for FetchingPolicy {
    type Err = FuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strided" | "global_strided" => Ok(FetchingPolicy::Strided),
            "contiguous" | "global_contiguous" => Ok(FetchingPolicy::Contiguous),
            _ => Err(FuseError::parse_error(format!("Unknown fetching policy {s}"))),
        }
    }
}

/// Init, upper bound and increment of an emitted for loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    pub init: String,
    pub bound: String,
    pub inc: String,
}

/// Returns loop header parts for the policy. Contiguous fetching also
/// writes chunk variables into the stream.
pub fn fetching_loop_info(
    policy: FetchingPolicy,
    bound: &str,
    stream: &mut KernelStream,
    domain_id: &str,
    domain_size: &str,
) -> LoopInfo {
    match policy {
        FetchingPolicy::Strided => {
            LoopInfo { init: domain_id.into(), bound: bound.into(), inc: domain_size.into() }
        }
        FetchingPolicy::Contiguous => {
            stream.line(format!(
                "unsigned int chunk_size = ({bound}+{domain_size}-1)/{domain_size};"
            ));
            stream.line(format!("unsigned int chunk_start = {domain_id}*chunk_size;"));
            stream.line(format!(
                "unsigned int chunk_end = min(chunk_start+chunk_size, {bound});"
            ));
            LoopInfo { init: "chunk_start".into(), bound: "chunk_end".into(), inc: "1".into() }
        }
    }
}

/// Indices visited by worker `id` out of `size` workers in the loop emitted by [`fetching_loop_info`].
pub fn fetch_indices(policy: FetchingPolicy, bound: usize, id: usize, size: usize) -> Vec<usize> {
    if size == 0 || id >= size {
        return Vec::new();
    }
    match policy {
        FetchingPolicy::Strided => (id..bound).step_by(size).collect(),
        FetchingPolicy::Contiguous => {
            let chunk_size = bound.div_ceil(size);
            let chunk_start = id * chunk_size;
            let chunk_end = (chunk_start + chunk_size).min(bound);
            (chunk_start..chunk_end).collect()
        }
    }
}

/// Elements touched by worker `id` in the loops emitted by [`element_wise_loop_1d`],
/// vector iterations expanded into their lanes.
pub fn element_wise_indices(
    policy: FetchingPolicy,
    simd_width: u32,
    bound: usize,
    id: usize,
    size: usize,
) -> Vec<usize> {
    let w = simd_width.max(1) as usize;
    let mut res: Vec<usize> = fetch_indices(policy, bound / w, id, size)
        .into_iter()
        .flat_map(|i| i * w..i * w + w)
        .collect();
    if w > 1 && size > 0 && id < size {
        res.extend((bound / w * w + id..bound).step_by(size));
    }
    res
}

/// Emits 1D loop over `bound` elements with vector width `simd_width`.
/// Elements not covered by whole vectors are processed by a second loop with width 1.
/// Body gets the stream and the width to use.
#[allow(clippy::too_many_arguments)]
pub fn element_wise_loop_1d<B>(
    stream: &mut KernelStream,
    policy: FetchingPolicy,
    simd_width: u32,
    i: &str,
    bound: &str,
    domain_id: &str,
    domain_size: &str,
    mut body: B,
) -> Result<(), FuseError>
where
    B: FnMut(&mut KernelStream, u32) -> Result<(), FuseError>,
{
    let bound_round = format!("{bound}/{simd_width}");
    let LoopInfo { init, bound: upper_bound, inc } =
        fetching_loop_info(policy, &bound_round, stream, domain_id, domain_size);
    stream.line(format!("for(unsigned int {i} = {init}; {i} < {upper_bound}; {i} += {inc})"));
    stream.line("{");
    stream.inc_tab();
    body(stream, simd_width)?;
    stream.dec_tab();
    stream.line("}");

    if simd_width > 1 {
        stream.line(format!(
            "for(unsigned int {i} = {bound_round}*{simd_width} + {domain_id}; {i} < {bound}; {i} += {domain_size})"
        ));
        stream.line("{");
        stream.inc_tab();
        body(stream, 1)?;
        stream.dec_tab();
        stream.line("}");
    }
    Ok(())
}

/// Emits `acc = acc op cur`
pub fn compute_reduction(
    stream: &mut KernelStream,
    acc: &str,
    cur: &str,
    op: OpKind,
) -> Result<(), FuseError> {
    let Some(symbol) = op.ocl() else {
        return Err(FuseError::UnsupportedReduction(op));
    };
    if op.is_function() {
        stream.line(format!("{acc}={symbol}({acc},{cur});"));
    } else {
        stream.line(format!("{acc}= ({acc}){symbol}({cur});"));
    }
    Ok(())
}

/// Emits branchless index update followed by value update for arg-max and arg-min reductions.
pub fn compute_index_reduction(
    stream: &mut KernelStream,
    acc: &str,
    cur: &str,
    acc_value: &str,
    cur_value: &str,
    op: OpKind,
) -> Result<(), FuseError> {
    let primitive = match op {
        OpKind::ElementArgFmax => "fmax",
        OpKind::ElementArgMax => "max",
        OpKind::ElementArgFmin => "fmin",
        OpKind::ElementArgMin => "min",
        _ => return Err(FuseError::UnsupportedReduction(op)),
    };
    stream.line(format!("{acc}= select({acc},{cur},{cur_value}>{acc_value});"));
    stream.line(format!("{acc_value}={primitive}({acc_value},{cur_value});"));
    Ok(())
}

/// Identity used to seed accumulators of reduction with operator op
pub fn neutral_element(op: OpKind) -> Result<&'static str, FuseError> {
    Ok(match op {
        OpKind::Add => "0",
        OpKind::Mult | OpKind::Div => "1",
        OpKind::ElementFmax | OpKind::ElementArgFmax | OpKind::ElementMax | OpKind::ElementArgMax => {
            "-INFINITY"
        }
        OpKind::ElementFmin | OpKind::ElementArgFmin | OpKind::ElementMin | OpKind::ElementArgMin => {
            "INFINITY"
        }
        _ => return Err(FuseError::UnsupportedReduction(op)),
    })
}

pub fn vload(simd_width: u32, offset: &str, ptr: &str) -> String {
    if simd_width == 1 {
        format!("({ptr})[{offset}]")
    } else {
        format!("{}({offset}, {ptr})", append_width("vload", simd_width))
    }
}

pub fn vstore(simd_width: u32, value: &str, offset: &str, ptr: &str) -> String {
    if simd_width == 1 {
        format!("({ptr})[{offset}] = {value}")
    } else {
        format!("{}({value}, {offset}, {ptr})", append_width("vstore", simd_width))
    }
}

pub fn append_width(s: &str, width: u32) -> String {
    if width == 1 {
        s.into()
    } else {
        format!("{s}{width}")
    }
}

const SIMD_SUFFIXES: [char; 16] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'];

/// Appends lane suffix, e.g. `x.s` and 10 gives `x.sa`
pub fn append_simd_suffix(s: &str, i: u32) -> String {
    debug_assert!(i < 16, "Lane {i} out of range of 16 wide vectors");
    format!("{s}{}", SIMD_SUFFIXES[i as usize % 16])
}

/// Rounds `to_round` up to multiple of `base`
pub fn align(to_round: usize, base: usize) -> usize {
    if base == 0 || to_round % base == 0 {
        return to_round;
    }
    to_round.div_ceil(base) * base
}

/// Access patterns keyed by mapped object type key.
#[derive(Debug, Default, Clone)]
pub struct Accessors {
    patterns: Vec<(&'static str, String)>,
}

impl Accessors {
    pub const fn new() -> Accessors {
        Accessors { patterns: Vec::new() }
    }

    /// Adds or replaces pattern for type key
    pub fn with(mut self, type_key: &'static str, pattern: impl Into<String>) -> Accessors {
        let pattern = pattern.into();
        if let Some(x) = self.patterns.iter_mut().find(|(key, _)| *key == type_key) {
            x.1 = pattern;
        } else {
            self.patterns.push((type_key, pattern));
        }
        self
    }

    pub fn get(&self, type_key: &str) -> Option<&str> {
        self.patterns.iter().find(|(key, _)| *key == type_key).map(|(_, p)| p.as_str())
    }

    fn access(&self, object: &MappedObject) -> Result<String, FuseError> {
        let Some(pattern) = self.get(object.type_key()) else {
            return Err(FuseError::not_applicable(format!(
                "No accessor for {} {}",
                object.type_key(),
                object.name()
            )));
        };
        Ok(object.process(pattern))
    }
}

/// Renders whole expression as `OpenCL` text
pub fn evaluate(
    expression: &Expression,
    mapping: &Mapping,
    accessors: &Accessors,
) -> Result<String, FuseError> {
    evaluate_node(expression, expression.root(), mapping, accessors)
}

/// Renders one operand of node `idx`
pub fn evaluate_operand(
    expression: &Expression,
    idx: usize,
    leaf: Leaf,
    mapping: &Mapping,
    accessors: &Accessors,
) -> Result<String, FuseError> {
    match expression.tree()[idx].operand(leaf) {
        Some(Operand::Composite(child)) => evaluate_node(expression, *child, mapping, accessors),
        Some(Operand::Invalid) => {
            Err(FuseError::invalid_expression(format!("Node {idx} has no {leaf:?} operand")))
        }
        _ => {
            let Some(object) = mapping.get(idx, leaf) else {
                return Err(FuseError::not_applicable(format!("Position ({idx}, {leaf:?}) is not mapped")));
            };
            accessors.access(object)
        }
    }
}

fn evaluate_node(
    expression: &Expression,
    idx: usize,
    mapping: &Mapping,
    accessors: &Accessors,
) -> Result<String, FuseError> {
    if let Some(object) = mapping.get(idx, Leaf::Parent) {
        return accessors.access(object);
    }
    let node = &expression.tree()[idx];
    let kind = node.op.kind;
    if kind == OpKind::Trans {
        return evaluate_operand(expression, idx, Leaf::Lhs, mapping, accessors);
    }
    let Some(symbol) = kind.ocl() else {
        return Err(FuseError::not_applicable(format!("Operator {kind:?} can not be inlined")));
    };
    let lhs = evaluate_operand(expression, idx, Leaf::Lhs, mapping, accessors)?;
    if node.rhs == Operand::Invalid {
        return Ok(if kind.is_function() { format!("{symbol}({lhs})") } else { format!("({symbol}{lhs})") });
    }
    let rhs = evaluate_operand(expression, idx, Leaf::Rhs, mapping, accessors)?;
    Ok(if kind.is_function() {
        format!("{symbol}({lhs},{rhs})")
    } else if kind.is_assignment() {
        format!("{lhs} {symbol} {rhs}")
    } else {
        format!("({lhs}{symbol}{rhs})")
    })
}

/// Writes pattern processed by every object of `type_key` in all mappings, once per object name.
pub fn process_all(stream: &mut KernelStream, type_key: &str, pattern: &str, mappings: &[Mapping]) {
    let mut seen = BTreeSet::new();
    for mapping in mappings {
        for (_, object) in mapping.iter() {
            if object.type_key() == type_key && seen.insert(object.name().to_string()) {
                stream.line(object.process(pattern));
            }
        }
    }
}

/// Writes pattern processed by the object at (idx, leaf) if it is of `type_key`.
/// Returns whether anything was written.
pub fn process_at(
    stream: &mut KernelStream,
    mapping: &Mapping,
    idx: usize,
    leaf: Leaf,
    type_key: &str,
    pattern: &str,
) -> bool {
    match mapping.get(idx, leaf) {
        Some(object) if object.type_key() == type_key => {
            stream.line(object.process(pattern));
            true
        }
        _ => false,
    }
}

/// Kernel parameter declarations, by type key
pub fn declaration(type_key: &str) -> Option<&'static str> {
    Some(match type_key {
        "array0" => "__global #scalartype* #pointer, uint #start,",
        "host_scalar" => "#scalartype #name,",
        "array1" => "__global #scalartype* #pointer, uint #start, uint #stride,",
        "array2" => "__global #scalartype* #pointer, uint #ld, uint #start1, uint #start2, uint #stride1, uint #stride2,",
        "tuple4" => "#scalartype #name0, #scalartype #name1, #scalartype #name2, #scalartype #name3,",
        _ => return None,
    })
}

/// Kernel parameter list of the batch, in the order in which arguments are bound.
pub fn generate_arguments(expressions: &[Expression], mappings: &[Mapping]) -> Result<String, FuseError> {
    if expressions.len() != mappings.len() {
        return Err(FuseError::not_applicable(format!(
            "{} expressions, but {} mappings",
            expressions.len(),
            mappings.len()
        )));
    }
    let mut res = String::new();
    let mut seen = BTreeSet::new();
    for (expression, mapping) in expressions.iter().zip(mappings) {
        traverse(expression, expression.root(), true, &mut |_, idx, leaf| {
            if leaf == Leaf::Parent {
                return Ok(());
            }
            let Some(object) = mapping.get(idx, leaf) else {
                return Ok(());
            };
            if let Some(pattern) = declaration(object.type_key()) {
                if seen.insert(object.name().to_string()) {
                    res.push_str(&object.process(pattern));
                    res.push(' ');
                }
            }
            Ok(())
        })?;
    }
    if let Some(i) = res.rfind(',') {
        res.truncate(i);
    }
    Ok(res)
}

pub fn is_reduction(node: &Node) -> bool {
    node.op.is_reduction()
}

pub fn is_index_reduction(op: OpKind) -> bool {
    op.is_index_reduction()
}

/// True if any array of the batch is accessed with offset or stride,
/// such arrays can not be loaded with vector loads.
pub fn requires_fallback(expressions: &[Expression]) -> bool {
    expressions.iter().flat_map(|e| e.tree()).any(|node| {
        [node.lhs, node.rhs].iter().any(|operand| matches!(operand, Operand::Array(a) if a.is_strided()))
    })
}

/// Number of elements of the vector produced by node
pub fn vector_size(node: &Node) -> Result<usize, FuseError> {
    let Operand::Array(array) = node.lhs else {
        return Err(FuseError::invalid_expression("Vector size needs array operand"));
    };
    let (rows, cols) = array.shape;
    Ok(match node.op.kind {
        OpKind::MatrixDiag => rows.min(cols),
        OpKind::MatrixRow => cols,
        OpKind::MatrixColumn => rows,
        _ => rows.max(cols),
    })
}

/// Shape of the matrix produced by node
pub fn matrix_size(node: &Node) -> Result<(usize, usize), FuseError> {
    let Operand::Array(array) = node.lhs else {
        return Err(FuseError::invalid_expression("Matrix size needs array operand"));
    };
    Ok(match (node.op.kind, node.rhs) {
        (OpKind::Vdiag, _) => (array.shape.0, array.shape.0),
        (OpKind::Repeat, Operand::Repeat(repeat)) => {
            (array.shape.0 * repeat.rep.0, array.shape.1 * repeat.rep.1)
        }
        _ => array.shape,
    })
}

/// Follows lhs operands down from idx and returns the last node reached
pub fn lhs_most(expression: &Expression, mut idx: usize) -> usize {
    while let Operand::Composite(child) = expression.tree()[idx].lhs {
        idx = child;
    }
    idx
}

/// Is the operand at (idx, leaf) seen through an odd number of transpositions?
pub fn is_node_trans(expression: &Expression, idx: usize, leaf: Leaf) -> bool {
    let mut res = false;
    let mut node = &expression.tree()[idx];
    while let Some(Operand::Composite(child)) = node.operand(leaf) {
        node = &expression.tree()[*child];
        if node.op.kind == OpKind::Trans {
            res = !res;
        }
    }
    res
}

pub fn kernel_name(label: u32, suffix: &str) -> String {
    format!("k{label}{suffix}")
}

#[test]
fn kernel_names() {
    assert_eq!(kernel_name(0, "vaxpy"), "k0vaxpy");
    assert_eq!(kernel_name(120, "reduction0"), "k120reduction0");
}

#[test]
fn simd_suffixes() {
    assert_eq!(append_simd_suffix("x.s", 3), "x.s3");
    assert_eq!(append_simd_suffix("x.s", 10), "x.sa");
    assert_eq!(append_simd_suffix("x.s", 15), "x.sf");
    assert_eq!(append_width("float", 1), "float");
    assert_eq!(append_width("float", 8), "float8");
}

#[test]
fn alignment() {
    assert_eq!(align(16, 8), 16);
    assert_eq!(align(17, 8), 24);
    assert_eq!(align(0, 4), 0);
}
