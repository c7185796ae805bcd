//! Expression trees describing one fused array computation.
//!
//! Trees are produced by the array library and only read during generation.
//! Nodes live in a flat vector and refer to their children by index.

mod operator;

pub use operator::{OpFamily, OpKind, Operator, Transposition};

use crate::{error::FuseError, DType, Value};

/// Opaque identity of a device buffer, for `OpenCL` it is the `cl_mem` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferHandle(pub u64);

/// Dense or strided 2D view into a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayInfo {
    pub dtype: DType,
    pub handle: BufferHandle,
    /// (rows, cols)
    pub shape: (usize, usize),
    pub start: (usize, usize),
    pub stride: (usize, usize),
    /// Leading dimension
    pub ld: usize,
}

impl ArrayInfo {
    /// Contiguous column vector
    pub fn vector(handle: BufferHandle, dtype: DType, len: usize) -> ArrayInfo {
        ArrayInfo { dtype, handle, shape: (len, 1), start: (0, 0), stride: (1, 1), ld: len }
    }

    /// Contiguous column major matrix
    pub fn matrix(handle: BufferHandle, dtype: DType, rows: usize, cols: usize) -> ArrayInfo {
        ArrayInfo { dtype, handle, shape: (rows, cols), start: (0, 0), stride: (1, 1), ld: rows }
    }

    /// Single element stored in a device buffer
    pub fn scalar(handle: BufferHandle, dtype: DType) -> ArrayInfo {
        ArrayInfo { dtype, handle, shape: (1, 1), start: (0, 0), stride: (1, 1), ld: 1 }
    }

    /// Same view with different start and stride
    pub fn slice(self, start: (usize, usize), stride: (usize, usize)) -> ArrayInfo {
        ArrayInfo { start, stride, ..self }
    }

    pub fn is_strided(&self) -> bool {
        self.stride.0.max(self.stride.1) > 1 || self.start.0.max(self.start.1) > 0
    }
}

/// Block repetition, `sub` is the size of the repeated block, `rep` the repeat counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatInfo {
    pub sub: (usize, usize),
    pub rep: (usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Index of another node in the same tree
    Composite(usize),
    Array(ArrayInfo),
    Value(Value),
    Repeat(RepeatInfo),
    /// No operand, e.g. rhs of unary operators
    Invalid,
}

impl Operand {
    pub fn node_index(&self) -> Option<usize> {
        if let Operand::Composite(x) = self {
            Some(*x)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub lhs: Operand,
    pub op: Operator,
    pub rhs: Operand,
}

impl Node {
    pub fn operand(&self, leaf: Leaf) -> Option<&Operand> {
        match leaf {
            Leaf::Lhs => Some(&self.lhs),
            Leaf::Rhs => Some(&self.rhs),
            Leaf::Parent => None,
        }
    }

    /// Reduction of a whole vector into one value
    pub fn is_scalar_reduction(&self) -> bool {
        self.op.family == OpFamily::VectorReduction
    }

    /// Reduction of rows or columns of a matrix into a vector
    pub fn is_vector_reduction(&self) -> bool {
        matches!(self.op.family, OpFamily::RowsReduction | OpFamily::ColumnsReduction)
    }
}

/// Role of a visit during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Leaf {
    Lhs,
    Rhs,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    tree: Vec<Node>,
    root: usize,
    dtype: DType,
}

impl Expression {
    pub fn tree(&self) -> &[Node] {
        &self.tree
    }

    pub const fn root(&self) -> usize {
        self.root
    }

    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn root_node(&self) -> &Node {
        &self.tree[self.root]
    }
}

/// Builds expression trees bottom up. Every added node returns an operand
/// which can be used as a child of later nodes.
#[derive(Debug)]
pub struct ExpressionBuilder {
    tree: Vec<Node>,
    dtype: DType,
}

impl ExpressionBuilder {
    pub const fn new(dtype: DType) -> ExpressionBuilder {
        ExpressionBuilder { tree: Vec::new(), dtype }
    }

    pub fn node(&mut self, lhs: Operand, op: Operator, rhs: Operand) -> Operand {
        self.tree.push(Node { lhs, op, rhs });
        Operand::Composite(self.tree.len() - 1)
    }

    pub fn binary(&mut self, lhs: impl Into<Operand>, kind: OpKind, rhs: impl Into<Operand>) -> Operand {
        self.node(lhs.into(), Operator::elementwise(kind), rhs.into())
    }

    pub fn unary(&mut self, kind: OpKind, x: impl Into<Operand>) -> Operand {
        self.node(x.into(), Operator::elementwise(kind), Operand::Invalid)
    }

    /// Reduce all elements of x with the `kind` accumulator
    pub fn reduce(&mut self, kind: OpKind, x: impl Into<Operand>) -> Operand {
        self.node(x.into(), Operator::reduce(kind), Operand::Invalid)
    }

    pub fn assign(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Operand {
        self.node(lhs.into(), Operator::ASSIGN, rhs.into())
    }

    /// Finishes the tree with root as entry point.
    /// Checks that every composite operand points inside the tree and that there are no cycles.
    pub fn build(self, root: Operand) -> Result<Expression, FuseError> {
        let Operand::Composite(root) = root else {
            return Err(FuseError::invalid_expression("Root of expression must be a node"));
        };
        if root >= self.tree.len() {
            return Err(FuseError::invalid_expression(format!(
                "Root {root} out of bounds of tree with {} nodes",
                self.tree.len()
            )));
        }
        // 0 unvisited, 1 on stack, 2 done
        let mut state = vec![0u8; self.tree.len()];
        let mut stack = vec![(root, false)];
        while let Some((x, expanded)) = stack.pop() {
            if expanded {
                state[x] = 2;
                continue;
            }
            match state[x] {
                1 => return Err(FuseError::invalid_expression(format!("Cycle through node {x}"))),
                2 => continue,
                _ => {}
            }
            state[x] = 1;
            stack.push((x, true));
            for operand in [self.tree[x].lhs, self.tree[x].rhs] {
                if let Operand::Composite(child) = operand {
                    if child >= self.tree.len() {
                        return Err(FuseError::invalid_expression(format!(
                            "Node {x} refers to missing node {child}"
                        )));
                    }
                    if state[child] == 1 {
                        return Err(FuseError::invalid_expression(format!(
                            "Cycle through node {child}"
                        )));
                    }
                    stack.push((child, false));
                }
            }
        }
        Ok(Expression { tree: self.tree, root, dtype: self.dtype })
    }
}

impl From<ArrayInfo> for Operand {
    fn from(value: ArrayInfo) -> Self {
        Operand::Array(value)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<RepeatInfo> for Operand {
    fn from(value: RepeatInfo) -> Self {
        Operand::Repeat(value)
    }
}

/// Post-order walk from `root`: lhs subtree, lhs role, rhs subtree, rhs role, parent role.
/// Invalid operands are not visited. Without `inspect` the walk does not descend
/// below leaf operators (reductions, products, structural ops).
pub fn traverse<F>(expression: &Expression, root: usize, inspect: bool, f: &mut F) -> Result<(), FuseError>
where
    F: FnMut(&Expression, usize, Leaf) -> Result<(), FuseError>,
{
    let node = expression.tree[root];
    let recurse = if node.op.is_leaf() { inspect } else { true };
    if recurse {
        for (operand, leaf) in [(node.lhs, Leaf::Lhs), (node.rhs, Leaf::Rhs)] {
            if let Operand::Composite(child) = operand {
                traverse(expression, child, inspect, f)?;
            }
            if operand != Operand::Invalid {
                f(expression, root, leaf)?;
            }
        }
    }
    f(expression, root, Leaf::Parent)
}

#[test]
fn builder_rejects_cycles() {
    let mut b = ExpressionBuilder::new(DType::F32);
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 4);
    b.node(x.into(), Operator::ASSIGN, Operand::Composite(1));
    let root = b.node(Operand::Composite(0), Operator::elementwise(OpKind::Neg), Operand::Invalid);
    assert!(matches!(b.build(root), Err(FuseError::InvalidExpression(_))));
}

#[test]
fn builder_rejects_dangling_index() {
    let mut b = ExpressionBuilder::new(DType::F32);
    let root = b.unary(OpKind::Exp, Operand::Composite(7));
    assert!(matches!(b.build(root), Err(FuseError::InvalidExpression(_))));
}

#[test]
fn traversal_is_post_order() -> Result<(), FuseError> {
    let mut b = ExpressionBuilder::new(DType::F32);
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 4);
    let y = ArrayInfo::vector(BufferHandle(2), DType::F32, 4);
    let sum = b.binary(y, OpKind::Add, Value::F32(2.0));
    let root = b.assign(x, sum);
    let expr = b.build(root)?;
    let mut visits = Vec::new();
    traverse(&expr, expr.root(), true, &mut |_, idx, leaf| {
        visits.push((idx, leaf));
        Ok(())
    })?;
    assert_eq!(
        visits,
        [(1, Leaf::Lhs), (0, Leaf::Lhs), (0, Leaf::Rhs), (0, Leaf::Parent), (1, Leaf::Rhs), (1, Leaf::Parent)]
    );
    Ok(())
}
