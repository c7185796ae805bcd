//! Operator vocabulary of expression trees.

use crate::DType;

/// Transposition of the operands of a matrix product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transposition {
    NN,
    NT,
    TN,
    TT,
}

/// Family of the operator, decides which template can handle the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpFamily {
    Elementwise,
    /// Reduction of a vector into a scalar
    VectorReduction,
    /// Reduction of every row of a matrix
    RowsReduction,
    /// Reduction of every column of a matrix
    ColumnsReduction,
    MatrixProduct(Transposition),
    /// Diagonals, row and column extraction, outer product, repeat, transpose
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    // Arithmetic
    Add,
    Sub,
    Mult,
    Div,
    // Assignment
    Assign,
    InplaceAdd,
    InplaceSub,
    // Elementwise binary
    ElementProd,
    ElementDiv,
    ElementPow,
    ElementEq,
    ElementNeq,
    ElementGreater,
    ElementGeq,
    ElementLess,
    ElementLeq,
    ElementFmax,
    ElementFmin,
    ElementMax,
    ElementMin,
    ElementArgFmax,
    ElementArgFmin,
    ElementArgMax,
    ElementArgMin,
    // Unary
    Neg,
    Abs,
    Fabs,
    Acos,
    Asin,
    Atan,
    Ceil,
    Cos,
    Cosh,
    Exp,
    Floor,
    Log,
    Log10,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
    Cast(DType),
    // Structural
    Trans,
    Vdiag,
    MatrixDiag,
    MatrixRow,
    MatrixColumn,
    OuterProd,
    Repeat,
}

impl OpKind {
    /// `OpenCL` spelling of the operator, either infix symbol or function name.
    /// Structural operators have no spelling.
    pub fn ocl(self) -> Option<String> {
        Some(
            match self {
                OpKind::Add => "+",
                OpKind::Sub | OpKind::Neg => "-",
                OpKind::Mult | OpKind::ElementProd => "*",
                OpKind::Div | OpKind::ElementDiv => "/",
                OpKind::Assign => "=",
                OpKind::InplaceAdd => "+=",
                OpKind::InplaceSub => "-=",
                OpKind::ElementPow => "pow",
                OpKind::ElementEq => "==",
                OpKind::ElementNeq => "!=",
                OpKind::ElementGreater => ">",
                OpKind::ElementGeq => ">=",
                OpKind::ElementLess => "<",
                OpKind::ElementLeq => "<=",
                OpKind::ElementFmax | OpKind::ElementArgFmax => "fmax",
                OpKind::ElementFmin | OpKind::ElementArgFmin => "fmin",
                OpKind::ElementMax | OpKind::ElementArgMax => "max",
                OpKind::ElementMin | OpKind::ElementArgMin => "min",
                OpKind::Abs => "abs",
                OpKind::Fabs => "fabs",
                OpKind::Acos => "acos",
                OpKind::Asin => "asin",
                OpKind::Atan => "atan",
                OpKind::Ceil => "ceil",
                OpKind::Cos => "cos",
                OpKind::Cosh => "cosh",
                OpKind::Exp => "exp",
                OpKind::Floor => "floor",
                OpKind::Log => "log",
                OpKind::Log10 => "log10",
                OpKind::Sin => "sin",
                OpKind::Sinh => "sinh",
                OpKind::Sqrt => "sqrt",
                OpKind::Tan => "tan",
                OpKind::Tanh => "tanh",
                OpKind::Cast(dtype) => return Some(format!("convert_{}", dtype.ocl())),
                OpKind::Trans
                | OpKind::Vdiag
                | OpKind::MatrixDiag
                | OpKind::MatrixRow
                | OpKind::MatrixColumn
                | OpKind::OuterProd
                | OpKind::Repeat => return None,
            }
            .into(),
        )
    }

    /// Is this operator written as a function call in `OpenCL`?
    pub fn is_function(self) -> bool {
        matches!(
            self,
            OpKind::ElementPow
                | OpKind::ElementFmax
                | OpKind::ElementFmin
                | OpKind::ElementMax
                | OpKind::ElementMin
                | OpKind::ElementArgFmax
                | OpKind::ElementArgFmin
                | OpKind::ElementArgMax
                | OpKind::ElementArgMin
                | OpKind::Abs
                | OpKind::Fabs
                | OpKind::Acos
                | OpKind::Asin
                | OpKind::Atan
                | OpKind::Ceil
                | OpKind::Cos
                | OpKind::Cosh
                | OpKind::Exp
                | OpKind::Floor
                | OpKind::Log
                | OpKind::Log10
                | OpKind::Sin
                | OpKind::Sinh
                | OpKind::Sqrt
                | OpKind::Tan
                | OpKind::Tanh
                | OpKind::Cast(_)
        )
    }

    pub fn is_assignment(self) -> bool {
        matches!(self, OpKind::Assign | OpKind::InplaceAdd | OpKind::InplaceSub)
    }

    /// Arg-max and arg-min variants, which carry an index next to the value.
    pub fn is_index_reduction(self) -> bool {
        matches!(
            self,
            OpKind::ElementArgFmax | OpKind::ElementArgMax | OpKind::ElementArgFmin | OpKind::ElementArgMin
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Operator {
    pub kind: OpKind,
    pub family: OpFamily,
}

impl Operator {
    pub const ASSIGN: Operator = Operator { kind: OpKind::Assign, family: OpFamily::Elementwise };

    pub const fn elementwise(kind: OpKind) -> Operator {
        Operator { kind, family: OpFamily::Elementwise }
    }

    /// Reduction of a whole vector with the `kind` accumulator
    pub const fn reduce(kind: OpKind) -> Operator {
        Operator { kind, family: OpFamily::VectorReduction }
    }

    pub const fn reduce_rows(kind: OpKind) -> Operator {
        Operator { kind, family: OpFamily::RowsReduction }
    }

    pub const fn reduce_columns(kind: OpKind) -> Operator {
        Operator { kind, family: OpFamily::ColumnsReduction }
    }

    pub const fn matmul(transposition: Transposition) -> Operator {
        Operator { kind: OpKind::Mult, family: OpFamily::MatrixProduct(transposition) }
    }

    pub const fn structural(kind: OpKind) -> Operator {
        Operator { kind, family: OpFamily::Structural }
    }

    pub fn is_reduction(&self) -> bool {
        matches!(
            self.family,
            OpFamily::VectorReduction | OpFamily::RowsReduction | OpFamily::ColumnsReduction
        )
    }

    /// Operators whose operands are not expanded inline, traversal without inspection
    /// stops at them.
    pub fn is_leaf(&self) -> bool {
        self.is_reduction()
            || matches!(self.family, OpFamily::MatrixProduct(_))
            || matches!(
                self.kind,
                OpKind::Trans
                    | OpKind::Vdiag
                    | OpKind::MatrixDiag
                    | OpKind::MatrixRow
                    | OpKind::MatrixColumn
                    | OpKind::OuterProd
                    | OpKind::Repeat
            )
    }
}
