//! Mapping of tree positions to the objects that declare and access them in kernel source.

use std::collections::BTreeMap;

use crate::{
    binder::Binder,
    error::FuseError,
    expression::{traverse, ArrayInfo, Expression, Leaf, Node, OpFamily, OpKind, Operand},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayRank {
    /// Shape (1, 1)
    Scalar,
    /// Shape (n, 1)
    Column,
    /// Shape (1, n)
    Row,
    Matrix,
}

impl ArrayRank {
    pub fn of(array: &ArrayInfo) -> ArrayRank {
        match array.shape {
            (1, 1) => ArrayRank::Scalar,
            (r, 1) if r > 1 => ArrayRank::Column,
            (1, c) if c > 1 => ArrayRank::Row,
            _ => ArrayRank::Matrix,
        }
    }
}

/// Wrappers attached to the parent role of operators that need structural support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralKind {
    Vdiag,
    MatrixDiag,
    MatrixRow,
    MatrixColumn,
    ScalarReduction,
    VectorReduction,
    MatrixProduct,
    Repeat,
    Outer,
}

impl StructuralKind {
    fn of(node: &Node) -> Option<StructuralKind> {
        Some(match node.op.kind {
            OpKind::Vdiag => StructuralKind::Vdiag,
            OpKind::MatrixDiag => StructuralKind::MatrixDiag,
            OpKind::MatrixRow => StructuralKind::MatrixRow,
            OpKind::MatrixColumn => StructuralKind::MatrixColumn,
            OpKind::Repeat => StructuralKind::Repeat,
            OpKind::OuterProd => StructuralKind::Outer,
            _ => match node.op.family {
                OpFamily::VectorReduction => StructuralKind::ScalarReduction,
                OpFamily::RowsReduction | OpFamily::ColumnsReduction => StructuralKind::VectorReduction,
                OpFamily::MatrixProduct(_) => StructuralKind::MatrixProduct,
                OpFamily::Elementwise | OpFamily::Structural => return None,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedKind {
    HostScalar,
    Array(ArrayRank),
    Tuple4,
    Structural(StructuralKind),
}

/// Codegen binding of one tree position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedObject {
    kind: MappedKind,
    scalartype: &'static str,
    id: u32,
    name: String,
    /// Node the structural wrapper belongs to
    node: Option<usize>,
}

impl MappedObject {
    fn new(kind: MappedKind, scalartype: &'static str, id: u32, node: Option<usize>) -> MappedObject {
        MappedObject { kind, scalartype, id, name: format!("{scalartype}_{id}"), node }
    }

    pub const fn kind(&self) -> MappedKind {
        self.kind
    }

    pub const fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn scalartype(&self) -> &'static str {
        self.scalartype
    }

    pub const fn node(&self) -> Option<usize> {
        self.node
    }

    pub fn type_key(&self) -> &'static str {
        match self.kind {
            MappedKind::HostScalar => "host_scalar",
            MappedKind::Array(ArrayRank::Scalar) => "array0",
            MappedKind::Array(ArrayRank::Row | ArrayRank::Column) => "array1",
            MappedKind::Array(ArrayRank::Matrix) => "array2",
            MappedKind::Tuple4 => "tuple4",
            MappedKind::Structural(kind) => match kind {
                StructuralKind::Vdiag => "vdiag",
                StructuralKind::MatrixDiag => "matrix_diag",
                StructuralKind::MatrixRow => "matrix_row",
                StructuralKind::MatrixColumn => "matrix_column",
                StructuralKind::ScalarReduction => "scalar_reduction",
                StructuralKind::VectorReduction => "vector_reduction",
                StructuralKind::MatrixProduct => "matrix_product",
                StructuralKind::Repeat => "repeat",
                StructuralKind::Outer => "outer",
            },
        }
    }

    /// Replaces keywords in pattern with the names belonging to this object.
    /// Longer keywords are replaced first, so `#namereg` is not eaten by `#name`.
    pub fn process(&self, pattern: &str) -> String {
        let name = &self.name;
        let mut keywords: Vec<(&str, String)> = vec![
            ("#scalartype", self.scalartype.into()),
            ("#name", name.clone()),
            ("#namereg", format!("{name}_reg")),
        ];
        match self.kind {
            MappedKind::HostScalar => {}
            MappedKind::Array(_) => {
                for field in ["pointer", "start", "stride", "ld", "start1", "start2", "stride1", "stride2"] {
                    keywords.push((field_keyword(field), format!("{name}_{field}")));
                }
            }
            MappedKind::Tuple4 => {
                for (keyword, i) in [("#name0", 0), ("#name1", 1), ("#name2", 2), ("#name3", 3)] {
                    keywords.push((keyword, format!("{name}_{i}")));
                }
            }
            MappedKind::Structural(_) => {
                keywords.push(("#acc", format!("{name}_acc")));
                keywords.push(("#buf", format!("{name}_buf")));
            }
        }
        keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let mut res = pattern.to_string();
        for (keyword, value) in keywords {
            res = res.replace(keyword, &value);
        }
        res
    }
}

fn field_keyword(field: &str) -> &'static str {
    match field {
        "pointer" => "#pointer",
        "start" => "#start",
        "stride" => "#stride",
        "ld" => "#ld",
        "start1" => "#start1",
        "start2" => "#start2",
        "stride1" => "#stride1",
        _ => "#stride2",
    }
}

/// Mapped objects of one expression, keyed by tree position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    objects: BTreeMap<(usize, Leaf), MappedObject>,
}

impl Mapping {
    pub fn get(&self, idx: usize, leaf: Leaf) -> Option<&MappedObject> {
        self.objects.get(&(idx, leaf))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, Leaf), &MappedObject)> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn create(operand: &Operand, binder: &mut Binder) -> Result<MappedObject, FuseError> {
    Ok(match operand {
        Operand::Value(value) => {
            MappedObject::new(MappedKind::HostScalar, value.dtype().ocl(), binder.get(None), None)
        }
        Operand::Array(array) => MappedObject::new(
            MappedKind::Array(ArrayRank::of(array)),
            array.dtype.ocl(),
            binder.get_array(array)?,
            None,
        ),
        // Tuples are bound as four uints
        Operand::Repeat(_) => MappedObject::new(MappedKind::Tuple4, "uint", binder.get(None), None),
        Operand::Composite(_) | Operand::Invalid => {
            return Err(FuseError::invalid_expression("Unrecognized operand type family"))
        }
    })
}

/// Walks the expression once and creates one mapped object for every non composite operand
/// and for parent roles of operators that need structural support.
pub fn map_expression(expression: &Expression, binder: &mut Binder) -> Result<Mapping, FuseError> {
    let mut mapping = Mapping::default();
    traverse(expression, expression.root(), true, &mut |expression, idx, leaf| {
        let node = &expression.tree()[idx];
        let object = match leaf {
            Leaf::Lhs | Leaf::Rhs => {
                let operand = node.operand(leaf).unwrap_or(&Operand::Invalid);
                if let Operand::Composite(_) = operand {
                    return Ok(());
                }
                create(operand, binder)?
            }
            Leaf::Parent => {
                let Some(kind) = StructuralKind::of(node) else {
                    return Ok(());
                };
                MappedObject::new(
                    MappedKind::Structural(kind),
                    expression.dtype().ocl(),
                    binder.get(None),
                    Some(idx),
                )
            }
        };
        mapping.objects.insert((idx, leaf), object);
        Ok(())
    })?;
    Ok(mapping)
}

#[test]
fn process_replaces_longest_keyword_first() {
    let object = MappedObject::new(MappedKind::Array(ArrayRank::Matrix), "float", 3, None);
    assert_eq!(
        object.process("#namereg = #pointer[#start1 + #start2*#ld]; #name"),
        "float_3_reg = float_3_pointer[float_3_start1 + float_3_start2*float_3_ld]; float_3"
    );
    let tuple = MappedObject::new(MappedKind::Tuple4, "uint", 0, None);
    assert_eq!(tuple.process("#name0,#name3"), "uint_0_0,uint_0_3");
}
