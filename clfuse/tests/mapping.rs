use clfuse::{
    mapping::{map_expression, ArrayRank, MappedKind, StructuralKind},
    ArrayInfo, Binder, BindingPolicy, BufferHandle, DType, ExpressionBuilder, FuseError, Leaf, OpKind, Operand,
    Operator, RepeatInfo, Transposition, Value,
};

#[test]
fn array_ranks() -> Result<(), FuseError> {
    let mut b = ExpressionBuilder::new(DType::F32);
    let s = ArrayInfo::scalar(BufferHandle(1), DType::F32);
    let col = ArrayInfo::vector(BufferHandle(2), DType::F32, 16);
    let row = ArrayInfo { shape: (1, 16), ..ArrayInfo::vector(BufferHandle(3), DType::F32, 16) };
    let m = ArrayInfo::matrix(BufferHandle(4), DType::F32, 16, 16);
    let x = b.binary(s, OpKind::Add, col);
    let y = b.binary(row, OpKind::Add, m);
    let root = b.binary(x, OpKind::Add, y);
    let expression = b.build(root)?;
    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    let kind = |idx, leaf| mapping.get(idx, leaf).map(|o| o.kind());
    assert_eq!(kind(0, Leaf::Lhs), Some(MappedKind::Array(ArrayRank::Scalar)));
    assert_eq!(kind(0, Leaf::Rhs), Some(MappedKind::Array(ArrayRank::Column)));
    assert_eq!(kind(1, Leaf::Lhs), Some(MappedKind::Array(ArrayRank::Row)));
    assert_eq!(kind(1, Leaf::Rhs), Some(MappedKind::Array(ArrayRank::Matrix)));
    assert_eq!(mapping.get(0, Leaf::Lhs).map(|o| o.type_key()), Some("array0"));
    assert_eq!(mapping.get(1, Leaf::Lhs).map(|o| o.type_key()), Some("array1"));
    assert_eq!(mapping.get(1, Leaf::Rhs).map(|o| o.type_key()), Some("array2"));
    // Composite roles have no entry
    assert!(mapping.get(2, Leaf::Lhs).is_none());
    assert!(mapping.get(2, Leaf::Parent).is_none());
    assert_eq!(mapping.len(), 4);
    Ok(())
}

#[test]
fn identifiers_follow_traversal_order() -> Result<(), FuseError> {
    let mut b = ExpressionBuilder::new(DType::F32);
    let x = ArrayInfo::vector(BufferHandle(10), DType::F32, 8);
    let y = ArrayInfo::vector(BufferHandle(11), DType::F32, 8);
    let prod = b.binary(y, OpKind::Mult, Value::F32(2.0));
    let root = b.assign(x, prod);
    let expression = b.build(root)?;
    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    assert_eq!(mapping.get(1, Leaf::Lhs).map(|o| o.name()), Some("float_0"));
    assert_eq!(mapping.get(0, Leaf::Lhs).map(|o| o.name()), Some("float_1"));
    let scalar = mapping.get(0, Leaf::Rhs);
    assert_eq!(scalar.map(|o| o.name()), Some("float_2"));
    assert_eq!(scalar.map(|o| o.type_key()), Some("host_scalar"));
    Ok(())
}

#[test]
fn structural_wrappers() -> Result<(), FuseError> {
    let mut b = ExpressionBuilder::new(DType::F64);
    let a = ArrayInfo::matrix(BufferHandle(1), DType::F64, 8, 8);
    let c = ArrayInfo::matrix(BufferHandle(2), DType::F64, 8, 8);
    let v = ArrayInfo::vector(BufferHandle(3), DType::F64, 8);
    let tile = RepeatInfo { sub: (8, 8), rep: (2, 1) };
    let diag = b.node(v.into(), Operator::structural(OpKind::Vdiag), Operand::Invalid);
    let prod = b.node(a.into(), Operator::matmul(Transposition::NT), diag);
    let rows = b.node(prod, Operator::reduce_rows(OpKind::Add), Operand::Invalid);
    let rep = b.node(c.into(), Operator::structural(OpKind::Repeat), tile.into());
    let root = b.binary(rows, OpKind::Add, rep);
    let expression = b.build(root)?;
    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    let parent = |idx| mapping.get(idx, Leaf::Parent).map(|o| (o.kind(), o.type_key()));
    assert_eq!(parent(0), Some((MappedKind::Structural(StructuralKind::Vdiag), "vdiag")));
    assert_eq!(parent(1), Some((MappedKind::Structural(StructuralKind::MatrixProduct), "matrix_product")));
    assert_eq!(parent(2), Some((MappedKind::Structural(StructuralKind::VectorReduction), "vector_reduction")));
    assert_eq!(parent(3), Some((MappedKind::Structural(StructuralKind::Repeat), "repeat")));
    assert_eq!(parent(4), None);
    let tuple = mapping.get(3, Leaf::Rhs);
    assert_eq!(tuple.map(|o| o.kind()), Some(MappedKind::Tuple4));
    assert_eq!(tuple.map(|o| o.scalartype()), Some("uint"));
    // Wrappers use the element type of the expression
    assert_eq!(mapping.get(1, Leaf::Parent).map(|o| o.scalartype()), Some("double"));
    Ok(())
}

#[test]
fn same_buffer_shares_identifier() -> Result<(), FuseError> {
    let x = ArrayInfo::vector(BufferHandle(5), DType::F32, 64);
    let y = ArrayInfo::vector(BufferHandle(6), DType::F32, 64);
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.binary(x, OpKind::Add, y);
    let root = b.assign(x, sum);
    let expression = b.build(root)?;

    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    assert_eq!(mapping.get(1, Leaf::Lhs).map(|o| o.name()), mapping.get(0, Leaf::Lhs).map(|o| o.name()));

    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindAllUnique))?;
    assert_ne!(mapping.get(1, Leaf::Lhs).map(|o| o.name()), mapping.get(0, Leaf::Lhs).map(|o| o.name()));
    Ok(())
}

#[test]
fn mapping_is_deterministic() -> Result<(), FuseError> {
    let mut b = ExpressionBuilder::new(DType::I32);
    let x = ArrayInfo::vector(BufferHandle(1), DType::I32, 100);
    let y = ArrayInfo::vector(BufferHandle(2), DType::I32, 100);
    let z = ArrayInfo::vector(BufferHandle(3), DType::I32, 100);
    let m = b.binary(y, OpKind::ElementMax, z);
    let root = b.assign(x, m);
    let expression = b.build(root)?;
    let first = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    let second = map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle))?;
    assert_eq!(first, second);
    assert_eq!(first.get(0, Leaf::Rhs).map(|o| o.name()), Some("int_2"));
    Ok(())
}

#[test]
fn one_buffer_one_dtype() -> Result<(), FuseError> {
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 32);
    let y = ArrayInfo { dtype: DType::F64, ..ArrayInfo::vector(BufferHandle(2), DType::F32, 32) };
    let z = ArrayInfo { dtype: DType::F64, ..x };
    let mut b = ExpressionBuilder::new(DType::F32);
    let sum = b.binary(y, OpKind::Add, z);
    let root = b.assign(x, sum);
    let expression = b.build(root)?;
    assert!(matches!(
        map_expression(&expression, &mut Binder::new(BindingPolicy::BindToHandle)),
        Err(FuseError::InvalidExpression(_))
    ));
    let mapping = map_expression(&expression, &mut Binder::new(BindingPolicy::BindAllUnique))?;
    assert_eq!(mapping.get(0, Leaf::Rhs).map(|o| o.name()), Some("double_2"));

    // The check spans the whole batch
    let mut binder = Binder::new(BindingPolicy::BindToHandle);
    let mut b = ExpressionBuilder::new(DType::F64);
    let root = b.assign(y, z);
    let second = b.build(root)?;
    let mut b = ExpressionBuilder::new(DType::F32);
    let root = b.assign(x, x);
    let first = b.build(root)?;
    map_expression(&first, &mut binder)?;
    assert!(matches!(map_expression(&second, &mut binder), Err(FuseError::InvalidExpression(_))));
    Ok(())
}
