//! Binding of runtime values to kernel call arguments.
//!
//! Binding walks expressions in exactly the same order as mapping, so the n-th set argument
//! matches the n-th declared kernel parameter.

use std::fmt::Display;

use crate::{
    binder::Binder,
    error::FuseError,
    expression::{traverse, ArrayInfo, BufferHandle, Expression, Leaf, Operand, RepeatInfo},
    mapping::ArrayRank,
    Value,
};

/// One kernel call argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Buffer(BufferHandle),
    Scalar(Value),
    UInt(u32),
}

impl Display for KernelArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelArg::Buffer(handle) => f.write_fmt(format_args!("buffer {:#x}", handle.0)),
            KernelArg::Scalar(value) => f.write_fmt(format_args!("{} {value}", value.dtype())),
            KernelArg::UInt(x) => f.write_fmt(format_args!("uint {x}")),
        }
    }
}

/// Anything that accepts kernel arguments by index, usually a compiled kernel.
pub trait KernelArguments {
    /// Set argument at index
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<(), FuseError>;
}

/// Keeps arguments in memory, useful for inspection and for deferred launches.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordedArguments {
    args: Vec<(u32, KernelArg)>,
}

impl RecordedArguments {
    pub const fn new() -> RecordedArguments {
        RecordedArguments { args: Vec::new() }
    }

    pub fn args(&self) -> &[(u32, KernelArg)] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl KernelArguments for RecordedArguments {
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<(), FuseError> {
        self.args.push((index, arg));
        Ok(())
    }
}

struct ArgWriter<'a, K: KernelArguments> {
    binder: &'a mut Binder,
    current_arg: &'a mut u32,
    kernel: &'a mut K,
}

impl<K: KernelArguments> ArgWriter<'_, K> {
    fn push(&mut self, arg: KernelArg) -> Result<(), FuseError> {
        if crate::debug_args() {
            println!("Arg {} = {arg}", *self.current_arg);
        }
        self.kernel.set_arg(*self.current_arg, arg)?;
        *self.current_arg += 1;
        Ok(())
    }

    fn push_uint(&mut self, x: usize) -> Result<(), FuseError> {
        let Ok(x) = u32::try_from(x) else {
            return Err(FuseError::invalid_expression(format!(
                "Kernel argument {x} does not fit into uint"
            )));
        };
        self.push(KernelArg::UInt(x))
    }

    fn set_value(&mut self, value: Value) -> Result<(), FuseError> {
        if value.to_ne_bytes().is_none() {
            return Err(FuseError::UnknownDType(value.dtype()));
        }
        self.push(KernelArg::Scalar(value))
    }

    fn set_array(&mut self, x: &ArrayInfo) -> Result<(), FuseError> {
        if !self.binder.bind(Some(x.handle)) {
            return Ok(());
        }
        self.push(KernelArg::Buffer(x.handle))?;
        // Same classification as the declaration, arity must match
        match ArrayRank::of(x) {
            ArrayRank::Scalar => self.push_uint(x.start.0),
            ArrayRank::Column | ArrayRank::Row => {
                self.push_uint(x.start.0.max(x.start.1))?;
                self.push_uint(x.stride.0.max(x.stride.1))
            }
            ArrayRank::Matrix => {
                self.push_uint(x.ld)?;
                self.push_uint(x.start.0)?;
                self.push_uint(x.start.1)?;
                self.push_uint(x.stride.0)?;
                self.push_uint(x.stride.1)
            }
        }
    }

    fn set_repeat(&mut self, x: &RepeatInfo) -> Result<(), FuseError> {
        self.push_uint(x.sub.0)?;
        self.push_uint(x.sub.1)?;
        self.push_uint(x.rep.0)?;
        self.push_uint(x.rep.1)
    }

    fn set_operand(&mut self, operand: &Operand) -> Result<(), FuseError> {
        match operand {
            Operand::Value(value) => self.set_value(*value),
            Operand::Array(array) => self.set_array(array),
            Operand::Repeat(repeat) => self.set_repeat(repeat),
            Operand::Composite(_) | Operand::Invalid => {
                Err(FuseError::invalid_expression("Unrecognized operand type family"))
            }
        }
    }
}

/// Sets kernel arguments for every non composite operand of the expression, starting
/// at index `current_arg`. On return `current_arg` points past the last set argument.
pub fn bind_expression<K: KernelArguments>(
    expression: &Expression,
    binder: &mut Binder,
    current_arg: &mut u32,
    kernel: &mut K,
) -> Result<(), FuseError> {
    let mut writer = ArgWriter { binder, current_arg, kernel };
    traverse(expression, expression.root(), true, &mut |expression, idx, leaf| {
        let node = &expression.tree()[idx];
        match leaf {
            Leaf::Lhs | Leaf::Rhs => match node.operand(leaf) {
                Some(Operand::Composite(_)) | None => Ok(()),
                Some(operand) => writer.set_operand(operand),
            },
            Leaf::Parent => Ok(()),
        }
    })
}

#[test]
fn oversized_offset_is_rejected() {
    use crate::{binder::BindingPolicy, expression::ExpressionBuilder, DType};
    let mut b = ExpressionBuilder::new(DType::F32);
    let x = ArrayInfo::vector(BufferHandle(1), DType::F32, 8).slice((usize::MAX, 0), (1, 1));
    let root = b.assign(x, Value::F32(0.0));
    let expression = b.build(root).unwrap();
    let mut binder = Binder::new(BindingPolicy::BindToHandle);
    let mut args = RecordedArguments::new();
    let mut cursor = 0;
    let res = bind_expression(&expression, &mut binder, &mut cursor, &mut args);
    assert!(matches!(res, Err(FuseError::InvalidExpression(_))));
}
