use core::fmt::Display;
use half::f16;

/// Element type of arrays and host scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    F16,
    F32,
    F64,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Bool,
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        return f.write_str(match self {
            DType::F16 => "F16",
            DType::F32 => "F32",
            DType::F64 => "F64",
            DType::U8 => "U8",
            DType::I8 => "I8",
            DType::U16 => "U16",
            DType::I16 => "I16",
            DType::U32 => "U32",
            DType::I32 => "I32",
            DType::U64 => "U64",
            DType::I64 => "I64",
            DType::Bool => "Bool",
        });
    }
}

impl DType {
    pub fn byte_size(&self) -> usize {
        return match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::U8 => 1,
            DType::I8 => 1,
            DType::U16 => 2,
            DType::I16 => 2,
            DType::U32 => 4,
            DType::I32 => 4,
            DType::U64 => 8,
            DType::I64 => 8,
            DType::Bool => 1,
        };
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// `OpenCL` name of this type. Single token, so it can be used inside identifiers.
    pub fn ocl(self) -> &'static str {
        match self {
            Self::F16 => "half",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::U8 => "uchar",
            Self::I8 => "char",
            Self::U16 => "ushort",
            Self::I16 => "short",
            Self::U32 => "uint",
            Self::I32 => "int",
            Self::U64 => "ulong",
            Self::I64 => "long",
            Self::Bool => "bool",
        }
    }
}

/// Immediate host scalar carried by an expression.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum Value {
    F16(f16),
    F32(f32),
    F64(f64),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Bool(bool),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::F16(_) => DType::F16,
            Value::F32(_) => DType::F32,
            Value::F64(_) => DType::F64,
            Value::U8(_) => DType::U8,
            Value::I8(_) => DType::I8,
            Value::U16(_) => DType::U16,
            Value::I16(_) => DType::I16,
            Value::U32(_) => DType::U32,
            Value::I32(_) => DType::I32,
            Value::U64(_) => DType::U64,
            Value::I64(_) => DType::I64,
            Value::Bool(_) => DType::Bool,
        }
    }

    /// Native endian bytes, as passed to `clSetKernelArg`.
    /// Returns None for types that can not be kernel arguments.
    pub fn to_ne_bytes(&self) -> Option<Vec<u8>> {
        Some(match self {
            Value::F16(x) => x.to_bits().to_ne_bytes().to_vec(),
            Value::F32(x) => x.to_ne_bytes().to_vec(),
            Value::F64(x) => x.to_ne_bytes().to_vec(),
            Value::U8(x) => x.to_ne_bytes().to_vec(),
            Value::I8(x) => x.to_ne_bytes().to_vec(),
            Value::U16(x) => x.to_ne_bytes().to_vec(),
            Value::I16(x) => x.to_ne_bytes().to_vec(),
            Value::U32(x) => x.to_ne_bytes().to_vec(),
            Value::I32(x) => x.to_ne_bytes().to_vec(),
            Value::U64(x) => x.to_ne_bytes().to_vec(),
            Value::I64(x) => x.to_ne_bytes().to_vec(),
            // OpenCL forbids bool kernel arguments
            Value::Bool(_) => return None,
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::F16(x) => f.write_fmt(format_args!("(half){:.16}", x.to_f32())),
            Value::F32(x) => f.write_fmt(format_args!("{x:.16}f")),
            Value::F64(x) => f.write_fmt(format_args!("{x:.16}")),
            Value::U8(x) => f.write_fmt(format_args!("{x}")),
            Value::I8(x) => f.write_fmt(format_args!("{x}")),
            Value::U16(x) => f.write_fmt(format_args!("{x}")),
            Value::I16(x) => f.write_fmt(format_args!("{x}")),
            Value::U32(x) => f.write_fmt(format_args!("{x}")),
            Value::I32(x) => f.write_fmt(format_args!("{x}")),
            Value::U64(x) => f.write_fmt(format_args!("{x}")),
            Value::I64(x) => f.write_fmt(format_args!("{x}")),
            Value::Bool(x) => f.write_fmt(format_args!("{x}")),
        }
    }
}

macro_rules! impl_from_value {
    ($($t:ty => $variant:ident),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::$variant(value)
            }
        })*
    };
}

impl_from_value!(f16 => F16, f32 => F32, f64 => F64, u8 => U8, i8 => I8, u16 => U16, i16 => I16,
    u32 => U32, i32 => I32, u64 => U64, i64 => I64, bool => Bool);

#[test]
fn half_scalar_bytes() {
    let x = Value::from(f16::from_f32(1.0));
    assert_eq!(x.dtype(), DType::F16);
    assert_eq!(x.to_ne_bytes(), Some(0x3c00u16.to_ne_bytes().to_vec()));
    assert_eq!(Value::Bool(true).to_ne_bytes(), None);
}
