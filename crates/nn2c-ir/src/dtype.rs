//! Element datatypes for tensors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element datatype of a tensor. Closed set; generated code spells these
/// as the corresponding C type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Boolean.
    Bool,
}

impl DataType {
    /// The C spelling of this type in generated code.
    pub fn c_type(self) -> &'static str {
        match self {
            Self::F32 => "float",
            Self::F64 => "double",
            Self::I8 => "int8_t",
            Self::U8 => "uint8_t",
            Self::I32 => "int32_t",
            Self::I64 => "int64_t",
            Self::Bool => "bool",
        }
    }

    /// "High-precision numeric" type constraint used by MatMul-style
    /// operators: wide floats and wide signed integers.
    pub fn is_high_precision_numeric(self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::I32 | Self::I64)
    }

    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::F64 | Self::I64 => 8,
            Self::F32 | Self::I32 => 4,
            Self::I8 | Self::U8 | Self::Bool => 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
        })
    }
}
