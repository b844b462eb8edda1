//! The tensor value type flowing along graph edges.

use serde::{Deserialize, Serialize};

use crate::DataType;

/// Compile-time-known constant payload of an initializer tensor.
///
/// Only the payload types the supported operators actually read are
/// modeled (TopK's K companion, threshold tables, weights).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorData {
    /// 32-bit float payload.
    F32(Vec<f32>),
    /// 64-bit integer payload.
    I64(Vec<i64>),
}

impl TensorData {
    /// Number of elements in the payload.
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I64(v) => v.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` read as an integer, if the payload holds integers
    /// (or floats with an exact integral value).
    pub fn int_at(&self, i: usize) -> Option<i64> {
        match self {
            Self::I64(v) => v.get(i).copied(),
            Self::F32(v) => v.get(i).map(|&f| f as i64),
        }
    }
}

/// A typed, shaped multi-dimensional array value.
///
/// `name` doubles as the generated-code variable name and the key under
/// which the resolver publishes the tensor. Once a producing node's
/// resolve completes, `dims` and `dtype` never change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Unique generated-variable name.
    pub name: String,
    /// Ordered dimension extents. Rank 0 is a scalar.
    pub dims: Vec<usize>,
    /// Element datatype.
    pub dtype: DataType,
    /// Constant payload for initializers known at compile time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TensorData>,
}

impl Tensor {
    /// A tensor with no constant payload.
    pub fn new(name: impl Into<String>, dims: Vec<usize>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dims,
            dtype,
            data: None,
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count (product of dims; 1 for rank 0). Saturates
    /// at `usize::MAX` if the product overflows; the resolver rejects
    /// such tensors before any of them reach code generation.
    pub fn elem_count(&self) -> usize {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .unwrap_or(usize::MAX)
    }

    /// Whether this tensor carries a compile-time constant payload.
    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }
}
