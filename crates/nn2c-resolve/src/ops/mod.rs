//! The operator catalogue.
//!
//! One variant per supported operator kind, each carrying its typed
//! attribute payload. Every operator implements the three-phase
//! contract: `parse` (raw attributes → typed configuration), `resolve`
//! (input shapes → output shapes, strategy selection) and `emit`
//! (resolved shapes → loop-nest source text). Resolution runs exactly
//! once per node; emission is a pure function of the resolved state.

mod concat;
mod im2col;
mod matmul;
mod pool;
mod threshold;
mod topk;

pub use concat::Concat;
pub use im2col::Im2Col;
pub use matmul::MatMul;
pub use pool::{Pool, PoolKind};
pub use threshold::{MultiThreshold, ThresholdLayout};
pub use topk::TopK;

use nn2c_ir::{BuildError, DataType, NodeDesc, Tensor};

use crate::writer::SourceWriter;

/// Shape and dtype of one output tensor a node allocates during resolve,
/// along with the operator-local name its emitted body uses for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    /// Operator-local variable name ("Y", "values", ...).
    pub local: String,
    /// Resolved dimension extents.
    pub dims: Vec<usize>,
    /// Resolved element type.
    pub dtype: DataType,
}

impl OutputSpec {
    pub(crate) fn new(local: &str, dims: Vec<usize>, dtype: DataType) -> Self {
        Self {
            local: local.to_string(),
            dims,
            dtype,
        }
    }
}

/// Result of a node's resolve phase: the local names chosen for its
/// inputs (in input order) and the outputs it allocates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Local name per input, same order as the node's input list.
    pub input_locals: Vec<String>,
    /// Output allocations in declaration order.
    pub outputs: Vec<OutputSpec>,
}

/// A graph node's operator, with its typed attribute payload.
///
/// Closed set: adding an operator means adding a variant here and
/// extending the two `match`es below, which the compiler checks
/// exhaustively.
#[derive(Clone, Debug)]
pub enum Op {
    /// Concatenation along an axis.
    Concat(Concat),
    /// Matrix multiplication (rank-2 and batched rank-4).
    MatMul(MatMul),
    /// Top-K selection (largest, K=1 specialization).
    TopK(TopK),
    /// Patch extraction (im2col) for convolution-as-GEMM.
    Im2Col(Im2Col),
    /// Quantization by threshold counting.
    MultiThreshold(MultiThreshold),
    /// Windowed pooling family (max / average / quantized average).
    Pool(Pool),
}

impl Op {
    /// Decode a node descriptor into a typed operator.
    ///
    /// Unrecognized operator kinds are fatal; unrecognized attribute
    /// names on a recognized operator are logged and ignored.
    pub fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        match node.op_type.as_str() {
            "Concat" => Ok(Self::Concat(Concat::parse(node)?)),
            "MatMul" => Ok(Self::MatMul(MatMul::parse(node)?)),
            "TopK" => Ok(Self::TopK(TopK::parse(node)?)),
            "Im2Col" => Ok(Self::Im2Col(Im2Col::parse(node)?)),
            "MultiThreshold" => Ok(Self::MultiThreshold(MultiThreshold::parse(node)?)),
            "MaxPool" | "AveragePool" | "QuantAvgPool2d" => Ok(Self::Pool(Pool::parse(node)?)),
            _ => Err(BuildError::UnknownOperator {
                node: node.name.clone(),
                op_type: node.op_type.clone(),
            }),
        }
    }

    /// The operator-kind string, for diagnostics and generated comments.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Concat(_) => "Concat",
            Self::MatMul(_) => "MatMul",
            Self::TopK(_) => "TopK",
            Self::Im2Col(_) => "Im2Col",
            Self::MultiThreshold(_) => "MultiThreshold",
            Self::Pool(p) => p.kind_str(),
        }
    }

    /// Shape/type resolution. Validates arity, ranks and dtypes, picks
    /// the emission strategy where layout matters, and returns the
    /// output allocations. Any violated precondition aborts the build.
    pub fn resolve(&mut self, node: &str, inputs: &[&Tensor]) -> Result<Resolution, BuildError> {
        match self {
            Self::Concat(op) => op.resolve(node, inputs),
            Self::MatMul(op) => op.resolve(node, inputs),
            Self::TopK(op) => op.resolve(node, inputs),
            Self::Im2Col(op) => op.resolve(node, inputs),
            Self::MultiThreshold(op) => op.resolve(node, inputs),
            Self::Pool(op) => op.resolve(node, inputs),
        }
    }

    /// Code emission against resolved inputs/outputs. Loop bounds and
    /// strides are baked in as literals; no shape is re-derived here
    /// beyond reading `outputs[].dims`.
    pub fn emit(
        &self,
        node: &str,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        match self {
            Self::Concat(op) => op.emit(node, inputs, outputs, w),
            Self::MatMul(op) => op.emit(node, inputs, outputs, w),
            Self::TopK(op) => op.emit(node, inputs, outputs, w),
            Self::Im2Col(op) => op.emit(node, inputs, outputs, w),
            Self::MultiThreshold(op) => op.emit(node, inputs, outputs, w),
            Self::Pool(op) => op.emit(node, inputs, outputs, w),
        }
    }
}

/// Fatal unless the node has exactly `expected` inputs.
pub(crate) fn expect_arity(
    node: &str,
    inputs: &[&Tensor],
    expected: usize,
) -> Result<(), BuildError> {
    if inputs.len() != expected {
        return Err(BuildError::ShapeMismatch {
            node: node.to_string(),
            message: format!("expects {} input(s), got {}", expected, inputs.len()),
        });
    }
    Ok(())
}

/// Fatal unless the tensor satisfies the high-precision numeric type
/// constraint (wide floats and wide signed integers).
pub(crate) fn require_high_precision(node: &str, t: &Tensor) -> Result<(), BuildError> {
    if !t.dtype.is_high_precision_numeric() {
        return Err(BuildError::Unsupported {
            node: node.to_string(),
            message: format!(
                "input '{}' has dtype {}, which fails the high-precision numeric constraint",
                t.name, t.dtype
            ),
        });
    }
    Ok(())
}
