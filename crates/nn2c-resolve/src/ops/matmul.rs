//! Matrix multiplication, rank-2 and batched rank-4 variants.

use nn2c_ir::{BuildError, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::writer::SourceWriter;

use super::{expect_arity, require_high_precision, OutputSpec, Resolution};

/// Which loop nest the resolved shapes call for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MatMulForm {
    /// `[rows, inner] x [inner, cols] -> [rows, cols]`.
    Rank2,
    /// `[1, channels, rows, inner] x [inner, cols] -> [1, channels, rows, cols]`.
    /// The leading channel axis is carried from the left operand.
    Batched4,
}

/// Matrix product of two high-precision numeric tensors.
///
/// Only the fully specified rank-2 and rank-4 shape combinations are
/// contractual; degenerate vector operands and higher ranks are
/// rejected rather than guessed at.
#[derive(Clone, Debug)]
pub struct MatMul {
    form: MatMulForm,
}

impl MatMul {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let attrs = Attributes::new(&node.name, &node.attributes);
        attrs.warn_unused();
        Ok(Self {
            form: MatMulForm::Rank2,
        })
    }

    pub(crate) fn resolve(
        &mut self,
        node: &str,
        inputs: &[&Tensor],
    ) -> Result<Resolution, BuildError> {
        expect_arity(node, inputs, 2)?;
        let a = inputs[0];
        let b = inputs[1];
        require_high_precision(node, a)?;
        require_high_precision(node, b)?;

        let dims = match (a.rank(), b.rank()) {
            (2, 2) => {
                if a.dims[1] == 0 || b.dims[1] == 0 {
                    return Err(BuildError::Unsupported {
                        node: node.to_string(),
                        message: "degenerate vector operands are not implemented; \
                                  promote them to explicit rank-2 shapes"
                            .into(),
                    });
                }
                let (rows, inner) = (a.dims[0], a.dims[1]);
                let (inner2, cols) = (b.dims[0], b.dims[1]);
                if inner != inner2 {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!("inner dimensions {inner} and {inner2} don't match"),
                    });
                }
                self.form = MatMulForm::Rank2;
                vec![rows, cols]
            }
            (4, 2) => {
                if a.dims[0] != 1 {
                    return Err(BuildError::Unsupported {
                        node: node.to_string(),
                        message: format!(
                            "only batch 1 is implemented for rank-4 operands, got batch {}",
                            a.dims[0]
                        ),
                    });
                }
                let channels = a.dims[1];
                let rows = a.dims[2];
                let inner = a.dims[3];
                let (inner2, cols) = (b.dims[0], b.dims[1]);
                if inner != inner2 {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!("inner dimensions {inner} and {inner2} don't match"),
                    });
                }
                self.form = MatMulForm::Batched4;
                vec![1, channels, rows, cols]
            }
            (ra, rb) => {
                return Err(BuildError::Unsupported {
                    node: node.to_string(),
                    message: format!(
                        "only rank-2 x rank-2 and rank-4 x rank-2 are implemented, \
                         got rank {ra} x rank {rb}"
                    ),
                });
            }
        };

        Ok(Resolution {
            input_locals: vec!["A".into(), "B".into()],
            outputs: vec![OutputSpec::new("Y", dims, a.dtype)],
        })
    }

    pub(crate) fn emit(
        &self,
        _node: &str,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        let a = inputs[0];
        let out = outputs[0];

        match self.form {
            MatMulForm::Rank2 => {
                let rows = out.dims[0];
                let cols = out.dims[1];
                let inner = a.dims[1];

                w.line("/* MatMul */")?;
                w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
                w.push();
                w.block(&format!("for( uint32_t c=0; c<{cols}; c++ ) {{"), "}", |w| {
                    w.line("Y[r][c] = 0;")?;
                    w.line(&format!("for( uint32_t i=0; i<{inner}; i++ )"))?;
                    w.push();
                    w.line("Y[r][c] += A[r][i] * B[i][c];")?;
                    w.pop();
                    Ok(())
                })?;
                w.pop();
            }
            MatMulForm::Batched4 => {
                let channels = out.dims[1];
                let rows = out.dims[2];
                let cols = out.dims[3];
                let inner = a.dims[3];

                w.line("/* MatMul, batched over the channel axis */")?;
                w.block(
                    &format!("for( uint32_t chan=0; chan<{channels}; chan++ ) {{"),
                    "}",
                    |w| {
                        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
                        w.push();
                        w.block(&format!("for( uint32_t c=0; c<{cols}; c++ ) {{"), "}", |w| {
                            w.line("Y[0][chan][r][c] = 0;")?;
                            w.line(&format!("for( uint32_t i=0; i<{inner}; i++ )"))?;
                            w.push();
                            w.line("Y[0][chan][r][c] += A[0][chan][r][i] * B[i][c];")?;
                            w.pop();
                            Ok(())
                        })?;
                        w.pop();
                        Ok(())
                    },
                )?;
            }
        }
        Ok(())
    }
}
