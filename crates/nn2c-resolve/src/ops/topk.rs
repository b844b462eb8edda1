//! Top-K selection, specialized to the largest-value, K=1 path.

use nn2c_ir::{BuildError, DataType, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::writer::SourceWriter;

use super::{expect_arity, OutputSpec, Resolution};

/// Returns the K largest values of a `[1, n]` input together with their
/// indices. K comes from the companion input's compile-time payload;
/// only K=1 with `largest=1` is implemented. Ties resolve to the first
/// occurrence (strict `>` comparison).
#[derive(Clone, Debug)]
pub struct TopK {
    largest: i64,
    #[allow(dead_code)]
    sorted: i64,
    k: usize,
}

impl TopK {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let mut attrs = Attributes::new(&node.name, &node.attributes);
        // axis is accepted for compatibility; the K=1 path scans the
        // single row either way.
        attrs.int_or("axis", -1)?;
        let largest = attrs.int_or("largest", 1)?;
        let sorted = attrs.int_or("sorted", 1)?;
        attrs.warn_unused();
        Ok(Self {
            largest,
            sorted,
            k: 0,
        })
    }

    pub(crate) fn resolve(
        &mut self,
        node: &str,
        inputs: &[&Tensor],
    ) -> Result<Resolution, BuildError> {
        expect_arity(node, inputs, 2)?;
        let a = inputs[0];
        let k_input = inputs[1];

        if self.largest != 1 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: "only largest=1 is implemented".into(),
            });
        }
        if a.rank() != 2 || a.dims[0] != 1 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!(
                    "only [1, n] inputs are implemented, got dims {:?}",
                    a.dims
                ),
            });
        }
        if a.dtype != DataType::F32 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only f32 inputs are implemented, got {}", a.dtype),
            });
        }

        let k = match k_input.data.as_ref().and_then(|d| d.int_at(0)) {
            Some(k) if k >= 1 => k as usize,
            Some(k) => {
                return Err(BuildError::ShapeMismatch {
                    node: node.to_string(),
                    message: format!("K must be at least 1, got {k}"),
                })
            }
            None => {
                return Err(BuildError::Unsupported {
                    node: node.to_string(),
                    message: "K must come from an initializer with a compile-time payload".into(),
                })
            }
        };
        if k != 1 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only K=1 is implemented, got K={k}"),
            });
        }
        self.k = k;

        Ok(Resolution {
            input_locals: vec!["A".into(), "K".into()],
            outputs: vec![
                OutputSpec::new("values", vec![1, k], DataType::F32),
                OutputSpec::new("indices", vec![1, k], DataType::I64),
            ],
        })
    }

    pub(crate) fn emit(
        &self,
        _node: &str,
        inputs: &[&Tensor],
        _outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        let rows = inputs[0].dims[1];

        w.line("/* TopK, largest value with K=1 */")?;
        w.line("float max = -FLT_MAX;")?;
        w.line("int64_t indice = 0;")?;
        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
        w.push();
        w.block("if( A[0][r] > max ) {", "}", |w| {
            w.line("max = A[0][r];")?;
            w.line("indice = r;")
        })?;
        w.pop();
        w.line("values[0][0] = max;")?;
        w.line("indices[0][0] = indice;")?;
        Ok(())
    }
}
