//! Concatenation of N tensors along one axis.

use nn2c_ir::{BuildError, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::writer::SourceWriter;

use super::{OutputSpec, Resolution};

/// Concatenates its inputs along `axis`. All inputs must share rank and
/// agree on every non-concatenation axis; the output's axis extent is
/// the sum over inputs.
#[derive(Clone, Debug)]
pub struct Concat {
    axis: i64,
    /// Normalized (non-negative) axis, fixed during resolve.
    resolved_axis: usize,
}

impl Concat {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let mut attrs = Attributes::new(&node.name, &node.attributes);
        let axis = attrs.require_int("axis")?;
        attrs.warn_unused();
        Ok(Self {
            axis,
            resolved_axis: 0,
        })
    }

    pub(crate) fn resolve(
        &mut self,
        node: &str,
        inputs: &[&Tensor],
    ) -> Result<Resolution, BuildError> {
        if inputs.is_empty() {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: "expects at least one input".into(),
            });
        }
        if inputs.len() == 1 {
            log::warn!("node '{node}': Concat has only one input");
        }

        let rank = inputs[0].rank();
        let axis = if self.axis < 0 {
            self.axis + rank as i64
        } else {
            self.axis
        };
        if axis < 0 || axis as usize >= rank {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!("axis {} is out of range for rank {}", self.axis, rank),
            });
        }
        let axis = axis as usize;
        log::trace!("node '{node}': concatenating on axis {axis}");

        let mut axis_sum = 0;
        for input in inputs {
            if input.rank() != rank {
                return Err(BuildError::ShapeMismatch {
                    node: node.to_string(),
                    message: format!(
                        "all inputs must share rank, but '{}' has rank {} and '{}' has rank {}",
                        inputs[0].name,
                        rank,
                        input.name,
                        input.rank()
                    ),
                });
            }
            for (d, (&a, &b)) in inputs[0].dims.iter().zip(input.dims.iter()).enumerate() {
                if d != axis && a != b {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!(
                            "inputs must match on every non-concatenation axis, \
                             but axis {d} has extents {a} and {b}"
                        ),
                    });
                }
            }
            axis_sum += input.dims[axis];
        }

        let mut dims = inputs[0].dims.clone();
        dims[axis] = axis_sum;
        self.resolved_axis = axis;

        Ok(Resolution {
            input_locals: (0..inputs.len()).map(|i| format!("input_{i}")).collect(),
            outputs: vec![OutputSpec::new("output", dims, inputs[0].dtype)],
        })
    }

    pub(crate) fn emit(
        &self,
        _node: &str,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        let out = outputs[0];
        let axis = self.resolved_axis;
        let ctype = out.dtype.c_type();

        // Contiguous destination elements per unit step along the
        // concatenation axis.
        let axis_pitch: usize = out.dims[axis..].iter().product();

        w.line("/* Concat */")?;
        w.line("int64_t outputOffset;")?;

        let mut output_base: usize = 0;
        for (index, input) in inputs.iter().enumerate() {
            let input_axis_pitch: usize = input.dims[axis..].iter().product();
            let input_size = input.elem_count();

            // Linear scan of the source; every `input_axis_pitch`
            // elements the destination cursor skips the room taken by
            // the other inputs' slices.
            w.line(&format!("outputOffset = {output_base};"))?;
            w.block(
                &format!("for (int64_t i = 0, j = 0; i < {input_size}; i++) {{"),
                "}",
                |w| {
                    w.line(&format!(
                        "*(({ctype}*)output + (outputOffset + i)) = \
                         *(({ctype}*)input_{index} + i);"
                    ))?;
                    w.block(&format!("if (++j == {input_axis_pitch}) {{"), "}", |w| {
                        w.line(&format!(
                            "outputOffset += {};",
                            axis_pitch - input_axis_pitch
                        ))?;
                        w.line("j = 0;")
                    })
                },
            )?;

            output_base += input_axis_pitch;
        }
        Ok(())
    }
}
