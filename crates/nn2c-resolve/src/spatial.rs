//! Shared shape helpers for windowed operators (pooling, patch
//! extraction): kernel/stride/pad/dilation resolution and the output
//! extent formula.

use nn2c_ir::BuildError;

/// Resolved window configuration over the spatial axes of an input.
/// `pads` holds begin padding per axis followed by end padding per axis
/// (length `2 * kernel.len()`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    /// Kernel extent per spatial axis.
    pub kernel: Vec<i64>,
    /// Stride per spatial axis.
    pub strides: Vec<i64>,
    /// Begin pads then end pads.
    pub pads: Vec<i64>,
    /// Dilation per spatial axis.
    pub dilations: Vec<i64>,
}

impl Window {
    /// Fill in the defaults the serialized format allows to be omitted:
    /// unit strides, zero pads, unit dilations.
    pub fn new(
        node: &str,
        kernel: Vec<i64>,
        strides: Option<Vec<i64>>,
        pads: Option<Vec<i64>>,
        dilations: Option<Vec<i64>>,
    ) -> Result<Self, BuildError> {
        let rank = kernel.len();
        if rank == 0 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: "empty kernel shape".into(),
            });
        }
        if kernel.iter().any(|&k| k <= 0) {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!("kernel extents must be positive, got {kernel:?}"),
            });
        }
        let strides = strides.unwrap_or_else(|| vec![1; rank]);
        let pads = pads.unwrap_or_else(|| vec![0; rank * 2]);
        let dilations = dilations.unwrap_or_else(|| vec![1; rank]);

        if strides.len() != rank || dilations.len() != rank || pads.len() != rank * 2 {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!(
                    "window attribute lengths disagree: kernel {}, strides {}, pads {}, dilations {}",
                    rank,
                    strides.len(),
                    pads.len(),
                    dilations.len()
                ),
            });
        }
        if strides.iter().any(|&s| s <= 0) {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!("strides must be positive, got {strides:?}"),
            });
        }
        // Bound every extent so downstream span arithmetic stays in
        // i64 range.
        let limit = i32::MAX as i64;
        if kernel
            .iter()
            .chain(&strides)
            .chain(&dilations)
            .any(|&v| v > limit)
        {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: "window extents are out of range".into(),
            });
        }
        if pads.iter().any(|&p| !(0..=limit).contains(&p)) {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!("pads must be non-negative and in range, got {pads:?}"),
            });
        }
        Ok(Self {
            kernel,
            strides,
            pads,
            dilations,
        })
    }

    /// Number of spatial axes.
    pub fn spatial_rank(&self) -> usize {
        self.kernel.len()
    }

    /// Begin pad for a spatial axis.
    pub fn pad_begin(&self, axis: usize) -> i64 {
        self.pads[axis]
    }

    /// End pad for a spatial axis.
    pub fn pad_end(&self, axis: usize) -> i64 {
        self.pads[self.spatial_rank() + axis]
    }

    /// Fatal unless every dilation is 1.
    pub fn require_unit_dilations(&self, node: &str) -> Result<(), BuildError> {
        if self.dilations.iter().any(|&d| d != 1) {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("non-unit dilations {:?} are not implemented", self.dilations),
            });
        }
        Ok(())
    }

    /// Fatal unless begin and end padding match on every axis.
    pub fn require_symmetric_pads(&self, node: &str) -> Result<(), BuildError> {
        for axis in 0..self.spatial_rank() {
            if self.pad_begin(axis) != self.pad_end(axis) {
                return Err(BuildError::Unsupported {
                    node: node.to_string(),
                    message: format!("asymmetric padding {:?} is not implemented", self.pads),
                });
            }
        }
        Ok(())
    }

    /// Output extent for one spatial axis:
    /// `floor((input + pad_begin + pad_end - kernel) / stride) + 1`.
    pub fn output_extent(&self, node: &str, axis: usize, input: usize) -> Result<usize, BuildError> {
        let out_of_range = || BuildError::ShapeMismatch {
            node: node.to_string(),
            message: format!("input extent {input} on spatial axis {axis} is out of range"),
        };
        let input = i64::try_from(input).map_err(|_| out_of_range())?;
        let padded = input
            .checked_add(self.pad_begin(axis))
            .and_then(|p| p.checked_add(self.pad_end(axis)))
            .ok_or_else(out_of_range)?;
        let span = padded - self.kernel[axis];
        if span < 0 {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!(
                    "kernel {} larger than padded input extent {} on spatial axis {}",
                    self.kernel[axis], padded, axis
                ),
            });
        }
        Ok((span / self.strides[axis]) as usize + 1)
    }
}
