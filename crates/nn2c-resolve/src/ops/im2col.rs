//! Patch extraction (im2col), used to turn convolution into GEMM.

use nn2c_ir::{BuildError, DataType, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::spatial::Window;
use crate::writer::SourceWriter;

use super::{expect_arity, OutputSpec, Resolution};

/// Extracts kernel-sized patches from a `[1, H, W, C]` input into a
/// `[1, OH, OW, KH*KW*C]` output, zero-filling where the window reads
/// into the padding border. Only unit dilation and symmetric padding
/// are implemented.
#[derive(Clone, Debug)]
pub struct Im2Col {
    window: Window,
    /// Uniform per-side padding, fixed during resolve.
    pad: i64,
}

impl Im2Col {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let mut attrs = Attributes::new(&node.name, &node.attributes);
        let kernel = attrs.require_ints("kernel_size")?.to_vec();
        let stride = attrs.require_ints("stride")?.to_vec();
        let pad_amount = attrs.require_ints("pad_amount")?.to_vec();
        let dilations = attrs.require_ints("dilations")?.to_vec();
        // Accepted for compatibility with the producing toolchain.
        attrs.int_or("depthwise", 0)?;
        attrs.warn_unused();

        if kernel.len() != 2 {
            return Err(BuildError::Unsupported {
                node: node.name.clone(),
                message: format!("kernel_size must have 2 entries, got {}", kernel.len()),
            });
        }
        if pad_amount.len() != 4 {
            return Err(BuildError::Unsupported {
                node: node.name.clone(),
                message: format!("pad_amount must have 4 entries, got {}", pad_amount.len()),
            });
        }
        if pad_amount.iter().any(|&p| p != pad_amount[0]) {
            return Err(BuildError::Unsupported {
                node: node.name.clone(),
                message: format!("asymmetric padding {pad_amount:?} is not implemented"),
            });
        }
        let pad = pad_amount[0];
        let window = Window::new(
            &node.name,
            kernel,
            Some(stride),
            Some(vec![pad, pad, pad, pad]),
            Some(dilations),
        )?;
        window.require_unit_dilations(&node.name)?;

        Ok(Self { window, pad })
    }

    pub(crate) fn resolve(
        &mut self,
        node: &str,
        inputs: &[&Tensor],
    ) -> Result<Resolution, BuildError> {
        expect_arity(node, inputs, 1)?;
        let a = inputs[0];
        if a.rank() != 4 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only 4-D inputs are implemented, got rank {}", a.rank()),
            });
        }
        if a.dims[0] != 1 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only batch 1 is implemented, got batch {}", a.dims[0]),
            });
        }
        if a.dtype != DataType::F32 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only f32 inputs are implemented, got {}", a.dtype),
            });
        }

        // Input layout is channel-last: [1, H, W, C].
        let oh = self.window.output_extent(node, 0, a.dims[1])?;
        let ow = self.window.output_extent(node, 1, a.dims[2])?;
        let patch = ((self.window.kernel[0] * self.window.kernel[1]) as usize)
            .checked_mul(a.dims[3])
            .ok_or_else(|| BuildError::ShapeMismatch {
                node: node.to_string(),
                message: "patch axis extent is out of range".into(),
            })?;

        Ok(Resolution {
            input_locals: vec!["A".into()],
            outputs: vec![OutputSpec::new("Y", vec![1, oh, ow, patch], DataType::F32)],
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
        let (h, width, chans) = (a.dims[1], a.dims[2], a.dims[3]);
        let (oh, ow) = (out.dims[1], out.dims[2]);
        let (kh, kw) = (self.window.kernel[0], self.window.kernel[1]);
        let (sh, sw) = (self.window.strides[0], self.window.strides[1]);
        let pad = self.pad;

        w.line("/* Im2Col: gather kernel patches for convolution-as-GEMM */")?;
        w.block(&format!("for( uint32_t oh=0; oh<{oh}; oh++ ) {{"), "}", |w| {
            w.block(&format!("for( uint32_t ow=0; ow<{ow}; ow++ ) {{"), "}", |w| {
                w.line("uint32_t patch = 0;")?;
                w.line(&format!("for( uint32_t kh=0; kh<{kh}; kh++ )"))?;
                w.line(&format!("for( uint32_t kw=0; kw<{kw}; kw++ )"))?;
                w.block(&format!("for( uint32_t ch=0; ch<{chans}; ch++ ) {{"), "}", |w| {
                    w.line(&format!("int32_t ih = oh*{sh} + kh - {pad};"))?;
                    w.line(&format!("int32_t iw = ow*{sw} + kw - {pad};"))?;
                    w.line(&format!(
                        "if( ih < 0 || ih >= {h} || iw < 0 || iw >= {width} )"
                    ))?;
                    w.push();
                    w.line("Y[0][oh][ow][patch] = 0.0f;")?;
                    w.pop();
                    w.line("else")?;
                    w.push();
                    w.line("Y[0][oh][ow][patch] = A[0][ih][iw][ch];")?;
                    w.pop();
                    w.line("patch++;")
                })
            })
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nn2c_ir::{Attribute, AttributeValue};

    fn node(kernel: &[i64], stride: &[i64], pad: &[i64], dil: &[i64]) -> NodeDesc {
        NodeDesc {
            op_type: "Im2Col".into(),
            name: "im2col_0".into(),
            attributes: vec![
                Attribute::new("kernel_size", AttributeValue::Ints(kernel.to_vec())),
                Attribute::new("stride", AttributeValue::Ints(stride.to_vec())),
                Attribute::new("pad_amount", AttributeValue::Ints(pad.to_vec())),
                Attribute::new("dilations", AttributeValue::Ints(dil.to_vec())),
            ],
            inputs: vec!["a".into()],
            outputs: vec!["y".into()],
        }
    }

    fn input(dims: &[usize]) -> Tensor {
        Tensor::new("a", dims.to_vec(), DataType::F32)
    }

    #[test]
    fn output_shape_follows_window_formula() {
        // H=W=5, k=3, s=1, p=0: spatial 3x3, patch axis 3*3*2.
        let mut op =
            Im2Col::parse(&node(&[3, 3], &[1, 1], &[0, 0, 0, 0], &[1, 1])).unwrap();
        let a = input(&[1, 5, 5, 2]);
        let r = op.resolve("im2col_0", &[&a]).unwrap();
        assert_eq!(r.outputs[0].dims, vec![1, 3, 3, 18]);
    }

    #[test]
    fn padding_grows_output() {
        let mut op =
            Im2Col::parse(&node(&[3, 3], &[1, 1], &[1, 1, 1, 1], &[1, 1])).unwrap();
        let a = input(&[1, 5, 5, 1]);
        let r = op.resolve("im2col_0", &[&a]).unwrap();
        assert_eq!(r.outputs[0].dims, vec![1, 5, 5, 9]);
    }

    #[test]
    fn missing_window_attribute_is_fatal() {
        let mut n = node(&[3, 3], &[1, 1], &[0, 0, 0, 0], &[1, 1]);
        n.attributes.retain(|a| a.name != "stride");
        let err = Im2Col::parse(&n).unwrap_err();
        assert!(matches!(err, BuildError::MissingAttribute { .. }));
    }

    #[test]
    fn asymmetric_padding_rejected() {
        let err = Im2Col::parse(&node(&[3, 3], &[1, 1], &[1, 0, 1, 0], &[1, 1])).unwrap_err();
        assert!(matches!(err, BuildError::Unsupported { .. }));
    }

    #[test]
    fn non_unit_dilation_rejected() {
        let err = Im2Col::parse(&node(&[3, 3], &[1, 1], &[0, 0, 0, 0], &[2, 2])).unwrap_err();
        assert!(matches!(err, BuildError::Unsupported { .. }));
    }

    #[test]
    fn non_4d_input_rejected() {
        let mut op =
            Im2Col::parse(&node(&[3, 3], &[1, 1], &[0, 0, 0, 0], &[1, 1])).unwrap();
        let a = input(&[5, 5, 2]);
        assert!(op.resolve("im2col_0", &[&a]).is_err());
    }

    #[test]
    fn emitted_patch_gather() {
        let mut op =
            Im2Col::parse(&node(&[2, 2], &[1, 1], &[0, 0, 0, 0], &[1, 1])).unwrap();
        let a = input(&[1, 3, 3, 1]);
        let r = op.resolve("im2col_0", &[&a]).unwrap();
        let y = Tensor::new("y", r.outputs[0].dims.clone(), r.outputs[0].dtype);

        let mut buf = String::new();
        op.emit("im2col_0", &[&a], &[&y], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("for( uint32_t oh=0; oh<2; oh++ ) {"));
        assert!(buf.contains("for( uint32_t kh=0; kh<2; kh++ )"));
        assert!(buf.contains("Y[0][oh][ow][patch] = A[0][ih][iw][ch];"));
        assert!(buf.contains("if( ih < 0 || ih >= 3 || iw < 0 || iw >= 3 )"));
    }
}
