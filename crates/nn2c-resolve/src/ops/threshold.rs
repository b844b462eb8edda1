//! Quantization by threshold counting (QONNX MultiThreshold).
//!
//! Each output element counts how many thresholds of its channel's
//! table the input element reaches, then an affine `out_scale` /
//! `out_bias` post-pass is applied. Output stays float-typed: the
//! quantized values are integers represented as floats.

use nn2c_ir::{BuildError, DataType, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::writer::SourceWriter;

use super::{expect_arity, OutputSpec, Resolution};

/// Which loop nest the input layout calls for. Chosen once during
/// resolve; emission dispatches on it without re-inspecting attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdLayout {
    /// `[1, pixels]` input, per-pixel threshold rows.
    Flat2D,
    /// `[1, C, H, W]` input, per-channel threshold rows.
    ChannelFirst4D,
    /// `[1, H, W, C]` input (`data_layout == "NHWC"`), thresholds keyed
    /// by the trailing axis.
    ChannelLast4D,
}

/// Thresholding quantizer over a float input and a threshold table.
#[derive(Clone, Debug)]
pub struct MultiThreshold {
    out_bias: f32,
    /// 0.0 means "no rescale", matching the producing toolchain's
    /// convention for an absent scale.
    out_scale: f32,
    data_layout: String,
    layout: ThresholdLayout,
}

impl MultiThreshold {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let mut attrs = Attributes::new(&node.name, &node.attributes);
        let out_bias = attrs.float_or("out_bias", 0.0)?;
        let out_scale = attrs.float_or("out_scale", 0.0)?;
        let data_layout = attrs.string_or("data_layout", "empty")?.to_string();
        // The declared output dtype is informational; generated code
        // keeps float storage either way.
        attrs.string("out_dtype")?;
        attrs.warn_unused();
        Ok(Self {
            out_bias,
            out_scale,
            data_layout,
            layout: ThresholdLayout::Flat2D,
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

        if b.rank() != 2 {
            return Err(BuildError::ShapeMismatch {
                node: node.to_string(),
                message: format!("threshold table must be rank 2, got rank {}", b.rank()),
            });
        }
        if a.dims.first() != Some(&1) {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only batch 1 is implemented, got dims {:?}", a.dims),
            });
        }

        self.layout = match a.rank() {
            2 => {
                if b.dims[0] != a.dims[1] {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!(
                            "threshold table has {} rows but the input has {} elements",
                            b.dims[0], a.dims[1]
                        ),
                    });
                }
                ThresholdLayout::Flat2D
            }
            4 if self.data_layout == "NHWC" => {
                if b.dims[0] != a.dims[3] {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!(
                            "threshold table has {} rows but the channel-last input has {} channels",
                            b.dims[0], a.dims[3]
                        ),
                    });
                }
                ThresholdLayout::ChannelLast4D
            }
            4 => {
                if b.dims[0] != a.dims[1] {
                    return Err(BuildError::ShapeMismatch {
                        node: node.to_string(),
                        message: format!(
                            "threshold table has {} rows but the input has {} channels",
                            b.dims[0], a.dims[1]
                        ),
                    });
                }
                ThresholdLayout::ChannelFirst4D
            }
            r => {
                return Err(BuildError::Unsupported {
                    node: node.to_string(),
                    message: format!("only rank-2 and rank-4 inputs are implemented, got rank {r}"),
                });
            }
        };

        Ok(Resolution {
            input_locals: vec!["A".into(), "B".into()],
            outputs: vec![OutputSpec::new("Y", a.dims.clone(), DataType::F32)],
        })
    }

    /// The affine finalizer for one already-counted output cell.
    fn rescale_stmt(&self, cell: &str) -> String {
        if self.out_scale != 0.0 {
            format!(
                "{cell} = {} * {cell} + ({});",
                fmt_f32(self.out_scale),
                fmt_f32(self.out_bias)
            )
        } else {
            format!("{cell} = {cell} + ({});", fmt_f32(self.out_bias))
        }
    }

    pub(crate) fn emit(
        &self,
        _node: &str,
        inputs: &[&Tensor],
        _outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        let a = inputs[0];
        let thresholds = inputs[1].dims[1];

        match self.layout {
            ThresholdLayout::Flat2D => {
                let pixels = a.dims[1];
                w.line("/* MultiThreshold, flat layout */")?;
                w.block(
                    &format!("for( uint32_t pixel=0; pixel<{pixels}; pixel++ ) {{"),
                    "}",
                    |w| {
                        w.line("Y[0][pixel] = 0;")?;
                        w.line(&format!(
                            "for( uint32_t t=0; t<{thresholds}; t++ )"
                        ))?;
                        w.push();
                        w.line("if( A[0][pixel] >= B[pixel][t] )")?;
                        w.push();
                        w.line("Y[0][pixel]++;")?;
                        w.pop();
                        w.pop();
                        Ok(())
                    },
                )?;
                w.line("/* scale and bias */")?;
                w.line(&format!("for( uint32_t pixel=0; pixel<{pixels}; pixel++ )"))?;
                w.push();
                w.line(&self.rescale_stmt("Y[0][pixel]"))?;
                w.pop();
            }
            ThresholdLayout::ChannelFirst4D => {
                let (chans, rows, cols) = (a.dims[1], a.dims[2], a.dims[3]);
                w.line("/* MultiThreshold, channel-first layout */")?;
                self.emit_channel_first(w, chans, rows, cols, thresholds)?;
            }
            ThresholdLayout::ChannelLast4D => {
                // NHWC: the spatial axes lead, channels trail.
                let (rows, cols, chans) = (a.dims[1], a.dims[2], a.dims[3]);
                w.line("/* MultiThreshold, channel-last layout */")?;
                self.emit_channel_last(w, rows, cols, chans, thresholds)?;
            }
        }
        Ok(())
    }

    fn emit_channel_first(
        &self,
        w: &mut SourceWriter<'_>,
        chans: usize,
        rows: usize,
        cols: usize,
        thresholds: usize,
    ) -> Result<(), BuildError> {
        w.line(&format!("for( uint32_t chan=0; chan<{chans}; chan++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
        w.push();
        w.block(&format!("for( uint32_t c=0; c<{cols}; c++ ) {{"), "}", |w| {
            w.line("Y[0][chan][r][c] = 0;")?;
            w.line(&format!("for( uint32_t t=0; t<{thresholds}; t++ )"))?;
            w.push();
            w.line("if( A[0][chan][r][c] >= B[chan][t] )")?;
            w.push();
            w.line("Y[0][chan][r][c]++;")?;
            w.pop();
            w.pop();
            Ok(())
        })?;
        w.pop();
        w.pop();

        w.line("/* scale and bias */")?;
        w.line(&format!("for( uint32_t chan=0; chan<{chans}; chan++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t c=0; c<{cols}; c++ )"))?;
        w.push();
        w.line(&self.rescale_stmt("Y[0][chan][r][c]"))?;
        w.pop();
        w.pop();
        w.pop();
        Ok(())
    }

    fn emit_channel_last(
        &self,
        w: &mut SourceWriter<'_>,
        rows: usize,
        cols: usize,
        chans: usize,
        thresholds: usize,
    ) -> Result<(), BuildError> {
        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t c=0; c<{cols}; c++ )"))?;
        w.push();
        w.block(
            &format!("for( uint32_t chan=0; chan<{chans}; chan++ ) {{"),
            "}",
            |w| {
                w.line("Y[0][r][c][chan] = 0;")?;
                w.line(&format!("for( uint32_t t=0; t<{thresholds}; t++ )"))?;
                w.push();
                w.line("if( A[0][r][c][chan] >= B[chan][t] )")?;
                w.push();
                w.line("Y[0][r][c][chan]++;")?;
                w.pop();
                w.pop();
                Ok(())
            },
        )?;
        w.pop();
        w.pop();

        w.line("/* scale and bias */")?;
        w.line(&format!("for( uint32_t r=0; r<{rows}; r++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t c=0; c<{cols}; c++ )"))?;
        w.push();
        w.line(&format!("for( uint32_t chan=0; chan<{chans}; chan++ )"))?;
        w.push();
        w.line(&self.rescale_stmt("Y[0][r][c][chan]"))?;
        w.pop();
        w.pop();
        w.pop();
        Ok(())
    }
}

/// A float rendered as a C literal (always with a decimal point or
/// exponent, so it never collapses to an int token).
fn fmt_f32(v: f32) -> String {
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nn2c_ir::{Attribute, AttributeValue};

    fn node(attrs: Vec<Attribute>) -> NodeDesc {
        NodeDesc {
            op_type: "MultiThreshold".into(),
            name: "mt_0".into(),
            attributes: attrs,
            inputs: vec!["a".into(), "b".into()],
            outputs: vec!["y".into()],
        }
    }

    fn t(name: &str, dims: &[usize]) -> Tensor {
        Tensor::new(name, dims.to_vec(), DataType::F32)
    }

    #[test]
    fn flat_layout_selected_for_rank2() {
        let mut op = MultiThreshold::parse(&node(vec![])).unwrap();
        let a = t("a", &[1, 6]);
        let b = t("b", &[6, 3]);
        let r = op.resolve("mt_0", &[&a, &b]).unwrap();
        assert_eq!(op.layout, ThresholdLayout::Flat2D);
        assert_eq!(r.outputs[0].dims, vec![1, 6]);
        assert_eq!(r.outputs[0].dtype, DataType::F32);
    }

    #[test]
    fn layout_attribute_selects_channel_last() {
        let mut op = MultiThreshold::parse(&node(vec![Attribute::new(
            "data_layout",
            AttributeValue::String("NHWC".into()),
        )]))
        .unwrap();
        let a = t("a", &[1, 4, 4, 3]);
        let b = t("b", &[3, 7]);
        op.resolve("mt_0", &[&a, &b]).unwrap();
        assert_eq!(op.layout, ThresholdLayout::ChannelLast4D);
    }

    #[test]
    fn channel_first_is_the_default_for_rank4() {
        let mut op = MultiThreshold::parse(&node(vec![])).unwrap();
        let a = t("a", &[1, 3, 4, 4]);
        let b = t("b", &[3, 7]);
        op.resolve("mt_0", &[&a, &b]).unwrap();
        assert_eq!(op.layout, ThresholdLayout::ChannelFirst4D);
    }

    #[test]
    fn channel_last_emission_indexes_the_trailing_axis() {
        let mut op = MultiThreshold::parse(&node(vec![Attribute::new(
            "data_layout",
            AttributeValue::String("NHWC".into()),
        )]))
        .unwrap();
        let a = t("a", &[1, 4, 5, 3]);
        let b = t("b", &[3, 7]);
        op.resolve("mt_0", &[&a, &b]).unwrap();

        let mut buf = String::new();
        op.emit("mt_0", &[&a, &b], &[], &mut SourceWriter::new(&mut buf))
            .unwrap();
        // Spatial loops carry H and W; the channel loop covers the
        // trailing axis and keys the threshold table.
        assert!(buf.contains("for( uint32_t r=0; r<4; r++ )"));
        assert!(buf.contains("for( uint32_t c=0; c<5; c++ )"));
        assert!(buf.contains("for( uint32_t chan=0; chan<3; chan++ ) {"));
        assert!(buf.contains("if( A[0][r][c][chan] >= B[chan][t] )"));
        assert!(buf.contains("Y[0][r][c][chan]++;"));
    }

    #[test]
    fn channel_count_mismatch_is_fatal() {
        let mut op = MultiThreshold::parse(&node(vec![])).unwrap();
        let a = t("a", &[1, 3, 4, 4]);
        let b = t("b", &[5, 7]);
        let err = op.resolve("mt_0", &[&a, &b]).unwrap_err();
        assert!(matches!(err, BuildError::ShapeMismatch { .. }));
    }

    #[test]
    fn batch_above_one_rejected() {
        let mut op = MultiThreshold::parse(&node(vec![])).unwrap();
        let a = t("a", &[2, 3, 4, 4]);
        let b = t("b", &[3, 7]);
        assert!(op.resolve("mt_0", &[&a, &b]).is_err());
    }

    #[test]
    fn rescale_uses_scale_only_when_nonzero() {
        let mut op = MultiThreshold::parse(&node(vec![
            Attribute::new("out_scale", AttributeValue::Float(0.5)),
            Attribute::new("out_bias", AttributeValue::Float(-1.0)),
        ]))
        .unwrap();
        let a = t("a", &[1, 2]);
        let b = t("b", &[2, 3]);
        op.resolve("mt_0", &[&a, &b]).unwrap();

        let mut buf = String::new();
        op.emit("mt_0", &[&a, &b], &[], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("Y[0][pixel] = 0.5 * Y[0][pixel] + (-1.0);"));

        // Scale of zero means bias only.
        let mut op = MultiThreshold::parse(&node(vec![Attribute::new(
            "out_bias",
            AttributeValue::Float(2.0),
        )]))
        .unwrap();
        op.resolve("mt_0", &[&a, &b]).unwrap();
        let mut buf = String::new();
        op.emit("mt_0", &[&a, &b], &[], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("Y[0][pixel] = Y[0][pixel] + (2.0);"));
    }

    #[test]
    fn threshold_comparison_is_inclusive() {
        let mut op = MultiThreshold::parse(&node(vec![])).unwrap();
        let a = t("a", &[1, 2]);
        let b = t("b", &[2, 3]);
        op.resolve("mt_0", &[&a, &b]).unwrap();
        let mut buf = String::new();
        op.emit("mt_0", &[&a, &b], &[], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("if( A[0][pixel] >= B[pixel][t] )"));
        assert!(buf.contains("for( uint32_t t=0; t<3; t++ )"));
    }

    #[test]
    fn float_literal_formatting() {
        assert_eq!(fmt_f32(0.5), "0.5");
        assert_eq!(fmt_f32(2.0), "2.0");
        assert_eq!(fmt_f32(-1.0), "-1.0");
    }
}
