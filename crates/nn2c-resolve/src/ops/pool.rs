//! Windowed pooling over NCHW inputs: max, average and the quantized
//! average variant that requantizes its result to a narrower bit width.

use nn2c_ir::{BuildError, DataType, NodeDesc, Tensor};

use crate::attr::Attributes;
use crate::spatial::Window;
use crate::writer::SourceWriter;

use super::{expect_arity, OutputSpec, Resolution};

/// Pooling accumulator strategy, fixed at parse time from the operator
/// kind and its attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolKind {
    /// Running maximum over the window.
    Max,
    /// Arithmetic mean over the window. With `count_include_pad` the
    /// divisor is the full kernel size even where the window hangs over
    /// the padding border.
    Average {
        /// Divide by kernel size instead of the in-bounds sample count.
        count_include_pad: bool,
    },
    /// Average pooling followed by a fixed-point requantization from
    /// `ibits`-bit inputs down to `obits`-bit outputs.
    QuantAverage {
        /// Bit width of the (integer-valued) input elements.
        ibits: i64,
        /// Bit width the result is narrowed to.
        obits: i64,
    },
}

/// Sliding-window pooling over the two spatial axes of a `[N, C, H, W]`
/// input.
#[derive(Clone, Debug)]
pub struct Pool {
    kind: PoolKind,
    window: Window,
}

impl Pool {
    pub(crate) fn parse(node: &NodeDesc) -> Result<Self, BuildError> {
        let mut attrs = Attributes::new(&node.name, &node.attributes);

        let (kind, window) = match node.op_type.as_str() {
            "QuantAvgPool2d" => {
                // This kind carries scalar kernel/stride attributes and
                // is square by construction.
                let k = attrs.require_int("kernel")?;
                let s = attrs.int_or("stride", 1)?;
                let ibits = attrs.require_int("ibits")?;
                let obits = attrs.require_int("obits")?;
                // Only channel-first is generated; the attribute is
                // accepted for compatibility.
                attrs.string_or("data_layout", "NCHW")?;
                attrs.int_or("signed", 0)?;
                if !(1..=32).contains(&ibits) || !(1..=32).contains(&obits) {
                    return Err(BuildError::Unsupported {
                        node: node.name.clone(),
                        message: format!(
                            "bit widths must be in 1..=32, got ibits={ibits} obits={obits}"
                        ),
                    });
                }
                let window =
                    Window::new(&node.name, vec![k, k], Some(vec![s, s]), None, None)?;
                (PoolKind::QuantAverage { ibits, obits }, window)
            }
            op => {
                let kernel = attrs.require_ints("kernel_shape")?.to_vec();
                let strides = attrs.ints("strides")?.map(<[i64]>::to_vec);
                let pads = attrs.ints("pads")?.map(<[i64]>::to_vec);
                let dilations = attrs.ints("dilations")?.map(<[i64]>::to_vec);
                if attrs.int_or("ceil_mode", 0)? != 0 {
                    return Err(BuildError::Unsupported {
                        node: node.name.clone(),
                        message: "ceil_mode is not implemented".into(),
                    });
                }
                let kind = if op == "MaxPool" {
                    PoolKind::Max
                } else {
                    PoolKind::Average {
                        count_include_pad: attrs.int_or("count_include_pad", 0)? != 0,
                    }
                };
                let window = Window::new(&node.name, kernel, strides, pads, dilations)?;
                (kind, window)
            }
        };
        attrs.warn_unused();

        Ok(Self { kind, window })
    }

    /// The operator-kind string this pool was parsed from.
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            PoolKind::Max => "MaxPool",
            PoolKind::Average { .. } => "AveragePool",
            PoolKind::QuantAverage { .. } => "QuantAvgPool2d",
        }
    }

    pub(crate) fn resolve(
        &mut self,
        node: &str,
        inputs: &[&Tensor],
    ) -> Result<Resolution, BuildError> {
        expect_arity(node, inputs, 1)?;
        let x = inputs[0];

        if x.rank() != 4 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only 4-D inputs are implemented, got rank {}", x.rank()),
            });
        }
        if x.dtype != DataType::F32 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only f32 inputs are implemented, got {}", x.dtype),
            });
        }
        if self.window.spatial_rank() != 2 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!(
                    "only 2-D windows are implemented, got {} spatial axes",
                    self.window.spatial_rank()
                ),
            });
        }
        self.window.require_unit_dilations(node)?;
        self.window.require_symmetric_pads(node)?;
        if matches!(self.kind, PoolKind::QuantAverage { .. }) && x.dims[0] != 1 {
            return Err(BuildError::Unsupported {
                node: node.to_string(),
                message: format!("only batch 1 is implemented, got batch {}", x.dims[0]),
            });
        }

        let oh = self.window.output_extent(node, 0, x.dims[2])?;
        let ow = self.window.output_extent(node, 1, x.dims[3])?;

        Ok(Resolution {
            input_locals: vec!["x".into()],
            outputs: vec![OutputSpec::new(
                "y",
                vec![x.dims[0], x.dims[1], oh, ow],
                DataType::F32,
            )],
        })
    }

    pub(crate) fn emit(
        &self,
        _node: &str,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        w: &mut SourceWriter<'_>,
    ) -> Result<(), BuildError> {
        let x = inputs[0];
        let out = outputs[0];
        let (batch, chans, h, width) = (x.dims[0], x.dims[1], x.dims[2], x.dims[3]);
        let (oh, ow) = (out.dims[2], out.dims[3]);
        let (kh, kw) = (self.window.kernel[0], self.window.kernel[1]);
        let (sh, sw) = (self.window.strides[0], self.window.strides[1]);
        let (ph, pw) = (self.window.pad_begin(0), self.window.pad_begin(1));

        w.line(&format!("/* {} */", self.kind_str()))?;
        w.line(&format!("for( uint32_t b=0; b<{batch}; b++ )"))?;
        w.line(&format!("for( uint32_t ch=0; ch<{chans}; ch++ )"))?;
        w.line(&format!("for( uint32_t oh=0; oh<{oh}; oh++ )"))?;
        w.block(&format!("for( uint32_t ow=0; ow<{ow}; ow++ ) {{"), "}", |w| {
            // Accumulator initialization.
            match self.kind {
                PoolKind::Max => w.line("float curmax = -FLT_MAX;")?,
                PoolKind::Average { .. } | PoolKind::QuantAverage { .. } => {
                    w.line("float curavg = 0.0f;")?;
                    w.line("int numavg = 0;")?;
                }
            }

            w.line(&format!("for( uint32_t kh=0; kh<{kh}; kh++ )"))?;
            w.block(&format!("for( uint32_t kw=0; kw<{kw}; kw++ ) {{"), "}", |w| {
                w.line(&format!("int32_t ih = oh*{sh} + kh - {ph};"))?;
                w.line(&format!("int32_t iw = ow*{sw} + kw - {pw};"))?;
                w.line(&format!(
                    "if( ih < 0 || ih >= {h} || iw < 0 || iw >= {width} )"
                ))?;
                w.push();
                w.line("continue;")?;
                w.pop();
                match self.kind {
                    PoolKind::Max => {
                        w.line("if( x[b][ch][ih][iw] > curmax )")?;
                        w.push();
                        w.line("curmax = x[b][ch][ih][iw];")?;
                        w.pop();
                        Ok(())
                    }
                    PoolKind::Average { .. } | PoolKind::QuantAverage { .. } => {
                        w.line("curavg += x[b][ch][ih][iw];")?;
                        w.line("numavg++;")
                    }
                }
            })?;

            // Finalizer.
            match self.kind {
                PoolKind::Max => w.line("y[b][ch][oh][ow] = curmax;"),
                PoolKind::Average { count_include_pad } => {
                    if count_include_pad {
                        w.line(&format!("numavg = {};", kh * kw))?;
                    }
                    w.line("y[b][ch][oh][ow] = curavg / numavg;")
                }
                PoolKind::QuantAverage { .. } => w.line("y[b][ch][oh][ow] = curavg / numavg;"),
            }
        })?;

        if let PoolKind::QuantAverage { ibits, obits } = self.kind {
            let scale = kh * kw;
            let shift = rescale_shift(ibits, obits, scale);
            w.line(&format!("/* requantize to {obits} bits */"))?;
            w.line(&format!("for( uint32_t ch=0; ch<{chans}; ch++ )"))?;
            w.line(&format!("for( uint32_t oh=0; oh<{oh}; oh++ )"))?;
            w.line(&format!("for( uint32_t ow=0; ow<{ow}; ow++ )"))?;
            w.push();
            w.line(&format!(
                "y[0][ch][oh][ow] = ( (uint32_t) ( y[0][ch][oh][ow] * {scale} ) ) >> {shift};"
            ))?;
            w.pop();
        }
        Ok(())
    }
}

/// Right-shift that narrows the window sum of `ibits`-wide elements down
/// to `obits` bits: the bit length of the largest possible sum, less the
/// output width, floored at zero.
fn rescale_shift(ibits: i64, obits: i64, window_size: i64) -> i64 {
    // Wide arithmetic: bit widths are capped at 32 and kernel extents
    // at i32::MAX, so the worst-case sum always fits in u128.
    let max_sum = ((1u128 << ibits) - 1) * window_size as u128;
    let bit_length = (128 - max_sum.leading_zeros()) as i64;
    (bit_length - obits).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nn2c_ir::{Attribute, AttributeValue};

    fn pool_node(op: &str, attrs: Vec<Attribute>) -> NodeDesc {
        NodeDesc {
            op_type: op.into(),
            name: "pool_0".into(),
            attributes: attrs,
            inputs: vec!["x".into()],
            outputs: vec!["y".into()],
        }
    }

    fn kernel22() -> Attribute {
        Attribute::new("kernel_shape", AttributeValue::Ints(vec![2, 2]))
    }

    fn input(dims: &[usize]) -> Tensor {
        Tensor::new("x", dims.to_vec(), DataType::F32)
    }

    #[test]
    fn output_shape_follows_window_formula() {
        let mut op = Pool::parse(&pool_node(
            "MaxPool",
            vec![
                kernel22(),
                Attribute::new("strides", AttributeValue::Ints(vec![2, 2])),
            ],
        ))
        .unwrap();
        let x = input(&[1, 3, 4, 4]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        assert_eq!(r.outputs[0].dims, vec![1, 3, 2, 2]);
        assert_eq!(r.input_locals, vec!["x"]);
    }

    #[test]
    fn default_strides_are_unit() {
        let mut op = Pool::parse(&pool_node("MaxPool", vec![kernel22()])).unwrap();
        let x = input(&[1, 1, 4, 4]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        assert_eq!(r.outputs[0].dims, vec![1, 1, 3, 3]);
    }

    #[test]
    fn asymmetric_pads_rejected() {
        let mut op = Pool::parse(&pool_node(
            "AveragePool",
            vec![
                kernel22(),
                Attribute::new("pads", AttributeValue::Ints(vec![1, 0, 0, 0])),
            ],
        ))
        .unwrap();
        let x = input(&[1, 1, 4, 4]);
        let err = op.resolve("pool_0", &[&x]).unwrap_err();
        assert!(matches!(err, BuildError::Unsupported { .. }));
    }

    #[test]
    fn max_pool_uses_strict_comparison() {
        let mut op = Pool::parse(&pool_node("MaxPool", vec![kernel22()])).unwrap();
        let x = input(&[1, 1, 3, 3]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        let y = Tensor::new("y", r.outputs[0].dims.clone(), r.outputs[0].dtype);

        let mut buf = String::new();
        op.emit("pool_0", &[&x], &[&y], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("float curmax = -FLT_MAX;"));
        assert!(buf.contains("if( x[b][ch][ih][iw] > curmax )"));
        assert!(buf.contains("y[b][ch][oh][ow] = curmax;"));
        assert!(!buf.contains("curavg"));
    }

    #[test]
    fn average_pool_divides_by_sample_count() {
        let mut op = Pool::parse(&pool_node(
            "AveragePool",
            vec![
                kernel22(),
                Attribute::new("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
            ],
        ))
        .unwrap();
        let x = input(&[1, 1, 3, 3]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        let y = Tensor::new("y", r.outputs[0].dims.clone(), r.outputs[0].dtype);

        let mut buf = String::new();
        op.emit("pool_0", &[&x], &[&y], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("numavg++;"));
        assert!(buf.contains("y[b][ch][oh][ow] = curavg / numavg;"));
        // Border samples are excluded from the divisor by default.
        assert!(!buf.contains("numavg = 4;"));
    }

    #[test]
    fn count_include_pad_overrides_divisor() {
        let mut op = Pool::parse(&pool_node(
            "AveragePool",
            vec![
                kernel22(),
                Attribute::new("pads", AttributeValue::Ints(vec![1, 1, 1, 1])),
                Attribute::new("count_include_pad", AttributeValue::Int(1)),
            ],
        ))
        .unwrap();
        let x = input(&[1, 1, 3, 3]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        let y = Tensor::new("y", r.outputs[0].dims.clone(), r.outputs[0].dtype);

        let mut buf = String::new();
        op.emit("pool_0", &[&x], &[&y], &mut SourceWriter::new(&mut buf))
            .unwrap();
        assert!(buf.contains("numavg = 4;"));
    }

    #[test]
    fn quant_pool_parses_scalar_window() {
        let mut op = Pool::parse(&pool_node(
            "QuantAvgPool2d",
            vec![
                Attribute::new("kernel", AttributeValue::Int(2)),
                Attribute::new("stride", AttributeValue::Int(2)),
                Attribute::new("ibits", AttributeValue::Int(4)),
                Attribute::new("obits", AttributeValue::Int(4)),
            ],
        ))
        .unwrap();
        assert_eq!(op.kind_str(), "QuantAvgPool2d");
        let x = input(&[1, 3, 4, 4]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        assert_eq!(r.outputs[0].dims, vec![1, 3, 2, 2]);
    }

    #[test]
    fn quant_pool_requires_batch_one() {
        let mut op = Pool::parse(&pool_node(
            "QuantAvgPool2d",
            vec![
                Attribute::new("kernel", AttributeValue::Int(2)),
                Attribute::new("ibits", AttributeValue::Int(4)),
                Attribute::new("obits", AttributeValue::Int(4)),
            ],
        ))
        .unwrap();
        let x = input(&[2, 3, 4, 4]);
        assert!(op.resolve("pool_0", &[&x]).is_err());
    }

    #[test]
    fn quant_pool_emits_requantize_pass() {
        let mut op = Pool::parse(&pool_node(
            "QuantAvgPool2d",
            vec![
                Attribute::new("kernel", AttributeValue::Int(2)),
                Attribute::new("stride", AttributeValue::Int(2)),
                Attribute::new("ibits", AttributeValue::Int(4)),
                Attribute::new("obits", AttributeValue::Int(4)),
            ],
        ))
        .unwrap();
        let x = input(&[1, 1, 4, 4]);
        let r = op.resolve("pool_0", &[&x]).unwrap();
        let y = Tensor::new("y", r.outputs[0].dims.clone(), r.outputs[0].dtype);

        let mut buf = String::new();
        op.emit("pool_0", &[&x], &[&y], &mut SourceWriter::new(&mut buf))
            .unwrap();
        // Max sum 15 * 4 = 60, six bits; narrowing to four shifts by two.
        assert!(buf.contains(
            "y[0][ch][oh][ow] = ( (uint32_t) ( y[0][ch][oh][ow] * 4 ) ) >> 2;"
        ));
    }

    #[test]
    fn rescale_shift_floors_at_zero() {
        assert_eq!(rescale_shift(4, 4, 4), 2);
        assert_eq!(rescale_shift(2, 8, 2), 0);
        // 255 * 9 = 2295, twelve bits, minus 8 -> 4.
        assert_eq!(rescale_shift(8, 8, 9), 4);
    }

    #[test]
    fn missing_kernel_is_fatal() {
        let err = Pool::parse(&pool_node("MaxPool", vec![])).unwrap_err();
        assert!(matches!(err, BuildError::MissingAttribute { .. }));
        let err = Pool::parse(&pool_node(
            "QuantAvgPool2d",
            vec![Attribute::new("kernel", AttributeValue::Int(2))],
        ))
        .unwrap_err();
        assert!(matches!(err, BuildError::MissingAttribute { .. }));
    }
}
