//! End-to-end resolution tests over multi-node graphs.

use nn2c_ir::{
    Attribute, AttributeValue, BuildError, DataType, GraphDesc, NodeDesc, Tensor, TensorData,
};
use nn2c_resolve::{emit_graph, resolve_graph, Op};

fn ints(name: &str, v: &[i64]) -> Attribute {
    Attribute::new(name, AttributeValue::Ints(v.to_vec()))
}

/// A small quantized-classifier pipeline: patch extraction feeding a
/// GEMM, thresholding back to integer codes, then an argmax head.
fn classifier_graph() -> GraphDesc {
    let mut k = Tensor::new("k", vec![1], DataType::I64);
    k.data = Some(TensorData::I64(vec![1]));

    GraphDesc {
        inputs: vec![Tensor::new("image", vec![1, 4, 4, 1], DataType::F32)],
        initializers: vec![
            Tensor::new("weights", vec![4, 10], DataType::F32),
            Tensor::new("thresholds", vec![10, 3], DataType::F32),
            k,
        ],
        nodes: vec![
            NodeDesc {
                op_type: "Im2Col".into(),
                name: "im2col_0".into(),
                attributes: vec![
                    ints("kernel_size", &[2, 2]),
                    ints("stride", &[2, 2]),
                    ints("pad_amount", &[0, 0, 0, 0]),
                    ints("dilations", &[1, 1]),
                ],
                inputs: vec!["image".into()],
                outputs: vec!["patches".into()],
            },
            NodeDesc {
                op_type: "MatMul".into(),
                name: "matmul_0".into(),
                attributes: vec![],
                inputs: vec!["patches".into(), "weights".into()],
                outputs: vec!["logits".into()],
            },
            NodeDesc {
                op_type: "MultiThreshold".into(),
                name: "mt_0".into(),
                attributes: vec![Attribute::new(
                    "data_layout",
                    AttributeValue::String("NHWC".into()),
                )],
                inputs: vec!["logits".into(), "thresholds".into()],
                outputs: vec!["quantized".into()],
            },
        ],
        outputs: vec!["quantized".into()],
    }
}

#[test]
fn shapes_propagate_across_the_pipeline() {
    let graph = resolve_graph(&classifier_graph()).unwrap();
    // 4x4 image, 2x2 kernel, stride 2: 2x2 spatial, 4-wide patches.
    assert_eq!(graph.tensor("patches").unwrap().dims, vec![1, 2, 2, 4]);
    // Batched rank-4 x rank-2 GEMM carries the channel axis.
    assert_eq!(graph.tensor("logits").unwrap().dims, vec![1, 2, 2, 10]);
    // Thresholding preserves shape.
    assert_eq!(graph.tensor("quantized").unwrap().dims, vec![1, 2, 2, 10]);
    assert_eq!(graph.output_vars, vec!["quantized"]);
}

#[test]
fn resolution_registers_tensors_in_declaration_order() {
    let graph = resolve_graph(&classifier_graph()).unwrap();
    let names: Vec<&str> = graph.tensors().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["image", "weights", "thresholds", "k", "patches", "logits", "quantized"]
    );
}

#[test]
fn initializer_payloads_survive_resolution() {
    let graph = resolve_graph(&classifier_graph()).unwrap();
    let k = graph.tensor("k").unwrap();
    assert!(k.is_constant());
    assert_eq!(k.data.as_ref().unwrap().int_at(0), Some(1));
    // Declared inputs carry no payload.
    assert!(!graph.tensor("image").unwrap().is_constant());
}

#[test]
fn whole_graph_emission_is_byte_identical_across_runs() {
    let desc = classifier_graph();
    let render = || -> String {
        let graph = resolve_graph(&desc).unwrap();
        let mut buf = String::new();
        emit_graph(&graph, &mut buf).unwrap();
        buf
    };
    let first = render();
    assert_eq!(first, render());
    assert_eq!(first, render());
    assert!(first.contains("/* Im2Col"));
    assert!(first.contains("/* MatMul"));
    assert!(first.contains("/* MultiThreshold"));
}

#[test]
fn downstream_shape_errors_name_the_failing_node() {
    let mut desc = classifier_graph();
    // Wrong inner dimension for the GEMM.
    desc.initializers[0].dims = vec![5, 10];
    let err = resolve_graph(&desc).unwrap_err();
    match err {
        BuildError::ShapeMismatch { node, .. } => assert_eq!(node, "matmul_0"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_attributes_do_not_abort_the_build() {
    let mut desc = classifier_graph();
    desc.nodes[1]
        .attributes
        .push(Attribute::new("future_flag", AttributeValue::Int(1)));
    assert!(resolve_graph(&desc).is_ok());
}

#[test]
fn topk_head_produces_two_outputs() {
    let mut desc = classifier_graph();
    desc.inputs = vec![Tensor::new("scores", vec![1, 10], DataType::F32)];
    desc.nodes = vec![NodeDesc {
        op_type: "TopK".into(),
        name: "topk_0".into(),
        attributes: vec![],
        inputs: vec!["scores".into(), "k".into()],
        outputs: vec!["best".into(), "best_idx".into()],
    }];
    desc.outputs = vec!["best_idx".into()];
    let graph = resolve_graph(&desc).unwrap();
    assert_eq!(graph.tensor("best").unwrap().dtype, DataType::F32);
    assert_eq!(graph.tensor("best_idx").unwrap().dtype, DataType::I64);
    assert_eq!(graph.output_vars, vec!["best_idx"]);
}

#[test]
fn pooling_chain_resolves() {
    let desc = GraphDesc {
        inputs: vec![Tensor::new("x", vec![1, 3, 8, 8], DataType::F32)],
        initializers: vec![],
        nodes: vec![
            NodeDesc {
                op_type: "MaxPool".into(),
                name: "pool_0".into(),
                attributes: vec![ints("kernel_shape", &[2, 2]), ints("strides", &[2, 2])],
                inputs: vec!["x".into()],
                outputs: vec!["p0".into()],
            },
            NodeDesc {
                op_type: "QuantAvgPool2d".into(),
                name: "pool_1".into(),
                attributes: vec![
                    Attribute::new("kernel", AttributeValue::Int(2)),
                    Attribute::new("stride", AttributeValue::Int(2)),
                    Attribute::new("ibits", AttributeValue::Int(4)),
                    Attribute::new("obits", AttributeValue::Int(4)),
                ],
                inputs: vec!["p0".into()],
                outputs: vec!["p1".into()],
            },
        ],
        outputs: vec!["p1".into()],
    };
    let graph = resolve_graph(&desc).unwrap();
    assert_eq!(graph.tensor("p0").unwrap().dims, vec![1, 3, 4, 4]);
    assert_eq!(graph.tensor("p1").unwrap().dims, vec![1, 3, 2, 2]);

    let mut buf = String::new();
    emit_graph(&graph, &mut buf).unwrap();
    assert!(buf.contains("float curmax = -FLT_MAX;"));
    assert!(buf.contains(">> 2;"));
}

#[test]
fn published_shapes_survive_operator_state_changes() {
    let mut graph = resolve_graph(&classifier_graph()).unwrap();
    let before = graph.tensor("patches").unwrap().dims.clone();

    // Swapping in a differently-configured operator must not touch
    // tensors that were published when the original node resolved.
    let replacement = NodeDesc {
        op_type: "Concat".into(),
        name: "replacement".into(),
        attributes: vec![Attribute::new("axis", AttributeValue::Int(0))],
        inputs: vec!["image".into()],
        outputs: vec!["patches".into()],
    };
    graph.nodes[0].op = Op::parse(&replacement).unwrap();

    assert_eq!(graph.tensor("patches").unwrap().dims, before);
}
