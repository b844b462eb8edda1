//! Assembly of a resolved graph into one self-contained C translation
//! unit.
//!
//! The emitted file has four layers, in order: the two header includes
//! the loop nests rely on, the initializer constant arrays, one static
//! function per node, and the `network` entry point that allocates the
//! intermediate tensors and calls the node functions in declaration
//! order. Output is byte-identical across runs for the same descriptor.

#![warn(missing_docs)]

use std::fmt::Write as _;

use nn2c_ir::{BuildError, GraphDesc, Tensor, TensorData};
use nn2c_resolve::{emit_node, resolve_graph, ResolvedGraph, ResolvedNode, SourceWriter};

/// Compile a graph descriptor into C source text.
pub fn compile(desc: &GraphDesc) -> Result<String, BuildError> {
    let graph = resolve_graph(desc)?;
    log::trace!(
        "emitting {} node(s), {} tensor(s)",
        graph.nodes.len(),
        graph.tensors().len()
    );

    let mut out = String::new();
    out.push_str("#include <float.h>\n");
    out.push_str("#include <stdint.h>\n\n");

    emit_initializers(&graph, &mut out)?;
    for node in &graph.nodes {
        emit_node_function(&graph, node, &mut out)?;
    }
    emit_entry(&graph, &mut out)?;

    Ok(out)
}

/// `[2][3]` for dims `[2, 3]`; scalars get a one-element axis so every
/// tensor stays addressable as a C array.
fn dims_suffix(dims: &[usize]) -> String {
    if dims.is_empty() {
        return "[1]".into();
    }
    let mut s = String::new();
    for d in dims {
        // A zero extent would be rejected upstream; keep the declarator
        // valid regardless.
        let _ = write!(s, "[{}]", (*d).max(1));
    }
    s
}

/// A float rendered as a C literal: always with a decimal point or
/// exponent so the token stays floating-typed.
fn fmt_f32(v: f32) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "FLT_MAX".into() } else { "-FLT_MAX".into() };
    }
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{s}.0")
    }
}

fn emit_initializers(graph: &ResolvedGraph, out: &mut String) -> Result<(), BuildError> {
    for var in &graph.initializer_vars {
        let tensor = graph
            .tensor(var)
            .ok_or_else(|| BuildError::UnknownTensor {
                node: "initializers".into(),
                tensor: var.clone(),
            })?;
        let data = tensor.data.as_ref().ok_or_else(|| BuildError::Unsupported {
            node: "initializers".into(),
            message: format!("initializer '{}' has no compile-time payload", tensor.name),
        })?;
        if data.len() != tensor.elem_count() {
            return Err(BuildError::ShapeMismatch {
                node: "initializers".into(),
                message: format!(
                    "initializer '{}' holds {} element(s) but its dims {:?} need {}",
                    tensor.name,
                    data.len(),
                    tensor.dims,
                    tensor.elem_count()
                ),
            });
        }

        writeln!(
            out,
            "static const {} {}{} = {{",
            tensor.dtype.c_type(),
            tensor.name,
            dims_suffix(&tensor.dims)
        )?;
        // Flat element list; brace elision fills the nested axes.
        let rendered: Vec<String> = match data {
            TensorData::F32(v) => v.iter().map(|&f| fmt_f32(f)).collect(),
            TensorData::I64(v) => v.iter().map(|i| i.to_string()).collect(),
        };
        for chunk in rendered.chunks(8) {
            writeln!(out, "\t{},", chunk.join(", "))?;
        }
        out.push_str("};\n\n");
    }
    Ok(())
}

fn function_name(node: &ResolvedNode) -> String {
    format!("node_{}_{}", node.index, nn2c_resolve::sanitize_ident(&node.name))
}

fn emit_node_function(
    graph: &ResolvedGraph,
    node: &ResolvedNode,
    out: &mut String,
) -> Result<(), BuildError> {
    let mut params = Vec::with_capacity(node.inputs.len() + node.outputs.len());
    for binding in &node.inputs {
        let t = binding_tensor(graph, &node.name, &binding.var)?;
        params.push(format!(
            "const {} {}{}",
            t.dtype.c_type(),
            binding.local,
            dims_suffix(&t.dims)
        ));
    }
    for binding in &node.outputs {
        let t = binding_tensor(graph, &node.name, &binding.var)?;
        params.push(format!(
            "{} {}{}",
            t.dtype.c_type(),
            binding.local,
            dims_suffix(&t.dims)
        ));
    }

    writeln!(
        out,
        "static void {}( {} ) {{",
        function_name(node),
        params.join(", ")
    )?;
    emit_node(graph, node, &mut SourceWriter::new(out))?;
    out.push_str("}\n\n");
    Ok(())
}

fn emit_entry(graph: &ResolvedGraph, out: &mut String) -> Result<(), BuildError> {
    let mut params = Vec::new();
    for var in &graph.input_vars {
        let t = binding_tensor(graph, "network", var)?;
        params.push(format!(
            "const {} {}{}",
            t.dtype.c_type(),
            t.name,
            dims_suffix(&t.dims)
        ));
    }
    for var in &graph.output_vars {
        let t = binding_tensor(graph, "network", var)?;
        params.push(format!(
            "{} {}{}",
            t.dtype.c_type(),
            t.name,
            dims_suffix(&t.dims)
        ));
    }
    writeln!(out, "void network( {} ) {{", params.join(", "))?;

    // Intermediates: node outputs that are not graph outputs. Static so
    // large activations don't land on the caller's stack.
    for node in &graph.nodes {
        for binding in &node.outputs {
            if graph.output_vars.contains(&binding.var) {
                continue;
            }
            let t = binding_tensor(graph, &node.name, &binding.var)?;
            writeln!(
                out,
                "\tstatic {} {}{};",
                t.dtype.c_type(),
                t.name,
                dims_suffix(&t.dims)
            )?;
        }
    }

    for node in &graph.nodes {
        let args: Vec<&str> = node
            .inputs
            .iter()
            .chain(&node.outputs)
            .map(|b| b.var.as_str())
            .collect();
        writeln!(out, "\t{}( {} );", function_name(node), args.join(", "))?;
    }
    out.push_str("}\n");
    Ok(())
}

fn binding_tensor<'g>(
    graph: &'g ResolvedGraph,
    node: &str,
    var: &str,
) -> Result<&'g Tensor, BuildError> {
    graph.tensor(var).ok_or_else(|| BuildError::UnknownTensor {
        node: node.to_string(),
        tensor: var.to_string(),
    })
}
