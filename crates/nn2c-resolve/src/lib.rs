//! Operator resolution for the nn2c compiler.
//!
//! Takes a deserialized [`GraphDesc`](nn2c_ir::GraphDesc) and produces a
//! [`ResolvedGraph`]: every edge bound to a tensor with fully known
//! shape and dtype, every node carrying a typed operator ready to emit
//! its loop nest. Resolution is a single pass in node-declaration order;
//! the serialized format guarantees producers precede consumers, so no
//! fixpoint iteration is needed.
//!
//! Emission is deliberately separate from resolution: a resolved graph
//! can be emitted any number of times and always yields byte-identical
//! text.

#![warn(missing_docs)]

pub mod attr;
pub mod binding;
pub mod ops;
pub mod spatial;
pub mod writer;

pub use binding::{sanitize_ident, Binding, BindingTable};
pub use ops::{Op, OutputSpec, Resolution};
pub use writer::SourceWriter;

use std::fmt;

use nn2c_ir::{BuildError, GraphDesc, Tensor};

/// A graph node after resolution: its typed operator plus the wiring of
/// graph-wide variables to operator-local names.
#[derive(Debug)]
pub struct ResolvedNode {
    /// Node name from the descriptor, used in diagnostics and generated
    /// function names.
    pub name: String,
    /// Position in the graph's node list.
    pub index: usize,
    /// The typed operator, carrying its post-resolve strategy state.
    pub op: Op,
    /// Input wiring, in the node's declared input order.
    pub inputs: Vec<Binding>,
    /// Output wiring, in the operator's declared output order.
    pub outputs: Vec<Binding>,
}

/// A fully resolved graph: nodes ready to emit, and the binding table
/// holding every tensor the build created.
#[derive(Debug)]
pub struct ResolvedGraph {
    /// Nodes in declaration order.
    pub nodes: Vec<ResolvedNode>,
    /// Generated-variable names of the graph inputs, in declaration order.
    pub input_vars: Vec<String>,
    /// Generated-variable names of the initializers, in declaration order.
    pub initializer_vars: Vec<String>,
    /// Generated-variable names of the graph outputs, in declaration order.
    pub output_vars: Vec<String>,
    table: BindingTable,
}

impl ResolvedGraph {
    /// The tensor behind a generated-variable name.
    pub fn tensor(&self, var: &str) -> Option<&Tensor> {
        self.table.by_var(var)
    }

    /// Every tensor the build created, in registration order: inputs,
    /// then initializers, then node outputs as they were resolved.
    pub fn tensors(&self) -> &[Tensor] {
        self.table.tensors()
    }
}

/// Resolve a graph descriptor into emission-ready form.
///
/// Seeds the binding table with the declared inputs and initializers,
/// then walks the node list once: parse the operator, look up its input
/// tensors (an unseen name is fatal), run its resolve, and publish its
/// outputs. Shapes are never revisited after publication.
pub fn resolve_graph(desc: &GraphDesc) -> Result<ResolvedGraph, BuildError> {
    let mut table = BindingTable::new();
    let mut input_vars = Vec::with_capacity(desc.inputs.len());
    let mut initializer_vars = Vec::with_capacity(desc.initializers.len());

    for input in &desc.inputs {
        check_dims("graph inputs", &input.name, &input.dims)?;
        let var = unique_var(&table, &sanitize_ident(&input.name));
        let mut tensor = input.clone();
        tensor.name = var.clone();
        table.seed(&input.name, tensor)?;
        input_vars.push(var);
    }
    for init in &desc.initializers {
        check_dims("initializers", &init.name, &init.dims)?;
        let var = unique_var(&table, &sanitize_ident(&init.name));
        let mut tensor = init.clone();
        tensor.name = var.clone();
        table.seed(&init.name, tensor)?;
        initializer_vars.push(var);
    }

    let mut nodes = Vec::with_capacity(desc.nodes.len());
    for (index, node) in desc.nodes.iter().enumerate() {
        let mut op = Op::parse(node)?;
        log::trace!("node '{}': resolving {}", node.name, op.kind());

        let input_tensors: Vec<Tensor> = node
            .inputs
            .iter()
            .map(|edge| {
                table
                    .by_edge(edge)
                    .cloned()
                    .ok_or_else(|| BuildError::UnknownTensor {
                        node: node.name.clone(),
                        tensor: edge.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;
        let input_refs: Vec<&Tensor> = input_tensors.iter().collect();

        let resolution = op.resolve(&node.name, &input_refs)?;

        let inputs = input_tensors
            .iter()
            .zip(&resolution.input_locals)
            .map(|(tensor, local)| Binding {
                var: tensor.name.clone(),
                local: local.clone(),
            })
            .collect();

        if node.outputs.len() > resolution.outputs.len() {
            log::warn!(
                "node '{}': {} declares {} outputs but produces {}",
                node.name,
                op.kind(),
                node.outputs.len(),
                resolution.outputs.len()
            );
        }
        let mut outputs = Vec::with_capacity(resolution.outputs.len());
        for (i, spec) in resolution.outputs.iter().enumerate() {
            let edge = node.outputs.get(i).map(String::as_str);
            let base = match edge {
                Some(edge) => sanitize_ident(edge),
                None => format!("node{}_{}", index, spec.local),
            };
            let var = unique_var(&table, &base);
            check_dims(&node.name, &var, &spec.dims)?;
            let tensor = Tensor::new(var.clone(), spec.dims.clone(), spec.dtype);
            table.publish(edge, tensor)?;
            outputs.push(Binding {
                var,
                local: spec.local.clone(),
            });
        }

        nodes.push(ResolvedNode {
            name: node.name.clone(),
            index,
            op,
            inputs,
            outputs,
        });
    }

    let output_vars = desc
        .outputs
        .iter()
        .map(|edge| {
            table
                .by_edge(edge)
                .map(|t| t.name.clone())
                .ok_or_else(|| BuildError::UnknownTensor {
                    node: "graph outputs".into(),
                    tensor: edge.clone(),
                })
        })
        .collect::<Result<_, _>>()?;

    Ok(ResolvedGraph {
        nodes,
        input_vars,
        initializer_vars,
        output_vars,
        table,
    })
}

/// Emit one node's loop-nest body into the writer. The body references
/// tensors by their operator-local names; the caller supplies the
/// surrounding function whose parameters carry those names.
pub fn emit_node(
    graph: &ResolvedGraph,
    node: &ResolvedNode,
    w: &mut SourceWriter<'_>,
) -> Result<(), BuildError> {
    let inputs = bound_tensors(graph, &node.name, &node.inputs)?;
    let outputs = bound_tensors(graph, &node.name, &node.outputs)?;
    node.op.emit(&node.name, &inputs, &outputs, w)
}

/// Emit every node's body into one sink, in graph order. The result is
/// the bare concatenation of the node blocks; callers wanting per-node
/// functions use [`emit_node`] directly.
pub fn emit_graph(graph: &ResolvedGraph, out: &mut dyn fmt::Write) -> Result<(), BuildError> {
    for node in &graph.nodes {
        emit_node(graph, node, &mut SourceWriter::new(out))?;
    }
    Ok(())
}

fn bound_tensors<'g>(
    graph: &'g ResolvedGraph,
    node: &str,
    bindings: &[Binding],
) -> Result<Vec<&'g Tensor>, BuildError> {
    bindings
        .iter()
        .map(|b| {
            graph.tensor(&b.var).ok_or_else(|| BuildError::UnknownTensor {
                node: node.to_string(),
                tensor: b.var.clone(),
            })
        })
        .collect()
}

/// Every tensor entering the build must stay addressable: the product
/// of its dims (counting zero extents as 1, so axis-pitch suffixes are
/// covered too) has to fit in i64 for the span and offset arithmetic
/// the emitters bake into generated code.
fn check_dims(owner: &str, name: &str, dims: &[usize]) -> Result<(), BuildError> {
    let span = dims
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d.max(1) as u64));
    match span {
        Some(s) if s <= i64::MAX as u64 => Ok(()),
        _ => Err(BuildError::ShapeMismatch {
            node: owner.to_string(),
            message: format!("tensor '{name}' has dims {dims:?} whose extent is out of range"),
        }),
    }
}

fn unique_var(table: &BindingTable, base: &str) -> String {
    if !table.var_taken(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !table.var_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
