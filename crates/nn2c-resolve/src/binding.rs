//! The resolver-owned binding table: graph-edge name → resolved tensor.
//!
//! Populated strictly in node-declaration order. A node's resolve may
//! only look up names already present; publishing happens exactly once
//! per tensor, and a published tensor's shape and dtype never change.

use std::collections::HashMap;

use nn2c_ir::{BuildError, Tensor};

/// One end of a node's wiring: which generated variable carries the
/// tensor, and what the operator calls it locally in its emitted body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Generated-code variable name, unique across the whole graph.
    pub var: String,
    /// Operator-local name (the parameter name of the node's function).
    pub local: String,
}

/// Name → tensor map plus the ordered list of every tensor the build
/// created, kept for signature/local synthesis by the caller.
#[derive(Debug, Default)]
pub struct BindingTable {
    by_edge: HashMap<String, usize>,
    by_var: HashMap<String, usize>,
    tensors: Vec<Tensor>,
}

impl BindingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph input or initializer under its declared edge
    /// name. The tensor's `name` field must already hold the generated
    /// variable name.
    pub fn seed(&mut self, edge: &str, tensor: Tensor) -> Result<(), BuildError> {
        if self.by_edge.contains_key(edge) {
            return Err(BuildError::DuplicateTensor {
                name: edge.to_string(),
            });
        }
        let idx = self.push_tensor(tensor)?;
        self.by_edge.insert(edge.to_string(), idx);
        Ok(())
    }

    /// Publish a node output. `edge` is absent when the graph declares
    /// fewer output names than the operator produces; the tensor still
    /// needs a backing variable in the generated code.
    pub fn publish(&mut self, edge: Option<&str>, tensor: Tensor) -> Result<(), BuildError> {
        if let Some(edge) = edge {
            if self.by_edge.contains_key(edge) {
                return Err(BuildError::DuplicateTensor {
                    name: edge.to_string(),
                });
            }
            let idx = self.push_tensor(tensor)?;
            self.by_edge.insert(edge.to_string(), idx);
        } else {
            self.push_tensor(tensor)?;
        }
        Ok(())
    }

    fn push_tensor(&mut self, tensor: Tensor) -> Result<usize, BuildError> {
        if self.by_var.contains_key(&tensor.name) {
            return Err(BuildError::DuplicateTensor {
                name: tensor.name.clone(),
            });
        }
        let idx = self.tensors.len();
        self.by_var.insert(tensor.name.clone(), idx);
        self.tensors.push(tensor);
        Ok(idx)
    }

    /// Look up a tensor by graph-edge name.
    pub fn by_edge(&self, edge: &str) -> Option<&Tensor> {
        self.by_edge.get(edge).map(|&i| &self.tensors[i])
    }

    /// Look up a tensor by generated variable name.
    pub fn by_var(&self, var: &str) -> Option<&Tensor> {
        self.by_var.get(var).map(|&i| &self.tensors[i])
    }

    /// Whether a generated variable name is already taken.
    pub fn var_taken(&self, var: &str) -> bool {
        self.by_var.contains_key(var)
    }

    /// Every tensor the build created, in registration order.
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }
}

/// Turn an arbitrary graph name into a valid C identifier.
pub fn sanitize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, 't');
    }
    out
}
