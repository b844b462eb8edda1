//! Descriptor records for a deserialized graph.
//!
//! These types are the validated input boundary: an upstream
//! deserializer hands the core an ordered node list plus the graph's
//! declared inputs and initializers. Producer-before-consumer ordering
//! of the node list is a format guarantee, not something the core
//! re-establishes.

use serde::{Deserialize, Serialize};

use crate::Tensor;

/// A typed attribute value attached to a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeValue {
    /// Scalar integer.
    Int(i64),
    /// Scalar float.
    Float(f32),
    /// String.
    String(String),
    /// List of integers.
    Ints(Vec<i64>),
    /// List of floats.
    Floats(Vec<f32>),
}

impl AttributeValue {
    /// Human-readable name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
        }
    }
}

/// A named attribute on a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name as declared by the producing toolchain.
    pub name: String,
    /// Typed value.
    pub value: AttributeValue,
}

impl Attribute {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One node of the serialized graph: an operator application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDesc {
    /// Operator-kind string (e.g. "MatMul", "Concat").
    pub op_type: String,
    /// Node name, used in diagnostics and generated-function names.
    pub name: String,
    /// Ordered attribute list.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Ordered input tensor-name references.
    pub inputs: Vec<String>,
    /// Ordered output tensor-name references.
    pub outputs: Vec<String>,
}

/// The whole serialized graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDesc {
    /// Declared graph inputs (name, dims, dtype; no payload).
    #[serde(default)]
    pub inputs: Vec<Tensor>,
    /// Initializer tensors with compile-time-known payloads.
    #[serde(default)]
    pub initializers: Vec<Tensor>,
    /// Nodes in declaration order (producers precede consumers).
    pub nodes: Vec<NodeDesc>,
    /// Names of the tensors that are graph outputs.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    #[test]
    fn attribute_type_names() {
        assert_eq!(AttributeValue::Int(1).type_name(), "int");
        assert_eq!(AttributeValue::Float(1.0).type_name(), "float");
        assert_eq!(AttributeValue::String("x".into()).type_name(), "string");
        assert_eq!(AttributeValue::Ints(vec![]).type_name(), "ints");
        assert_eq!(AttributeValue::Floats(vec![]).type_name(), "floats");
    }

    #[test]
    fn graph_desc_json_round_trip() {
        let graph = GraphDesc {
            inputs: vec![Tensor::new("in", vec![2, 3], DataType::F32)],
            initializers: vec![],
            nodes: vec![NodeDesc {
                op_type: "Concat".into(),
                name: "concat_0".into(),
                attributes: vec![Attribute::new("axis", AttributeValue::Int(1))],
                inputs: vec!["in".into()],
                outputs: vec!["out".into()],
            }],
            outputs: vec!["out".into()],
        };

        let json = serde_json::to_string(&graph).unwrap();
        let back: GraphDesc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }

    #[test]
    fn graph_desc_minimal_json() {
        // Only `nodes` is required in the serialized form.
        let graph: GraphDesc = serde_json::from_str(r#"{"nodes": []}"#).unwrap();
        assert!(graph.inputs.is_empty());
        assert!(graph.nodes.is_empty());
    }
}
