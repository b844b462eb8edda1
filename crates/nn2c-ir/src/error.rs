//! The fatal build-error type shared by every compilation stage.
//!
//! Compilation is all-or-nothing: the first violated precondition aborts
//! the whole build. Every variant names the offending node so the error
//! can be traced back to the input graph.

/// Errors that abort a compilation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A node referenced a tensor name that no earlier node (or graph
    /// input/initializer) produced.
    #[error("node '{node}': input tensor '{tensor}' is not defined at this point in the graph")]
    UnknownTensor {
        /// Offending node name.
        node: String,
        /// The unresolved tensor reference.
        tensor: String,
    },

    /// Two graph tensors were declared under the same name.
    #[error("tensor name '{name}' is declared more than once")]
    DuplicateTensor {
        /// The colliding name.
        name: String,
    },

    /// The graph names an operator kind outside the supported catalogue.
    #[error("node '{node}': unknown operator '{op_type}'")]
    UnknownOperator {
        /// Offending node name.
        node: String,
        /// The unrecognized operator-kind string.
        op_type: String,
    },

    /// A required attribute was absent.
    #[error("node '{node}': missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Offending node name.
        node: String,
        /// Name of the missing attribute.
        attribute: String,
    },

    /// An attribute was present but with the wrong value type.
    #[error("node '{node}': attribute '{attribute}' has type {found}, expected {expected}")]
    AttributeType {
        /// Offending node name.
        node: String,
        /// Name of the mistyped attribute.
        attribute: String,
        /// Declared expectation.
        expected: &'static str,
        /// What the graph actually carried.
        found: &'static str,
    },

    /// Input shapes violate the operator's shape rule.
    #[error("node '{node}': {message}")]
    ShapeMismatch {
        /// Offending node name.
        node: String,
        /// Human-readable cause.
        message: String,
    },

    /// A legal but unimplemented operator configuration.
    #[error("node '{node}': unsupported configuration: {message}")]
    Unsupported {
        /// Offending node name.
        node: String,
        /// Human-readable cause.
        message: String,
    },

    /// The output sink failed while emitting code.
    #[error("failed to write generated code")]
    Sink(#[from] std::fmt::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_node() {
        let e = BuildError::ShapeMismatch {
            node: "matmul_3".into(),
            message: "inner dimensions 3 and 4 don't match".into(),
        };
        let msg = format!("{e}");
        assert!(msg.contains("matmul_3"));
        assert!(msg.contains("inner dimensions"));

        let e = BuildError::AttributeType {
            node: "concat_0".into(),
            attribute: "axis".into(),
            expected: "int",
            found: "string",
        };
        assert_eq!(
            format!("{e}"),
            "node 'concat_0': attribute 'axis' has type string, expected int"
        );
    }

    #[test]
    fn unknown_tensor_message() {
        let e = BuildError::UnknownTensor {
            node: "pool_1".into(),
            tensor: "ghost".into(),
        };
        assert!(format!("{e}").contains("'ghost'"));
    }
}
