#![warn(missing_docs)]
//! Tensor data model and graph descriptors for the nn2c compiler.
//!
//! nn2c compiles a static neural-network graph into a standalone,
//! shape-specialized C program. This crate holds the leaf types shared
//! by every stage: element datatypes, the [`Tensor`] value type, the
//! node/attribute descriptor records handed over by the (out-of-scope)
//! graph deserializer, and the single fatal [`BuildError`] type.

mod desc;
mod dtype;
mod error;
mod tensor;

pub use desc::{Attribute, AttributeValue, GraphDesc, NodeDesc};
pub use dtype::DataType;
pub use error::BuildError;
pub use tensor::{Tensor, TensorData};
