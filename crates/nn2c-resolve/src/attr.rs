//! Typed attribute decoding.
//!
//! Each operator declares an expectation per attribute name (type,
//! required/optional, default). Type mismatches and missing required
//! attributes are fatal; attribute names the operator never asks for are
//! logged and ignored, so graphs from newer producing toolchains keep
//! compiling.

use nn2c_ir::{Attribute, AttributeValue, BuildError};

/// Decoder over a node's raw attribute list.
pub struct Attributes<'a> {
    node: &'a str,
    attrs: &'a [Attribute],
    used: Vec<&'a str>,
}

impl<'a> Attributes<'a> {
    /// Wrap the attribute list of the named node.
    pub fn new(node: &'a str, attrs: &'a [Attribute]) -> Self {
        Self {
            node,
            attrs,
            used: Vec::new(),
        }
    }

    fn find(&mut self, name: &str) -> Option<&'a AttributeValue> {
        let attr = self.attrs.iter().find(|a| a.name == name)?;
        if !self.used.contains(&attr.name.as_str()) {
            self.used.push(&attr.name);
        }
        Some(&attr.value)
    }

    fn mismatch(&self, name: &str, expected: &'static str, found: &AttributeValue) -> BuildError {
        BuildError::AttributeType {
            node: self.node.to_string(),
            attribute: name.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    fn missing(&self, name: &str) -> BuildError {
        BuildError::MissingAttribute {
            node: self.node.to_string(),
            attribute: name.to_string(),
        }
    }

    /// Optional scalar int.
    pub fn int(&mut self, name: &str) -> Result<Option<i64>, BuildError> {
        match self.find(name) {
            Some(AttributeValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(self.mismatch(name, "int", other)),
            None => Ok(None),
        }
    }

    /// Scalar int with a default.
    pub fn int_or(&mut self, name: &str, default: i64) -> Result<i64, BuildError> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    /// Required scalar int.
    pub fn require_int(&mut self, name: &str) -> Result<i64, BuildError> {
        self.int(name)?.ok_or_else(|| self.missing(name))
    }

    /// Optional scalar float.
    pub fn float(&mut self, name: &str) -> Result<Option<f32>, BuildError> {
        match self.find(name) {
            Some(AttributeValue::Float(v)) => Ok(Some(*v)),
            Some(other) => Err(self.mismatch(name, "float", other)),
            None => Ok(None),
        }
    }

    /// Scalar float with a default.
    pub fn float_or(&mut self, name: &str, default: f32) -> Result<f32, BuildError> {
        Ok(self.float(name)?.unwrap_or(default))
    }

    /// Optional string.
    pub fn string(&mut self, name: &str) -> Result<Option<&'a str>, BuildError> {
        match self.find(name) {
            Some(AttributeValue::String(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(self.mismatch(name, "string", other)),
            None => Ok(None),
        }
    }

    /// String with a default.
    pub fn string_or(&mut self, name: &str, default: &'a str) -> Result<&'a str, BuildError> {
        Ok(self.string(name)?.unwrap_or(default))
    }

    /// Optional int list.
    pub fn ints(&mut self, name: &str) -> Result<Option<&'a [i64]>, BuildError> {
        match self.find(name) {
            Some(AttributeValue::Ints(v)) => Ok(Some(v.as_slice())),
            Some(other) => Err(self.mismatch(name, "ints", other)),
            None => Ok(None),
        }
    }

    /// Required int list.
    pub fn require_ints(&mut self, name: &str) -> Result<&'a [i64], BuildError> {
        self.ints(name)?.ok_or_else(|| self.missing(name))
    }

    /// Warn about attribute names the operator never consumed.
    /// Non-fatal: forward-compatible toolchains may attach extras.
    pub fn warn_unused(&self) {
        for attr in self.attrs {
            if !self.used.contains(&attr.name.as_str()) {
                log::warn!(
                    "node '{}': ignoring unknown attribute '{}'",
                    self.node,
                    attr.name
                );
            }
        }
    }
}
