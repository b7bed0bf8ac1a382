//! Helpers for extracting values from KDL nodes.

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

/// Non-negative integer property. Present but negative or non-integer values
/// are rejected rather than ignored.
pub(crate) fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let invalid = || ConfigError::InvalidValue {
        field: format!("{}.{}", node.name().value(), name),
        message: format!("expected a non-negative integer, got {}", value),
    };
    let n = value.as_integer().ok_or_else(invalid)?;
    u64::try_from(n).map(Some).map_err(|_| invalid())
}

/// A string given either as `name="value"` or as the node's first argument.
pub(crate) fn get_string_prop_or_arg(node: &KdlNode, name: &str) -> Option<String> {
    get_string_prop(node, name).or_else(|| get_first_string_arg(node))
}
