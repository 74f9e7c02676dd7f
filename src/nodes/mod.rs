//! The built-in node catalogue.
//!
//! Every kind implements [`NodeLogic`](crate::NodeLogic): it declares its ports
//! from its properties and computes one set of element-level outputs in
//! `core_execute`. Spread expansion, optional handling and the trait contract
//! are applied around it by the engine.

pub mod arithmetic;
pub mod array;
pub mod flow;
pub mod inspect;
pub mod labware;
pub mod logical;
pub mod primitive;
pub mod registry;
pub mod remote;

mod numeric;

use crate::core::NodeValue;
use crate::core::node::Properties;

/// A non-negative count stored in a property, e.g. `ninputs`.
pub(crate) fn count_property(properties: &Properties, key: &str, default: usize) -> usize {
    properties
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .map(|n| n as usize)
        .unwrap_or(default)
}

pub(crate) fn string_property(properties: &Properties, key: &str, default: &str) -> String {
    properties
        .get(key)
        .and_then(NodeValue::as_str)
        .unwrap_or(default)
        .to_string()
}
