pub mod binding;
pub mod config;
pub mod error;
pub mod expr;
pub mod graph;
pub mod group;
pub mod lab;
pub mod node;
pub mod port;
pub mod session;
pub mod simulator;
pub mod telemetry;
pub mod token;
pub mod traits;
pub mod validation;

/// The Alias for serde_json::Value since token values and properties are JSON
pub type NodeValue = serde_json::Value;

use std::any::Any;

/// A helper trait that just provides the `as_any` method.
/// Needed for downcasting a node's logic to its concrete kind.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
