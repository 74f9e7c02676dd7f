//! Nested graphs. A group node owns a subgraph whose boundary nodes mirror
//! the group's ports; the scheduler moves tokens across the boundary.

use crate::core::binding::PortContext;
use crate::core::error::{ExecutionError, TraitError};
use crate::core::node::{
    Activation, ExecContext, NodeLogic, NodeRole, Properties, ResolvedInputs,
};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use serde_json::json;

fn names(properties: &Properties, key: &str) -> Vec<String> {
    properties
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn port_property(properties: &Properties) -> String {
    properties
        .get("port")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Number of in/out port pairs of a [`ForEachNode`], clamped to `1..=10`.
fn port_pairs(properties: &Properties) -> usize {
    properties
        .get("ninputs")
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .map_or(1, |n| n.clamp(1, 10) as usize)
}

fn not_executable(kind: &str) -> ExecutionError {
    ExecutionError::Failed(format!("{} nodes are driven by the scheduler", kind))
}

/// A node owning a subgraph. Its ports come from the `inputs` and `outputs`
/// properties.
#[derive(Clone)]
pub struct SubgraphNode;

impl NodeLogic for SubgraphNode {
    fn kind(&self) -> &'static str {
        "Subgraph"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([
            ("inputs".to_string(), json!([])),
            ("outputs".to_string(), json!([])),
        ])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        let mut schema = PortSchema::new();
        for name in names(properties, "inputs") {
            schema = schema.input(InputSpec::new(name, Trait::any(Trait::ENTITY)).passthrough());
        }
        for name in names(properties, "outputs") {
            schema = schema.output(OutputSpec::new(name, Trait::any(Trait::ENTITY)).passthrough());
        }
        schema
    }

    fn role(&self, _properties: &Properties) -> NodeRole {
        NodeRole::Group
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, _ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        Err(not_executable(self.kind()))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// A group whose body runs once per input set and hands each item on:
/// `out<i>` carries the trait of `in<i>`. The number of pairs follows the
/// `ninputs` property.
#[derive(Clone)]
pub struct ForEachNode;

impl NodeLogic for ForEachNode {
    fn kind(&self) -> &'static str {
        "ForEach"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("ninputs".to_string(), json!(1))])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        let pairs = port_pairs(properties);
        let mut schema = PortSchema::new();
        for i in 1..=pairs {
            schema = schema.input(InputSpec::new(format!("in{}", i), Trait::any(Trait::ENTITY)).passthrough());
        }
        for i in 1..=pairs {
            schema = schema.output(OutputSpec::new(format!("out{}", i), Trait::any(Trait::ENTITY)).passthrough());
        }
        schema
    }

    fn role(&self, _properties: &Properties) -> NodeRole {
        NodeRole::Group
    }

    fn resolve_output(&self, port: &str, ctx: &PortContext<'_>) -> Option<Result<Trait, TraitError>> {
        let input = port.strip_prefix("out").map(|i| format!("in{}", i))?;
        Some(ctx.input_trait(&input))
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, _ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        Err(not_executable(self.kind()))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Inside a subgraph: emits what the group received on `port`.
#[derive(Clone)]
pub struct GraphInputNode;

impl NodeLogic for GraphInputNode {
    fn kind(&self) -> &'static str {
        "GraphInput"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().output(OutputSpec::new("value", Trait::any(Trait::ENTITY)).passthrough())
    }

    fn role(&self, properties: &Properties) -> NodeRole {
        NodeRole::GraphInput {
            port: port_property(properties),
        }
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, _ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        Err(not_executable(self.kind()))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Inside a subgraph: collects what the group emits on `port`.
#[derive(Clone)]
pub struct GraphOutputNode;

impl NodeLogic for GraphOutputNode {
    fn kind(&self) -> &'static str {
        "GraphOutput"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().input(InputSpec::new("value", Trait::any(Trait::ENTITY)).passthrough())
    }

    fn role(&self, properties: &Properties) -> NodeRole {
        NodeRole::GraphOutput {
            port: port_property(properties),
        }
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, _ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        Err(not_executable(self.kind()))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}
