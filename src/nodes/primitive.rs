//! Constant sources. They hold their value in the `value` property and only
//! fire on a forced activation.

use super::numeric::{integer, scalar};
use crate::core::binding::PortContext;
use crate::core::error::ExecutionError;
use crate::core::node::{Activation, ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use serde_json::json;

/// Channels of the liquid handler, by liquid class name.
pub const LIQUID_CLASSES: [&str; 3] = ["Pure Water", "Red Water", "Blue Water"];

fn value_property<'a>(ctx: &'a ExecContext<'_>) -> Result<&'a serde_json::Value, ExecutionError> {
    ctx.property("value").ok_or_else(|| ExecutionError::InvalidValue {
        port: "value".to_string(),
        reason: "property is not set".to_string(),
    })
}

#[derive(Clone)]
pub struct IntegerNode;

impl NodeLogic for IntegerNode {
    fn kind(&self) -> &'static str {
        "Integer"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("value".to_string(), json!(0))])
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().output(OutputSpec::new("value", Trait::INTEGER))
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = integer("value", value_property(ctx)?)?;
        Ok(TokenMap::from([ctx.emit("value", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct FloatNode;

impl NodeLogic for FloatNode {
    fn kind(&self) -> &'static str {
        "Float"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("value".to_string(), json!(0.0))])
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().output(OutputSpec::new("value", Trait::FLOAT))
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = scalar("value", value_property(ctx)?)?;
        Ok(TokenMap::from([ctx.emit("value", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct BooleanNode;

impl NodeLogic for BooleanNode {
    fn kind(&self) -> &'static str {
        "Boolean"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("value".to_string(), json!(true))])
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().output(OutputSpec::new("out", Trait::BOOLEAN))
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = value_property(ctx)?
            .as_bool()
            .ok_or_else(|| ExecutionError::InvalidValue {
                port: "out".to_string(),
                reason: "value is not a boolean".to_string(),
            })?;
        Ok(TokenMap::from([ctx.emit("out", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// One of [`LIQUID_CLASSES`].
#[derive(Clone)]
pub struct LiquidClassNode;

impl NodeLogic for LiquidClassNode {
    fn kind(&self) -> &'static str {
        "LiquidClass"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("value".to_string(), json!(LIQUID_CLASSES[0]))])
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().output(OutputSpec::new("value", Trait::LIQUID_CLASS))
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        let value = super::string_property(ctx.properties(), "value", "");
        if LIQUID_CLASSES.contains(&value.as_str()) {
            Ok(())
        } else {
            Err(format!("Unknown liquid class [{}]", value))
        }
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = value_property(ctx)?.clone();
        Ok(TokenMap::from([ctx.emit("value", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lab::SimulatedLab;
    use crate::core::node::{Node, TraitPlan};
    use std::collections::HashMap;

    fn plan(port: &str, traits: Trait) -> TraitPlan {
        TraitPlan {
            outputs: HashMap::from([(port.to_string(), traits.clone())]),
            elements: HashMap::from([(port.to_string(), traits)]),
            ..TraitPlan::default()
        }
    }

    #[test]
    fn test_integer_emits_property() {
        let mut node = Node::new("n", IntegerNode);
        node.set_property("value", 42);
        let lab = SimulatedLab::new();
        let out = node
            .execute(TokenMap::new(), &plan("value", Trait::INTEGER), &lab)
            .unwrap();
        assert_eq!(out.outputs["value"].value, json!(42));
    }

    #[test]
    fn test_float_accepts_integers() {
        let mut node = Node::new("f", FloatNode);
        node.set_property("value", 2);
        let lab = SimulatedLab::new();
        let out = node
            .execute(TokenMap::new(), &plan("value", Trait::FLOAT), &lab)
            .unwrap();
        assert_eq!(out.outputs["value"].value, json!(2.0));
    }

    #[test]
    fn test_boolean_rejects_non_boolean() {
        let mut node = Node::new("b", BooleanNode);
        node.set_property("value", "yes");
        let lab = SimulatedLab::new();
        assert!(matches!(
            node.execute(TokenMap::new(), &plan("out", Trait::BOOLEAN), &lab),
            Err(ExecutionError::InvalidValue { .. })
        ));
    }
}
