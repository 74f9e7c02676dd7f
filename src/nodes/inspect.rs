//! Sinks and taps that expose token contents through node properties.

use crate::core::error::ExecutionError;
use crate::core::node::{ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::{Token, TokenMap};
use crate::core::traits::Trait;
use serde_json::json;

pub(crate) fn describe(token: &Token) -> String {
    json!({"value": token.value, "traits": token.traits.to_string()}).to_string()
}

/// Shows the last data token it received in its `in1` property.
#[derive(Clone)]
pub struct Display;

impl NodeLogic for Display {
    fn kind(&self) -> &'static str {
        "Display"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().input(InputSpec::new("in1", Trait::any(Trait::DATA)))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let token = inputs.require("in1")?;
        log::info!("{}: {}", ctx.node(), describe(token));
        ctx.set_property("in1", describe(token));
        Ok(TokenMap::new())
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Passes objects through unchanged, recording each one in its `in1`
/// property.
#[derive(Clone)]
pub struct Inspect;

impl NodeLogic for Inspect {
    fn kind(&self) -> &'static str {
        "Inspect"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::any(Trait::OBJECT)).optional())
            .output(
                OutputSpec::new("out1", Trait::any(Trait::OBJECT))
                    .optional()
                    .expression("in1"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let token = inputs.require("in1")?;
        ctx.set_property("in1", describe(token));
        Ok(TokenMap::from([ctx.emit("out1", token.value.clone())?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}
