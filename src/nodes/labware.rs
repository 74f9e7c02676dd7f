//! Nodes that act on physical labware through the [`Laboratory`](crate::Laboratory).

use super::inspect::describe;
use super::numeric::{integer, scalar};
use super::primitive::LIQUID_CLASSES;
use super::string_property;
use crate::core::binding::PortContext;
use crate::core::error::ExecutionError;
use crate::core::lab::WELLS;
use crate::core::node::{Activation, ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use serde_json::json;

/// Labware the serving node can hand out, by display name.
pub const LABWARE: [(&str, Trait); 2] = [("Plate (96-well)", Trait::PLATE96), ("Tube (5ml)", Trait::TUBE5)];

fn labware_trait(name: &str) -> Option<Trait> {
    LABWARE.iter().find(|(n, _)| *n == name).map(|(_, t)| t.clone())
}

fn where_properties() -> Properties {
    Properties::from([("where".to_string(), json!(""))])
}

/// Brings new labware into play. The kind is chosen by the `value` property.
#[derive(Clone)]
pub struct ServeLabware;

impl NodeLogic for ServeLabware {
    fn kind(&self) -> &'static str {
        "Serve"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("value".to_string(), json!(LABWARE[0].0))])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        let name = string_property(properties, "value", "");
        let traits = labware_trait(&name).unwrap_or(Trait::LABWARE);
        PortSchema::new().output(OutputSpec::new("value", traits))
    }

    fn activation(&self) -> Activation {
        Activation::Forced
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        let name = string_property(ctx.properties(), "value", "");
        match labware_trait(&name) {
            Some(_) => Ok(()),
            None => Err(format!("Unknown labware [{}]", name)),
        }
    }

    fn core_execute(&self, _inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let traits = ctx.output_trait("value")?;
        let token = ctx.lab().serve_labware(&traits)?;
        Ok(TokenMap::from([("value".to_string(), token)]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Stores labware at `where`, or disposes of it when `where` is empty.
#[derive(Clone)]
pub struct StoreLabware;

impl NodeLogic for StoreLabware {
    fn kind(&self) -> &'static str {
        "StoreLabware"
    }

    fn default_properties(&self) -> Properties {
        where_properties()
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().input(InputSpec::new("in1", Trait::LABWARE).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let token = inputs.require("in1")?;
        ctx.set_property("in1", describe(token));
        let location = ctx
            .property("where")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if location.is_empty() {
            ctx.lab().dispose(token)?;
        } else {
            ctx.lab().store(token, &location)?;
        }
        Ok(TokenMap::new())
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct StoreArtifacts;

impl NodeLogic for StoreArtifacts {
    fn kind(&self) -> &'static str {
        "StoreArtifacts"
    }

    fn default_properties(&self) -> Properties {
        where_properties()
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new().input(InputSpec::new("in1", Trait::any(Trait::DATA)))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let token = inputs.require("in1")?;
        ctx.set_property("in1", describe(token));
        let location = ctx
            .property("where")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        ctx.lab().save_artifacts(token, &location)?;
        Ok(TokenMap::new())
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Dispenses one volume per well from a channel, given by index or by liquid
/// class.
#[derive(Clone)]
pub struct DispenseLiquid96Wells;

impl DispenseLiquid96Wells {
    fn channel(inputs: &ResolvedInputs) -> Result<i64, ExecutionError> {
        let token = inputs.require("channel")?;
        if token.traits == Trait::LIQUID_CLASS {
            let name = token.value.as_str().unwrap_or_default();
            return LIQUID_CLASSES
                .iter()
                .position(|c| *c == name)
                .map(|i| i as i64)
                .ok_or_else(|| ExecutionError::InvalidValue {
                    port: "channel".to_string(),
                    reason: format!("unknown liquid class {}", token.value),
                });
        }
        integer("channel", &token.value)
    }

    /// Rounds to whole volumes and pads with zeros or truncates to one per well.
    fn volumes(inputs: &ResolvedInputs) -> Result<Vec<i64>, ExecutionError> {
        let value = inputs.value("volume")?;
        let items = value.as_array().ok_or_else(|| ExecutionError::NotASequence {
            port: "volume".to_string(),
            value: value.to_string(),
        })?;
        let mut volumes = items
            .iter()
            .map(|v| scalar("volume", v).map(|x| x.round() as i64))
            .collect::<Result<Vec<_>, _>>()?;
        volumes.resize(WELLS, 0);
        Ok(volumes)
    }
}

impl NodeLogic for DispenseLiquid96Wells {
    fn kind(&self) -> &'static str {
        "DispenseLiquid96Wells"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::PLATE96).expand())
            .input(
                InputSpec::new("channel", Trait::INTEGER.or(Trait::LIQUID_CLASS))
                    .free()
                    .expand(),
            )
            .input(InputSpec::new("volume", Trait::array(Trait::real())).expand())
            .default_value("channel", 0, Trait::INTEGER)
            .output(OutputSpec::new("out1", Trait::PLATE96).expand().expression("in1"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let plate = inputs.require("in1")?;
        let channel = Self::channel(inputs)?;
        let volumes = Self::volumes(inputs)?;
        ctx.lab().dispense(plate, &volumes, channel)?;
        Ok(TokenMap::from([ctx.emit("out1", plate.value.clone())?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Reads absorbance at three wavelengths and passes the plate on.
#[derive(Clone)]
pub struct ReadAbsorbance3Colors;

impl NodeLogic for ReadAbsorbance3Colors {
    fn kind(&self) -> &'static str {
        "ReadAbsorbance3Colors"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::PLATE96).expand())
            .output(OutputSpec::new("out1", Trait::PLATE96).expand().expression("in1"))
            .output(OutputSpec::new("value", Trait::spread(Trait::array(Trait::FLOAT))).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let plate = inputs.require("in1")?;
        let reading = ctx.lab().read_absorbance(plate)?;
        Ok(TokenMap::from([
            ctx.emit("out1", plate.value.clone())?,
            ctx.emit("value", reading.value)?,
        ]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}
