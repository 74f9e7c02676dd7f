//! Remote client/server pairs. A client's `remote` output is not wired by an
//! edge: the scheduler delivers it to every server sharing the client's
//! `address`.

use super::string_property;
use crate::core::error::ExecutionError;
use crate::core::node::{ExecContext, NodeLogic, NodeRole, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use serde_json::json;

const DEFAULT_ADDRESS: &str = "default";

fn address_properties() -> Properties {
    Properties::from([("address".to_string(), json!(DEFAULT_ADDRESS))])
}

#[derive(Clone)]
pub struct Client;

impl NodeLogic for Client {
    fn kind(&self) -> &'static str {
        "Client"
    }

    fn default_properties(&self) -> Properties {
        address_properties()
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::OBJECT).optional())
            .output(
                OutputSpec::new("remote", Trait::OBJECT)
                    .optional()
                    .io()
                    .expression("in1"),
            )
    }

    fn role(&self, properties: &Properties) -> NodeRole {
        NodeRole::Client {
            address: string_property(properties, "address", DEFAULT_ADDRESS),
        }
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = inputs.value("in1")?.clone();
        Ok(TokenMap::from([ctx.emit("remote", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Server;

impl NodeLogic for Server {
    fn kind(&self) -> &'static str {
        "Server"
    }

    fn default_properties(&self) -> Properties {
        address_properties()
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("remote", Trait::OBJECT).io())
            .output(OutputSpec::new("out1", Trait::OBJECT).expression("remote"))
    }

    fn role(&self, properties: &Properties) -> NodeRole {
        NodeRole::Server {
            address: string_property(properties, "address", DEFAULT_ADDRESS),
        }
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = inputs.value("remote")?.clone();
        Ok(TokenMap::from([ctx.emit("out1", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}
