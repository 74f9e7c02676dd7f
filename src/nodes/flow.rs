//! Nodes that reshape the flow of tokens rather than compute on them:
//! gathering into spreads, optional branching, and struct packing.

use super::count_property;
use crate::core::NodeValue;
use crate::core::binding::PortContext;
use crate::core::error::{ExecutionError, TraitError};
use crate::core::node::{ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::{Token, TokenMap};
use crate::core::traits::Trait;
use crate::core::validation::check_same_traits;
use serde_json::json;

fn numbered(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
}

fn boolean(inputs: &ResolvedInputs, port: &str) -> Result<bool, ExecutionError> {
    let value = inputs.value(port)?;
    value.as_bool().ok_or_else(|| ExecutionError::InvalidValue {
        port: port.to_string(),
        reason: format!("{} is not a boolean", value),
    })
}

/// Gathers `in1..inN` into one spread. Shared by the data and object kinds.
fn gather_schema(properties: &Properties, default: usize, element: Trait) -> PortSchema {
    let n = count_property(properties, "ninputs", default).max(1);
    let mut schema = PortSchema::new();
    for name in numbered("in", n) {
        schema = schema.input(InputSpec::new(name, Trait::any(element.clone())));
    }
    schema.output(
        OutputSpec::new("value", Trait::spread(Trait::any(element)))
            .expand()
            .expression("Spread[in1]"),
    )
}

fn gather_check(ctx: &PortContext<'_>) -> Result<(), String> {
    let n = ctx.node().schema().inputs.len();
    check_same_traits(ctx, "in1", &numbered("in", n)[1..])
}

fn gather(inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>, n: usize) -> Result<TokenMap, ExecutionError> {
    let values = numbered("in", n)
        .iter()
        .map(|port| inputs.value(port).cloned())
        .collect::<Result<Vec<NodeValue>, _>>()?;
    Ok(TokenMap::from([ctx.emit("value", values)?]))
}

/// Gathers `ninputs` data tokens into a `Spread`.
#[derive(Clone)]
pub struct GroupData {
    ninputs: usize,
}

impl GroupData {
    pub fn new(ninputs: usize) -> Self {
        Self { ninputs }
    }
}

impl Default for GroupData {
    fn default() -> Self {
        Self::new(2)
    }
}

impl NodeLogic for GroupData {
    fn kind(&self) -> &'static str {
        "Group"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("ninputs".to_string(), json!(self.ninputs))])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        gather_schema(properties, self.ninputs, Trait::DATA)
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        gather_check(ctx)
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let n = inputs.tokens().len();
        gather(inputs, ctx, n)
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Gathers `ninputs` objects into a `Spread`.
#[derive(Clone)]
pub struct GroupObject {
    ninputs: usize,
}

impl GroupObject {
    pub fn new(ninputs: usize) -> Self {
        Self { ninputs }
    }
}

impl Default for GroupObject {
    fn default() -> Self {
        Self::new(2)
    }
}

impl NodeLogic for GroupObject {
    fn kind(&self) -> &'static str {
        "GroupObject"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("ninputs".to_string(), json!(self.ninputs))])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        gather_schema(properties, self.ninputs, Trait::OBJECT)
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        gather_check(ctx)
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let n = inputs.tokens().len();
        gather(inputs, ctx, n)
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Lifts an object into `Optional[..]`.
#[derive(Clone)]
pub struct Just;

impl NodeLogic for Just {
    fn kind(&self) -> &'static str {
        "Just"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::OBJECT).expand().optional())
            .output(
                OutputSpec::new("out1", Trait::optional(Trait::OBJECT))
                    .expand()
                    .expression("Optional[in1]"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = inputs.value("in1")?.clone();
        Ok(TokenMap::from([ctx.emit("out1", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Sends the object to `out1` when `cond` holds and to `out2` otherwise. The
/// other output carries an empty optional.
#[derive(Clone)]
pub struct Branch;

impl NodeLogic for Branch {
    fn kind(&self) -> &'static str {
        "Branch"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        let output = |name: &str| {
            OutputSpec::new(name, Trait::optional(Trait::OBJECT))
                .expand()
                .expression("Optional[in1]")
        };
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::OBJECT).expand().optional())
            .input(InputSpec::new("cond", Trait::BOOLEAN).expand())
            .output(output("out1"))
            .output(output("out2"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = inputs.value("in1")?.clone();
        let (taken, empty) = if boolean(inputs, "cond")? {
            ("out1", "out2")
        } else {
            ("out2", "out1")
        };
        Ok(TokenMap::from([
            ctx.emit(taken, value)?,
            ctx.emit(empty, NodeValue::Null)?,
        ]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Joins two optional branches; exactly one of them may hold a value.
#[derive(Clone)]
pub struct Merge;

impl NodeLogic for Merge {
    fn kind(&self) -> &'static str {
        "Merge"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::optional(Trait::OBJECT)).expand())
            .input(InputSpec::new("in2", Trait::optional(Trait::OBJECT)).expand())
            .output(
                OutputSpec::new("out1", Trait::OBJECT)
                    .expand()
                    .expression("first_arg(in1)"),
            )
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        check_same_traits(ctx, "in1", &["in2".to_string()])
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let present: Vec<&NodeValue> = ["in1", "in2"]
            .iter()
            .map(|port| inputs.value(port))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|v| !v.is_null())
            .collect();
        match present.as_slice() {
            [value] => Ok(TokenMap::from([ctx.emit("out1", (*value).clone())?])),
            _ => Err(ExecutionError::InvalidValue {
                port: "out1".to_string(),
                reason: format!("{} of two branches hold a value, exactly one expected", present.len()),
            }),
        }
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Packs objects `obj1..` and data `data1..` into one `Struct` token.
#[derive(Clone)]
pub struct Pack;

impl Pack {
    fn ports(properties: &Properties) -> (Vec<String>, Vec<String>) {
        (
            numbered("obj", count_property(properties, "ninputs1", 1)),
            numbered("data", count_property(properties, "ninputs2", 0)),
        )
    }
}

impl NodeLogic for Pack {
    fn kind(&self) -> &'static str {
        "Pack"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([
            ("ninputs1".to_string(), json!(1)),
            ("ninputs2".to_string(), json!(0)),
        ])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        let (objects, data) = Self::ports(properties);
        let mut schema = PortSchema::new();
        for name in objects {
            schema = schema.input(InputSpec::new(name, Trait::any(Trait::OBJECT)));
        }
        for name in data {
            schema = schema.input(InputSpec::new(name, Trait::any(Trait::DATA)));
        }
        schema.output(OutputSpec::new("value", Trait::any(Trait::OBJECT)))
    }

    fn resolve_output(&self, port: &str, ctx: &PortContext<'_>) -> Option<Result<Trait, TraitError>> {
        if port != "value" {
            return None;
        }
        let members = ctx
            .node()
            .schema()
            .inputs
            .iter()
            .map(|input| ctx.input_trait(&input.name))
            .collect::<Result<Vec<_>, _>>();
        Some(members.map(Trait::structure))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, _ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let count = |prefix: &str| inputs.tokens().keys().filter(|k| k.starts_with(prefix)).count();
        let ports = numbered("obj", count("obj"))
            .into_iter()
            .chain(numbered("data", count("data")));
        let mut values = Vec::new();
        let mut traits = Vec::new();
        for port in ports {
            let token = inputs.require(&port)?;
            values.push(token.value.clone());
            traits.push(token.traits.clone());
        }
        Ok(TokenMap::from([(
            "value".to_string(),
            Token::new(values, Trait::structure(traits)),
        )]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Splits a `Struct` token into one output per member. The `store` property
/// records which members are objects and is kept in sync with the upstream
/// struct.
#[derive(Clone)]
pub struct Unpack;

impl Unpack {
    fn store(properties: &Properties) -> Vec<bool> {
        properties
            .get("store")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().map(|v| v.as_bool().unwrap_or(true)).collect())
            .unwrap_or_default()
    }

    fn member_index(port: &str) -> Option<usize> {
        port.strip_prefix("out")?.parse::<usize>().ok()?.checked_sub(1)
    }
}

impl NodeLogic for Unpack {
    fn kind(&self) -> &'static str {
        "Unpack"
    }

    fn default_properties(&self) -> Properties {
        Properties::from([("store".to_string(), json!([true]))])
    }

    fn declare(&self, properties: &Properties) -> PortSchema {
        let mut schema = PortSchema::new().input(InputSpec::new("value", Trait::any(Trait::OBJECT)));
        for (i, object) in Self::store(properties).into_iter().enumerate() {
            let traits = if object { Trait::OBJECT } else { Trait::DATA };
            schema = schema.output(OutputSpec::new(format!("out{}", i + 1), Trait::any(traits)));
        }
        schema
    }

    fn resolve_output(&self, port: &str, ctx: &PortContext<'_>) -> Option<Result<Trait, TraitError>> {
        let index = Self::member_index(port)?;
        match ctx.input_trait("value") {
            Ok(traits) => traits.struct_members()?.get(index).cloned().map(Ok),
            Err(e) => Some(Err(e)),
        }
    }

    fn derive_properties(&self, ctx: &PortContext<'_>) -> Option<Properties> {
        if !ctx.is_connected("value") {
            return None;
        }
        let traits = ctx.input_trait("value").ok()?;
        let store: Vec<bool> = traits.struct_members()?.iter().map(Trait::is_object).collect();
        Some(Properties::from([("store".to_string(), json!(store))]))
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        let traits = ctx.input_trait("value").map_err(|e| e.to_string())?;
        let members = traits
            .struct_members()
            .ok_or_else(|| format!("Wrong input type given [{}]. Struct is required", traits))?;
        let outputs = ctx.node().schema().outputs.len();
        if members.len() != outputs {
            return Err(format!(
                "The port number mismatches [{} != {}]",
                members.len(),
                outputs
            ));
        }
        Ok(())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let token = inputs.require("value")?;
        let items = token.value.as_array().ok_or_else(|| ExecutionError::NotASequence {
            port: "value".to_string(),
            value: token.value.to_string(),
        })?;
        let mut outputs = TokenMap::new();
        for (i, item) in items.iter().enumerate() {
            let (port, token) = ctx.emit(&format!("out{}", i + 1), item.clone())?;
            outputs.insert(port, token);
        }
        Ok(outputs)
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binding::{Scope, derived_properties};
    use crate::core::graph::Graph;
    use crate::core::lab::{Laboratory, SimulatedLab};
    use crate::nodes::labware::ServeLabware;
    use crate::nodes::primitive::IntegerNode;
    use crate::nodes::testing::{run, run_in};

    #[test]
    fn test_group_data_gathers_in_order() {
        let out = run(
            GroupData::new(3),
            &[],
            vec![
                ("in1", Token::new(1, Trait::INTEGER)),
                ("in2", Token::new(2, Trait::INTEGER)),
                ("in3", Token::new(3, Trait::INTEGER)),
            ],
        )
        .unwrap();
        assert_eq!(
            out.outputs["value"],
            Token::new(json!([1, 2, 3]), Trait::spread(Trait::INTEGER))
        );
    }

    #[test]
    fn test_group_ports_follow_property() {
        let mut graph = Graph::new();
        let group = graph.add_node("group", GroupData::default());
        assert_eq!(graph.node(group).unwrap().schema().inputs.len(), 2);
        graph.set_property(group, "ninputs", 4).unwrap();
        assert_eq!(graph.node(group).unwrap().schema().inputs.len(), 4);
    }

    #[test]
    fn test_branch_then_merge() {
        let lab = SimulatedLab::new();
        let plate = lab.serve_labware(&Trait::PLATE96).unwrap();

        let (out, plan) = run_in(
            &lab,
            Branch,
            &[],
            vec![("in1", plate.clone()), ("cond", Token::new(false, Trait::BOOLEAN))],
        );
        let out = out.unwrap();
        assert_eq!(plan.outputs["out1"], Trait::optional(Trait::PLATE96));
        assert_eq!(out.outputs["out1"].value, NodeValue::Null);
        assert_eq!(out.outputs["out2"].value, plate.value);

        let merged = run(
            Merge,
            &[],
            vec![
                ("in1", out.outputs["out1"].clone()),
                ("in2", out.outputs["out2"].clone()),
            ],
        )
        .unwrap();
        assert_eq!(merged.outputs["out1"], plate);
    }

    #[test]
    fn test_merge_requires_exactly_one_value() {
        let empty = || Token::new(NodeValue::Null, Trait::optional(Trait::PLATE96));
        let result = run(Merge, &[], vec![("in1", empty()), ("in2", empty())]);
        assert!(matches!(result, Err(ExecutionError::InvalidValue { .. })));
    }

    #[test]
    fn test_pack_and_unpack() {
        let mut graph = Graph::new();
        let serve = graph.add_node("serve", ServeLabware);
        let n = graph.add_node("n", IntegerNode);
        let pack = graph.add_node("pack", Pack);
        graph.set_property(pack, "ninputs2", 1).unwrap();
        let unpack = graph.add_node("unpack", Unpack);
        graph.connect((serve, "value"), (pack, "obj1")).unwrap();
        graph.connect((n, "value"), (pack, "data1")).unwrap();
        graph.connect((pack, "value"), (unpack, "value")).unwrap();

        assert_eq!(
            Scope::root(&graph).output_trait(pack, "value").unwrap(),
            Trait::structure([Trait::PLATE96, Trait::INTEGER])
        );

        for (_, id, props) in derived_properties(&graph) {
            for (key, value) in props {
                graph.set_property(id, &key, value).unwrap();
            }
        }
        assert_eq!(graph.node(unpack).unwrap().property("store"), Some(&json!([true, false])));

        let scope = Scope::root(&graph);
        assert_eq!(scope.output_trait(unpack, "out1").unwrap(), Trait::PLATE96);
        assert_eq!(scope.output_trait(unpack, "out2").unwrap(), Trait::INTEGER);
        assert!(Unpack.check(&scope.context(unpack).unwrap()).is_ok());
    }

    #[test]
    fn test_unpack_rejects_non_struct() {
        let mut graph = Graph::new();
        let serve = graph.add_node("serve", ServeLabware);
        let unpack = graph.add_node("unpack", Unpack);
        graph.connect((serve, "value"), (unpack, "value")).unwrap();

        let scope = Scope::root(&graph);
        assert_eq!(
            Unpack.check(&scope.context(unpack).unwrap()),
            Err("Wrong input type given [Plate96]. Struct is required".to_string())
        );
    }

    #[test]
    fn test_unpack_splits_values() {
        let packed = Token::new(
            json!([{"id": "p"}, 5]),
            Trait::structure([Trait::PLATE96, Trait::INTEGER]),
        );
        let out = run(Unpack, &[("store", json!([true, false]))], vec![("value", packed)]).unwrap();
        assert_eq!(out.outputs["out1"], Token::new(json!({"id": "p"}), Trait::PLATE96));
        assert_eq!(out.outputs["out2"], Token::new(5, Trait::INTEGER));
    }
}
