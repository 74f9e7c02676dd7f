//! Boolean logic and data routing.

use crate::core::binding::PortContext;
use crate::core::error::ExecutionError;
use crate::core::node::{ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use crate::core::validation::check_same_traits;

fn boolean(inputs: &ResolvedInputs, port: &str) -> Result<bool, ExecutionError> {
    let value = inputs.value(port)?;
    value.as_bool().ok_or_else(|| ExecutionError::InvalidValue {
        port: port.to_string(),
        reason: format!("{} is not a boolean", value),
    })
}

#[derive(Clone)]
pub struct LogicalNot;

impl NodeLogic for LogicalNot {
    fn kind(&self) -> &'static str {
        "LogicalNot"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::BOOLEAN).expand())
            .output(OutputSpec::new("out1", Trait::BOOLEAN).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = boolean(inputs, "in1")?;
        Ok(TokenMap::from([ctx.emit("out1", !value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// `value = in1 if cond else in2`. Both data inputs must resolve to the same
/// trait.
#[derive(Clone)]
pub struct Switch;

impl NodeLogic for Switch {
    fn kind(&self) -> &'static str {
        "Switch"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::any(Trait::DATA)))
            .input(InputSpec::new("in2", Trait::any(Trait::DATA)))
            .input(InputSpec::new("cond", Trait::BOOLEAN).expand())
            .output(OutputSpec::new("value", Trait::any(Trait::DATA)).expand().expression("in1"))
    }

    fn check(&self, ctx: &PortContext<'_>) -> Result<(), String> {
        check_same_traits(ctx, "in1", &["in2".to_string()])
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let port = if boolean(inputs, "cond")? { "in1" } else { "in2" };
        let value = inputs.value(port)?.clone();
        Ok(TokenMap::from([ctx.emit("value", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binding::Scope;
    use crate::core::graph::Graph;
    use crate::core::token::Token;
    use crate::nodes::primitive::{BooleanNode, FloatNode, IntegerNode};
    use crate::nodes::testing::run;
    use serde_json::json;

    #[test]
    fn test_not_over_spread() {
        let out = run(
            LogicalNot,
            &[],
            vec![("in1", Token::new(json!([true, false]), Trait::spread(Trait::BOOLEAN)))],
        )
        .unwrap();
        assert_eq!(
            out.outputs["out1"],
            Token::new(json!([false, true]), Trait::spread(Trait::BOOLEAN))
        );
    }

    #[test]
    fn test_switch_routes_by_condition() {
        let inputs = |cond: bool| {
            vec![
                ("in1", Token::new(1, Trait::INTEGER)),
                ("in2", Token::new(2, Trait::INTEGER)),
                ("cond", Token::new(cond, Trait::BOOLEAN)),
            ]
        };
        let out = run(Switch, &[], inputs(true)).unwrap();
        assert_eq!(out.outputs["value"], Token::new(1, Trait::INTEGER));
        let out = run(Switch, &[], inputs(false)).unwrap();
        assert_eq!(out.outputs["value"], Token::new(2, Trait::INTEGER));
    }

    #[test]
    fn test_switch_rejects_mixed_inputs() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", IntegerNode);
        let b = graph.add_node("b", FloatNode);
        let c = graph.add_node("c", BooleanNode);
        let switch = graph.add_node("switch", Switch);
        graph.connect((a, "value"), (switch, "in1")).unwrap();
        graph.connect((b, "value"), (switch, "in2")).unwrap();
        graph.connect((c, "out"), (switch, "cond")).unwrap();

        let scope = Scope::root(&graph);
        let ctx = scope.context(switch).unwrap();
        assert_eq!(
            Switch.check(&ctx),
            Err("Port [in2] has wrong traits [Float]. [Integer] expected".to_string())
        );
    }
}
