//! Element-wise arithmetic on numbers and numeric arrays. The result trait is
//! the least upper bound of the operands, e.g. `Integer + Float` is `Float`.

use super::numeric::{broadcast, integers, invalid, is_integral, numeric};
use crate::core::error::ExecutionError;
use crate::core::node::{ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
}

impl Operator {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
        }
    }

    /// `None` on overflow.
    fn checked(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Operator::Add => a.checked_add(b),
            Operator::Sub => a.checked_sub(b),
            Operator::Mul => a.checked_mul(b),
        }
    }
}

/// `value = a <op> b`.
#[derive(Clone)]
pub struct Arithmetic {
    operator: Operator,
}

impl Arithmetic {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    pub fn add() -> Self {
        Self::new(Operator::Add)
    }

    pub fn sub() -> Self {
        Self::new(Operator::Sub)
    }

    pub fn mul() -> Self {
        Self::new(Operator::Mul)
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }
}

impl NodeLogic for Arithmetic {
    fn kind(&self) -> &'static str {
        match self.operator {
            Operator::Add => "Add",
            Operator::Sub => "Sub",
            Operator::Mul => "Mul",
        }
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        let operand = Trait::array(Trait::real()).or(Trait::real());
        PortSchema::new()
            .input(InputSpec::new("a", operand.clone()).expand())
            .input(InputSpec::new("b", operand.clone()).expand())
            .output(
                OutputSpec::new("value", operand)
                    .expand()
                    .expression("upper(a, b)"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let traits = ctx.output_trait("value")?;
        let value = if is_integral(&traits) {
            let a = integers("a", inputs.value("a")?)?;
            let b = integers("b", inputs.value("b")?)?;
            broadcast(a, b, |x, y| {
                self.operator
                    .checked(x, y)
                    .ok_or_else(|| invalid("value", format!("{} {:?} {} overflows", x, self.operator, y)))
            })?
            .into_value()
        } else {
            let a = numeric("a", inputs.value("a")?)?;
            let b = numeric("b", inputs.value("b")?)?;
            broadcast(a, b, |x, y| Ok(self.operator.apply(x, y)))?.into_value()
        };
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
    use crate::core::token::Token;
    use serde_json::json;
    use std::collections::HashMap;

    fn plan(a: Trait, b: Trait, out: Trait, element: Trait) -> TraitPlan {
        TraitPlan {
            inputs: HashMap::from([("a".to_string(), a), ("b".to_string(), b)]),
            outputs: HashMap::from([("value".to_string(), out)]),
            elements: HashMap::from([("value".to_string(), element)]),
            optional: false,
        }
    }

    #[test]
    fn test_integer_addition() {
        let node = Node::new("add", Arithmetic::add());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(5, Trait::INTEGER)),
            ("b".to_string(), Token::new(3, Trait::INTEGER)),
        ]);
        let plan = plan(Trait::INTEGER, Trait::INTEGER, Trait::INTEGER, Trait::INTEGER);
        let out = node.execute(inputs, &plan, &lab).unwrap();
        assert_eq!(out.outputs["value"], Token::new(8, Trait::INTEGER));
    }

    #[test]
    fn test_large_integers_stay_exact() {
        let node = Node::new("add", Arithmetic::add());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(9007199254740993_i64, Trait::INTEGER)),
            ("b".to_string(), Token::new(0, Trait::INTEGER)),
        ]);
        let plan = plan(Trait::INTEGER, Trait::INTEGER, Trait::INTEGER, Trait::INTEGER);
        let out = node.execute(inputs, &plan, &lab).unwrap();
        assert_eq!(out.outputs["value"].value, json!(9007199254740993_i64));
    }

    #[test]
    fn test_integer_overflow_fails() {
        let node = Node::new("add", Arithmetic::add());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(json!([1, i64::MAX]), Trait::array(Trait::INTEGER))),
            ("b".to_string(), Token::new(1, Trait::INTEGER)),
        ]);
        let ints = Trait::array(Trait::INTEGER);
        let plan = plan(ints.clone(), Trait::INTEGER, ints.clone(), ints);
        assert!(matches!(
            node.execute(inputs, &plan, &lab),
            Err(ExecutionError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_array_times_float() {
        let node = Node::new("mul", Arithmetic::mul());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(json!([1, 2]), Trait::array(Trait::INTEGER))),
            ("b".to_string(), Token::new(0.5, Trait::FLOAT)),
        ]);
        let out_trait = Trait::array(Trait::FLOAT);
        let plan = plan(Trait::array(Trait::INTEGER), Trait::FLOAT, out_trait.clone(), out_trait);
        let out = node.execute(inputs, &plan, &lab).unwrap();
        assert_eq!(out.outputs["value"].value, json!([0.5, 1.0]));
    }

    #[test]
    fn test_spread_operand_expands() {
        let node = Node::new("sub", Arithmetic::sub());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(json!([10, 20, 30]), Trait::spread(Trait::INTEGER))),
            ("b".to_string(), Token::new(1, Trait::INTEGER)),
        ]);
        let plan = plan(
            Trait::spread(Trait::INTEGER),
            Trait::INTEGER,
            Trait::spread(Trait::INTEGER),
            Trait::INTEGER,
        );
        let out = node.execute(inputs, &plan, &lab).unwrap();
        assert_eq!(
            out.outputs["value"],
            Token::new(json!([9, 19, 29]), Trait::spread(Trait::INTEGER))
        );
    }

    #[test]
    fn test_mismatched_spreads_fail() {
        let node = Node::new("add", Arithmetic::add());
        let lab = SimulatedLab::new();
        let inputs = TokenMap::from([
            ("a".to_string(), Token::new(json!([1, 2, 3]), Trait::spread(Trait::INTEGER))),
            ("b".to_string(), Token::new(json!([1, 2, 3, 4]), Trait::spread(Trait::INTEGER))),
        ]);
        let plan = plan(
            Trait::spread(Trait::INTEGER),
            Trait::spread(Trait::INTEGER),
            Trait::spread(Trait::INTEGER),
            Trait::INTEGER,
        );
        assert_eq!(
            node.execute(inputs, &plan, &lab).unwrap_err(),
            ExecutionError::LengthMismatch { lengths: vec![3, 4] }
        );
    }
}
