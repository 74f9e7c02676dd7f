//! The execution contract wrapped around every `core_execute`:
//!
//! 1. optional inputs are wrapped as `Optional[..]`, optional outputs unwrapped
//!    again when the node itself is not optional,
//! 2. spread inputs on expanding ports are iterated element by element and the
//!    results gathered back into spreads (object loop items keep the last one),
//! 3. every input and output token must carry the resolved trait of its port.

use super::{ExecContext, Node, Properties, ResolvedInputs};
use crate::core::error::ExecutionError;
use crate::core::lab::Laboratory;
use crate::core::token::{Token, TokenMap};
use crate::core::traits::Trait;
use crate::core::NodeValue;
use std::collections::{BTreeSet, HashMap};

/// Resolved traits of one node, computed by the binding before execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitPlan {
    /// Resolved trait per input port.
    pub inputs: HashMap<String, Trait>,
    /// Resolved trait per output port.
    pub outputs: HashMap<String, Trait>,
    /// Element-level output traits seen by `core_execute`.
    pub elements: HashMap<String, Trait>,
    /// Node-level optionality.
    pub optional: bool,
}

/// Result of one `execute` call.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub outputs: TokenMap,
    pub updates: Properties,
}

impl Node {
    /// Runs the full contract on one input set.
    pub fn execute(
        &self,
        incoming: TokenMap,
        plan: &TraitPlan,
        lab: &dyn Laboratory,
    ) -> Result<Execution, ExecutionError> {
        let mut tokens = TokenMap::new();
        for port in &self.schema.inputs {
            if let Some(token) = self.schema.default_token(&port.name, &self.properties) {
                tokens.insert(port.name.clone(), token);
            }
        }
        tokens.extend(incoming);

        for (name, token) in &tokens {
            let expected = plan.inputs.get(name).ok_or_else(|| ExecutionError::ContractViolation {
                port: name.clone(),
                expected: "no such input".to_string(),
                found: token.traits.to_string(),
            })?;
            if &token.traits != expected {
                return Err(ExecutionError::ContractViolation {
                    port: name.clone(),
                    expected: expected.to_string(),
                    found: token.traits.to_string(),
                });
            }
        }

        let mut ctx = ExecContext::new(&self.name, &self.properties, lab, &plan.elements, plan.optional);
        let outputs = self.execute_expand(tokens, plan, &mut ctx)?;

        for port in &self.schema.outputs {
            let expected = plan.outputs.get(&port.name).ok_or_else(|| {
                ExecutionError::ContractViolation {
                    port: port.name.clone(),
                    expected: "a resolved trait".to_string(),
                    found: "nothing".to_string(),
                }
            })?;
            let found = outputs
                .get(&port.name)
                .map(|t| t.traits.to_string())
                .unwrap_or_else(|| "nothing".to_string());
            if outputs.get(&port.name).map(|t| &t.traits) != Some(expected) {
                return Err(ExecutionError::ContractViolation {
                    port: port.name.clone(),
                    expected: expected.to_string(),
                    found,
                });
            }
        }
        if outputs.len() != self.schema.outputs.len() {
            let extra = outputs
                .keys()
                .find(|k| self.schema.output_port(k).is_none())
                .cloned()
                .unwrap_or_default();
            return Err(ExecutionError::ContractViolation {
                port: extra,
                expected: "no such output".to_string(),
                found: "a token".to_string(),
            });
        }

        Ok(Execution {
            outputs,
            updates: ctx.into_updates(),
        })
    }

    /// Inputs whose spread token is iterated element-wise.
    pub fn expansion_set(&self, tokens: &TokenMap) -> BTreeSet<String> {
        self.schema
            .inputs
            .iter()
            .filter(|p| p.port.expand)
            .filter(|p| {
                tokens.get(&p.name).is_some_and(|t| match &t.traits {
                    Trait::Spread(inner) => inner.acceptable(&p.port.traits),
                    _ => false,
                })
            })
            .map(|p| p.name.clone())
            .collect()
    }

    fn execute_expand(
        &self,
        tokens: TokenMap,
        plan: &TraitPlan,
        ctx: &mut ExecContext<'_>,
    ) -> Result<TokenMap, ExecutionError> {
        let expansion = self.expansion_set(&tokens);
        if expansion.is_empty() {
            return self.execute_optional(tokens, plan, ctx);
        }

        let mut elements: HashMap<&str, Vec<Token>> = HashMap::new();
        for name in &expansion {
            let token = &tokens[name];
            let items = token.elements().ok_or_else(|| ExecutionError::NotASequence {
                port: name.clone(),
                value: token.value.to_string(),
            })?;
            elements.insert(name.as_str(), items);
        }
        let lengths: Vec<usize> = expansion.iter().map(|n| elements[n.as_str()].len()).collect();
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            return Err(ExecutionError::LengthMismatch { lengths });
        }
        let count = lengths[0];

        let mut results = Vec::with_capacity(count);
        for i in 0..count {
            let reduced: TokenMap = tokens
                .iter()
                .map(|(name, token)| match elements.get(name.as_str()) {
                    Some(items) => (name.clone(), items[i].clone()),
                    None => (name.clone(), token.clone()),
                })
                .collect();
            results.push(self.execute_optional(reduced, plan, ctx)?);
        }

        let mut outputs = TokenMap::new();
        for port in &self.schema.outputs {
            let name = &port.name;
            if port.is_loop_item(&expansion) {
                let last = results
                    .last_mut()
                    .and_then(|r| r.remove(name))
                    .ok_or_else(|| ExecutionError::EmptyExpansion(name.clone()))?;
                outputs.insert(name.clone(), last);
            } else {
                let mut values = Vec::with_capacity(results.len());
                let mut element = None;
                for result in &mut results {
                    let token = result.remove(name).ok_or_else(|| ExecutionError::ContractViolation {
                        port: name.clone(),
                        expected: "a token".to_string(),
                        found: "nothing".to_string(),
                    })?;
                    element.get_or_insert_with(|| token.traits.clone());
                    values.push(token.value);
                }
                let traits = match element {
                    Some(t) => Trait::spread(t),
                    None => plan
                        .outputs
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Trait::spread(port.element.clone())),
                };
                outputs.insert(name.clone(), Token::new(NodeValue::Array(values), traits));
            }
        }
        Ok(outputs)
    }

    fn execute_optional(
        &self,
        tokens: TokenMap,
        plan: &TraitPlan,
        ctx: &mut ExecContext<'_>,
    ) -> Result<TokenMap, ExecutionError> {
        let is_optional_port = |name: &str| self.schema.input_port(name).is_some_and(|p| p.port.optional);

        let tokens: TokenMap = tokens
            .into_iter()
            .map(|(name, mut token)| {
                if is_optional_port(&name) && !token.traits.is_optional() {
                    token.traits = Trait::optional(token.traits);
                }
                (name, token)
            })
            .collect();

        let mut outputs = self.logic.core_execute(&ResolvedInputs::new(tokens), ctx)?;

        if !plan.optional {
            for port in self.schema.outputs.iter().filter(|p| p.port.optional) {
                if let Some(token) = outputs.get_mut(&port.name) {
                    if let Trait::Optional(inner) = &token.traits {
                        token.traits = (**inner).clone();
                    }
                }
            }
        }
        Ok(outputs)
    }
}
