use crate::core::NodeValue;
use crate::core::expr::TraitExpr;
use crate::core::token::{Token, TokenMap};
use crate::core::traits::Trait;
use std::collections::{BTreeSet, HashMap};

/// Declared trait of a port together with its flags.
///
/// `traits` is the accepting trait: `optional` widens it with `Optional[..]`
/// and `expand` with `Spread[..]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortTraits {
    pub traits: Trait,
    pub free: bool,
    pub expand: bool,
    pub optional: bool,
    pub io: bool,
}

impl PortTraits {
    fn declare(element: &Trait, expand: bool, optional: bool, io: bool, free: bool) -> Self {
        let mut traits = element.clone();
        if optional {
            traits = traits.clone().or(Trait::optional(traits));
        }
        if expand {
            traits = traits.clone().or(Trait::spread(traits));
        }
        Self {
            traits,
            free,
            expand,
            optional,
            io,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    pub name: String,
    pub port: PortTraits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPort {
    pub name: String,
    pub port: PortTraits,
    /// The trait as written by the node author, before any widening.
    pub element: Trait,
    pub expression: Option<TraitExpr>,
}

impl OutputPort {
    /// The formula for the per-element trait of this output.
    pub fn formula(&self) -> TraitExpr {
        self.expression
            .clone()
            .unwrap_or_else(|| TraitExpr::Const(self.element.clone()))
    }

    /// An object output carried through expansion unchanged: either it does not
    /// expand, or none of the inputs it is computed from were expanded.
    pub fn is_loop_item(&self, expansion: &BTreeSet<String>) -> bool {
        if !self.element.is_object() {
            return false;
        }
        if !self.port.expand {
            return true;
        }
        match &self.expression {
            Some(expr) => {
                let names = expr.input_names();
                !names.is_empty() && names.iter().all(|n| !expansion.contains(*n))
            }
            None => false,
        }
    }
}

/// Builder for an input port.
#[derive(Debug, Clone)]
pub struct InputSpec {
    name: String,
    element: Trait,
    free: bool,
    expand: bool,
    optional: bool,
    io: bool,
    passthrough: bool,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, traits: Trait) -> Self {
        Self {
            name: name.into(),
            element: traits,
            free: false,
            expand: false,
            optional: false,
            io: false,
            passthrough: false,
        }
    }

    /// Usable unconnected, through a default value.
    pub fn free(mut self) -> Self {
        self.free = true;
        self
    }

    pub fn expand(mut self) -> Self {
        self.expand = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn io(mut self) -> Self {
        self.io = true;
        self
    }

    /// Boundary ports carry whatever their peer carries.
    pub(crate) fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }
}

/// Builder for an output port.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    name: String,
    element: Trait,
    expand: bool,
    optional: bool,
    io: bool,
    passthrough: bool,
    expression: Option<TraitExpr>,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, traits: Trait) -> Self {
        Self {
            name: name.into(),
            element: traits,
            expand: false,
            optional: false,
            io: false,
            passthrough: false,
            expression: None,
        }
    }

    pub fn expand(mut self) -> Self {
        self.expand = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn io(mut self) -> Self {
        self.io = true;
        self
    }

    pub(crate) fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    /// Computes this output's trait from the input traits.
    ///
    /// # Panics
    /// Panics if the expression does not parse.
    pub fn expression(mut self, source: &str) -> Self {
        match TraitExpr::parse(source) {
            Ok(expr) => self.expression = Some(expr),
            Err(e) => panic!("invalid trait expression '{}' for port {}: {}", source, self.name, e),
        }
        self
    }
}

/// The ports a node kind declares, plus default values for free inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortSchema {
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub defaults: TokenMap,
}

impl PortSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics on a duplicate name, on a trait that is neither object nor data,
    /// or on a free port that is not data.
    pub fn input(mut self, spec: InputSpec) -> Self {
        assert!(
            self.input_port(&spec.name).is_none(),
            "duplicate input port {}",
            spec.name
        );
        let port = PortTraits::declare(&spec.element, spec.expand, spec.optional, spec.io, spec.free);
        if !spec.passthrough {
            assert!(
                port.traits.is_object() || port.traits.is_data(),
                "input port {} must carry objects or data, got {}",
                spec.name,
                port.traits
            );
        }
        assert!(
            !spec.free || port.traits.is_data(),
            "free port {} must carry data",
            spec.name
        );
        self.inputs.push(InputPort {
            name: spec.name,
            port,
        });
        self
    }

    /// # Panics
    /// Panics on a duplicate name or a trait that is neither object nor data.
    pub fn output(mut self, spec: OutputSpec) -> Self {
        assert!(
            self.output_port(&spec.name).is_none(),
            "duplicate output port {}",
            spec.name
        );
        let port = PortTraits::declare(&spec.element, spec.expand, spec.optional, spec.io, false);
        if !spec.passthrough {
            assert!(
                port.traits.is_object() || port.traits.is_data(),
                "output port {} must carry objects or data, got {}",
                spec.name,
                port.traits
            );
        }
        self.outputs.push(OutputPort {
            name: spec.name,
            port,
            element: spec.element,
            expression: spec.expression,
        });
        self
    }

    /// # Panics
    /// Panics unless `name` is a free input that accepts `traits`.
    pub fn default_value(mut self, name: &str, value: impl Into<NodeValue>, traits: Trait) -> Self {
        let port = self
            .input_port(name)
            .unwrap_or_else(|| panic!("no input port {} for default value", name));
        assert!(port.port.free, "input port {} is not free", name);
        assert!(
            traits.acceptable(&port.port.traits),
            "default {} does not fit port {} ({})",
            traits,
            name,
            port.port.traits
        );
        self.defaults.insert(name.to_string(), Token::new(value, traits));
        self
    }

    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Default token of a free input. A property of the same name overrides the
    /// declared default when its inferred trait fits the port.
    pub fn default_token(&self, name: &str, properties: &HashMap<String, NodeValue>) -> Option<Token> {
        let port = self.input_port(name)?;
        if !port.port.free {
            return None;
        }
        if let Some(value) = properties.get(name) {
            match infer_trait(value) {
                Some(traits) if traits.acceptable(&port.port.traits) => {
                    return Some(Token::new(value.clone(), traits));
                }
                _ => log::warn!("Property {} = {} does not fit port [{}]", name, value, name),
            }
        }
        self.defaults.get(name).cloned()
    }

    /// Checks that every expression only names declared inputs.
    ///
    /// # Panics
    /// Panics on the first unknown name.
    pub fn assert_well_formed(&self, kind: &str) {
        for output in &self.outputs {
            let Some(expr) = &output.expression else {
                continue;
            };
            for name in expr.input_names() {
                assert!(
                    self.input_port(name).is_some(),
                    "{}: expression '{}' of port {} names unknown input '{}'",
                    kind,
                    expr,
                    output.name,
                    name
                );
            }
        }
    }
}

/// Trait of a plain JSON value used as a free-port override.
pub fn infer_trait(value: &NodeValue) -> Option<Trait> {
    match value {
        NodeValue::Bool(_) => Some(Trait::BOOLEAN),
        NodeValue::Number(n) if n.is_i64() || n.is_u64() => Some(Trait::INTEGER),
        NodeValue::Number(_) => Some(Trait::FLOAT),
        NodeValue::String(_) => Some(Trait::STRING),
        NodeValue::Array(items) if !items.is_empty() => {
            let elements = items.iter().map(infer_trait).collect::<Option<Vec<_>>>()?;
            if elements.iter().any(|t| !matches!(t, Trait::Kind(_))) {
                return None;
            }
            Trait::upper(&elements).ok().map(Trait::array)
        }
        _ => None,
    }
}
