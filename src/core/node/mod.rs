pub mod execute;

use crate::core::binding::PortContext;
use crate::core::error::{ExecutionError, TraitError};
use crate::core::graph::Graph;
use crate::core::lab::Laboratory;
use crate::core::port::PortSchema;
use crate::core::token::{Token, TokenMap};
use crate::core::traits::Trait;
use crate::core::{AsAny, NodeValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub use execute::{Execution, TraitPlan};

/// Per-node key-value store for user-editable settings.
pub type Properties = HashMap<String, NodeValue>;

/// The per-node state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    NotReady,
    Ready,
    Active,
    Running,
    Finished,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::NotReady => "NOT_READY",
            NodeStatus::Ready => "READY",
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Finished => "FINISHED",
            NodeStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// When a `READY` node may become `ACTIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// On every scheduler tick.
    Auto,
    /// Only on an explicit forced activation, such as a session start.
    Forced,
}

/// How the scheduler and the binding treat a node beyond its ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Operation,
    /// Redirects its output to the server sharing its address.
    Client { address: String },
    Server { address: String },
    /// Boundary node inside a subgraph mirroring the group's input `port`.
    GraphInput { port: String },
    /// Boundary node inside a subgraph feeding the group's output `port`.
    GraphOutput { port: String },
    /// Owns a subgraph.
    Group,
}

impl NodeRole {
    pub fn is_boundary(&self) -> bool {
        matches!(self, NodeRole::GraphInput { .. } | NodeRole::GraphOutput { .. })
    }
}

/// The behaviour of one node kind.
///
/// Implementations declare their ports from the node's properties and provide
/// `core_execute`. Optional wrapping, spread expansion and the trait contract
/// around it are applied uniformly by [`Node::execute`].
pub trait NodeLogic: AsAny + Send + Sync + 'static {
    /// Display name of the kind, e.g. `"Add"`.
    fn kind(&self) -> &'static str;

    /// The ports for the given properties.
    fn declare(&self, properties: &Properties) -> PortSchema;

    /// Computes one set of outputs from one set of element-level inputs.
    fn core_execute(
        &self,
        inputs: &ResolvedInputs,
        ctx: &mut ExecContext<'_>,
    ) -> Result<TokenMap, ExecutionError>;

    fn default_properties(&self) -> Properties {
        Properties::new()
    }

    fn role(&self, _properties: &Properties) -> NodeRole {
        NodeRole::Operation
    }

    fn activation(&self) -> Activation {
        Activation::Auto
    }

    /// Kind-specific validation on top of the generic port checks.
    fn check(&self, _ctx: &PortContext<'_>) -> Result<(), String> {
        Ok(())
    }

    /// Overrides the resolved trait of an output port.
    fn resolve_output(&self, _port: &str, _ctx: &PortContext<'_>) -> Option<Result<Trait, TraitError>> {
        None
    }

    /// Properties to update after the node's connections changed.
    fn derive_properties(&self, _ctx: &PortContext<'_>) -> Option<Properties> {
        None
    }

    /// Create a boxed clone of this trait object.
    fn clone_box(&self) -> Box<dyn NodeLogic>;
}

impl Clone for Box<dyn NodeLogic> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A node in a protocol graph.
#[derive(Clone)]
pub struct Node {
    name: String,
    logic: Box<dyn NodeLogic>,
    schema: PortSchema,
    properties: Properties,
    status: NodeStatus,
    message: String,
    input_queue: VecDeque<TokenMap>,
    output_queue: VecDeque<TokenMap>,
    pub(crate) subgraph: Option<Graph>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.logic.kind())
            .field("status", &self.status)
            .field("message", &self.message)
            .finish()
    }
}

impl Node {
    /// Creates a node in the `NOT_READY` state.
    pub fn new<L: NodeLogic>(name: impl Into<String>, logic: L) -> Self {
        Self::from_boxed(name, Box::new(logic))
    }

    pub fn from_boxed(name: impl Into<String>, logic: Box<dyn NodeLogic>) -> Self {
        let properties = logic.default_properties();
        let schema = logic.declare(&properties);
        schema.assert_well_formed(logic.kind());
        Node {
            name: name.into(),
            logic,
            schema,
            properties,
            status: NodeStatus::NotReady,
            message: String::new(),
            input_queue: VecDeque::new(),
            output_queue: VecDeque::new(),
            subgraph: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.logic.kind()
    }

    pub fn logic(&self) -> &dyn NodeLogic {
        self.logic.as_ref()
    }

    /// The node's logic as its concrete kind, if it is a `T`.
    pub fn logic_as<T: NodeLogic>(&self) -> Option<&T> {
        self.logic().as_any().downcast_ref::<T>()
    }

    pub fn schema(&self) -> &PortSchema {
        &self.schema
    }

    pub fn role(&self) -> NodeRole {
        self.logic.role(&self.properties)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&NodeValue> {
        self.properties.get(name)
    }

    /// Sets a property and redeclares the ports. Returns true if the port
    /// layout changed.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<NodeValue>) -> bool {
        self.properties.insert(name.into(), value.into());
        let schema = self.logic.declare(&self.properties);
        schema.assert_well_formed(self.logic.kind());
        let changed = schema != self.schema;
        self.schema = schema;
        changed
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn subgraph(&self) -> Option<&Graph> {
        self.subgraph.as_ref()
    }

    pub fn input_queue(&self) -> &VecDeque<TokenMap> {
        &self.input_queue
    }

    pub fn output_queue(&self) -> &VecDeque<TokenMap> {
        &self.output_queue
    }

    fn set_status(&mut self, status: NodeStatus) {
        if self.status != status {
            log::debug!("{}: {} -> {}", self.name, self.status, status);
            self.status = status;
        }
    }

    /// Input ports that must receive a token before the node can run.
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.schema
            .inputs
            .iter()
            .filter(|p| !p.port.free)
            .map(|p| p.name.as_str())
    }

    /// `READY` -> `ACTIVE`. Nodes without required inputs, and kinds with
    /// [`Activation::Forced`], only activate when forced.
    pub fn activate(&mut self, force: bool) -> bool {
        if self.status != NodeStatus::Ready {
            return false;
        }
        let forced_only =
            self.logic.activation() == Activation::Forced || self.required_inputs().next().is_none();
        if forced_only && !force {
            return false;
        }
        self.set_status(NodeStatus::Active);
        true
    }

    /// Queues one input set and enters `RUNNING`.
    pub fn run(&mut self, tokens: TokenMap) {
        self.input_queue.push_back(tokens);
        self.set_status(NodeStatus::Running);
    }

    /// Discards queued work and returns to `NOT_READY`. Only affects nodes
    /// that were activated.
    pub fn reset(&mut self) {
        if !matches!(
            self.status,
            NodeStatus::Active | NodeStatus::Running | NodeStatus::Finished | NodeStatus::Error
        ) {
            return;
        }
        self.input_queue.clear();
        self.output_queue.clear();
        self.message.clear();
        self.set_status(NodeStatus::NotReady);
    }

    /// Validation failure: back to `NOT_READY` from any state.
    pub(crate) fn invalidate(&mut self, message: impl Into<String>) {
        self.input_queue.clear();
        self.output_queue.clear();
        self.message = message.into();
        self.set_status(NodeStatus::NotReady);
    }

    /// Validation success: a `NOT_READY` node becomes `READY`.
    pub(crate) fn revalidate(&mut self) {
        if self.status == NodeStatus::NotReady {
            self.message.clear();
            self.set_status(NodeStatus::Ready);
        }
    }

    /// Execution failure is fatal until the node is reset.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.input_queue.clear();
        self.message = message.into();
        log::error!("{} failed: {}", self.name, self.message);
        self.set_status(NodeStatus::Error);
    }

    pub(crate) fn pop_input(&mut self) -> Option<TokenMap> {
        self.input_queue.pop_front()
    }

    pub(crate) fn push_output(&mut self, tokens: TokenMap) {
        self.output_queue.push_back(tokens);
    }

    pub(crate) fn pop_output(&mut self) -> Option<TokenMap> {
        self.output_queue.pop_front()
    }

    /// `RUNNING` -> `FINISHED` once the input queue is drained.
    pub(crate) fn finish_if_drained(&mut self) {
        if self.status == NodeStatus::Running && self.input_queue.is_empty() {
            self.set_status(NodeStatus::Finished);
        }
    }

    /// Collected by the scheduler: `FINISHED` -> `READY`.
    pub(crate) fn complete(&mut self) {
        if self.status == NodeStatus::Finished && self.output_queue.is_empty() {
            self.set_status(NodeStatus::Ready);
        }
    }

    pub(crate) fn apply_updates(&mut self, updates: Properties) {
        for (name, value) in updates {
            self.set_property(name, value);
        }
    }
}

/// The inputs of one `core_execute` call: free-port defaults first, live
/// tokens on top.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    tokens: TokenMap,
}

impl ResolvedInputs {
    pub fn new(tokens: TokenMap) -> Self {
        Self { tokens }
    }

    pub fn get(&self, port: &str) -> Option<&Token> {
        self.tokens.get(port)
    }

    pub fn require(&self, port: &str) -> Result<&Token, ExecutionError> {
        self.tokens
            .get(port)
            .ok_or_else(|| ExecutionError::MissingInput(port.to_string()))
    }

    pub fn value(&self, port: &str) -> Result<&NodeValue, ExecutionError> {
        self.require(port).map(|t| &t.value)
    }

    pub fn traits(&self, port: &str) -> Result<&Trait, ExecutionError> {
        self.require(port).map(|t| &t.traits)
    }

    pub fn tokens(&self) -> &TokenMap {
        &self.tokens
    }
}

/// What `core_execute` may see and touch besides its inputs.
pub struct ExecContext<'a> {
    node: &'a str,
    properties: &'a Properties,
    lab: &'a dyn Laboratory,
    outputs: &'a HashMap<String, Trait>,
    optional: bool,
    updates: Properties,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        node: &'a str,
        properties: &'a Properties,
        lab: &'a dyn Laboratory,
        outputs: &'a HashMap<String, Trait>,
        optional: bool,
    ) -> Self {
        Self {
            node,
            properties,
            lab,
            outputs,
            optional,
            updates: Properties::new(),
        }
    }

    pub fn node(&self) -> &str {
        self.node
    }

    pub fn lab(&self) -> &dyn Laboratory {
        self.lab
    }

    pub fn property(&self, name: &str) -> Option<&NodeValue> {
        self.updates.get(name).or_else(|| self.properties.get(name))
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<NodeValue>) {
        self.updates.insert(name.into(), value.into());
    }

    /// Whether any optional input currently carries an `Optional` trait.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The element-level trait `core_execute` must produce on `port`.
    pub fn output_trait(&self, port: &str) -> Result<Trait, ExecutionError> {
        self.outputs.get(port).cloned().ok_or_else(|| {
            ExecutionError::Trait(TraitError::UnknownPort {
                node: self.node.to_string(),
                port: port.to_string(),
            })
        })
    }

    /// Builds an output token carrying the expected trait.
    pub fn emit(&self, port: &str, value: impl Into<NodeValue>) -> Result<(String, Token), ExecutionError> {
        Ok((port.to_string(), Token::new(value, self.output_trait(port)?)))
    }

    pub(crate) fn into_updates(self) -> Properties {
        self.updates
    }
}
