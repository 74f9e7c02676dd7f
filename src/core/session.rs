//! A protocol session: one graph, its scheduler, the laboratory and the
//! edit hooks that keep validation current.

use crate::core::NodeValue;
use crate::core::binding::derived_properties;
use crate::core::config::SessionConfig;
use crate::core::error::{GraphError, SessionError};
use crate::core::graph::{Graph, NodeId};
use crate::core::lab::{Laboratory, SimulatedLab};
use crate::core::node::{Node, NodeLogic, NodeStatus};
use crate::core::simulator::{Simulator, TickContext, TickReport};
use crate::core::telemetry::Telemetry;
use crate::core::validation::{ValidationResult, verify};
use std::sync::Arc;

/// Rounds of derived-property updates applied per edit.
const MAX_DERIVE_ROUNDS: usize = 8;

pub struct Session {
    graph: Graph,
    simulator: Simulator,
    lab: Arc<dyn Laboratory>,
    telemetry: Option<Arc<dyn Telemetry>>,
    config: SessionConfig,
    validation: ValidationResult,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// An empty session backed by a [`SimulatedLab`].
    pub fn new() -> Self {
        Self::from_graph(Graph::new())
    }

    pub fn from_graph(graph: Graph) -> Self {
        let mut session = Session {
            graph,
            simulator: Simulator::new(),
            lab: Arc::new(SimulatedLab::new()),
            telemetry: None,
            config: SessionConfig::default(),
            validation: ValidationResult::new(),
        };
        session.refresh();
        session
    }

    pub fn with_lab(mut self, lab: Arc<dyn Laboratory>) -> Self {
        self.lab = lab;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn lab(&self) -> &dyn Laboratory {
        self.lab.as_ref()
    }

    /// Outcome of the latest validation pass.
    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn is_valid(&self) -> bool {
        self.validation.is_safe()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.graph.find(name)
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.graph.node(id).map(Node::status)
    }

    pub fn add_node<L: NodeLogic>(&mut self, name: &str, logic: L) -> NodeId {
        let id = self.graph.add_node(name, logic);
        self.refresh();
        id
    }

    pub fn add_boxed(&mut self, name: &str, logic: Box<dyn NodeLogic>) -> NodeId {
        let id = self.graph.add_boxed(name, logic);
        self.refresh();
        id
    }

    pub fn add_group(&mut self, name: &str, inputs: &[&str], outputs: &[&str]) -> NodeId {
        let id = self.graph.add_group(name, inputs, outputs);
        self.refresh();
        id
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, SessionError> {
        let node = self.graph.remove_node(id)?;
        self.refresh();
        Ok(node)
    }

    pub fn connect(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> Result<(), SessionError> {
        self.graph.connect(from, to)?;
        self.refresh();
        Ok(())
    }

    pub fn disconnect(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> Result<(), SessionError> {
        self.graph.disconnect(from, to)?;
        self.refresh();
        Ok(())
    }

    pub fn set_property(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<NodeValue>,
    ) -> Result<(), SessionError> {
        self.graph.set_property(id, name, value)?;
        self.refresh();
        Ok(())
    }

    /// Arbitrary graph edits, subgraphs included, followed by revalidation.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut Graph) -> Result<R, GraphError>) -> Result<R, SessionError> {
        let result = f(&mut self.graph);
        self.refresh();
        Ok(result?)
    }

    /// Applies derived properties, revalidates, and drops tokens of nodes that
    /// are no longer ready.
    pub fn refresh(&mut self) -> &ValidationResult {
        for _ in 0..MAX_DERIVE_ROUNDS {
            let updates = derived_properties(&self.graph);
            if updates.is_empty() {
                break;
            }
            for (path, id, properties) in updates {
                let Some(graph) = self.graph.descend_mut(&path) else {
                    continue;
                };
                for (name, value) in properties {
                    if let Err(e) = graph.set_property(id, &name, value) {
                        log::warn!("derived property {} not applied: {}", name, e);
                    }
                }
            }
        }
        self.validation = verify(&mut self.graph);
        self.simulator.retain_live(&self.graph);
        &self.validation
    }

    /// Force-activates every `READY` node of the top-level graph. Returns how
    /// many nodes became `ACTIVE`.
    pub fn start(&mut self) -> usize {
        let mut activated = 0;
        for id in self.graph.node_ids() {
            if let Some(node) = self.graph.node_mut(id) {
                if node.activate(true) {
                    activated += 1;
                }
            }
        }
        log::info!("session started: {} nodes activated", activated);
        activated
    }

    /// Resets every node at every level and empties the token store.
    pub fn reset(&mut self) {
        for path in self.graph.graph_paths() {
            if let Some(graph) = self.graph.descend_mut(&path) {
                for id in graph.node_ids() {
                    if let Some(node) = graph.node_mut(id) {
                        node.reset();
                    }
                }
            }
        }
        self.simulator.clear();
        self.refresh();
    }

    pub fn tick(&mut self) -> TickReport {
        let ctx = TickContext {
            lab: self.lab.as_ref(),
            telemetry: self.telemetry.as_deref(),
            record_traces: self.config.record_traces,
        };
        self.simulator.tick(&mut self.graph, &ctx)
    }

    /// Ticks until a tick changes nothing. Returns the number of ticks.
    pub fn run_until_idle(&mut self) -> Result<usize, SessionError> {
        for n in 1..=self.config.max_ticks {
            if self.tick().is_quiet() {
                self.settle();
                return Ok(n);
            }
        }
        Err(SessionError::TickLimit(self.config.max_ticks))
    }

    /// Like [`run_until_idle`](Self::run_until_idle), one tick per
    /// `tick_interval`.
    pub async fn drive(&mut self) -> Result<usize, SessionError> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        for n in 1..=self.config.max_ticks {
            interval.tick().await;
            if self.tick().is_quiet() {
                self.settle();
                return Ok(n);
            }
        }
        Err(SessionError::TickLimit(self.config.max_ticks))
    }

    fn settle(&self) {
        if !self.simulator.is_empty() {
            log::warn!(
                "graph settled with {} undelivered tokens",
                self.simulator.tokens().len()
            );
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.flush();
        }
    }
}
