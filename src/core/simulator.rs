//! The graph scheduler. Owns the token store and advances every node's state
//! machine one step per tick.

use crate::core::NodeValue;
use crate::core::binding::{Scope, with_scope};
use crate::core::error::{SimulatorError, TraitError};
use crate::core::graph::{Graph, NodeId};
use crate::core::lab::Laboratory;
use crate::core::node::{NodeRole, NodeStatus, TraitPlan};
use crate::core::telemetry::{Telemetry, TraceEntry};
use crate::core::token::{Token, TokenMap};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Which side of a node a stored token sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// Delivered, waiting to be consumed by the node.
    Input,
    /// Produced, waiting to be transmitted downstream.
    Output,
}

/// Address of one token in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey {
    pub instance: Uuid,
    pub node: NodeId,
    pub slot: Slot,
    pub port: String,
}

impl TokenKey {
    pub fn new(instance: Uuid, node: NodeId, slot: Slot, port: impl Into<String>) -> Self {
        Self {
            instance,
            node,
            slot,
            port: port.into(),
        }
    }
}

/// Collaborators of one tick.
#[derive(Clone, Copy)]
pub struct TickContext<'a> {
    pub lab: &'a dyn Laboratory,
    pub telemetry: Option<&'a dyn Telemetry>,
    pub record_traces: bool,
}

/// What happened during one tick, summed over every graph level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Nothing was in flight; the tick did no work.
    pub idle: bool,
    pub executed: usize,
    pub failed: usize,
    pub transmitted: usize,
    /// Results fetched from output queues and nodes returned to `READY`.
    pub collected: usize,
    pub activated: usize,
    pub started: usize,
}

impl TickReport {
    /// True when the tick changed nothing.
    pub fn is_quiet(&self) -> bool {
        self.idle
            || self.executed
                + self.failed
                + self.transmitted
                + self.collected
                + self.activated
                + self.started
                == 0
    }
}

type PlanKey = (Vec<NodeId>, NodeId);

/// Token store and tick loop.
#[derive(Debug, Default)]
pub struct Simulator {
    tokens: BTreeMap<TokenKey, Token>,
    /// Groups whose subgraph is processing an input set.
    in_flight: BTreeSet<(Uuid, NodeId)>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &BTreeMap<TokenKey, Token> {
        &self.tokens
    }

    pub fn token(&self, instance: Uuid, node: NodeId, slot: Slot, port: &str) -> Option<&Token> {
        self.tokens.get(&TokenKey::new(instance, node, slot, port))
    }

    /// Places a token directly into a slot.
    pub fn put(&mut self, key: TokenKey, token: Token) {
        self.tokens.insert(key, token);
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.in_flight.clear();
    }

    /// Purges every token stored for the node.
    pub fn reset(&mut self, instance: Uuid, node: NodeId) {
        self.tokens
            .retain(|k, _| !(k.instance == instance && k.node == node));
        self.in_flight.remove(&(instance, node));
    }

    /// Drops tokens of nodes that are gone or held in `NOT_READY`, at every
    /// level.
    pub fn retain_live(&mut self, root: &Graph) {
        let mut live = BTreeSet::new();
        for path in root.graph_paths() {
            let Some(graph) = root.descend(&path) else {
                continue;
            };
            for (id, node) in graph.nodes() {
                if node.status() != NodeStatus::NotReady {
                    live.insert((graph.instance(), id));
                }
            }
        }
        let before = self.tokens.len();
        self.tokens
            .retain(|k, _| live.contains(&(k.instance, k.node)));
        self.in_flight.retain(|k| live.contains(k));
        if self.tokens.len() != before {
            log::debug!("purged {} tokens", before - self.tokens.len());
        }
    }

    /// Hands the node its stored input tokens and enters `RUNNING`. Every
    /// required input must be present.
    pub fn run(&mut self, graph: &mut Graph, id: NodeId) -> Result<(), SimulatorError> {
        let instance = graph.instance();
        let node = graph
            .node_mut(id)
            .ok_or_else(|| SimulatorError::UnknownNode(id.to_string()))?;
        for port in node.required_inputs() {
            if !self
                .tokens
                .contains_key(&TokenKey::new(instance, id, Slot::Input, port))
            {
                return Err(SimulatorError::MissingToken {
                    node: node.name().to_string(),
                    port: port.to_string(),
                });
            }
        }
        let mut tokens = TokenMap::new();
        for port in &node.schema().inputs {
            let key = TokenKey::new(instance, id, Slot::Input, port.name.as_str());
            if let Some(token) = self.tokens.remove(&key) {
                tokens.insert(port.name.clone(), token);
            }
        }
        node.run(tokens);
        Ok(())
    }

    /// Moves at most one pending result of the node into its output slots.
    /// Returns false while earlier tokens are still held.
    pub fn fetch(&mut self, graph: &mut Graph, id: NodeId) -> bool {
        let instance = graph.instance();
        let Some(node) = graph.node_mut(id) else {
            return false;
        };
        let held = self
            .tokens
            .keys()
            .any(|k| k.instance == instance && k.node == id && k.slot == Slot::Output);
        if held {
            return false;
        }
        let Some(outputs) = node.pop_output() else {
            return false;
        };
        for (port, token) in outputs {
            self.tokens
                .insert(TokenKey::new(instance, id, Slot::Output, port), token);
        }
        true
    }

    /// Delivers the node's output tokens. A client's remote token goes to its
    /// server; an object token to one waiting consumer; a data token to every
    /// waiting consumer. Tokens nobody waits for yet stay in place.
    pub fn transmit(&mut self, graph: &Graph, id: NodeId) -> usize {
        let instance = graph.instance();
        let Some(node) = graph.node(id) else {
            return 0;
        };
        let held: Vec<TokenKey> = self
            .tokens
            .range(TokenKey::new(instance, id, Slot::Output, "")..)
            .take_while(|(k, _)| k.instance == instance && k.node == id && k.slot == Slot::Output)
            .map(|(k, _)| k.clone())
            .collect();

        let mut delivered = 0;
        for key in held {
            let is_remote = node
                .schema()
                .output_port(&key.port)
                .is_some_and(|p| p.port.io);
            if let (NodeRole::Client { address }, true) = (node.role(), is_remote) {
                delivered += self.transmit_remote(graph, &key, &address);
                continue;
            }

            let targets = graph.downstream(id, &key.port);
            if targets.is_empty() {
                log::debug!("{}.{}: no consumer, token dropped", node.name(), key.port);
                self.tokens.remove(&key);
                continue;
            }
            let waiting: Vec<TokenKey> = targets
                .iter()
                .filter(|t| {
                    graph
                        .node(t.node)
                        .is_some_and(|n| n.status() == NodeStatus::Active)
                })
                .map(|t| TokenKey::new(instance, t.node, Slot::Input, t.port.as_str()))
                .filter(|k| !self.tokens.contains_key(k))
                .collect();
            if waiting.is_empty() {
                continue;
            }
            let Some(token) = self.tokens.remove(&key) else {
                continue;
            };
            if token.is_object() {
                if waiting.len() > 1 {
                    log::warn!(
                        "{}.{}: object token has {} waiting consumers, delivering to the first",
                        node.name(),
                        key.port,
                        waiting.len()
                    );
                }
                self.tokens.insert(waiting[0].clone(), token);
                delivered += 1;
            } else {
                delivered += waiting.len();
                for target in waiting {
                    self.tokens.insert(target, token.clone());
                }
            }
        }
        delivered
    }

    fn transmit_remote(&mut self, graph: &Graph, key: &TokenKey, address: &str) -> usize {
        let Some(server) = graph.servers(address).into_iter().next() else {
            log::warn!("no server at [{}], token dropped", address);
            self.tokens.remove(key);
            return 0;
        };
        let Some(port) = graph
            .node(server)
            .and_then(|n| n.schema().inputs.iter().find(|p| p.port.io))
        else {
            self.tokens.remove(key);
            return 0;
        };
        let target = TokenKey::new(key.instance, server, Slot::Input, port.name.as_str());
        if self.tokens.contains_key(&target) {
            return 0;
        }
        let Some(mut token) = self.tokens.remove(key) else {
            return 0;
        };
        if token.traits.is_optional() {
            if token.value.is_null() {
                log::debug!("absent remote token for [{}] dropped", address);
                return 0;
            }
            token.traits = token.traits.strip_optional().clone();
        }
        self.tokens.insert(target, token);
        1
    }

    /// True when nothing can happen without outside input.
    pub fn is_idle(&self, graph: &Graph) -> bool {
        self.tokens.is_empty() && self.in_flight.is_empty() && !is_busy(graph)
    }

    /// One scheduler step over the whole graph, nested groups included.
    pub fn tick(&mut self, graph: &mut Graph, ctx: &TickContext<'_>) -> TickReport {
        if self.is_idle(graph) {
            return TickReport {
                idle: true,
                ..TickReport::default()
            };
        }
        let plans = collect_plans(graph);
        let mut report = TickReport::default();
        self.tick_level(graph, &[], &plans, ctx, &mut report);
        log::debug!("tick: {:?}", report);
        report
    }

    fn tick_level(
        &mut self,
        graph: &mut Graph,
        path: &[NodeId],
        plans: &HashMap<PlanKey, Result<TraitPlan, TraitError>>,
        ctx: &TickContext<'_>,
        report: &mut TickReport,
    ) {
        let ids = graph.node_ids();

        // (1) advance running nodes
        for &id in &ids {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.status() != NodeStatus::Running {
                continue;
            }
            match node.role() {
                NodeRole::Group => self.advance_group(graph, path, id, plans, ctx, report),
                role if role.is_boundary() => {}
                _ => execute_one(graph, path, id, plans, ctx, report),
            }
        }

        // (2) collect finished nodes and deliver held tokens
        for &id in &ids {
            if graph.node(id).is_some_and(|n| n.status() == NodeStatus::Finished)
                && self.fetch(graph, id)
            {
                report.collected += 1;
            }
        }
        for &id in &ids {
            report.transmitted += self.transmit(graph, id);
        }
        for &id in &ids {
            if let Some(node) = graph.node_mut(id) {
                if node.status() == NodeStatus::Finished {
                    node.complete();
                    if node.status() == NodeStatus::Ready {
                        report.collected += 1;
                    }
                }
            }
        }

        // (3) activate
        for &id in &ids {
            if let Some(node) = graph.node_mut(id) {
                if node.activate(false) {
                    report.activated += 1;
                }
            }
        }

        // (4) start nodes whose inputs are all present
        let instance = graph.instance();
        for &id in &ids {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.status() != NodeStatus::Active || node.role().is_boundary() {
                continue;
            }
            let ready = node.required_inputs().all(|port| {
                self.tokens
                    .contains_key(&TokenKey::new(instance, id, Slot::Input, port))
            });
            if ready && self.run(graph, id).is_ok() {
                report.started += 1;
            }
        }
    }

    fn advance_group(
        &mut self,
        graph: &mut Graph,
        path: &[NodeId],
        id: NodeId,
        plans: &HashMap<PlanKey, Result<TraitPlan, TraitError>>,
        ctx: &TickContext<'_>,
        report: &mut TickReport,
    ) {
        let key = (graph.instance(), id);
        let Some(node) = graph.node_mut(id) else {
            return;
        };
        if !self.in_flight.contains(&key) {
            let Some(inputs) = node.pop_input() else {
                node.finish_if_drained();
                return;
            };
            let Some(child) = node.subgraph.as_mut() else {
                node.fail("Group has no subgraph");
                return;
            };
            self.seed(child, inputs);
            self.in_flight.insert(key);
            report.started += 1;
        }

        let mut child_path = path.to_vec();
        child_path.push(id);
        let (collected, failure) = match node.subgraph.as_mut() {
            Some(child) => {
                self.tick_level(child, &child_path, plans, ctx, report);
                let failure = child
                    .nodes()
                    .find(|(_, n)| n.status() == NodeStatus::Error)
                    .map(|(_, n)| format!("{} failed: {}", n.name(), n.message()));
                (self.collect_group(child), failure)
            }
            None => (None, Some("Group has no subgraph".to_string())),
        };

        if let Some(message) = failure {
            self.in_flight.remove(&key);
            node.fail(message);
            report.failed += 1;
            return;
        }
        if let Some(outputs) = collected {
            self.in_flight.remove(&key);
            node.push_output(outputs);
            node.finish_if_drained();
            report.executed += 1;
        }
    }

    /// Places a group's input set on its boundary nodes and starts the
    /// subgraph.
    fn seed(&mut self, child: &mut Graph, inputs: TokenMap) {
        let instance = child.instance();
        for (port, token) in inputs {
            match child.boundary_input(&port) {
                Some(boundary) => {
                    self.tokens
                        .insert(TokenKey::new(instance, boundary, Slot::Output, "value"), token);
                }
                None => log::warn!("no boundary node for group input [{}]", port),
            }
        }
        for id in child.node_ids() {
            if let Some(node) = child.node_mut(id) {
                node.activate(true);
            }
        }
    }

    /// The group's outputs once every boundary output holds a token. A group
    /// without outputs completes when its subgraph is idle.
    fn collect_group(&mut self, child: &Graph) -> Option<TokenMap> {
        let instance = child.instance();
        let outputs: Vec<(NodeId, String)> = child
            .nodes()
            .filter_map(|(id, n)| match n.role() {
                NodeRole::GraphOutput { port } => Some((id, port)),
                _ => None,
            })
            .collect();

        if outputs.is_empty() {
            let pending = self.tokens.keys().any(|k| k.instance == instance);
            return (!pending && !is_busy(child)).then(TokenMap::new);
        }
        let keys: Vec<TokenKey> = outputs
            .iter()
            .map(|(id, _)| TokenKey::new(instance, *id, Slot::Input, "value"))
            .collect();
        if !keys.iter().all(|k| self.tokens.contains_key(k)) {
            return None;
        }
        let mut collected = TokenMap::new();
        for ((_, port), key) in outputs.into_iter().zip(keys) {
            if let Some(token) = self.tokens.remove(&key) {
                collected.insert(port, token);
            }
        }
        Some(collected)
    }
}

/// Nodes that will make progress on the next tick, at any level.
fn is_busy(graph: &Graph) -> bool {
    graph.nodes().any(|(_, node)| {
        let status = node.status();
        let runnable_source = status == NodeStatus::Active
            && !node.role().is_boundary()
            && node.required_inputs().next().is_none();
        matches!(status, NodeStatus::Running | NodeStatus::Finished)
            || runnable_source
            || !node.output_queue().is_empty()
            || node.subgraph().is_some_and(is_busy)
    })
}

/// Trait plans of every running node, computed before anything is mutated.
fn collect_plans(root: &Graph) -> HashMap<PlanKey, Result<TraitPlan, TraitError>> {
    let scope = Scope::root(root);
    let mut plans = HashMap::new();
    for path in root.graph_paths() {
        with_scope(&scope, &path, |scope| {
            for (id, node) in scope.graph().nodes() {
                let role = node.role();
                if node.status() == NodeStatus::Running && role != NodeRole::Group && !role.is_boundary() {
                    plans.insert((path.clone(), id), scope.plan(id));
                }
            }
        });
    }
    plans
}

fn execute_one(
    graph: &mut Graph,
    path: &[NodeId],
    id: NodeId,
    plans: &HashMap<PlanKey, Result<TraitPlan, TraitError>>,
    ctx: &TickContext<'_>,
    report: &mut TickReport,
) {
    let instance = graph.instance();
    let Some(node) = graph.node_mut(id) else {
        return;
    };
    let Some(inputs) = node.pop_input() else {
        node.finish_if_drained();
        return;
    };
    let trace_inputs = serde_json::to_value(&inputs).unwrap_or(NodeValue::Null);

    let result = match plans.get(&(path.to_vec(), id)) {
        Some(Ok(plan)) => node.execute(inputs, plan, ctx.lab).map_err(|e| e.to_string()),
        Some(Err(e)) => Err(e.to_string()),
        None => Err("No trait plan for a running node".to_string()),
    };

    let (outputs, error) = match result {
        Ok(execution) => {
            let outputs = serde_json::to_value(&execution.outputs).unwrap_or(NodeValue::Null);
            node.apply_updates(execution.updates);
            node.push_output(execution.outputs);
            node.finish_if_drained();
            report.executed += 1;
            (outputs, None)
        }
        Err(message) => {
            node.fail(message.clone());
            report.failed += 1;
            (NodeValue::Null, Some(message))
        }
    };

    if ctx.record_traces {
        if let Some(telemetry) = ctx.telemetry {
            telemetry.record(TraceEntry {
                timestamp: chrono::Utc::now().timestamp_millis(),
                graph_instance: instance,
                node: node.name().to_string(),
                kind: node.kind().to_string(),
                inputs: trace_inputs,
                outputs,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lab::SimulatedLab;
    use crate::core::telemetry::MemoryTelemetry;
    use crate::core::traits::Trait;
    use crate::core::validation::verify;
    use crate::nodes::arithmetic::Arithmetic;
    use crate::nodes::primitive::IntegerNode;
    use serde_json::json;

    fn add_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let x = graph.add_node("x", IntegerNode);
        let y = graph.add_node("y", IntegerNode);
        let add = graph.add_node("add", Arithmetic::add());
        graph.set_property(x, "value", 5).unwrap();
        graph.set_property(y, "value", 3).unwrap();
        graph.connect((x, "value"), (add, "a")).unwrap();
        graph.connect((y, "value"), (add, "b")).unwrap();
        (graph, x, y, add)
    }

    #[test]
    fn test_idle_graph_fast_path() {
        let (mut graph, ..) = add_graph();
        verify(&mut graph);
        let lab = SimulatedLab::new();
        let mut simulator = Simulator::new();
        let ctx = TickContext {
            lab: &lab,
            telemetry: None,
            record_traces: false,
        };
        let report = simulator.tick(&mut graph, &ctx);
        assert!(report.idle);
    }

    #[test]
    fn test_run_requires_tokens() {
        let (mut graph, _, _, add) = add_graph();
        verify(&mut graph);
        let mut simulator = Simulator::new();
        assert!(matches!(
            simulator.run(&mut graph, add),
            Err(SimulatorError::MissingToken { .. })
        ));
        assert_eq!(graph.node(add).unwrap().status(), NodeStatus::Ready);
    }

    #[test]
    fn test_add_runs_to_completion() {
        let (mut graph, x, y, add) = add_graph();
        verify(&mut graph);
        graph.node_mut(x).unwrap().activate(true);
        graph.node_mut(y).unwrap().activate(true);

        let lab = SimulatedLab::new();
        let telemetry = MemoryTelemetry::new();
        let ctx = TickContext {
            lab: &lab,
            telemetry: Some(&telemetry),
            record_traces: true,
        };
        let mut simulator = Simulator::new();
        for _ in 0..20 {
            if simulator.tick(&mut graph, &ctx).idle {
                break;
            }
        }
        let traces = telemetry.traces_for("add");
        assert_eq!(traces.len(), 1);
        assert_eq!(
            traces[0].output("value"),
            Some(&json!({"value": 8, "traits": "Integer"}))
        );
        assert_eq!(graph.node(add).unwrap().status(), NodeStatus::Ready);
        assert!(simulator.is_empty());
    }

    #[test]
    fn test_data_token_waits_for_consumer() {
        let (mut graph, x, _, add) = add_graph();
        verify(&mut graph);
        let instance = graph.instance();
        let mut simulator = Simulator::new();
        simulator.put(
            TokenKey::new(instance, x, Slot::Output, "value"),
            Token::new(5, Trait::INTEGER),
        );
        assert_eq!(simulator.transmit(&graph, x), 0);
        assert!(simulator.token(instance, x, Slot::Output, "value").is_some());

        graph.node_mut(add).unwrap().activate(false);
        assert_eq!(simulator.transmit(&graph, x), 1);
        assert!(simulator.token(instance, add, Slot::Input, "a").is_some());
        assert!(simulator.token(instance, x, Slot::Output, "value").is_none());
    }

    #[test]
    fn test_reset_purges_node_tokens() {
        let (graph, x, _, add) = add_graph();
        let instance = graph.instance();
        let mut simulator = Simulator::new();
        simulator.put(
            TokenKey::new(instance, add, Slot::Input, "a"),
            Token::new(5, Trait::INTEGER),
        );
        simulator.put(
            TokenKey::new(instance, x, Slot::Output, "value"),
            Token::new(5, Trait::INTEGER),
        );
        simulator.reset(instance, add);
        assert_eq!(simulator.tokens().len(), 1);
    }
}
