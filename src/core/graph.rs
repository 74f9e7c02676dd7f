use crate::core::NodeValue;
use crate::core::error::GraphError;
use crate::core::group::{GraphInputNode, GraphOutputNode, SubgraphNode};
use crate::core::node::{Node, NodeLogic, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub node: NodeId,
    pub port: String,
}

impl PortRef {
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// A connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: PortRef,
    pub to: PortRef,
}

/// Nodes and edges of one graph level. Each graph, nested or not, has its own
/// instance id scoping its tokens.
#[derive(Debug, Clone)]
pub struct Graph {
    instance: Uuid,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    next_id: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            instance: Uuid::new_v4(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            next_id: 0,
        }
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Adds a node. Names are made unique by appending a counter.
    pub fn add_node<L: NodeLogic>(&mut self, name: &str, logic: L) -> NodeId {
        self.add_boxed(name, Box::new(logic))
    }

    pub fn add_boxed(&mut self, name: &str, logic: Box<dyn NodeLogic>) -> NodeId {
        let node = Node::from_boxed(self.unique_name(name), logic);
        self.insert(node)
    }

    fn insert(&mut self, mut node: Node) -> NodeId {
        if node.role() == NodeRole::Group && node.subgraph.is_none() {
            let mut subgraph = Graph::new();
            subgraph.sync_ports(&node);
            node.subgraph = Some(subgraph);
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        log::debug!("add node {} {} ({})", id, node.name(), node.kind());
        self.nodes.insert(id, node);
        id
    }

    fn unique_name(&self, name: &str) -> String {
        if self.find(name).is_none() {
            return name.to_string();
        }
        (1..)
            .map(|i| format!("{} {}", name, i))
            .find(|candidate| self.find(candidate).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    /// Adds a group node owning an empty subgraph with one boundary node per
    /// port.
    pub fn add_group(&mut self, name: &str, inputs: &[&str], outputs: &[&str]) -> NodeId {
        let mut node = Node::new(self.unique_name(name), SubgraphNode);
        node.set_property("inputs", NodeValue::from(inputs.to_vec()));
        node.set_property("outputs", NodeValue::from(outputs.to_vec()));
        self.insert(node)
    }

    /// Makes the boundary nodes match the ports of the group node owning this
    /// graph.
    fn sync_ports(&mut self, group: &Node) {
        let schema = group.schema();
        let inputs: Vec<&str> = schema.inputs.iter().map(|p| p.name.as_str()).collect();
        let outputs: Vec<&str> = schema.outputs.iter().map(|p| p.name.as_str()).collect();
        self.sync_boundaries(&inputs, &outputs);
    }

    /// Makes the boundary nodes match the given port names.
    fn sync_boundaries(&mut self, inputs: &[&str], outputs: &[&str]) {
        let stale: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| match node.role() {
                NodeRole::GraphInput { port } => !inputs.contains(&port.as_str()),
                NodeRole::GraphOutput { port } => !outputs.contains(&port.as_str()),
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            let _ = self.remove_node(id);
        }
        for port in inputs {
            if self.boundary_input(port).is_none() {
                let id = self.add_node(&format!("in:{}", port), GraphInputNode);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.set_property("port", *port);
                }
            }
        }
        for port in outputs {
            if self.boundary_output(port).is_none() {
                let id = self.add_node(&format!("out:{}", port), GraphOutputNode);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.set_property("port", *port);
                }
            }
        }
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        self.edges.retain(|e| e.from.node != id && e.to.node != id);
        log::debug!("remove node {} {}", id, node.name());
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    pub(crate) fn require_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Looks a node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name() == name)
            .map(|(id, _)| *id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Connects `from` (an output) to `to` (an input). An input has at most one
    /// upstream connection.
    pub fn connect(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> Result<(), GraphError> {
        let source = self.require(from.0)?;
        if source.schema().output_port(from.1).is_none() {
            return Err(GraphError::PortNotFound {
                node: source.name().to_string(),
                port: from.1.to_string(),
            });
        }
        let target = self.require(to.0)?;
        if target.schema().input_port(to.1).is_none() {
            return Err(GraphError::PortNotFound {
                node: target.name().to_string(),
                port: to.1.to_string(),
            });
        }
        if self.upstream(to.0, to.1).is_some() {
            return Err(GraphError::InputAlreadyConnected {
                node: target.name().to_string(),
                port: to.1.to_string(),
            });
        }
        if self.reaches(to.0, from.0) {
            return Err(GraphError::Cycle {
                from: format!("{}.{}", from.0, from.1),
                to: format!("{}.{}", to.0, to.1),
            });
        }
        log::debug!("connect {}.{} -> {}.{}", from.0, from.1, to.0, to.1);
        self.edges.push(Edge {
            from: PortRef::new(from.0, from.1),
            to: PortRef::new(to.0, to.1),
        });
        Ok(())
    }

    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = std::collections::BTreeSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.edges.iter().filter(|e| e.from.node == id).map(|e| e.to.node));
            }
        }
        false
    }

    pub fn disconnect(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> Result<(), GraphError> {
        let before = self.edges.len();
        self.edges.retain(|e| {
            !(e.from.node == from.0 && e.from.port == from.1 && e.to.node == to.0 && e.to.port == to.1)
        });
        if self.edges.len() == before {
            return Err(GraphError::NotConnected {
                from: format!("{}.{}", from.0, from.1),
                to: format!("{}.{}", to.0, to.1),
            });
        }
        Ok(())
    }

    /// The single output feeding an input port, if any.
    pub fn upstream(&self, node: NodeId, port: &str) -> Option<&PortRef> {
        self.edges
            .iter()
            .find(|e| e.to.node == node && e.to.port == port)
            .map(|e| &e.from)
    }

    /// Every input fed by an output port, in connection order.
    pub fn downstream(&self, node: NodeId, port: &str) -> Vec<&PortRef> {
        self.edges
            .iter()
            .filter(|e| e.from.node == node && e.from.port == port)
            .map(|e| &e.to)
            .collect()
    }

    pub fn is_connected(&self, node: NodeId, port: &str) -> bool {
        self.edges.iter().any(|e| {
            (e.to.node == node && e.to.port == port) || (e.from.node == node && e.from.port == port)
        })
    }

    /// Sets a property, then drops edges on ports the node no longer has and
    /// keeps a group's boundary nodes in line with its ports.
    pub fn set_property(&mut self, id: NodeId, name: &str, value: impl Into<NodeValue>) -> Result<(), GraphError> {
        let node = self.require_mut(id)?;
        let changed = node.set_property(name, value);
        if !changed {
            return Ok(());
        }
        if node.role() == NodeRole::Group {
            if let Some(mut subgraph) = node.subgraph.take() {
                subgraph.sync_ports(node);
                node.subgraph = Some(subgraph);
            }
        }
        self.prune_edges(id);
        Ok(())
    }

    pub(crate) fn prune_edges(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let schema = node.schema().clone();
        self.edges.retain(|e| {
            let stale_out = e.from.node == id && schema.output_port(&e.from.port).is_none();
            let stale_in = e.to.node == id && schema.input_port(&e.to.port).is_none();
            if stale_out || stale_in {
                log::debug!("drop edge {}.{} -> {}.{}", e.from.node, e.from.port, e.to.node, e.to.port);
            }
            !(stale_out || stale_in)
        });
    }

    pub fn subgraph(&self, id: NodeId) -> Option<&Graph> {
        self.nodes.get(&id).and_then(|n| n.subgraph.as_ref())
    }

    pub fn subgraph_mut(&mut self, id: NodeId) -> Result<&mut Graph, GraphError> {
        let node = self.require_mut(id)?;
        let name = node.name().to_string();
        node.subgraph.as_mut().ok_or(GraphError::NoSubgraph(name))
    }

    /// Follows a path of group nodes down to a nested graph.
    pub fn descend(&self, path: &[NodeId]) -> Option<&Graph> {
        path.iter().try_fold(self, |graph, id| graph.subgraph(*id))
    }

    pub fn descend_mut(&mut self, path: &[NodeId]) -> Option<&mut Graph> {
        let mut graph = self;
        for id in path {
            graph = graph.nodes.get_mut(id)?.subgraph.as_mut()?;
        }
        Some(graph)
    }

    pub fn clients(&self, address: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| matches!(n.role(), NodeRole::Client { address: a } if a == address))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn servers(&self, address: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| matches!(n.role(), NodeRole::Server { address: a } if a == address))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn boundary_input(&self, port: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| matches!(n.role(), NodeRole::GraphInput { port: p } if p == port))
            .map(|(id, _)| *id)
    }

    pub fn boundary_output(&self, port: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| matches!(n.role(), NodeRole::GraphOutput { port: p } if p == port))
            .map(|(id, _)| *id)
    }

    /// Paths of this graph and every nested graph, parents first.
    pub fn graph_paths(&self) -> Vec<Vec<NodeId>> {
        let mut paths = vec![Vec::new()];
        let mut i = 0;
        while i < paths.len() {
            let path = paths[i].clone();
            if let Some(graph) = self.descend(&path) {
                for (id, node) in &graph.nodes {
                    if node.subgraph.is_some() {
                        let mut child = path.clone();
                        child.push(*id);
                        paths.push(child);
                    }
                }
            }
            i += 1;
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::group::ForEachNode;
    use crate::nodes::arithmetic::Arithmetic;
    use crate::nodes::primitive::IntegerNode;

    #[test]
    fn test_unique_names() {
        let mut graph = Graph::new();
        let a = graph.add_node("Integer", IntegerNode);
        let b = graph.add_node("Integer", IntegerNode);
        assert_eq!(graph.node(a).unwrap().name(), "Integer");
        assert_eq!(graph.node(b).unwrap().name(), "Integer 1");
        assert_eq!(graph.find("Integer 1"), Some(b));
    }

    #[test]
    fn test_single_upstream_per_input() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", IntegerNode);
        let b = graph.add_node("b", IntegerNode);
        let add = graph.add_node("add", Arithmetic::add());
        graph.connect((a, "value"), (add, "a")).unwrap();
        assert!(matches!(
            graph.connect((b, "value"), (add, "a")),
            Err(GraphError::InputAlreadyConnected { .. })
        ));
        graph.connect((b, "value"), (add, "b")).unwrap();
        assert_eq!(graph.upstream(add, "b"), Some(&PortRef::new(b, "value")));
        assert_eq!(graph.downstream(a, "value").len(), 1);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut graph = Graph::new();
        let first = graph.add_node("first", Arithmetic::add());
        let second = graph.add_node("second", Arithmetic::add());
        graph.connect((first, "value"), (second, "a")).unwrap();
        assert!(matches!(
            graph.connect((second, "value"), (first, "a")),
            Err(GraphError::Cycle { .. })
        ));
        assert!(matches!(
            graph.connect((first, "value"), (first, "b")),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_unknown_ports_are_rejected() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", IntegerNode);
        let add = graph.add_node("add", Arithmetic::add());
        assert!(matches!(
            graph.connect((a, "nope"), (add, "a")),
            Err(GraphError::PortNotFound { .. })
        ));
        assert!(matches!(
            graph.disconnect((a, "value"), (add, "a")),
            Err(GraphError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", IntegerNode);
        let add = graph.add_node("add", Arithmetic::add());
        graph.connect((a, "value"), (add, "a")).unwrap();
        graph.remove_node(a).unwrap();
        assert!(graph.edges().is_empty());
        assert!(graph.remove_node(a).is_err());
    }

    #[test]
    fn test_group_boundaries_follow_ports() {
        let mut graph = Graph::new();
        let group = graph.add_group("Group", &["x"], &["y"]);
        let sub = graph.subgraph(group).unwrap();
        assert!(sub.boundary_input("x").is_some());
        assert!(sub.boundary_output("y").is_some());
        assert_ne!(sub.instance(), graph.instance());

        graph
            .set_property(group, "inputs", serde_json::json!(["x", "z"]))
            .unwrap();
        let sub = graph.subgraph(group).unwrap();
        assert!(sub.boundary_input("z").is_some());
        assert_eq!(graph.node(group).unwrap().schema().inputs.len(), 2);
        assert_eq!(graph.graph_paths(), vec![vec![], vec![group]]);
    }

    #[test]
    fn test_for_each_boundaries_follow_ninputs() {
        let mut graph = Graph::new();
        let each = graph.add_node("each", ForEachNode);
        let sub = graph.subgraph(each).unwrap();
        assert!(sub.boundary_input("in1").is_some());
        assert!(sub.boundary_output("out1").is_some());
        assert!(sub.boundary_input("in2").is_none());

        let x = graph.add_node("x", IntegerNode);
        graph.set_property(each, "ninputs", 3).unwrap();
        graph.connect((x, "value"), (each, "in3")).unwrap();
        let sub = graph.subgraph(each).unwrap();
        assert!(sub.boundary_output("out3").is_some());

        graph.set_property(each, "ninputs", 2).unwrap();
        let sub = graph.subgraph(each).unwrap();
        assert!(sub.boundary_input("in3").is_none());
        assert!(sub.boundary_output("out3").is_none());
        assert!(!graph.is_connected(each, "in3"));
    }
}
