//! Graph validation: checks connections and traits of every node, nested
//! groups included, and moves nodes between `NOT_READY` and `READY`.

use crate::core::binding::{PortContext, Scope};
use crate::core::graph::{Graph, NodeId};
use crate::core::node::{Node, NodeRole, NodeStatus};
use crate::core::traits::Trait;
use std::fmt;

/// Represents an issue found during graph validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    /// A node cannot run: it is held in `NOT_READY`.
    Error(String),
    /// The graph can run but probably not as intended.
    Warning(String),
}

/// The result of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|i| match i {
            ValidationIssue::Error(msg) => Some(msg.as_str()),
            ValidationIssue::Warning(_) => None,
        })
    }

    pub fn print_summary(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_safe() && !self.has_warnings() {
            return write!(f, "Graph validation passed: every node is ready.");
        }
        let mut first = true;
        for issue in &self.issues {
            if !first {
                writeln!(f)?;
            }
            first = false;
            match issue {
                ValidationIssue::Error(msg) => write!(f, "Error: {}", msg)?,
                ValidationIssue::Warning(msg) => write!(f, "Warning: {}", msg)?,
            }
        }
        Ok(())
    }
}

/// The outcome for one node, computed before any status is touched.
struct Verdict {
    path: Vec<NodeId>,
    id: NodeId,
    error: Option<String>,
}

/// Validates the graph and every nested subgraph, updating node statuses.
/// The result's `is_safe()` is true when every node validated.
pub fn verify(graph: &mut Graph) -> ValidationResult {
    let mut verdicts = Vec::new();
    let mut result = ValidationResult::new();
    {
        let scope = Scope::root(graph);
        collect(&scope, &[], &mut verdicts, &mut result);
    }

    for verdict in verdicts {
        let Some(node) = graph
            .descend_mut(&verdict.path)
            .and_then(|g| g.node_mut(verdict.id))
        else {
            continue;
        };
        match verdict.error {
            Some(message) => {
                if node.status() != NodeStatus::NotReady || node.message() != message {
                    log::warn!("{} is not ready: {}", node.name(), message);
                    node.invalidate(message);
                }
            }
            None => node.revalidate(),
        }
    }
    result
}

/// Validates one graph level. Returns true when every node is valid.
fn collect(
    scope: &Scope<'_>,
    path: &[NodeId],
    verdicts: &mut Vec<Verdict>,
    result: &mut ValidationResult,
) -> bool {
    let graph = scope.graph();
    let mut valid = true;
    for (id, node) in graph.nodes() {
        let mut error = check_node(scope, id, node).err();

        if node.role() == NodeRole::Group {
            let mut child_path = path.to_vec();
            child_path.push(id);
            let child_valid = match scope.child(id) {
                Some(child) => collect(&child, &child_path, verdicts, result),
                None => false,
            };
            if error.is_none() && !child_valid {
                error = Some("Invalid subgraph".to_string());
            }
        }

        if let Some(message) = &error {
            valid = false;
            result.add_error(format!("{}: {}", node.name(), message));
        } else if is_isolated(graph, id, node) {
            result.add_warning(format!("{}: not connected to anything", node.name()));
        }
        verdicts.push(Verdict {
            path: path.to_vec(),
            id,
            error,
        });
    }
    valid
}

fn is_isolated(graph: &Graph, id: NodeId, node: &Node) -> bool {
    let has_ports = !node.schema().inputs.is_empty() || !node.schema().outputs.is_empty();
    has_ports
        && !node.role().is_boundary()
        && !matches!(node.role(), NodeRole::Client { .. } | NodeRole::Server { .. })
        && !graph.edges().iter().any(|e| e.from.node == id || e.to.node == id)
}

/// The generic port checks followed by the kind-specific one.
fn check_node(scope: &Scope<'_>, id: NodeId, node: &Node) -> Result<(), String> {
    let graph = scope.graph();

    for input in &node.schema().inputs {
        let connected = graph.upstream(id, &input.name).is_some();
        if !connected {
            if !input.port.free && !input.port.io {
                return Err(format!("Port [{}] is disconnected", input.name));
            }
            continue;
        }
        let traits = scope
            .input_trait(id, &input.name)
            .map_err(|e| e.to_string())?;
        if !traits.acceptable(&input.port.traits) {
            return Err(format!(
                "Port [{}] traits mismatches. [{}] expected. [{}] given",
                input.name, input.port.traits, traits
            ));
        }
    }

    for output in &node.schema().outputs {
        if output.port.io {
            continue;
        }
        let traits = scope
            .output_trait(id, &output.name)
            .map_err(|e| e.to_string())?;
        if !is_object_output(&traits, &output.port.traits) {
            continue;
        }
        match graph.downstream(id, &output.name).len() {
            0 => return Err(format!("Port [{}] is disconnected", output.name)),
            1 => {}
            n => {
                return Err(format!(
                    "Port [{}] carries an object but feeds {} inputs",
                    output.name, n
                ));
            }
        }
    }

    match &node.role() {
        NodeRole::Client { address } if graph.servers(address).is_empty() => {
            return Err(format!("No connection [{}]", address));
        }
        NodeRole::Server { address } => {
            let clients = graph.clients(address);
            if clients.is_empty() {
                return Err(format!("No connection [{}]", address));
            }
            let mut remote: Option<Trait> = None;
            for client in clients {
                let Some(port) = graph
                    .node(client)
                    .and_then(|c| c.schema().outputs.iter().find(|p| p.port.io))
                else {
                    continue;
                };
                let traits = scope
                    .output_trait(client, &port.name)
                    .map_err(|e| e.to_string())?;
                let traits = traits.strip_optional().clone();
                match &remote {
                    Some(first) if first != &traits => {
                        return Err(format!("Inconsistent types [{}, {}]", first, traits));
                    }
                    _ => remote = Some(traits),
                }
            }
        }
        _ => {}
    }

    let ctx = scope
        .context(id)
        .ok_or_else(|| format!("Node {} vanished", id))?;
    node.logic().check(&ctx)
}

/// Object-bearing outputs are consumed exactly once, so they must feed exactly
/// one input.
fn is_object_output(resolved: &Trait, declared: &Trait) -> bool {
    resolved.is_object() || declared.is_object()
}

/// Convenience for kind-specific checks: every listed input resolves to the
/// same trait as `first`.
pub fn check_same_traits(ctx: &PortContext<'_>, first: &str, others: &[String]) -> Result<(), String> {
    if !ctx.is_connected(first) {
        return Ok(());
    }
    let expected = ctx.input_trait(first).map_err(|e| e.to_string())?;
    for name in others {
        if !ctx.is_connected(name) {
            continue;
        }
        let traits = ctx.input_trait(name).map_err(|e| e.to_string())?;
        if traits != expected {
            return Err(format!(
                "Port [{}] has wrong traits [{}]. [{}] expected",
                name, traits, expected
            ));
        }
    }
    Ok(())
}
