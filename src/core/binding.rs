//! Port trait binding: the effective trait of a port, resolved on demand by
//! walking connections, subgraph boundaries and remote client/server pairs,
//! then evaluating output expressions.

use crate::core::error::TraitError;
use crate::core::graph::{Graph, NodeId};
use crate::core::node::{Node, NodeRole, Properties, TraitPlan};
use crate::core::port::OutputPort;
use crate::core::traits::Trait;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};

const MAX_DEPTH: u32 = 512;

/// A graph level seen from the root, so that boundary ports can reach the
/// enclosing group's connections.
pub struct Scope<'a> {
    graph: &'a Graph,
    parent: Option<(&'a Scope<'a>, NodeId)>,
    depth: Cell<u32>,
}

/// Input traits of a node after expansion and optional stripping.
struct Bindings {
    inputs: HashMap<String, Trait>,
    stripped: HashMap<String, Trait>,
    expansion: BTreeSet<String>,
    optional: bool,
}

struct DepthGuard<'a>(&'a Cell<u32>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl<'a> Scope<'a> {
    pub fn root(graph: &'a Graph) -> Self {
        Scope {
            graph,
            parent: None,
            depth: Cell::new(0),
        }
    }

    /// The scope of a group node's subgraph.
    pub fn child<'b>(&'b self, group: NodeId) -> Option<Scope<'b>> {
        Some(Scope {
            graph: self.graph.subgraph(group)?,
            parent: Some((self, group)),
            depth: Cell::new(0),
        })
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    fn root_depth(&self) -> &Cell<u32> {
        match self.parent {
            Some((parent, _)) => parent.root_depth(),
            None => &self.depth,
        }
    }

    fn enter(&self, node: &Node, port: &str) -> Result<DepthGuard<'_>, TraitError> {
        let depth = self.root_depth();
        if depth.get() >= MAX_DEPTH {
            return Err(TraitError::Unresolvable {
                node: node.name().to_string(),
                port: port.to_string(),
            });
        }
        depth.set(depth.get() + 1);
        Ok(DepthGuard(depth))
    }

    fn node(&self, id: NodeId, port: &str) -> Result<&'a Node, TraitError> {
        self.graph.node(id).ok_or_else(|| TraitError::UnknownPort {
            node: id.to_string(),
            port: port.to_string(),
        })
    }

    pub fn context(&self, id: NodeId) -> Option<PortContext<'_>> {
        let node = self.graph.node(id)?;
        Some(PortContext {
            scope: self,
            id,
            node,
        })
    }

    /// Resolved trait of an input port.
    pub fn input_trait(&self, id: NodeId, port: &str) -> Result<Trait, TraitError> {
        let node = self.node(id, port)?;
        let declared = node
            .schema()
            .input_port(port)
            .ok_or_else(|| TraitError::UnknownPort {
                node: node.name().to_string(),
                port: port.to_string(),
            })?;

        if let NodeRole::Server { address } = node.role() {
            if declared.port.io {
                if let Some(traits) = self.remote_trait(&address)? {
                    return Ok(traits);
                }
            }
        }

        match self.graph.upstream(id, port) {
            Some(upstream) => {
                let source = self.node(upstream.node, &upstream.port)?;
                if let NodeRole::GraphInput { port: outer } = source.role() {
                    return self.outer_input(&outer, source);
                }
                self.output_trait(upstream.node, &upstream.port)
            }
            None => Ok(node
                .schema()
                .default_token(port, node.properties())
                .map(|t| t.traits)
                .unwrap_or_else(|| declared.port.traits.clone())),
        }
    }

    /// The trait a server receives: its first client's remote output, without
    /// the `Optional` layer.
    fn remote_trait(&self, address: &str) -> Result<Option<Trait>, TraitError> {
        let Some(client) = self.graph.clients(address).into_iter().next() else {
            return Ok(None);
        };
        let node = self.node(client, "")?;
        let Some(remote) = node.schema().outputs.iter().find(|p| p.port.io) else {
            return Ok(None);
        };
        let traits = self.output_trait(client, &remote.name)?;
        Ok(Some(traits.strip_optional().clone()))
    }

    fn outer_input(&self, outer: &str, boundary: &Node) -> Result<Trait, TraitError> {
        match self.parent {
            Some((parent, group)) => parent.input_trait(group, outer),
            None => Err(TraitError::UnknownPort {
                node: boundary.name().to_string(),
                port: outer.to_string(),
            }),
        }
    }

    /// Resolved trait of an output port.
    pub fn output_trait(&self, id: NodeId, port: &str) -> Result<Trait, TraitError> {
        let node = self.node(id, port)?;
        let _guard = self.enter(node, port)?;
        let output = node
            .schema()
            .output_port(port)
            .ok_or_else(|| TraitError::UnknownPort {
                node: node.name().to_string(),
                port: port.to_string(),
            })?;

        if let NodeRole::GraphInput { port: outer } = node.role() {
            return self.outer_input(&outer, node);
        }

        let ctx = PortContext {
            scope: self,
            id,
            node,
        };
        if let Some(result) = node.logic().resolve_output(port, &ctx) {
            return result;
        }
        if node.role() == NodeRole::Group {
            return self.group_output(id, node, port);
        }
        let bindings = self.bindings(id)?;
        Ok(evaluate(output, &bindings)?.1)
    }

    fn group_output(&self, id: NodeId, node: &Node, port: &str) -> Result<Trait, TraitError> {
        let unknown = || TraitError::UnknownPort {
            node: node.name().to_string(),
            port: port.to_string(),
        };
        let child = self.child(id).ok_or_else(unknown)?;
        let boundary = child.graph.boundary_output(port).ok_or_else(unknown)?;
        child.input_trait(boundary, "value")
    }

    fn bindings(&self, id: NodeId) -> Result<Bindings, TraitError> {
        let node = self.node(id, "")?;
        let mut bindings = Bindings {
            inputs: HashMap::new(),
            stripped: HashMap::new(),
            expansion: BTreeSet::new(),
            optional: false,
        };
        for input in &node.schema().inputs {
            let traits = self.input_trait(id, &input.name)?;
            let mut element = traits.clone();
            if input.port.expand {
                if let Trait::Spread(inner) = &traits {
                    if inner.acceptable(&input.port.traits) {
                        bindings.expansion.insert(input.name.clone());
                        element = (**inner).clone();
                    }
                }
            }
            if input.port.optional && element.is_optional() {
                bindings.optional = true;
                element = element.strip_optional().clone();
            }
            bindings.inputs.insert(input.name.clone(), traits);
            bindings.stripped.insert(input.name.clone(), element);
        }
        Ok(bindings)
    }

    /// Whether any optional input of the node resolves to `Optional[..]`.
    pub fn is_optional_node(&self, id: NodeId) -> Result<bool, TraitError> {
        Ok(self.bindings(id)?.optional)
    }

    /// Every resolved trait of a node, as needed to execute it.
    pub fn plan(&self, id: NodeId) -> Result<TraitPlan, TraitError> {
        let node = self.node(id, "")?;
        let bindings = self.bindings(id)?;
        let mut plan = TraitPlan {
            inputs: bindings.inputs.clone(),
            optional: bindings.optional,
            ..TraitPlan::default()
        };
        let ctx = PortContext {
            scope: self,
            id,
            node,
        };
        for output in &node.schema().outputs {
            let (element, resolved) = match node.logic().resolve_output(&output.name, &ctx) {
                Some(result) => {
                    let traits = result?;
                    (traits.clone(), traits)
                }
                None if node.role() == NodeRole::Group => {
                    let traits = self.group_output(id, node, &output.name)?;
                    (traits.clone(), traits)
                }
                None => evaluate(output, &bindings)?,
            };
            plan.elements.insert(output.name.clone(), element);
            plan.outputs.insert(output.name.clone(), resolved);
        }
        Ok(plan)
    }
}

/// Evaluates an output's formula, returning the element-level trait handed to
/// `core_execute` and the fully resolved trait.
fn evaluate(output: &OutputPort, bindings: &Bindings) -> Result<(Trait, Trait), TraitError> {
    let element = output.formula().eval(&bindings.stripped)?;
    let core = if output.port.optional {
        Trait::optional(element.clone())
    } else {
        element.clone()
    };
    let mut resolved = if bindings.optional && output.port.optional {
        Trait::optional(element)
    } else {
        element
    };
    if !bindings.expansion.is_empty() && !output.is_loop_item(&bindings.expansion) {
        resolved = Trait::spread(resolved);
    }
    Ok((core, resolved))
}

/// A node seen through its scope; handed to [`NodeLogic`](crate::NodeLogic)
/// hooks.
pub struct PortContext<'a> {
    scope: &'a Scope<'a>,
    id: NodeId,
    node: &'a Node,
}

impl<'a> PortContext<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn graph(&self) -> &'a Graph {
        self.scope.graph
    }

    pub fn properties(&self) -> &'a Properties {
        self.node.properties()
    }

    pub fn input_trait(&self, port: &str) -> Result<Trait, TraitError> {
        self.scope.input_trait(self.id, port)
    }

    pub fn output_trait(&self, port: &str) -> Result<Trait, TraitError> {
        self.scope.output_trait(self.id, port)
    }

    pub fn is_connected(&self, port: &str) -> bool {
        self.scope.graph.is_connected(self.id, port)
    }
}

/// Runs `f` in the scope of the graph at `path` below `root`.
pub fn with_scope<R>(scope: &Scope<'_>, path: &[NodeId], f: impl FnOnce(&Scope<'_>) -> R) -> Option<R> {
    match path.split_first() {
        None => Some(f(scope)),
        Some((group, rest)) => {
            let child = scope.child(*group)?;
            with_scope(&child, rest, f)
        }
    }
}

/// Property updates requested by nodes whose connections changed, for every
/// graph level.
pub fn derived_properties(root: &Graph) -> Vec<(Vec<NodeId>, NodeId, Properties)> {
    let scope = Scope::root(root);
    let mut updates = Vec::new();
    for path in root.graph_paths() {
        with_scope(&scope, &path, |scope| {
            for (id, node) in scope.graph().nodes() {
                let ctx = PortContext { scope, id, node };
                if let Some(props) = node.logic().derive_properties(&ctx) {
                    let changed = props.iter().any(|(k, v)| node.property(k) != Some(v));
                    if changed {
                        updates.push((path.clone(), id, props));
                    }
                }
            }
        });
    }
    updates
}
