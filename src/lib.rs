//! # Labflow
//!
//! A typed dataflow engine for laboratory-automation protocols. A protocol is
//! a graph of nodes exchanging tokens; every port carries a *trait*, a
//! structural type from a small algebra that separates physical objects
//! (plates, tubes) from data (numbers, arrays, liquid classes).
//!
//! ## Features
//!
//! - **Trait Algebra**: nominal kinds plus `Array`, `Any`, `Spread`, `Optional`
//!   and `Struct` wrappers, unions and numeric promotion
//! - **Port Binding**: output traits computed from connected inputs through a
//!   tiny expression language, across subgraphs and remote client/server pairs
//! - **Execution Contract**: spread expansion, optional propagation and trait
//!   checks applied uniformly around every node
//! - **Scheduler**: a tick-driven token simulator where objects are consumed
//!   exactly once and data is copied
//! - **Validation**: per-node readiness with the same messages a protocol
//!   editor shows
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labflow::prelude::*;
//! use labflow::nodes::arithmetic::Arithmetic;
//! use labflow::nodes::primitive::IntegerNode;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), SessionError> {
//! let telemetry = Arc::new(MemoryTelemetry::new());
//! let mut session = Session::new().with_telemetry(telemetry.clone());
//!
//! let x = session.add_node("x", IntegerNode);
//! let y = session.add_node("y", IntegerNode);
//! let add = session.add_node("add", Arithmetic::add());
//! session.set_property(x, "value", 5)?;
//! session.set_property(y, "value", 3)?;
//! session.connect((x, "value"), (add, "a"))?;
//! session.connect((y, "value"), (add, "b"))?;
//!
//! session.validation().print_summary();
//! session.start();
//! session.run_until_idle()?;
//!
//! for trace in telemetry.traces_for("add") {
//!     println!("{:?}", trace.output("value"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`nodes`]: The built-in node catalogue and its [`NodeRegistry`]
//! - [`prelude`]: Commonly used types and traits (import with `use labflow::prelude::*`)

// ============================================================================
// Core Module
// ============================================================================

mod core;

pub mod nodes;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Trait algebra
pub use core::expr::{ParseError, TraitExpr, Wrapper};
pub use core::traits::{Kind, Trait};

// Errors
pub use core::error::{ExecutionError, GraphError, LabError, SessionError, SimulatorError, TraitError};

// Tokens and ports
pub use core::port::{InputPort, InputSpec, OutputPort, OutputSpec, PortSchema, PortTraits, infer_trait};
pub use core::token::{Token, TokenMap};

// Nodes and graphs
pub use core::binding::{PortContext, Scope, derived_properties, with_scope};
pub use core::graph::{Edge, Graph, NodeId, PortRef};
pub use core::group::{ForEachNode, GraphInputNode, GraphOutputNode, SubgraphNode};
pub use core::node::{
    Activation, ExecContext, Execution, Node, NodeLogic, NodeRole, NodeStatus, Properties, ResolvedInputs,
    TraitPlan,
};
pub use core::{AsAny, NodeValue};

// Validation and scheduling
pub use core::simulator::{Simulator, Slot, TickContext, TickReport, TokenKey};
pub use core::validation::{ValidationIssue, ValidationResult, check_same_traits, verify};

// Sessions and the laboratory
pub use core::config::SessionConfig;
pub use core::lab::{LabCall, Laboratory, SimulatedLab, WELLS};
pub use core::session::Session;
pub use core::telemetry::{MemoryTelemetry, Telemetry, TraceEntry};

pub use nodes::registry::{NodeFactory, NodeRegistry};

// ============================================================================
// Prelude Modules - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to build, validate and run a protocol.
///
/// # Example
/// ```rust
/// use labflow::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Activation,
        ExecContext,
        ExecutionError,
        Graph,
        GraphError,
        InputSpec,
        Laboratory,
        MemoryTelemetry,
        Node,
        NodeId,
        NodeLogic,
        NodeRegistry,
        NodeStatus,
        NodeValue,
        OutputSpec,
        PortContext,
        PortSchema,
        Properties,
        ResolvedInputs,
        Session,
        SessionConfig,
        SessionError,
        SimulatedLab,
        Telemetry,
        Token,
        TokenMap,
        Trait,
        ValidationResult,
    };
}

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
