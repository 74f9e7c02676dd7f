use crate::core::expr::ParseError;
use thiserror::Error;

/// Failures of the trait algebra and of trait resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraitError {
    #[error("Trait {0} cannot be promoted")]
    NotPromotable(String),

    #[error("Cannot promote an empty list of traits")]
    EmptyPromotion,

    #[error("Trait {0} has no single type argument")]
    NotParameterized(String),

    #[error("Unknown name '{0}' in trait expression")]
    UnknownName(String),

    #[error("Invalid trait expression: {0}")]
    Parse(#[from] ParseError),

    #[error("Node {node} has no port '{port}'")]
    UnknownPort { node: String, port: String },

    #[error("Trait of {node}.{port} depends on itself")]
    Unresolvable { node: String, port: String },
}

/// Failures raised while executing a node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Spread inputs have mismatched lengths {lengths:?}")]
    LengthMismatch { lengths: Vec<usize> },

    #[error("Port [{port}] expects a sequence, got {value}")]
    NotASequence { port: String, value: String },

    #[error("Missing input [{0}]")]
    MissingInput(String),

    #[error("Invalid value for [{port}]: {reason}")]
    InvalidValue { port: String, reason: String },

    #[error("Nothing to iterate over for loop item [{0}]")]
    EmptyExpansion(String),

    #[error("Port [{port}] produced {found}, {expected} expected")]
    ContractViolation {
        port: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Trait(#[from] TraitError),

    #[error("Laboratory error: {0}")]
    Lab(#[from] LabError),

    #[error("{0}")]
    Failed(String),
}

/// Topology errors raised by graph edits.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Node {node} has no port '{port}'")]
    PortNotFound { node: String, port: String },

    #[error("Input {node}.{port} is already connected")]
    InputAlreadyConnected { node: String, port: String },

    #[error("No connection from {from} to {to}")]
    NotConnected { from: String, to: String },

    #[error("Node {0} has no subgraph")]
    NoSubgraph(String),

    #[error("Connecting {from} to {to} would create a cycle")]
    Cycle { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("No token for required input {node}.{port}")]
    MissingToken { node: String, port: String },

    #[error("Node {0} not found")]
    UnknownNode(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    #[error("Graph did not settle within {0} ticks")]
    TickLimit(usize),
}

/// Errors reported by a [`Laboratory`](crate::Laboratory) implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LabError {
    #[error("Operation rejected: {0}")]
    Rejected(String),

    #[error("Invalid object: {0}")]
    InvalidObject(String),
}
