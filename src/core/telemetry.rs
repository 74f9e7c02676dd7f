use crate::core::NodeValue;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// A single entry in the execution trace: one input set of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub graph_instance: Uuid,
    pub node: String,
    pub kind: String,
    pub inputs: NodeValue,
    pub outputs: NodeValue,
    pub error: Option<String>,
}

impl TraceEntry {
    /// The produced token on `port`, as `{ "value": .., "traits": .. }`.
    pub fn output(&self, port: &str) -> Option<&NodeValue> {
        self.outputs.get(port)
    }
}

/// Trait for recording execution traces.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self);
}

/// Simple in-memory collector for traces.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Traces of the node with the given name, oldest first.
    pub fn traces_for(&self, node: &str) -> Vec<TraceEntry> {
        self.get_traces()
            .into_iter()
            .filter(|t| t.node == node)
            .collect()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    fn flush(&self) {
        // No-op for memory collector
    }
}
