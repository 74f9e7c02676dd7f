use super::arithmetic::Arithmetic;
use super::array::{AsArray, Full, Length, Linspace, RandomUniform, Range, Repeat, Slice, Sum, Tile};
use super::flow::{Branch, GroupData, GroupObject, Just, Merge, Pack, Unpack};
use super::inspect::{Display, Inspect};
use super::labware::{DispenseLiquid96Wells, ReadAbsorbance3Colors, ServeLabware, StoreArtifacts, StoreLabware};
use super::logical::{LogicalNot, Switch};
use super::primitive::{BooleanNode, FloatNode, IntegerNode, LiquidClassNode};
use super::remote::{Client, Server};
use crate::core::group::ForEachNode;
use crate::core::node::NodeLogic;
use std::collections::BTreeMap;

/// Builds a fresh node logic.
pub type NodeFactory = fn() -> Box<dyn NodeLogic>;

/// Node kinds by name, for building graphs from saved or user-entered kind
/// names.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: BTreeMap<&'static str, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in kind.
    pub fn builtin() -> Self {
        let factories: [NodeFactory; 36] = [
            || Box::new(IntegerNode),
            || Box::new(FloatNode),
            || Box::new(BooleanNode),
            || Box::new(LiquidClassNode),
            || Box::new(Arithmetic::add()),
            || Box::new(Arithmetic::sub()),
            || Box::new(Arithmetic::mul()),
            || Box::new(Full),
            || Box::new(Range),
            || Box::new(Linspace),
            || Box::new(RandomUniform),
            || Box::new(Repeat),
            || Box::new(Tile),
            || Box::new(Slice),
            || Box::new(Sum),
            || Box::new(Length),
            || Box::new(AsArray),
            || Box::new(LogicalNot),
            || Box::new(Switch),
            || Box::new(GroupData::default()),
            || Box::new(GroupObject::default()),
            || Box::new(Just),
            || Box::new(Branch),
            || Box::new(Merge),
            || Box::new(Pack),
            || Box::new(Unpack),
            || Box::new(ForEachNode),
            || Box::new(Display),
            || Box::new(Inspect),
            || Box::new(Client),
            || Box::new(Server),
            || Box::new(ServeLabware),
            || Box::new(StoreLabware),
            || Box::new(StoreArtifacts),
            || Box::new(DispenseLiquid96Wells),
            || Box::new(ReadAbsorbance3Colors),
        ];
        let mut registry = Self::new();
        for factory in factories {
            registry.register(factory);
        }
        registry
    }

    /// Registers a kind under the name its logic reports. A later
    /// registration of the same kind replaces the earlier one.
    pub fn register(&mut self, factory: NodeFactory) {
        let kind = factory().kind();
        if self.factories.insert(kind, factory).is_some() {
            log::warn!("Node kind {} registered twice", kind);
        }
    }

    pub fn create(&self, kind: &str) -> Option<Box<dyn NodeLogic>> {
        self.factories.get(kind).map(|factory| factory())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}
