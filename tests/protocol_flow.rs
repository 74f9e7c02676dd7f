//! End-to-end protocol runs through the public session API.

use labflow::nodes::arithmetic::{Arithmetic, Operator};
use labflow::nodes::flow::GroupData;
use labflow::nodes::inspect::Display;
use labflow::nodes::labware::{ServeLabware, StoreLabware};
use labflow::nodes::logical::Switch;
use labflow::nodes::primitive::{BooleanNode, IntegerNode};
use labflow::nodes::remote::{Client, Server};
use labflow::prelude::*;
use labflow::{ForEachNode, LabCall};
use serde_json::json;
use std::sync::Arc;

fn integer(session: &mut Session, name: &str, value: i64) -> NodeId {
    let id = session.add_node(name, IntegerNode);
    session.set_property(id, "value", value).unwrap();
    id
}

fn shown(session: &Session, display: NodeId) -> serde_json::Value {
    let text = session
        .node(display)
        .and_then(|n| n.property("in1"))
        .and_then(|v| v.as_str())
        .expect("display has not received a token");
    serde_json::from_str(text).unwrap()
}

#[test]
fn test_add_two_integers() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let mut session = Session::new().with_telemetry(telemetry.clone());
    let x = integer(&mut session, "x", 5);
    let y = integer(&mut session, "y", 3);
    let add = session.add_node("add", Arithmetic::add());
    session.connect((x, "value"), (add, "a")).unwrap();
    session.connect((y, "value"), (add, "b")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    let traces = telemetry.traces_for("add");
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].output("value"), Some(&json!({"value": 8, "traits": "Integer"})));
    assert!(traces[0].error.is_none());
    assert_eq!(session.status(add), Some(NodeStatus::Ready));
    assert!(session.simulator().is_empty());
}

#[test]
fn test_grouped_values_expand_through_add() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let mut session = Session::new().with_telemetry(telemetry.clone());
    let group = session.add_node("group", GroupData::new(3));
    for (i, value) in [1, 2, 3].into_iter().enumerate() {
        let source = integer(&mut session, &format!("x{}", i + 1), value);
        session
            .connect((source, "value"), (group, &format!("in{}", i + 1)))
            .unwrap();
    }
    let offset = integer(&mut session, "offset", 10);
    let add = session.add_node("add", Arithmetic::add());
    session.connect((group, "value"), (add, "a")).unwrap();
    session.connect((offset, "value"), (add, "b")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    let traces = telemetry.traces_for("add");
    assert_eq!(traces.len(), 1);
    assert_eq!(
        traces[0].output("value"),
        Some(&json!({"value": [11, 12, 13], "traits": "Spread[Integer]"}))
    );
}

/// Passes its input through unchanged.
#[derive(Clone)]
struct Identity;

impl NodeLogic for Identity {
    fn kind(&self) -> &'static str {
        "Identity"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::DATA).expand())
            .output(OutputSpec::new("out1", Trait::DATA).expand().expression("in1"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let value = inputs.value("in1")?.clone();
        Ok(TokenMap::from([ctx.emit("out1", value)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[test]
fn test_identity_expansion_keeps_values() {
    let mut session = Session::new();
    let group = session.add_node("group", GroupData::new(3));
    for i in 1..=3 {
        let source = integer(&mut session, &format!("x{}", i), i);
        session.connect((source, "value"), (group, &format!("in{}", i))).unwrap();
    }
    let identity = session.add_node("identity", Identity);
    let display = session.add_node("display", Display);
    session.connect((group, "value"), (identity, "in1")).unwrap();
    session.connect((identity, "out1"), (display, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    assert_eq!(
        shown(&session, display),
        json!({"value": [1, 2, 3], "traits": "Spread[Integer]"})
    );
}

#[test]
fn test_mismatched_spreads_fail_the_node() {
    let mut session = Session::new();
    let long = session.add_node("long", GroupData::new(3));
    let short = session.add_node("short", GroupData::default());
    for i in 1..=3 {
        let source = integer(&mut session, &format!("a{}", i), i);
        session.connect((source, "value"), (long, &format!("in{}", i))).unwrap();
    }
    for i in 1..=2 {
        let source = integer(&mut session, &format!("b{}", i), i);
        session.connect((source, "value"), (short, &format!("in{}", i))).unwrap();
    }
    let add = session.add_node("add", Arithmetic::add());
    session.connect((long, "value"), (add, "a")).unwrap();
    session.connect((short, "value"), (add, "b")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    assert_eq!(session.status(add), Some(NodeStatus::Error));
    let message = session.node(add).unwrap().message().to_string();
    assert!(message.contains("mismatched lengths"), "{}", message);

    session.reset();
    assert_eq!(session.status(add), Some(NodeStatus::Ready));
    assert!(session.simulator().is_empty());
}

#[test]
fn test_each_run_serves_new_labware() {
    let lab = Arc::new(SimulatedLab::new());
    let mut session = Session::new().with_lab(lab.clone());
    let serve = session.add_node("serve", ServeLabware);
    let store = session.add_node("store", StoreLabware);
    session.connect((serve, "value"), (store, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    for _ in 0..2 {
        session.start();
        session.run_until_idle().unwrap();
    }

    let journal = lab.journal();
    let served: Vec<String> = journal
        .iter()
        .filter_map(|call| match call {
            LabCall::Serve { id, traits } => {
                assert_eq!(traits, "Plate96");
                Some(id.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(served.len(), 2);
    assert_ne!(served[0], served[1]);
    let disposed = journal
        .iter()
        .filter(|call| matches!(call, LabCall::Dispose { .. }))
        .count();
    assert_eq!(disposed, 2);
}

#[test]
fn test_switch_routes_second_input() {
    let mut session = Session::new();
    let x = integer(&mut session, "x", 1);
    let y = integer(&mut session, "y", 2);
    let cond = session.add_node("cond", BooleanNode);
    session.set_property(cond, "value", false).unwrap();
    let switch = session.add_node("switch", Switch);
    let display = session.add_node("display", Display);
    session.connect((x, "value"), (switch, "in1")).unwrap();
    session.connect((y, "value"), (switch, "in2")).unwrap();
    session.connect((cond, "out"), (switch, "cond")).unwrap();
    session.connect((switch, "value"), (display, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    assert_eq!(shown(&session, display), json!({"value": 2, "traits": "Integer"}));
}

#[test]
fn test_subgraph_runs_between_its_boundaries() {
    let mut session = Session::new();
    let x = integer(&mut session, "x", 4);
    let group = session.add_group("inc", &["in"], &["out"]);
    let display = session.add_node("display", Display);
    session
        .edit(|graph| {
            let sub = graph.subgraph_mut(group)?;
            let input = sub.boundary_input("in").expect("boundary input");
            let output = sub.boundary_output("out").expect("boundary output");
            let one = sub.add_node("one", IntegerNode);
            sub.set_property(one, "value", 1)?;
            let add = sub.add_node("add", Arithmetic::add());
            sub.connect((input, "value"), (add, "a"))?;
            sub.connect((one, "value"), (add, "b"))?;
            sub.connect((add, "value"), (output, "value"))
        })
        .unwrap();
    session.connect((x, "value"), (group, "in")).unwrap();
    session.connect((group, "out"), (display, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    assert_eq!(shown(&session, display), json!({"value": 5, "traits": "Integer"}));
    assert_eq!(session.status(group), Some(NodeStatus::Ready));
}

#[test]
fn test_for_each_hands_items_on() {
    let mut session = Session::new();
    let x = integer(&mut session, "x", 4);
    let y = integer(&mut session, "y", 10);
    let each = session.add_node("each", ForEachNode);
    session.set_property(each, "ninputs", 2).unwrap();
    let first = session.add_node("first", Display);
    let second = session.add_node("second", Display);
    session
        .edit(|graph| {
            let sub = graph.subgraph_mut(each)?;
            let in1 = sub.boundary_input("in1").expect("boundary in1");
            let out1 = sub.boundary_output("out1").expect("boundary out1");
            let in2 = sub.boundary_input("in2").expect("boundary in2");
            let out2 = sub.boundary_output("out2").expect("boundary out2");
            let one = sub.add_node("one", IntegerNode);
            sub.set_property(one, "value", 1)?;
            let add = sub.add_node("add", Arithmetic::add());
            let identity = sub.add_node("identity", Identity);
            sub.connect((in1, "value"), (add, "a"))?;
            sub.connect((one, "value"), (add, "b"))?;
            sub.connect((add, "value"), (out1, "value"))?;
            sub.connect((in2, "value"), (identity, "in1"))?;
            sub.connect((identity, "out1"), (out2, "value"))
        })
        .unwrap();
    session.connect((x, "value"), (each, "in1")).unwrap();
    session.connect((y, "value"), (each, "in2")).unwrap();
    session.connect((each, "out1"), (first, "in1")).unwrap();
    session.connect((each, "out2"), (second, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    assert_eq!(shown(&session, first), json!({"value": 5, "traits": "Integer"}));
    assert_eq!(shown(&session, second), json!({"value": 10, "traits": "Integer"}));
}

#[test]
fn test_client_delivers_to_server() {
    let lab = Arc::new(SimulatedLab::new());
    let mut session = Session::new().with_lab(lab.clone());
    let serve = session.add_node("serve", ServeLabware);
    session.set_property(serve, "value", "Tube (5ml)").unwrap();
    let client = session.add_node("client", Client);
    let server = session.add_node("server", Server);
    let store = session.add_node("store", StoreLabware);
    session.set_property(store, "where", "shelf").unwrap();
    session.connect((serve, "value"), (client, "in1")).unwrap();
    session.connect((server, "out1"), (store, "in1")).unwrap();
    assert!(session.is_valid(), "{}", session.validation());

    session.start();
    session.run_until_idle().unwrap();

    let journal = lab.journal();
    let Some(LabCall::Serve { id: served, traits }) = journal.first() else {
        panic!("nothing served: {:?}", journal);
    };
    assert_eq!(traits, "Tube5");
    assert!(journal.iter().any(|call| matches!(
        call,
        LabCall::Store { id, location } if id == served && location == "shelf"
    )));
}

#[test]
fn test_registry_builds_a_runnable_graph() {
    let registry = NodeRegistry::builtin();
    let telemetry = Arc::new(MemoryTelemetry::new());
    let mut session = Session::new().with_telemetry(telemetry.clone());
    let x = session.add_boxed("x", registry.create("Integer").unwrap());
    let y = session.add_boxed("y", registry.create("Integer").unwrap());
    let mul = session.add_boxed("mul", registry.create("Mul").unwrap());
    session.set_property(x, "value", 6).unwrap();
    session.set_property(y, "value", 7).unwrap();
    session.connect((x, "value"), (mul, "a")).unwrap();
    session.connect((y, "value"), (mul, "b")).unwrap();
    let logic = session.node(mul).and_then(|n| n.logic_as::<Arithmetic>());
    assert_eq!(logic.map(Arithmetic::operator), Some(Operator::Mul));

    session.start();
    session.run_until_idle().unwrap();

    let traces = telemetry.traces_for("mul");
    assert_eq!(traces[0].output("value"), Some(&json!({"value": 42, "traits": "Integer"})));
}

#[tokio::test]
async fn test_drive_on_an_interval() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let config = SessionConfig::from_json(r#"{"tick_interval_ms": 1}"#).unwrap();
    let mut session = Session::new()
        .with_telemetry(telemetry.clone())
        .with_config(config);
    let x = integer(&mut session, "x", 2);
    let add = session.add_node("add", Arithmetic::add());
    session.connect((x, "value"), (add, "a")).unwrap();
    session.connect((x, "value"), (add, "b")).unwrap();

    session.start();
    let ticks = session.drive().await.unwrap();
    assert!(ticks > 1);
    assert_eq!(
        telemetry.traces_for("add")[0].output("value"),
        Some(&json!({"value": 4, "traits": "Integer"}))
    );
}
