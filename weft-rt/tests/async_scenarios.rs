//! End-to-end PIR scenarios driven through [`weft_rt::runtime::Runtime`]:
//! fork/join, select with and without a timeout, and the race/deadlock
//! detectors wired up the way a real caller would use them.

use indexmap::IndexMap;
use weft_core::doc::{Document, Literal, Node, NodeId, Version};
use weft_core::expr::Expr;
use weft_core::value::{ChannelVariant, Value};
use weft_rt::config::RuntimeConfigBuilder;
use weft_rt::runtime::Runtime;

fn doc(nodes: IndexMap<NodeId, Node>, result: &str) -> Document {
    Document {
        version: Version { major: 1, minor: 0, patch: 0 },
        capabilities: None,
        function_sigs: IndexMap::new(),
        air_defs: IndexMap::new(),
        nodes,
        result: result.into(),
    }
}

fn expr_node(id: &str, expr: Expr) -> (NodeId, Node) {
    (id.into(), Node::ExprNode { id: id.into(), typ: None, expr })
}

#[test]
fn fork_join_sums_three_concurrently_spawned_branches() {
    let body = Expr::Let {
        name: "xs".into(),
        value: Box::new(Expr::Par {
            branches: vec![Expr::Lit(Literal::Int(1)), Expr::Lit(Literal::Int(2)), Expr::Lit(Literal::Int(3))],
        }),
        body: Box::new(Expr::Call {
            ns: "core".into(),
            name: "add".into(),
            args: vec![
                Expr::Call {
                    ns: "core".into(),
                    name: "add".into(),
                    args: vec![
                        Expr::Call { ns: "core".into(), name: "get".into(), args: vec![Expr::Var { name: "xs".into() }, Expr::Lit(Literal::Int(0))] },
                        Expr::Call { ns: "core".into(), name: "get".into(), args: vec![Expr::Var { name: "xs".into() }, Expr::Lit(Literal::Int(1))] },
                    ],
                },
                Expr::Call { ns: "core".into(), name: "get".into(), args: vec![Expr::Var { name: "xs".into() }, Expr::Lit(Literal::Int(2))] },
            ],
        }),
    };

    let mut nodes = IndexMap::new();
    nodes.insert("r".into(), Node::ExprNode { id: "r".into(), typ: None, expr: body });
    let document = doc(nodes, "r");
    let lowered = weft_core::lower::lower(&document).expect("lowering should succeed");

    let config = RuntimeConfigBuilder::default().build().unwrap();
    let runtime = Runtime::with_builtin_operators(lowered, config).unwrap();
    let outcome = runtime.execute();
    assert_eq!(outcome.value.as_int(), Some(6));
}

#[test]
fn select_returns_the_already_resolved_future_immediately() {
    let mut nodes = IndexMap::new();
    let (id, node) = expr_node("answer", Expr::Lit(Literal::Int(42)));
    nodes.insert(id, node);
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::Let {
                name: "fut".into(),
                value: Box::new(Expr::Spawn { entry: "answer".into(), args: vec![] }),
                body: Box::new(Expr::Select {
                    futures: vec![Expr::Var { name: "fut".into() }],
                    timeout: None,
                    fallback: None,
                    return_index: false,
                }),
            },
        },
    );
    let document = doc(nodes, "r");
    let lowered = weft_core::lower::lower(&document).expect("lowering should succeed");

    let config = RuntimeConfigBuilder::default().build().unwrap();
    let runtime = Runtime::with_builtin_operators(lowered, config).unwrap();
    let outcome = runtime.execute();
    assert_eq!(outcome.value.as_int(), Some(42));
}

#[test]
fn select_with_timeout_falls_back_once_no_future_is_ever_ready() {
    // `waiter` blocks forever: it receives on a channel nobody ever
    // sends to, so its future never resolves and the `select` below can
    // only be satisfied by its timeout.
    let mut nodes = IndexMap::new();
    nodes.insert(
        "waiter".into(),
        Node::ExprNode { id: "waiter".into(), typ: None, expr: Expr::Recv { channel: Box::new(Expr::Var { name: "arg0".into() }) } },
    );
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::Let {
                name: "chan".into(),
                value: Box::new(Expr::Channel { variant: ChannelVariant::Mpsc, buffer_size: 1 }),
                body: Box::new(Expr::Let {
                    name: "fut".into(),
                    value: Box::new(Expr::Spawn { entry: "waiter".into(), args: vec![Expr::Var { name: "chan".into() }] }),
                    body: Box::new(Expr::Select {
                        futures: vec![Expr::Var { name: "fut".into() }],
                        timeout: Some(5),
                        fallback: Some(Box::new(Expr::Lit(Literal::Int(-1)))),
                        return_index: false,
                    }),
                }),
            },
        },
    );
    let document = doc(nodes, "r");
    let lowered = weft_core::lower::lower(&document).expect("lowering should succeed");

    let config = RuntimeConfigBuilder::default().build().unwrap();
    let runtime = Runtime::with_builtin_operators(lowered, config).unwrap();
    let outcome = runtime.execute();
    assert_eq!(outcome.value.as_int(), Some(-1));
}

#[test]
fn race_detector_flags_two_tasks_writing_the_same_location() {
    // Each spawned branch asks the host for its own id via the
    // `currentTaskId` effect, then records a write to "x" under it —
    // no sync point is ever recorded, so the two writes race.
    let write_x = Expr::Seq {
        first: Box::new(Expr::Let {
            name: "me".into(),
            value: Box::new(Expr::Effect { op: "currentTaskId".into(), args: vec![] }),
            body: Box::new(Expr::Effect {
                op: "recordAccess".into(),
                args: vec![Expr::Var { name: "me".into() }, Expr::Lit(Literal::String("x".into())), Expr::Lit(Literal::String("write".into()))],
            }),
        }),
        then: Box::new(Expr::Lit(Literal::Void)),
    };

    let mut nodes = IndexMap::new();
    nodes.insert(
        "r".into(),
        Node::ExprNode { id: "r".into(), typ: None, expr: Expr::Par { branches: vec![write_x.clone(), write_x] } },
    );
    let document = doc(nodes, "r");
    let lowered = weft_core::lower::lower(&document).expect("lowering should succeed");

    let config = RuntimeConfigBuilder::default().detect_races(true).build().unwrap();
    let runtime = Runtime::with_builtin_operators(lowered, config).unwrap();
    let races = runtime.race_detector_handle();
    let _outcome = runtime.execute();

    let reports = races.borrow().detect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].location, "x");
    assert_eq!(reports[0].conflict, weft_rt::detect::race::ConflictType::WW);
}

#[test]
fn deadlock_detector_flags_two_tasks_holding_each_others_wanted_lock() {
    // Each branch asks the host for its own id, records that it holds
    // one lock, then records that it's waiting on the other branch's
    // lock — t1 holds l1 and waits on l2, t2 holds l2 and waits on l1,
    // so the wait-for graph has exactly one two-node cycle.
    fn holds_then_waits(held: &str, wait: &str) -> Expr {
        Expr::Let {
            name: "me".into(),
            value: Box::new(Expr::Effect { op: "currentTaskId".into(), args: vec![] }),
            body: Box::new(Expr::Seq {
                first: Box::new(Expr::Effect {
                    op: "trackLockAcquired".into(),
                    args: vec![Expr::Var { name: "me".into() }, Expr::Lit(Literal::String(held.into()))],
                }),
                then: Box::new(Expr::Effect {
                    op: "trackLockAcquisition".into(),
                    args: vec![Expr::Var { name: "me".into() }, Expr::Lit(Literal::String(wait.into()))],
                }),
            }),
        }
    }

    let mut nodes = IndexMap::new();
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::Par { branches: vec![holds_then_waits("l1", "l2"), holds_then_waits("l2", "l1")] },
        },
    );
    let document = doc(nodes, "r");
    let lowered = weft_core::lower::lower(&document).expect("lowering should succeed");

    let config = RuntimeConfigBuilder::default().detect_deadlocks(true).build().unwrap();
    let runtime = Runtime::with_builtin_operators(lowered, config).unwrap();
    let deadlocks = runtime.deadlock_detector_handle();
    let _outcome = runtime.execute();

    let cycles = deadlocks.borrow().detect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].tasks.len(), 2);
    assert_eq!(cycles[0].locks.len(), 2);
}
