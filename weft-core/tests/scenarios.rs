//! Crate-level scenarios exercising the public API end to end: document
//! construction, EIR→LIR lowering, and CFG execution together, rather
//! than any single module in isolation.

use indexmap::IndexMap;
use weft_core::doc::{AirDef, Document, Node, Version};
use weft_core::error::ErrorCode;
use weft_core::expr::Expr;
use weft_core::lower;
use weft_core::orchestrate;
use weft_core::registry::{BuiltinRegistry, NullEffectRegistry};
use weft_core::value::Value;

fn doc_with_result(nodes: IndexMap<weft_core::doc::NodeId, Node>, result: &str) -> Document {
    Document {
        version: Version { major: 1, minor: 0, patch: 0 },
        capabilities: None,
        function_sigs: IndexMap::new(),
        air_defs: IndexMap::new(),
        nodes,
        result: result.into(),
    }
}

fn run_ok(doc: &Document) -> Value {
    let ops = BuiltinRegistry::new();
    let fx = NullEffectRegistry;
    orchestrate::run(doc, &ops, &fx, 10_000).expect("document should validate").value
}

#[test]
fn air_arithmetic_through_the_public_parse_and_run_path() {
    let json = r#"{
        "version": {"major": 1, "minor": 0, "patch": 0},
        "nodes": {
            "a": {"kind": "ExprNode", "id": "a", "expr": {"kind": "Lit", "kind_inner": null}}
        },
        "result": "a"
    }"#;
    // Malformed on purpose: confirms `Document::parse` surfaces a
    // descriptive `anyhow` error instead of panicking on bad wire input.
    assert!(Document::parse(json).is_err());

    let mut nodes = IndexMap::new();
    nodes.insert("a".into(), Node::ExprNode { id: "a".into(), typ: None, expr: Expr::Lit(weft_core::doc::Literal::Int(6)) });
    nodes.insert("b".into(), Node::ExprNode { id: "b".into(), typ: None, expr: Expr::Lit(weft_core::doc::Literal::Int(7)) });
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::Call {
                ns: "core".into(),
                name: "mul".into(),
                args: vec![Expr::Ref { id: "a".into() }, Expr::Ref { id: "b".into() }],
            },
        },
    );
    let doc = doc_with_result(nodes, "r");
    assert_eq!(run_ok(&doc).as_int(), Some(42));
}

#[test]
fn if_expr_lowers_and_runs_both_branches() {
    for (cond, expected) in [(true, 1i64), (false, 0i64)] {
        let mut nodes = IndexMap::new();
        nodes.insert(
            "r".into(),
            Node::ExprNode {
                id: "r".into(),
                typ: None,
                expr: Expr::If {
                    cond: Box::new(Expr::Lit(weft_core::doc::Literal::Bool(cond))),
                    then: Box::new(Expr::Lit(weft_core::doc::Literal::Int(1))),
                    else_: Box::new(Expr::Lit(weft_core::doc::Literal::Int(0))),
                },
            },
        );
        let doc = doc_with_result(nodes, "r");
        let lowered = lower::lower(&doc).expect("lowering should succeed");
        assert!(matches!(lowered.node("r"), Some(Node::BlockNode { .. })));
        assert_eq!(run_ok(&lowered).as_int(), Some(expected));
    }
}

#[test]
fn while_false_loop_lowers_to_a_cfg_that_never_enters_the_body() {
    let mut nodes = IndexMap::new();
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::Seq {
                first: Box::new(Expr::While {
                    cond: Box::new(Expr::Lit(weft_core::doc::Literal::Bool(false))),
                    body: Box::new(Expr::Lit(weft_core::doc::Literal::Void)),
                }),
                then: Box::new(Expr::Lit(weft_core::doc::Literal::Int(99))),
            },
        },
    );
    let doc = doc_with_result(nodes, "r");
    let lowered = lower::lower(&doc).expect("lowering should succeed");
    assert_eq!(run_ok(&lowered).as_int(), Some(99));
}

#[test]
fn fix_point_recursion_computes_a_factorial() {
    // air_defs: fact(n) = if n == 0 then 1 else n * fact(n - 1)
    let mut air_defs = IndexMap::new();
    air_defs.insert(
        "fact".into(),
        AirDef {
            params: vec!["n".into()],
            body: Expr::If {
                cond: Box::new(Expr::Call {
                    ns: "core".into(),
                    name: "eq".into(),
                    args: vec![Expr::Var { name: "n".into() }, Expr::Lit(weft_core::doc::Literal::Int(0))],
                }),
                then: Box::new(Expr::Lit(weft_core::doc::Literal::Int(1))),
                else_: Box::new(Expr::Call {
                    ns: "core".into(),
                    name: "mul".into(),
                    args: vec![
                        Expr::Var { name: "n".into() },
                        Expr::AirRef {
                            ns: "self".into(),
                            name: "fact".into(),
                            args: vec![Expr::Call {
                                ns: "core".into(),
                                name: "sub".into(),
                                args: vec![Expr::Var { name: "n".into() }, Expr::Lit(weft_core::doc::Literal::Int(1))],
                            }],
                        },
                    ],
                }),
            },
        },
    );
    let mut nodes = IndexMap::new();
    nodes.insert(
        "r".into(),
        Node::ExprNode {
            id: "r".into(),
            typ: None,
            expr: Expr::AirRef { ns: "self".into(), name: "fact".into(), args: vec![Expr::Lit(weft_core::doc::Literal::Int(5))] },
        },
    );
    let doc = Document {
        version: Version { major: 1, minor: 0, patch: 0 },
        capabilities: None,
        function_sigs: IndexMap::new(),
        air_defs,
        nodes,
        result: "r".into(),
    };
    assert_eq!(run_ok(&doc).as_int(), Some(120));
}

#[test]
fn map_and_set_hold_mixed_primitive_keys_across_a_round_trip() {
    let mut m = Value::empty_map();
    m = m.map_insert(&Value::String("name".into()), Value::String("weft".into())).unwrap();
    m = m.map_insert(&Value::Int(1), Value::Bool(true)).unwrap();
    assert_eq!(m.map_get(&Value::String("name".into())).unwrap(), Value::String("weft".into()));
    assert_eq!(m.map_get(&Value::Int(1)).unwrap(), Value::Bool(true));
    assert!(!m.map_contains(&Value::Int(2)).unwrap());

    let mut s = Value::empty_set();
    s = s.set_insert(&Value::Int(10)).unwrap();
    s = s.set_insert(&Value::Int(10)).unwrap();
    assert_eq!(s.set_to_list().unwrap().list_len().unwrap(), 1);
}

#[test]
fn unbound_air_reference_surfaces_as_a_value_level_error_not_a_panic() {
    let mut nodes = IndexMap::new();
    nodes.insert("r".into(), Node::ExprNode { id: "r".into(), typ: None, expr: Expr::Ref { id: "missing".into() } });
    let doc = doc_with_result(nodes, "r");
    let v = run_ok(&doc);
    assert_eq!(v.as_error().map(|e| e.code), Some(ErrorCode::UnboundIdentifier));
}
