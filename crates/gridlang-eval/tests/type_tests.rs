//! Integration tests for user types: construction, inheritance, members
//! and access rules.

use gridlang_eval::{EvalError, Script, Sheet, Value};
use gridlang_types::ast::{BinOp, Stmt};
use gridlang_types::build::*;
use pretty_assertions::assert_eq;

fn run(stmts: Vec<Stmt>) -> Sheet {
    let prog = program(stmts);
    Script::new(&prog).run().expect("script failed")
}

fn fail(stmts: Vec<Stmt>) -> EvalError {
    let prog = program(stmts);
    Script::new(&prog).run().expect_err("script should fail")
}

/// A record with two typed fields and no Inputs.
fn point() -> Vec<Stmt> {
    vec![
        define_type(
            "Point",
            vec![
                global(decl("x").of_type("number")),
                global(decl("y").of_type("number")),
            ],
        ),
        define_member("Point", "Sum", vec![ret(add(var("x"), var("y")))]),
        define_member(
            "Point",
            "Origin",
            vec![ret(new_obj("Point", vec![num(0.0), num(0.0)]))],
        ),
    ]
}

/// A type with a hidden balance, a public reader and a private helper.
fn account() -> Vec<Stmt> {
    vec![
        define_type("Account", vec![global(decl("$balance").init(num(5.0)))]),
        define_member("Account", "Balance", vec![ret(var("balance"))]),
        define_helper(
            "Account",
            "Bump",
            vec![push(to_name("balance"), add(var("balance"), num(1.0)))],
        ),
        define_member("Account", "Deposit", vec![effect(call("Bump", vec![]))]),
    ]
}

fn with(defs: Vec<Stmt>, stmts: Vec<Stmt>) -> Vec<Stmt> {
    defs.into_iter().chain(stmts).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Construction
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_positional_new_fills_fields() {
    let sheet = run(with(
        point(),
        vec![
            global(decl("p").equals(new_obj("Point", vec![num(1.0), num(2.0)]))),
            assign(at("A1"), field(var("p"), "x")),
            assign(at("A2"), field(var("p"), "y")),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(1.0));
    assert_eq!(sheet.number("A2"), Some(2.0));
}

#[test]
fn test_too_many_positional_values() {
    let err = fail(with(
        point(),
        vec![global(decl("p").equals(new_obj(
            "Point",
            vec![num(1.0), num(2.0), num(3.0)],
        )))],
    ));
    assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)), "got {err:?}");
}

#[test]
fn test_new_with_sets_fields() {
    let sheet = run(with(
        point(),
        vec![
            global(decl("p").equals(new_with("Point", vec![], vec![set("x", num(7.0))]))),
            assign(at("A1"), field(var("p"), "x")),
            assign(at("A2"), field(var("p"), "y")),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(7.0));
    assert_eq!(sheet.get("A2"), None);
}

#[test]
fn test_record_declared_from_array() {
    let sheet = run(with(
        point(),
        vec![
            global(decl("p").of_type("Point").equals(nums(&[3.0, 4.0]))),
            assign(at("A1"), method(var("p"), "Sum", vec![])),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(7.0));
}

#[test]
fn test_constructor_inputs() {
    let sheet = run(vec![
        define_type(
            "Circle",
            vec![
                input(&["r"], Some("number"), None),
                global(decl("diameter").equals(mul(var("r"), num(2.0)))),
            ],
        ),
        global(decl("c").equals(new_obj("Circle", vec![num(1.5)]))),
        assign(at("A1"), field(var("c"), "diameter")),
    ]);
    assert_eq!(sheet.number("A1"), Some(3.0));
}

#[test]
fn test_unknown_type() {
    let err = fail(vec![global(decl("p").equals(new_obj("Nowhere", vec![])))]);
    assert!(matches!(err, EvalError::UndefinedReference(_)), "got {err:?}");
}

#[test]
fn test_object_spills_as_row() {
    let sheet = run(with(
        point(),
        vec![assign(
            anchor("B1"),
            new_obj("Point", vec![num(1.0), num(2.0)]),
        )],
    ));
    assert_eq!(sheet.number("B1"), Some(1.0));
    assert_eq!(sheet.number("C1"), Some(2.0));
}

// ══════════════════════════════════════════════════════════════════════════════
// Inheritance
// ══════════════════════════════════════════════════════════════════════════════

fn shapes() -> Vec<Stmt> {
    vec![
        define_type(
            "Shape",
            vec![
                input(&["name"], Some("text"), Some(text("shape"))),
                global(decl("label").equals(var("name"))),
            ],
        ),
        define_subtype(
            "Square",
            "Shape",
            vec![
                input(&["side"], Some("number"), None),
                effect(super_call(vec![text("sq")])),
                global(decl("area").equals(mul(var("side"), var("side")))),
            ],
        ),
        define_subtype(
            "Dot",
            "Shape",
            vec![global(decl("size").equals(num(1.0)))],
        ),
        define_member("Shape", "Describe", vec![ret(text("shape"))]),
        define_member("Dot", "Describe", vec![ret(text("dot"))]),
    ]
}

#[test]
fn test_super_constructs_base_part() {
    let sheet = run(with(
        shapes(),
        vec![
            global(decl("s").equals(new_obj("Square", vec![num(3.0)]))),
            assign(at("A1"), field(var("s"), "label")),
            assign(at("A2"), field(var("s"), "area")),
        ],
    ));
    assert_eq!(sheet.text("A1"), Some("sq"));
    assert_eq!(sheet.number("A2"), Some(9.0));
}

#[test]
fn test_base_constructor_runs_without_super() {
    let sheet = run(with(
        shapes(),
        vec![
            global(decl("d").equals(new_obj("Dot", vec![]))),
            assign(at("A1"), field(var("d"), "label")),
        ],
    ));
    assert_eq!(sheet.text("A1"), Some("shape"));
}

#[test]
fn test_most_derived_member_wins() {
    let sheet = run(with(
        shapes(),
        vec![
            assign(at("A1"), method(new_obj("Dot", vec![]), "Describe", vec![])),
            assign(at("A2"), method(new_obj("Square", vec![num(2.0)]), "Describe", vec![])),
        ],
    ));
    assert_eq!(sheet.text("A1"), Some("dot"));
    assert_eq!(sheet.text("A2"), Some("shape"));
}

#[test]
fn test_subtype_passes_base_type_check() {
    let sheet = run(with(
        shapes(),
        vec![
            global(decl("s").of_type("Shape").equals(new_obj("Dot", vec![]))),
            assign(at("A1"), field(var("s"), "size")),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(1.0));
}

#[test]
fn test_super_outside_constructor() {
    let err = fail(vec![effect(super_call(vec![]))]);
    assert!(matches!(err, EvalError::Runtime(_)), "got {err:?}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Members
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_member_reads_receiver_fields() {
    let sheet = run(with(
        point(),
        vec![
            global(decl("p").equals(new_obj("Point", vec![num(1.0), num(2.0)]))),
            assign(at("A1"), method(var("p"), "Sum", vec![])),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(3.0));
}

#[test]
fn test_static_member_call() {
    let sheet = run(with(
        point(),
        vec![
            global(decl("o").equals(method(var("Point"), "Origin", vec![]))),
            assign(at("A1"), field(var("o"), "x")),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(0.0));
    assert!(matches!(sheet.get("A1"), Some(Value::Number(_))));
}

#[test]
fn test_unknown_member() {
    let err = fail(with(
        point(),
        vec![
            global(decl("p").equals(new_obj("Point", vec![num(1.0), num(2.0)]))),
            assign(at("A1"), method(var("p"), "Missing", vec![])),
        ],
    ));
    assert!(matches!(err, EvalError::UndefinedReference(_)), "got {err:?}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Access and mutation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_hidden_field_is_not_readable_outside() {
    let err = fail(with(
        account(),
        vec![
            global(decl("a").equals(new_obj("Account", vec![]))),
            assign(at("A1"), field(var("a"), "balance")),
        ],
    ));
    assert!(matches!(err, EvalError::AccessViolation(_)), "got {err:?}");
}

#[test]
fn test_member_reads_hidden_field() {
    let sheet = run(with(
        account(),
        vec![
            global(decl("a").equals(new_obj("Account", vec![]))),
            assign(at("A1"), method(var("a"), "Balance", vec![])),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(5.0));
}

#[test]
fn test_private_helper_runs_from_member() {
    let sheet = run(with(
        account(),
        vec![
            global(decl("a").equals(new_obj("Account", vec![]))),
            effect(method(var("a"), "Deposit", vec![])),
            assign(at("A1"), method(var("a"), "Balance", vec![])),
        ],
    ));
    assert_eq!(sheet.number("A1"), Some(6.0));
}

#[test]
fn test_private_helper_is_not_callable_outside() {
    let err = fail(with(
        account(),
        vec![
            global(decl("a").equals(new_obj("Account", vec![]))),
            effect(method(var("a"), "Bump", vec![])),
        ],
    ));
    assert!(matches!(err, EvalError::AccessViolation(_)), "got {err:?}");
}

#[test]
fn test_fixed_field_rejects_push() {
    let err = fail(vec![
        define_type("Crate", vec![global(decl("size").equals(num(3.0)))]),
        global(decl("c").equals(new_obj("Crate", vec![]))),
        push(to_field(var("c"), "size"), num(4.0)),
    ]);
    assert!(matches!(err, EvalError::MutationViolation(_)), "got {err:?}");
}

#[test]
fn test_open_field_accepts_push() {
    let sheet = run(vec![
        define_type("Crate", vec![global(decl("size").init(num(3.0)))]),
        global(decl("c").equals(new_obj("Crate", vec![]))),
        push(to_field(var("c"), "size"), num(4.0)),
        assign(at("A1"), field(var("c"), "size")),
    ]);
    assert_eq!(sheet.number("A1"), Some(4.0));
}

// ══════════════════════════════════════════════════════════════════════════════
// Constrained value types
// ══════════════════════════════════════════════════════════════════════════════

fn percent() -> Stmt {
    define_constrained(
        "Percent",
        "Number",
        vec![bound(BinOp::Ge, num(0.0)), bound(BinOp::Le, num(100.0))],
    )
}

#[test]
fn test_constrained_type_accepts_value_in_range() {
    let sheet = run(vec![
        percent(),
        global(decl("p").of_type("Percent").equals(text("40"))),
        assign(at("A1"), var("p")),
    ]);
    assert_eq!(sheet.number("A1"), Some(40.0));
}

#[test]
fn test_constrained_type_rejects_value_out_of_range() {
    let err = fail(vec![
        percent(),
        global(decl("p").of_type("Percent").equals(num(150.0))),
    ]);
    assert!(matches!(err, EvalError::TypeConstraintViolation(_)), "got {err:?}");
}

#[test]
fn test_value_type_cannot_be_constructed() {
    let err = fail(vec![
        percent(),
        global(decl("p").equals(new_obj("Percent", vec![]))),
    ]);
    assert!(matches!(err, EvalError::TypeConstraintViolation(_)), "got {err:?}");
}
