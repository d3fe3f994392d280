//! Integration tests for functions, subprocesses and generators.

use gridlang_eval::{EvalError, Script, Sheet};
use gridlang_types::ast::Stmt;
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

fn double() -> Stmt {
    define_function(
        "Double",
        vec![
            input(&["x"], Some("number"), None),
            ret(mul(var("x"), num(2.0))),
        ],
    )
}

fn scale() -> Stmt {
    define_function(
        "Scale",
        vec![
            input(&["x"], Some("number"), None),
            input(&["factor"], Some("number"), Some(num(2.0))),
            ret(mul(var("x"), var("factor"))),
        ],
    )
}

// ══════════════════════════════════════════════════════════════════════════════
// Results
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_function_returns_value() {
    let sheet = run(vec![
        assign(at("A1"), call("Double", vec![num(4.0)])),
        double(),
    ]);
    assert_eq!(sheet.number("A1"), Some(8.0));
}

#[test]
fn test_text_argument_is_coerced() {
    let sheet = run(vec![double(), assign(at("A1"), call("Double", vec![text("2.5")]))]);
    assert_eq!(sheet.number("A1"), Some(5.0));
}

#[test]
fn test_single_output_is_the_result() {
    let sheet = run(vec![
        define_function(
            "Area",
            vec![
                input(&["w", "h"], Some("number"), None),
                output("a", Some("number"), None),
                push(to_name("a"), mul(var("w"), var("h"))),
            ],
        ),
        assign(at("A1"), call("Area", vec![num(3.0), num(4.0)])),
    ]);
    assert_eq!(sheet.number("A1"), Some(12.0));
}

#[test]
fn test_several_outputs_form_a_record() {
    let sheet = run(vec![
        define_function(
            "Bounds",
            vec![
                input(&["xs"], None, None),
                output("lo", None, None),
                output("hi", None, None),
                push(to_name("lo"), call("MIN", vec![var("xs")])),
                push(to_name("hi"), call("MAX", vec![var("xs")])),
            ],
        ),
        global(decl("b").equals(call("Bounds", vec![nums(&[4.0, 9.0, 2.0])]))),
        assign(at("A1"), field(var("b"), "lo")),
        assign(at("A2"), field(var("b"), "hi")),
    ]);
    assert_eq!(sheet.number("A1"), Some(2.0));
    assert_eq!(sheet.number("A2"), Some(9.0));
}

#[test]
fn test_function_reads_script_names() {
    let sheet = run(vec![
        define_function("Taxed", vec![input(&["x"], None, None), ret(mul(var("x"), var("rate")))]),
        global(decl("rate").equals(num(1.5))),
        assign(at("A1"), call("Taxed", vec![num(10.0)])),
    ]);
    assert_eq!(sheet.number("A1"), Some(15.0));
}

// ══════════════════════════════════════════════════════════════════════════════
// Arguments
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_input_default_fills_missing_argument() {
    let sheet = run(vec![
        scale(),
        assign(at("A1"), call("Scale", vec![num(5.0)])),
        assign(at("A2"), call("Scale", vec![num(5.0), num(3.0)])),
    ]);
    assert_eq!(sheet.number("A1"), Some(10.0));
    assert_eq!(sheet.number("A2"), Some(15.0));
}

#[test]
fn test_input_default_replaces_bad_argument() {
    let sheet = run(vec![
        scale(),
        assign(at("A1"), call("Scale", vec![num(5.0), text("oops")])),
    ]);
    assert_eq!(sheet.number("A1"), Some(10.0));
}

#[test]
fn test_too_many_arguments() {
    let err = fail(vec![
        double(),
        assign(at("A1"), call("Double", vec![num(1.0), num(2.0)])),
    ]);
    assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)), "got {err:?}");
}

#[test]
fn test_missing_argument() {
    let err = fail(vec![double(), assign(at("A1"), call("Double", vec![]))]);
    match err {
        EvalError::ArityOrShapeMismatch(msg) => assert!(msg.contains("Double"), "{msg}"),
        other => panic!("expected arity mismatch, got {other:?}"),
    }
}

#[test]
fn test_bad_argument_without_default() {
    let err = fail(vec![double(), assign(at("A1"), call("Double", vec![text("x")]))]);
    assert!(matches!(err, EvalError::TypeConstraintViolation(_)), "got {err:?}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Grids and output targets
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_output_target_receives_pushes() {
    let sheet = run(vec![
        define_function(
            "Triple",
            vec![
                input(&["n"], Some("number"), None),
                output("res", None, None),
                push(to_name("res"), mul(var("n"), num(3.0))),
            ],
        ),
        effect(call("Triple", vec![num(2.0), grid(at("B1"))])),
    ]);
    assert_eq!(sheet.number("B1"), Some(6.0));
}

#[test]
fn test_too_many_output_targets() {
    let err = fail(vec![
        double(),
        effect(call("Double", vec![num(2.0), grid(at("B1"))])),
    ]);
    assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)), "got {err:?}");
}

#[test]
fn test_function_writes_caller_grid() {
    let sheet = run(vec![
        define_function("Mark", vec![assign(at("C3"), text("x"))]),
        effect(call("Mark", vec![])),
    ]);
    assert_eq!(sheet.text("C3"), Some("x"));
}

#[test]
fn test_subprocess_has_private_grid() {
    let sheet = run(vec![
        define_subprocess(
            "Draw",
            vec![assign(at("A1"), num(5.0)), assign(at("B2"), num(6.0))],
        ),
        global(decl("d").equals(call("Draw", vec![]))),
        assign(anchor("D1"), field(var("d"), "grid")),
    ]);
    assert_eq!(sheet.get("A1"), None);
    assert_eq!(sheet.get("B2"), None);
    assert_eq!(sheet.number("D1"), Some(5.0));
    assert_eq!(sheet.number("E2"), Some(6.0));
    assert_eq!(sheet.get("E1"), None);
}

// ══════════════════════════════════════════════════════════════════════════════
// Generators
// ══════════════════════════════════════════════════════════════════════════════

fn tens() -> Stmt {
    define_function(
        "Tens",
        vec![for_loop(
            vec![source("k", nums(&[1.0, 2.0, 3.0]))],
            vec![ret(mul(var("k"), num(10.0)))],
        )],
    )
}

#[test]
fn test_generator_drives_loop() {
    let sheet = run(vec![
        tens(),
        global(decl("sum").init(num(0.0))),
        for_decl_do(
            decl("v").init(call("Tens", vec![])),
            vec![push(to_name("sum"), add(var("sum"), var("v")))],
        ),
        assign(at("A1"), var("sum")),
    ]);
    assert_eq!(sheet.number("A1"), Some(60.0));
}

#[test]
fn test_direct_call_keeps_last_return() {
    let sheet = run(vec![tens(), assign(at("A1"), call("Tens", vec![]))]);
    assert_eq!(sheet.number("A1"), Some(30.0));
}
