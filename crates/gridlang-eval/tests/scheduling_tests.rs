//! Integration tests for dependency-ordered evaluation.
//!
//! Covers:
//! - forward references and cell dependencies
//! - push ordering
//! - cycles and ordering conflicts
//! - guards, nested guards and `Let` constraints
//! - unit, dimension and type predicates
//! - host inputs and gas metering

use gridlang_eval::{EvalConfig, EvalError, Script, Sheet};
use gridlang_types::ast::{BinOp, Expr, Stmt};
use gridlang_types::build::*;
use gridlang_types::ErrorCode;
use pretty_assertions::assert_eq;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn run(stmts: Vec<Stmt>) -> Sheet {
    let prog = program(stmts);
    Script::new(&prog).run().expect("script failed")
}

fn run_with(stmts: Vec<Stmt>, config: EvalConfig) -> Result<Sheet, EvalError> {
    let prog = program(stmts);
    Script::with_config(&prog, config).run()
}

fn fail(stmts: Vec<Stmt>) -> EvalError {
    let prog = program(stmts);
    Script::new(&prog).run().expect_err("script should fail")
}

// ══════════════════════════════════════════════════════════════════════════════
// Ordering
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_declaration_order_is_irrelevant() {
    let sheet = run(vec![
        global(decl("y").equals(add(var("x"), num(1.0)))),
        global(decl("x").of_type("number").equals(num(5.0))),
        assign(at("A1"), var("y")),
    ]);
    assert_eq!(sheet.number("A1"), Some(6.0));
}

#[test]
fn test_chain_through_several_names() {
    let sheet = run(vec![
        assign(at("A1"), var("total")),
        global(decl("total").equals(mul(var("n"), var("price")))),
        global(decl("price").equals(num(2.5))),
        global(decl("n").equals(add(var("m"), num(1.0)))),
        global(decl("m").equals(num(3.0))),
    ]);
    assert_eq!(sheet.number("A1"), Some(10.0));
}

#[test]
fn test_cell_reads_wait_for_cell_writes() {
    let sheet = run(vec![
        assign(at("A2"), add(cell("A1"), num(1.0))),
        assign(at("A1"), num(51.0)),
    ]);
    assert_eq!(sheet.number("A1"), Some(51.0));
    assert_eq!(sheet.number("A2"), Some(52.0));
}

#[test]
fn test_readers_see_pushed_value() {
    let sheet = run(vec![
        global(decl("x").of_type("number").init(num(3.0))),
        assign(at("A1"), var("x")),
        push(to_name("x"), num(7.0)),
        assign(at("A2"), var("x")),
    ]);
    assert_eq!(sheet.number("A1"), Some(7.0));
    assert_eq!(sheet.number("A2"), Some(7.0));
}

#[test]
fn test_cell_bound_name_mirrors_every_write() {
    let sheet = run(vec![
        cell_decl("B1", decl("width").init(num(4.0))),
        push(to_name("width"), num(9.0)),
        assign(at("A1"), var("width")),
    ]);
    assert_eq!(sheet.number("B1"), Some(9.0));
    assert_eq!(sheet.number("A1"), Some(9.0));
}

// ══════════════════════════════════════════════════════════════════════════════
// Static failures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mutual_dependency_is_a_cycle() {
    let err = fail(vec![
        global(decl("a").equals(var("b"))),
        global(decl("b").equals(var("a"))),
    ]);
    assert!(matches!(err, EvalError::CyclicDependency(_)), "got {err:?}");
}

#[test]
fn test_self_reference_is_a_cycle() {
    let err = fail(vec![global(decl("a").equals(add(var("a"), num(1.0))))]);
    assert!(matches!(err, EvalError::CyclicDependency(_)), "got {err:?}");
}

#[test]
fn test_redeclaration_conflicts() {
    let err = fail(vec![
        global(decl("x").equals(num(34.0))),
        for_decl(decl("x").of_type("number")),
    ]);
    assert!(matches!(err, EvalError::OrderingConflict(_)), "got {err:?}");
}

#[test]
fn test_let_chain_must_assign_before_reading() {
    let err = fail(vec![let_chain(vec![
        binding("Y", mul(var("X"), num(5.0))),
        binding("X", num(2.0)),
    ])]);
    assert!(matches!(err, EvalError::OrderingConflict(_)), "got {err:?}");
}

#[test]
fn test_diagnostic_carries_code() {
    let prog = program(vec![assign(at("A1"), var("nowhere"))]);
    let diag = Script::new(&prog).diagnose().expect_err("should fail");
    assert_eq!(diag.code, ErrorCode::UNDEFINED_REFERENCE);
    assert!(diag.message.contains("nowhere"), "{}", diag.message);
}

// ══════════════════════════════════════════════════════════════════════════════
// Let and guards
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_let_chain_assigns_in_order() {
    let sheet = run(vec![
        assign(at("A1"), var("Y")),
        let_chain(vec![
            binding("X", num(2.0)),
            binding("Y", mul(var("X"), num(5.0))),
        ]),
    ]);
    assert_eq!(sheet.number("A1"), Some(10.0));
}

#[test]
fn test_false_guard_prunes_rest_of_scope() {
    let sheet = run(vec![
        assign(at("A1"), num(9.0)),
        guard(lt(num(2.0), num(1.0))),
        assign(at("A2"), num(7.0)),
    ]);
    assert_eq!(sheet.number("A1"), Some(9.0));
    assert_eq!(sheet.get("A2"), None);
}

#[test]
fn test_true_guard_lets_scope_continue() {
    let sheet = run(vec![
        guard(gt(num(2.0), num(1.0))),
        assign(at("A2"), num(7.0)),
    ]);
    assert_eq!(sheet.number("A2"), Some(7.0));
}

#[test]
fn test_guard_in_loop_body_prunes_only_that_iteration() {
    let sheet = run(vec![
        for_loop(
            vec![source("i", to(num(1.0), num(4.0)))],
            vec![
                assign(at_row("A", var("i")), var("i")),
                guard(lt(var("i"), num(3.0))),
                assign(at_row("B", var("i")), var("i")),
            ],
        ),
        assign(at("C1"), text("after")),
    ]);
    let a: Vec<Option<f64>> = ["A1", "A2", "A3", "A4"].iter().map(|c| sheet.number(c)).collect();
    let b: Vec<Option<f64>> = ["B1", "B2", "B3", "B4"].iter().map(|c| sheet.number(c)).collect();
    assert_eq!(a, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    assert_eq!(b, vec![Some(1.0), Some(2.0), None, None]);
    assert_eq!(sheet.text("C1"), Some("after"));
}

#[test]
fn test_guard_in_then_block_stays_inside_it() {
    let sheet = run(vec![
        if_then(
            boolean(true),
            vec![
                assign(at("A1"), num(1.0)),
                guard(boolean(false)),
                assign(at("A2"), num(2.0)),
            ],
        ),
        assign(at("A3"), num(3.0)),
    ]);
    assert_eq!(sheet.number("A1"), Some(1.0));
    assert_eq!(sheet.get("A2"), None);
    assert_eq!(sheet.number("A3"), Some(3.0));
}

// ══════════════════════════════════════════════════════════════════════════════
// Condition predicates
// ══════════════════════════════════════════════════════════════════════════════

fn flag(cell: &str, condition: Expr) -> Stmt {
    if_then(condition, vec![assign(at(cell), boolean(true))])
}

fn predicate_script() -> Vec<Stmt> {
    vec![
        flag("A1", test(var("price"), vec![of_unit("dollar")])),
        flag("A2", test(var("price"), vec![of_unit("euro")])),
        flag("A3", test(var("price"), vec![has_dim(scalar_dim())])),
        flag("A4", test(var("price"), vec![has_dim(any_dim())])),
        flag("A5", test(var("block"), vec![has_dim(dims(&[2, 2]))])),
        flag("A6", test(var("block"), vec![has_dim(any_dim())])),
        flag("A7", test(var("block"), vec![has_dim(dims(&[4]))])),
        flag("A8", test(var("block"), vec![has_dim(scalar_dim())])),
        flag("A9", test(var("title"), vec![is_type("text")])),
        flag("A10", test(var("price"), vec![is_type("text")])),
        flag("A11", test(var("price"), vec![is_type("number"), of_unit("dollar")])),
        global(decl("price").unit("dollar").equals(num(4.0))),
        global(decl("block").equals(matrix(vec![
            vec![num(1.0), num(2.0)],
            vec![num(3.0), num(4.0)],
        ]))),
        global(decl("title").of_type("text").equals(text("Q1"))),
    ]
}

#[test]
fn test_unit_dim_and_type_predicates() {
    let sheet = run(predicate_script());
    let flags: Vec<bool> = (1..=11)
        .map(|row| sheet.get(&format!("A{row}")).is_some())
        .collect();
    assert_eq!(
        flags,
        vec![true, false, true, false, true, true, false, false, true, false, true]
    );
}

#[test]
fn test_guard_on_dimension_predicate() {
    let sheet = run(vec![
        global(decl("row").equals(nums(&[1.0, 2.0, 3.0]))),
        guard(test(var("row"), vec![has_dim(dims(&[3]))])),
        assign(at("A1"), call("SUM", vec![var("row")])),
        guard(test(var("row"), vec![has_dim(scalar_dim())])),
        assign(at("A2"), num(0.0)),
    ]);
    assert_eq!(sheet.number("A1"), Some(6.0));
    assert_eq!(sheet.get("A2"), None);
}

#[test]
fn test_let_constraint_waits_for_later_declaration() {
    let sheet = run(vec![
        let_chain(vec![constrain("x").of_type("number")]),
        assign(at("A1"), var("x")),
        for_decl(decl("x").equals(num(34.0))),
    ]);
    assert_eq!(sheet.number("A1"), Some(34.0));
}

#[test]
fn test_failed_let_constraint_prunes() {
    let sheet = run(vec![
        for_decl(decl("x").equals(num(34.0))),
        let_chain(vec![constrain("x").bound(BinOp::Le, num(5.0))]),
        assign(at("A1"), var("x")),
    ]);
    assert_eq!(sheet.get("A1"), None);
}

#[test]
fn test_let_block_runs_only_when_constraint_holds() {
    let sheet = run(vec![
        global(decl("x").equals(num(12.0))),
        let_then(
            constrain("x").bound(BinOp::Gt, num(10.0)),
            vec![assign(at("A1"), text("big"))],
        ),
        let_then(
            constrain("x").bound(BinOp::Lt, num(10.0)),
            vec![assign(at("A2"), text("small"))],
        ),
    ]);
    assert_eq!(sheet.text("A1"), Some("big"));
    assert_eq!(sheet.get("A2"), None);
}

#[test]
fn test_unresolvable_condition_is_false() {
    let sheet = run(vec![if_else(
        gt(var("missing"), num(1.0)),
        vec![assign(at("A1"), num(1.0))],
        vec![assign(at("A1"), num(2.0))],
    )]);
    assert_eq!(sheet.number("A1"), Some(2.0));
}

#[test]
fn test_elseif_chain_picks_first_true_branch() {
    let sheet = run(vec![
        global(decl("score").equals(num(72.0))),
        if_chain(
            vec![
                (ge(var("score"), num(90.0)), vec![assign(at("A1"), text("A"))]),
                (ge(var("score"), num(70.0)), vec![assign(at("A1"), text("C"))]),
                (ge(var("score"), num(50.0)), vec![assign(at("A1"), text("D"))]),
            ],
            Some(vec![assign(at("A1"), text("F"))]),
        ),
    ]);
    assert_eq!(sheet.text("A1"), Some("C"));
}

// ══════════════════════════════════════════════════════════════════════════════
// Host inputs and gas
// ══════════════════════════════════════════════════════════════════════════════

fn doubled_rate() -> Vec<Stmt> {
    vec![
        input(&["rate"], Some("number"), Some(num(5.0))),
        assign(at("A1"), mul(var("rate"), num(2.0))),
    ]
}

#[test]
fn test_input_uses_host_value() {
    let config = EvalConfig::default().with_text_inputs(["7"]);
    let sheet = run_with(doubled_rate(), config).unwrap();
    assert_eq!(sheet.number("A1"), Some(14.0));
}

#[test]
fn test_input_falls_back_to_default() {
    let sheet = run(doubled_rate());
    assert_eq!(sheet.number("A1"), Some(10.0));
    let config = EvalConfig::default().with_text_inputs(["not a number"]);
    let sheet = run_with(doubled_rate(), config).unwrap();
    assert_eq!(sheet.number("A1"), Some(10.0));
}

#[test]
fn test_missing_input_without_default_fails() {
    let err = fail(vec![
        input(&["name"], Some("text"), None),
        assign(at("A1"), var("name")),
    ]);
    assert!(matches!(err, EvalError::UndefinedReference(_)), "got {err:?}");
}

#[test]
fn test_gas_limit_stops_long_runs() {
    let stmts = vec![for_loop(
        vec![source("i", to(num(1.0), num(10_000.0)))],
        vec![assign(at_row("A", var("i")), var("i"))],
    )];
    let err = run_with(stmts, EvalConfig::default().with_gas_limit(500)).unwrap_err();
    assert_eq!(err, EvalError::GasExhausted);
}
