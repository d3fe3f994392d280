//! Integration tests for expressions evaluated inside whole scripts:
//! templates, reshaping, stacking and ranges.

use gridlang_eval::{EvalConfig, EvalError, Script, Sheet};
use gridlang_types::ast::{Extent, Stmt};
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

fn numbers(sheet: &Sheet, cells: &[&str]) -> Vec<Option<f64>> {
    cells.iter().map(|a1| sheet.number(a1)).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Templates
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_template_pads_and_escapes() {
    let sheet = run(vec![
        assign(
            at("A1"),
            interp(
                "[{tag, 5}][{tag, -5}] {*tag} {} {{tag}}",
                vec![("tag", var("tag"))],
            ),
        ),
        global(decl("tag").equals(text("ab"))),
    ]);
    assert_eq!(sheet.text("A1"), Some("[   ab][ab   ] {tag} {} {tag}"));
}

#[test]
fn test_template_renders_numbers() {
    let sheet = run(vec![
        global(decl("n").equals(num(42.0))),
        assign(
            at("A1"),
            interp("n = {n * 2}", vec![("n * 2", mul(var("n"), num(2.0)))]),
        ),
    ]);
    assert_eq!(sheet.text("A1"), Some("n = 84"));
}

#[test]
fn test_doubled_quotes_collapse() {
    let sheet = run(vec![
        assign(at("A1"), text(r#"say ""hi"""#)),
        assign(at("A2"), interp(r#"""{w}"""#, vec![("w", text("x"))])),
    ]);
    assert_eq!(sheet.text("A1"), Some(r#"say "hi""#));
    assert_eq!(sheet.text("A2"), Some(r#""x""#));
}

// ══════════════════════════════════════════════════════════════════════════════
// Reshape and stack
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reshape_infers_wildcard_axis() {
    let sheet = run(vec![assign(
        anchor("A1"),
        reshape(
            nums(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            extents(vec![Extent::Growable, Extent::Count(2)]),
        ),
    )]);
    assert_eq!(
        numbers(&sheet, &["A1", "B1", "A2", "B2", "A3", "B3"]),
        vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0), Some(6.0)]
    );
    assert_eq!(sheet.len(), 6);
}

#[test]
fn test_reshape_with_leftover_elements_fails() {
    let err = fail(vec![assign(
        anchor("A1"),
        reshape(
            nums(&[1.0, 2.0, 3.0, 4.0, 5.0]),
            extents(vec![Extent::Growable, Extent::Count(2)]),
        ),
    )]);
    assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)), "got {err:?}");
}

#[test]
fn test_stack_appends_rows() {
    let sheet = run(vec![
        global(decl("head").equals(nums(&[1.0, 2.0]))),
        assign(
            anchor("A1"),
            stack(
                var("head"),
                matrix(vec![vec![num(3.0), num(4.0)], vec![num(5.0), num(6.0)]]),
            ),
        ),
    ]);
    assert_eq!(
        numbers(&sheet, &["A1", "B1", "A2", "B2", "A3", "B3"]),
        vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0), Some(6.0)]
    );
}

#[test]
fn test_stack_rejects_unequal_widths() {
    let err = fail(vec![assign(
        anchor("A1"),
        stack(nums(&[1.0, 2.0]), nums(&[1.0, 2.0, 3.0])),
    )]);
    assert!(matches!(err, EvalError::ArityOrShapeMismatch(_)), "got {err:?}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Ranges
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_stepped_range_spills() {
    let sheet = run(vec![assign(
        anchor("A1"),
        to_step(num(10.0), num(4.0), num(-3.0)),
    )]);
    assert_eq!(
        numbers(&sheet, &["A1", "B1", "C1"]),
        vec![Some(10.0), Some(7.0), Some(4.0)]
    );
}

#[test]
fn test_unbounded_range_is_rejected() {
    let prog = program(vec![assign(
        at("A1"),
        call("LEN", vec![to(num(1.0), inf())]),
    )]);
    let err = Script::with_config(&prog, EvalConfig::default().with_gas_limit(1000))
        .run()
        .unwrap_err();
    assert!(matches!(err, EvalError::InvalidRange(_)), "got {err:?}");
}

#[test]
fn test_zero_step_is_rejected() {
    let err = fail(vec![assign(
        at("A1"),
        call("LEN", vec![to_step(num(1.0), num(3.0), num(0.0))]),
    )]);
    assert!(matches!(err, EvalError::InvalidRange(_)), "got {err:?}");
}
