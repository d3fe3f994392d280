//! Execution plan for one statement list.
//!
//! Every block (the script, a callable body, a loop body, an `If` branch) is
//! planned on its own: definitions are hoisted out, the remaining statements
//! become graph vertices, edges come from their [`Effects`], and the order is
//! a topological sort that falls back to source order. Guards add edges so
//! that everything they gate runs after them.

use crate::deps::{Analyzer, Area, Effects};
use crate::error::{EvalError, EvalResult};
use crate::graph::{DeclGraph, NodeId};
use crate::registry::Registry;
use gridlang_types::ast::*;
use gridlang_types::Span;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub enum NodeKind<'p> {
    Stmt(&'p Stmt),
    /// Unscoped `For v in …` headers; they advance in lockstep and their body
    /// is the rest of the enclosing block.
    Zip {
        headers: Vec<&'p ForLoop>,
        body: &'p [Stmt],
    },
}

#[derive(Debug)]
pub struct Node<'p> {
    pub kind: NodeKind<'p>,
    pub effects: Effects,
    pub span: Span,
}

#[derive(Debug)]
pub struct Plan<'p> {
    pub nodes: Vec<Node<'p>>,
    /// Node indices in execution order.
    pub order: Vec<usize>,
    /// Per guard node: the nodes skipped when it fails.
    pub prunes: Vec<Vec<usize>>,
}

impl<'p> Plan<'p> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub fn build<'p>(stmts: &'p [Stmt], registry: &Registry<'p>) -> EvalResult<Plan<'p>> {
    let mut analyzer = Analyzer::new(registry);
    let mut nodes = Vec::new();
    let mut i = 0;
    while i < stmts.len() {
        let stmt = &stmts[i];
        match &stmt.kind {
            StmtKind::Define(_) => {}
            StmtKind::ForLoop(l) if l.body.is_none() => {
                let mut headers = vec![l];
                let mut j = i + 1;
                while let Some(StmtKind::ForLoop(next)) = stmts.get(j).map(|s| &s.kind) {
                    if next.body.is_some() {
                        break;
                    }
                    headers.push(next);
                    j += 1;
                }
                let body = &stmts[j..];
                let effects = analyzer.zip(&headers, body);
                nodes.push(Node {
                    kind: NodeKind::Zip { headers, body },
                    effects,
                    span: stmt.span,
                });
                break;
            }
            kind => {
                if let StmtKind::Let(ls) = kind {
                    check_let(ls, &mut analyzer)?;
                }
                nodes.push(Node {
                    kind: NodeKind::Stmt(stmt),
                    effects: analyzer.stmt(stmt),
                    span: stmt.span,
                });
            }
        }
        i += 1;
    }
    bind_cells(&mut nodes);

    let mut graph = DeclGraph::new();
    let ids: Vec<NodeId> = nodes.iter().map(|n| graph.add_vertex(describe(n))).collect();
    link(&nodes, &mut graph, &ids)?;
    if let Some(cycle) = graph.find_cycle() {
        return Err(EvalError::CyclicDependency(cycle.join(" -> ")));
    }

    let mut gated_by = Vec::new();
    for (g, node) in nodes.iter().enumerate() {
        if !node.effects.guard {
            continue;
        }
        let ancestors = graph.ancestors(ids[g]);
        let gated: BTreeSet<usize> = (g + 1..nodes.len())
            .filter(|j| !ancestors.contains(j))
            .collect();
        for &j in &gated {
            graph.add_edge(ids[j], ids[g]);
        }
        gated_by.push((g, gated));
    }
    let mut prunes = vec![Vec::new(); nodes.len()];
    for (g, gated) in gated_by {
        prunes[g] = graph.descendants_of(&gated).into_iter().collect();
    }
    if let Some(cycle) = graph.find_cycle() {
        return Err(EvalError::CyclicDependency(cycle.join(" -> ")));
    }

    let order: Vec<usize> = graph.topo_order().into_iter().map(NodeId::as_index).collect();
    tracing::trace!(nodes = nodes.len(), ?order, "planned block");
    Ok(Plan {
        nodes,
        order,
        prunes,
    })
}

/// A name bound to a cell writes that cell whenever it is written.
fn bind_cells(nodes: &mut [Node<'_>]) {
    let mut bound = BTreeMap::new();
    for node in nodes.iter() {
        if let NodeKind::Stmt(Stmt {
            kind: StmtKind::CellDecl { cell, decl },
            ..
        }) = &node.kind
        {
            bound.insert(decl.name.key(), *cell);
        }
    }
    if bound.is_empty() {
        return;
    }
    for node in nodes.iter_mut() {
        let extra: Vec<Area> = node
            .effects
            .writes
            .iter()
            .filter_map(|name| bound.get(name))
            .map(|cell| Area::cell(*cell))
            .collect();
        node.effects.cell_writes.extend(extra);
    }
}

fn link(nodes: &[Node<'_>], graph: &mut DeclGraph, ids: &[NodeId]) -> EvalResult<()> {
    let mut declarers: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        for name in &node.effects.declares {
            if declarers.insert(name.as_str(), i).is_some() {
                return Err(EvalError::OrderingConflict(format!(
                    "`{name}` is declared more than once in the same scope"
                )));
            }
        }
    }
    let mut writers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        for name in &node.effects.writes {
            writers.entry(name.as_str()).or_default().push(i);
        }
    }
    let writers_of = |name: &str| writers.get(name).cloned().unwrap_or_default();

    for (i, node) in nodes.iter().enumerate() {
        let fx = &node.effects;
        for name in &fx.reads {
            if let Some(&d) = declarers.get(name.as_str()) {
                if d == i {
                    return Err(EvalError::CyclicDependency(format!(
                        "`{name}` depends on itself"
                    )));
                }
                graph.add_edge(ids[i], ids[d]);
            }
            let earlier_only = fx.snapshot || fx.writes.contains(name);
            for w in writers_of(name) {
                if w == i {
                    continue;
                }
                if !earlier_only || w < i {
                    graph.add_edge(ids[i], ids[w]);
                } else if fx.snapshot {
                    graph.add_edge(ids[w], ids[i]);
                }
            }
        }
        for name in &fx.writes {
            if let Some(&d) = declarers.get(name.as_str()) {
                graph.add_edge(ids[i], ids[d]);
            }
            for w in writers_of(name).into_iter().filter(|w| *w < i) {
                graph.add_edge(ids[i], ids[w]);
            }
        }

        // ── Cells ────────────────────────────────────────────────────────
        for area in &fx.cell_reads {
            for (j, other) in nodes.iter().enumerate() {
                if j != i && (other.effects.writes_area(area) || (j < i && other.effects.dynamic_write)) {
                    graph.add_edge(ids[i], ids[j]);
                }
            }
        }
        for (j, other) in nodes.iter().enumerate().take(i) {
            let o = &other.effects;
            // An earlier reader of what this node writes already waits for it.
            let reads_ours = o.cell_reads.iter().any(|area| fx.writes_area(area));
            let after = (fx.dynamic_read && o.writes_cells())
                || (fx.dynamic_write && o.touches_cells())
                || (!reads_ours
                    && fx
                        .cell_writes
                        .iter()
                        .any(|area| o.dynamic_write || o.writes_area(area)));
            if after {
                graph.add_edge(ids[i], ids[j]);
            }
        }
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Static conflicts
// ══════════════════════════════════════════════════════════════════════════════

fn check_let(ls: &LetStmt, analyzer: &mut Analyzer<'_, '_>) -> EvalResult<()> {
    let keys: Vec<Option<String>> = ls
        .bindings
        .iter()
        .map(|b| match &b.target {
            Place::Name(name) => Some(name.key()),
            _ => None,
        })
        .collect();
    if let Some(body) = &ls.body {
        let names: Vec<String> = keys.iter().flatten().cloned().collect();
        if let Some(name) = redeclared(&body.stmts, &names) {
            return Err(EvalError::OrderingConflict(format!(
                "`{name}` is constrained by Let and declared by For inside its body"
            )));
        }
    }
    for (i, binding) in ls.bindings.iter().enumerate() {
        let Some(value) = &binding.value else {
            continue;
        };
        let reads = analyzer.reads_of(value);
        let assigned: Vec<&String> = keys[..=i].iter().flatten().collect();
        for later in keys[i + 1..].iter().flatten() {
            if reads.contains(later) && !assigned.contains(&later) {
                return Err(EvalError::OrderingConflict(format!(
                    "Let chain reads `{later}` before the link that assigns it"
                )));
            }
        }
    }
    Ok(())
}

/// First of `names` declared by a `For` anywhere inside `stmts`.
fn redeclared(stmts: &[Stmt], names: &[String]) -> Option<String> {
    stmts.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::ForDecl { decls, body } => decls
            .iter()
            .map(|d| d.name.key())
            .find(|k| names.contains(k))
            .or_else(|| body.as_ref().and_then(|b| redeclared(&b.stmts, names))),
        StmtKind::ForLoop(l) => l.body.as_ref().and_then(|b| redeclared(&b.stmts, names)),
        StmtKind::Let(ls) => ls.body.as_ref().and_then(|b| redeclared(&b.stmts, names)),
        StmtKind::If(ifs) => redeclared_in_if(ifs, names),
        _ => None,
    })
}

fn redeclared_in_if(ifs: &IfStmt, names: &[String]) -> Option<String> {
    redeclared(&ifs.then_block.stmts, names).or_else(|| match &ifs.else_branch {
        Some(ElseBranch::ElseIf(next)) => redeclared_in_if(next, names),
        Some(ElseBranch::Block(b)) => redeclared(&b.stmts, names),
        None => None,
    })
}

// ══════════════════════════════════════════════════════════════════════════════
// Labels
// ══════════════════════════════════════════════════════════════════════════════

fn describe(node: &Node<'_>) -> String {
    let stmt = match &node.kind {
        NodeKind::Stmt(stmt) => stmt,
        NodeKind::Zip { headers, .. } => {
            let vars: Vec<&str> = headers
                .iter()
                .flat_map(|h| h.sources.iter().map(|s| s.var.name.as_str()))
                .collect();
            return format!("For {}", vars.join(", "));
        }
    };
    match &stmt.kind {
        StmtKind::CellAssign { target, .. } => target_text(target),
        StmtKind::CellDecl { cell, decl } => format!("[{cell}] : {}", decl.name.name),
        StmtKind::Global(decl) => decl.name.name.clone(),
        StmtKind::ForDecl { decls, .. } => {
            let names: Vec<&str> = decls.iter().map(|d| d.name.name.as_str()).collect();
            names.join(" and ")
        }
        StmtKind::ForLoop(_) => "For".into(),
        StmtKind::Let(ls) => {
            let names: Vec<&str> = ls
                .bindings
                .iter()
                .filter_map(|b| b.target.root().map(|r| r.name.as_str()))
                .collect();
            format!("Let {}", names.join(" and "))
        }
        StmtKind::Input(decl) => {
            let names: Vec<&str> = decl.names.iter().map(|n| n.name.as_str()).collect();
            format!("Input {}", names.join(", "))
        }
        StmtKind::Output(decl) => format!("Output {}", decl.name.name),
        StmtKind::Push { place, .. } => match place.root() {
            Some(root) => format!("push {}", root.name),
            None => "push".into(),
        },
        StmtKind::If(_) | StmtKind::Guard(_) => "If".into(),
        StmtKind::Label { target, .. } => format!("{} labels", target.name),
        StmtKind::Return(_) => "return".into(),
        StmtKind::Expr(e) => match &e.kind {
            ExprKind::Call { callee, .. } => callee.name.clone(),
            _ => "expression".into(),
        },
        StmtKind::Define(_) => "Define".into(),
    }
}

fn target_text(target: &CellTarget) -> String {
    let one = |r: &CellRef| match r.as_fixed() {
        Some(addr) => addr.to_string(),
        None => "?".into(),
    };
    match target {
        CellTarget::Single(r) => format!("[{}]", one(r)),
        CellTarget::Anchor(r) => format!("[^{}]", one(r)),
        CellTarget::Range(a, b) => format!("[{}:{}]", one(a), one(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlang_types::build::*;

    fn order_of(stmts: &[Stmt]) -> Vec<usize> {
        let registry = Registry::collect(stmts);
        build(stmts, &registry).unwrap().order
    }

    fn error_of(stmts: &[Stmt]) -> EvalError {
        let registry = Registry::collect(stmts);
        build(stmts, &registry).unwrap_err()
    }

    #[test]
    fn test_forward_reference_reorders() {
        let stmts = vec![
            global(decl("y").equals(add(var("x"), num(1.0)))),
            global(decl("x").equals(num(5.0))),
            assign(at("A1"), var("y")),
        ];
        assert_eq!(order_of(&stmts), vec![1, 0, 2]);
    }

    #[test]
    fn test_reader_waits_for_later_push() {
        let stmts = vec![
            global(decl("x").of_type("number").init(num(3.0))),
            assign(at("A1"), var("x")),
            push(to_name("x"), num(7.0)),
            assign(at("A2"), var("x")),
        ];
        assert_eq!(order_of(&stmts), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_snapshot_runs_before_later_writer() {
        let stmts = vec![
            global(decl("f").equals(num(1.0))),
            global(decl("p").init(var("f"))),
            push(to_field(var("f"), "y"), num(2.0)),
        ];
        let registry = Registry::collect(&stmts);
        let plan = build(&stmts, &registry).unwrap();
        assert_eq!(plan.order, vec![0, 1, 2]);
    }

    #[test]
    fn test_cell_dependencies() {
        let stmts = vec![
            assign(at("A2"), add(cell("A1"), num(1.0))),
            assign(at("A1"), num(51.0)),
        ];
        assert_eq!(order_of(&stmts), vec![1, 0]);
    }

    #[test]
    fn test_reader_below_spill_waits_for_it() {
        let stmts = vec![
            assign(at("A3"), add(cell("A1"), num(1.0))),
            assign(anchor("A1"), matrix(vec![vec![num(1.0)], vec![num(2.0)]])),
        ];
        assert_eq!(order_of(&stmts), vec![1, 0]);
    }

    #[test]
    fn test_reader_right_of_spill_waits_for_it() {
        let stmts = vec![
            assign(at("D1"), call("SUM", vec![cells("A1", "C1")])),
            assign(anchor("A1"), nums(&[1.0, 2.0, 3.0])),
            assign(at("Z9"), cell("A1")),
        ];
        assert_eq!(order_of(&stmts), vec![1, 0, 2]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let stmts = vec![
            global(decl("a").equals(var("b"))),
            global(decl("b").equals(var("a"))),
        ];
        assert!(matches!(error_of(&stmts), EvalError::CyclicDependency(_)));
        let own = vec![global(decl("a").equals(add(var("a"), num(1.0))))];
        assert!(matches!(error_of(&own), EvalError::CyclicDependency(_)));
    }

    #[test]
    fn test_duplicate_declaration_conflicts() {
        let stmts = vec![
            global(decl("x").equals(num(34.0))),
            for_decl(decl("x").of_type("number")),
        ];
        assert!(matches!(error_of(&stmts), EvalError::OrderingConflict(_)));
    }

    #[test]
    fn test_let_chain_reading_later_link_conflicts() {
        let bad = vec![let_chain(vec![
            binding("Y", mul(var("X"), num(5.0))),
            binding("X", num(2.0)),
        ])];
        assert!(matches!(error_of(&bad), EvalError::OrderingConflict(_)));
        let good = vec![let_chain(vec![
            binding("X", num(2.0)),
            binding("Y", mul(var("X"), num(5.0))),
        ])];
        assert_eq!(order_of(&good), vec![0]);
    }

    #[test]
    fn test_for_inside_let_body_conflicts() {
        let stmts = vec![let_then(
            constrain("x").of_type("number"),
            vec![for_decl_do(
                decl("x").equals(num(34.0)),
                vec![assign(at("A1"), var("x"))],
            )],
        )];
        assert!(matches!(error_of(&stmts), EvalError::OrderingConflict(_)));
    }

    #[test]
    fn test_guard_gates_later_statements_only() {
        let stmts = vec![
            assign(at("A1"), num(9.0)),
            guard(lt(num(2.0), num(1.0))),
            assign(at("A2"), num(7.0)),
        ];
        let registry = Registry::collect(&stmts);
        let plan = build(&stmts, &registry).unwrap();
        assert_eq!(plan.order, vec![0, 1, 2]);
        assert_eq!(plan.prunes[1], vec![2]);
    }

    #[test]
    fn test_guard_waits_for_its_inputs() {
        let stmts = vec![
            let_chain(vec![constrain("x").of_type("number")]),
            assign(at("A1"), var("x")),
            for_decl(decl("x").equals(num(34.0))),
        ];
        let registry = Registry::collect(&stmts);
        let plan = build(&stmts, &registry).unwrap();
        assert_eq!(plan.order, vec![2, 0, 1]);
        assert_eq!(plan.prunes[0], vec![1]);
    }

    #[test]
    fn test_unscoped_loops_zip_over_rest() {
        let stmts = vec![
            assign(at("B1"), num(1.0)),
            for_rest(vec![source("a", to(num(1.0), num(3.0)))]),
            for_rest(vec![source("b", to(num(8.0), num(9.0)))]),
            push(to_cell(at_row("A", var("a"))), var("b")),
        ];
        let registry = Registry::collect(&stmts);
        let plan = build(&stmts, &registry).unwrap();
        assert_eq!(plan.len(), 2);
        match &plan.nodes[1].kind {
            NodeKind::Zip { headers, body } => {
                assert_eq!(headers.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected zip node, got {other:?}"),
        }
    }

    #[test]
    fn test_definitions_are_hoisted() {
        let stmts = vec![
            assign(at("A1"), call("f", vec![])),
            define_function("f", vec![ret(num(1.0))]),
        ];
        let registry = Registry::collect(&stmts);
        assert_eq!(build(&stmts, &registry).unwrap().len(), 1);
    }
}
