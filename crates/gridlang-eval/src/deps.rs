//! What each statement reads, writes and declares.
//!
//! The scheduler never inspects statement semantics directly; it only sees
//! the [`Effects`] computed here. Compound statements report the union of
//! their bodies minus whatever the body declares for itself, and calls
//! report the writes their callee makes outside its own scope.

use crate::registry::{self, Registry};
use gridlang_types::ast::*;
use gridlang_types::CellAddr;
use std::collections::BTreeSet;

/// A rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    top: u32,
    left: u32,
    bottom: u32,
    right: u32,
}

impl Area {
    pub fn cell(addr: CellAddr) -> Self {
        Self {
            top: addr.row,
            left: addr.col,
            bottom: addr.row,
            right: addr.col,
        }
    }

    pub fn range(a: CellAddr, b: CellAddr) -> Self {
        Self {
            top: a.row.min(b.row),
            left: a.col.min(b.col),
            bottom: a.row.max(b.row),
            right: a.col.max(b.col),
        }
    }

    /// A spill anchor may cover anything below and right of it.
    pub fn anchored(addr: CellAddr) -> Self {
        Self {
            top: addr.row,
            left: addr.col,
            bottom: u32::MAX,
            right: u32::MAX,
        }
    }

    pub fn overlaps(&self, other: &Area) -> bool {
        self.top <= other.bottom
            && other.top <= self.bottom
            && self.left <= other.right
            && other.left <= self.right
    }
}

#[derive(Debug, Clone, Default)]
pub struct Effects {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
    pub declares: BTreeSet<String>,
    pub cell_reads: Vec<Area>,
    pub cell_writes: Vec<Area>,
    /// Reads a cell whose address is only known at run time.
    pub dynamic_read: bool,
    pub dynamic_write: bool,
    /// Copies its inputs once (`init`), so it must see only earlier writers.
    pub snapshot: bool,
    /// Prunes later statements of its block when false.
    pub guard: bool,
}

impl Effects {
    /// Union of reads and writes; `declares`, `snapshot` and `guard` stay.
    pub fn absorb(&mut self, other: Effects) {
        self.reads.extend(other.reads);
        self.writes.extend(other.writes);
        self.cell_reads.extend(other.cell_reads);
        self.cell_writes.extend(other.cell_writes);
        self.dynamic_read |= other.dynamic_read;
        self.dynamic_write |= other.dynamic_write;
    }

    /// Drop names that are local to the analysed construct.
    pub fn forget(&mut self, names: &BTreeSet<String>) {
        self.reads.retain(|n| !names.contains(n));
        self.writes.retain(|n| !names.contains(n));
    }

    pub fn writes_cells(&self) -> bool {
        self.dynamic_write || !self.cell_writes.is_empty()
    }

    pub fn touches_cells(&self) -> bool {
        self.writes_cells() || self.dynamic_read || !self.cell_reads.is_empty()
    }

    pub fn writes_area(&self, area: &Area) -> bool {
        self.cell_writes.iter().any(|w| w.overlaps(area))
    }
}

/// Walks statements and expressions, resolving callees through the
/// registry. Recursive callables are analysed once per chain.
pub struct Analyzer<'r, 'p> {
    registry: &'r Registry<'p>,
    active: Vec<*const Stmt>,
}

impl<'r, 'p> Analyzer<'r, 'p> {
    pub fn new(registry: &'r Registry<'p>) -> Self {
        Self {
            registry,
            active: Vec::new(),
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Statements
    // ══════════════════════════════════════════════════════════════════════

    pub fn stmt(&mut self, stmt: &Stmt) -> Effects {
        let mut fx = Effects::default();
        match &stmt.kind {
            StmtKind::CellAssign { target, value } => {
                self.expr(value, &mut fx);
                self.cell_target(target, &mut fx, true);
            }
            StmtKind::CellDecl { cell, decl } => {
                self.decl(decl, &mut fx);
                fx.declares.insert(decl.name.key());
                fx.cell_writes.push(Area::cell(*cell));
                fx.snapshot = is_snapshot(decl.init.as_ref());
            }
            StmtKind::Global(decl) => {
                self.decl(decl, &mut fx);
                fx.declares.insert(decl.name.key());
                fx.snapshot = is_snapshot(decl.init.as_ref());
            }
            StmtKind::ForDecl { decls, body: None } => {
                for decl in decls {
                    let mut one = Effects::default();
                    self.decl(decl, &mut one);
                    one.forget(&fx.declares);
                    fx.absorb(one);
                    fx.declares.insert(decl.name.key());
                    fx.snapshot |= is_snapshot(decl.init.as_ref());
                }
            }
            StmtKind::ForDecl {
                decls,
                body: Some(body),
            } => {
                let mut names = BTreeSet::new();
                for decl in decls {
                    self.decl(decl, &mut fx);
                    names.insert(decl.name.key());
                }
                let inner = self.block(&body.stmts);
                fx.absorb(inner);
                fx.forget(&names);
            }
            StmtKind::ForLoop(l) => {
                let rest: &[Stmt] = match &l.body {
                    Some(body) => &body.stmts,
                    None => &[],
                };
                fx = self.zip(&[l], rest);
            }
            StmtKind::Let(ls) => self.let_stmt(ls, &mut fx),
            StmtKind::Input(decl) => {
                if let Some(default) = &decl.default {
                    self.expr(default, &mut fx);
                }
                fx.declares.extend(decl.names.iter().map(Ident::key));
            }
            StmtKind::Output(decl) => {
                if let Some(init) = &decl.init {
                    self.expr(&init.value, &mut fx);
                }
                fx.declares.insert(decl.name.key());
                fx.snapshot = is_snapshot(decl.init.as_ref());
            }
            StmtKind::Push { place, value } => {
                self.expr(value, &mut fx);
                self.place(place, &mut fx);
            }
            StmtKind::If(ifs) => self.if_stmt(ifs, &mut fx),
            StmtKind::Guard(cond) => {
                self.expr(cond, &mut fx);
                fx.guard = true;
            }
            StmtKind::Label { target, labels, .. } => {
                for label in labels {
                    self.expr(label, &mut fx);
                }
                fx.writes.insert(target.key());
            }
            StmtKind::Return(e) | StmtKind::Expr(e) => self.expr(e, &mut fx),
            StmtKind::Define(_) => {}
        }
        fx
    }

    /// Aggregate effects of a statement list as seen from outside it.
    pub fn block(&mut self, stmts: &[Stmt]) -> Effects {
        let mut fx = Effects::default();
        let mut local = BTreeSet::new();
        for stmt in stmts {
            if let StmtKind::ForLoop(l) = &stmt.kind {
                if l.body.is_none() {
                    local.extend(loop_names(l));
                }
            }
            let inner = self.stmt(stmt);
            local.extend(inner.declares.iter().cloned());
            fx.absorb(inner);
        }
        fx.forget(&local);
        fx
    }

    /// Loop headers iterating together over `body`.
    pub fn zip(&mut self, headers: &[&ForLoop], body: &[Stmt]) -> Effects {
        let mut fx = Effects::default();
        let mut vars = BTreeSet::new();
        for header in headers {
            for src in &header.sources {
                self.expr(&src.iterable, &mut fx);
            }
            vars.extend(loop_names(header));
        }
        let inner = self.block(body);
        fx.absorb(inner);
        fx.forget(&vars);
        fx
    }

    fn let_stmt(&mut self, ls: &LetStmt, fx: &mut Effects) {
        let constraint_only = ls.bindings.iter().all(|b| b.value.is_none());
        for binding in &ls.bindings {
            match &binding.value {
                Some(value) => {
                    self.expr(value, fx);
                    self.place(&binding.target, fx);
                }
                None => {
                    if let Some(root) = binding.target.root() {
                        fx.reads.insert(root.key());
                    }
                }
            }
            for bound in &binding.bounds {
                self.expr(&bound.value, fx);
            }
        }
        match &ls.body {
            Some(body) => {
                let inner = self.block(&body.stmts);
                fx.absorb(inner);
            }
            None => fx.guard = constraint_only,
        }
    }

    fn if_stmt(&mut self, ifs: &IfStmt, fx: &mut Effects) {
        self.expr(&ifs.condition, fx);
        let inner = self.block(&ifs.then_block.stmts);
        fx.absorb(inner);
        match &ifs.else_branch {
            Some(ElseBranch::ElseIf(next)) => self.if_stmt(next, fx),
            Some(ElseBranch::Block(b)) => {
                let inner = self.block(&b.stmts);
                fx.absorb(inner);
            }
            None => {}
        }
    }

    fn decl(&mut self, decl: &Decl, fx: &mut Effects) {
        if let Some(init) = &decl.init {
            self.expr(&init.value, fx);
        }
        if let Some(allowed) = &decl.allowed {
            self.expr(allowed, fx);
        }
        for bound in &decl.bounds {
            self.expr(&bound.value, fx);
        }
        self.field_inits(&decl.with, fx);
        if let Some(ty) = &decl.ty {
            if !decl.with.is_empty() || decl.init.is_some() {
                self.constructor(&ty.name.key(), fx);
            }
        }
    }

    fn field_inits(&mut self, with: &[FieldInit], fx: &mut Effects) {
        for init in with {
            match &init.value {
                Some(v) => self.expr(v, fx),
                None => {
                    fx.reads.insert(init.field.key());
                }
            }
        }
    }

    /// Mutation target of `Let` or `push`.
    fn place(&mut self, place: &Place, fx: &mut Effects) {
        match place {
            Place::Name(name) => {
                fx.writes.insert(name.key());
            }
            Place::Element { name, index } => {
                if name.key() == "grid" {
                    fx.dynamic_read = true;
                    fx.dynamic_write = true;
                } else {
                    fx.writes.insert(name.key());
                }
                match index {
                    ElementIndex::Axes(indices) => {
                        for i in indices {
                            self.expr(i, fx);
                        }
                    }
                    ElementIndex::Ordinal(pos) => self.expr(pos, fx),
                    ElementIndex::Cell(_) => {}
                }
            }
            Place::Field { object, .. } => {
                self.expr(object, fx);
                if let Some(root) = object.root_ident() {
                    fx.writes.insert(root.key());
                }
            }
            Place::Cell(target) => self.cell_target(target, fx, true),
        }
    }

    fn cell_target(&mut self, target: &CellTarget, fx: &mut Effects, write: bool) {
        let area = match target {
            CellTarget::Single(r) => r.as_fixed().map(Area::cell),
            CellTarget::Anchor(r) if write => r.as_fixed().map(Area::anchored),
            CellTarget::Anchor(r) => r.as_fixed().map(Area::cell),
            CellTarget::Range(a, b) => a.as_fixed().zip(b.as_fixed()).map(|(a, b)| Area::range(a, b)),
        };
        let refs: Vec<&CellRef> = match target {
            CellTarget::Single(r) | CellTarget::Anchor(r) => vec![r],
            CellTarget::Range(a, b) => vec![a, b],
        };
        for r in refs {
            if let ColumnRef::Offset { offset, .. } = &r.column {
                self.expr(offset, fx);
            }
            if let RowRef::Dynamic(row) = &r.row {
                self.expr(row, fx);
            }
        }
        match (area, write) {
            (Some(area), true) => fx.cell_writes.push(area),
            (Some(area), false) => fx.cell_reads.push(area),
            (None, true) => fx.dynamic_write = true,
            (None, false) => fx.dynamic_read = true,
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════

    pub fn expr(&mut self, expr: &Expr, fx: &mut Effects) {
        match &expr.kind {
            ExprKind::Number(_)
            | ExprKind::Text(_)
            | ExprKind::Bool(_)
            | ExprKind::Infinity
            | ExprKind::NotAvailable => {}
            ExprKind::Interpolated { embedded, .. } => {
                for e in embedded {
                    self.expr(&e.expr, fx);
                }
            }
            ExprKind::Ident(id) => self.name(id, fx),
            ExprKind::Cell(target) => self.cell_target(target, fx, false),
            ExprKind::Array(rows) => {
                for e in rows.iter().flatten() {
                    self.expr(e, fx);
                }
            }
            ExprKind::Binary { left, right, .. } => {
                self.expr(left, fx);
                self.expr(right, fx);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand, fx),
            ExprKind::Range { from, to, step } => {
                self.expr(from, fx);
                self.expr(to, fx);
                if let Some(step) = step {
                    self.expr(step, fx);
                }
            }
            ExprKind::Reshape { value, .. } => self.expr(value, fx),
            ExprKind::Test { subject, .. } => self.expr(subject, fx),
            ExprKind::Call { callee, args } => {
                self.name(callee, fx);
                self.call(callee, args, fx);
            }
            ExprKind::Index { target, indices } => {
                self.expr(target, fx);
                for i in indices {
                    self.expr(i, fx);
                }
            }
            ExprKind::Ordinal { target, position } => {
                self.expr(target, fx);
                self.expr(position, fx);
            }
            ExprKind::LocalCell { target, .. } => self.expr(target, fx),
            ExprKind::LabelLookup { target, label, .. } => {
                self.expr(target, fx);
                self.expr(label, fx);
            }
            ExprKind::Field { object, field } => {
                self.expr(object, fx);
                self.members(&field.key(), fx);
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                self.expr(receiver, fx);
                for a in args {
                    self.expr(a, fx);
                }
                self.members(&method.key(), fx);
            }
            ExprKind::New { ty, args, with } => {
                for a in args {
                    self.expr(a, fx);
                }
                self.field_inits(with, fx);
                self.constructor(&ty.key(), fx);
            }
            ExprKind::Super(args) => {
                for a in args {
                    self.expr(a, fx);
                }
            }
        }
    }

    /// Names read by one expression.
    pub fn reads_of(&mut self, expr: &Expr) -> BTreeSet<String> {
        let mut fx = Effects::default();
        self.expr(expr, &mut fx);
        fx.reads
    }

    fn name(&mut self, id: &Ident, fx: &mut Effects) {
        let key = id.key();
        if key == "grid" {
            fx.dynamic_read = true;
            fx.dynamic_write = true;
        } else {
            fx.reads.insert(key);
        }
    }

    /// Arguments past a user callable's inputs are output cells, written
    /// rather than read.
    fn call(&mut self, callee: &Ident, args: &[Expr], fx: &mut Effects) {
        let key = callee.key();
        let Some(def) = self.registry.callable(&key) else {
            for a in args {
                self.expr(a, fx);
            }
            self.members(&key, fx);
            return;
        };
        let inputs = registry::inputs(&def.body).len();
        for (i, a) in args.iter().enumerate() {
            match &a.kind {
                ExprKind::Cell(target) if i >= inputs => self.cell_target(target, fx, true),
                _ => self.expr(a, fx),
            }
        }
        let ext = self.external(&def.body, def.kind != CallableKind::Subprocess);
        fx.absorb(ext);
    }

    /// Union of every member of that name; the receiver type is not known
    /// until run time.
    fn members(&mut self, name: &str, fx: &mut Effects) {
        let defs: Vec<&'p CallableDef> = self.registry.members_named(name).collect();
        for def in defs {
            let ext = self.external(&def.body, def.kind != CallableKind::Subprocess);
            fx.absorb(ext);
        }
    }

    fn constructor(&mut self, ty: &str, fx: &mut Effects) {
        let bodies: Vec<&'p [Stmt]> = self
            .registry
            .chain(ty)
            .iter()
            .filter_map(|t| self.registry.type_info(t))
            .map(|info| info.def.body.as_slice())
            .collect();
        for body in bodies {
            let ext = self.external(body, false);
            fx.absorb(ext);
        }
    }

    /// Writes a body makes to bindings it did not declare.
    fn external(&mut self, body: &[Stmt], shares_grid: bool) -> Effects {
        let key = body.as_ptr();
        if body.is_empty() || self.active.contains(&key) {
            return Effects::default();
        }
        self.active.push(key);
        let mut fx = self.block(body);
        self.active.pop();
        fx.reads.clear();
        fx.cell_reads.clear();
        fx.dynamic_read = false;
        fx.writes.remove("grid");
        if !shares_grid {
            fx.cell_writes.clear();
            fx.dynamic_write = false;
        }
        fx
    }
}

fn is_snapshot(init: Option<&Initializer>) -> bool {
    init.is_some_and(|i| i.mode == InitMode::Init)
}

/// Loop variables and index names of one header.
pub fn loop_names(l: &ForLoop) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for src in &l.sources {
        out.insert(src.var.key());
        if let Some(index) = &src.index {
            out.insert(index.key());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlang_types::build::*;

    fn effects_of(stmts: &[Stmt], at: usize) -> Effects {
        let registry = Registry::collect(stmts);
        Analyzer::new(&registry).stmt(&stmts[at])
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_declaration_reads_initializer() {
        let stmts = vec![global(decl("N").equals(div(add(var("m"), num(10.0)), num(10.0))))];
        let fx = effects_of(&stmts, 0);
        assert_eq!(fx.declares, names(&["n"]));
        assert_eq!(fx.reads, names(&["m"]));
        assert!(!fx.snapshot);
    }

    #[test]
    fn test_init_is_snapshot() {
        let stmts = vec![global(decl("p").init(var("f")))];
        assert!(effects_of(&stmts, 0).snapshot);
    }

    #[test]
    fn test_loop_forgets_its_variables() {
        let stmts = vec![for_loop(
            vec![source("i", to(num(1.0), var("n"))).index("k")],
            vec![let_at("D", axes(vec![var("k")]), add(var("i"), var("x")))],
        )];
        let fx = effects_of(&stmts, 0);
        assert_eq!(fx.reads, names(&["n", "x"]));
        assert_eq!(fx.writes, names(&["d"]));
        assert!(fx.declares.is_empty());
    }

    #[test]
    fn test_dynamic_cells() {
        let stmts = vec![assign(at_row("A", var("i")), cell("B1"))];
        let fx = effects_of(&stmts, 0);
        assert!(fx.dynamic_write);
        assert!(!fx.dynamic_read);
        assert_eq!(fx.cell_reads.len(), 1);
        assert_eq!(fx.reads, names(&["i"]));
    }

    #[test]
    fn test_call_reports_callee_writes_and_output_cells() {
        let stmts = vec![
            define_subprocess(
                "SplitName",
                vec![
                    input(&["Name"], Some("text"), None),
                    push(to_name("Parts"), call("TextSplit", vec![var("Name"), text(" ")])),
                ],
            ),
            effect(call("SplitName", vec![cell("A1"), grid(anchor("B1"))])),
        ];
        let fx = effects_of(&stmts, 1);
        assert!(fx.writes.contains("parts"));
        assert!(!fx.writes.contains("name"));
        assert_eq!(fx.cell_reads, vec![Area::cell(addr("A1"))]);
        assert_eq!(fx.cell_writes, vec![Area::anchored(addr("B1"))]);
    }

    #[test]
    fn test_recursive_callee_terminates() {
        let stmts = vec![
            define_function(
                "Loop",
                vec![push(to_name("total"), call("Loop", vec![]))],
            ),
            effect(call("Loop", vec![])),
        ];
        let fx = effects_of(&stmts, 1);
        assert!(fx.writes.contains("total"));
    }

    #[test]
    fn test_constraint_only_let_is_guard() {
        let stmts = vec![
            let_chain(vec![constrain("x").of_type("number")]),
            let_then(constrain("x").bound(BinOp::Gt, num(10.0)), vec![]),
        ];
        assert!(effects_of(&stmts, 0).guard);
        assert!(!effects_of(&stmts, 1).guard);
    }

    #[test]
    fn test_anchor_overlap() {
        let a = Area::anchored(addr("A3"));
        assert!(a.overlaps(&Area::cell(addr("C9"))));
        assert!(!a.overlaps(&Area::range(addr("A1"), addr("C2"))));
        assert!(Area::range(addr("A1"), addr("C2")).overlaps(&Area::cell(addr("B2"))));
    }
}
