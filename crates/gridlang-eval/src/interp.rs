//! Statement execution over planned blocks.

use crate::config::EvalConfig;
use crate::env::{Binding, BindingKind, BoundCheck, Scope};
use crate::error::{EvalError, EvalResult};
use crate::grid::{Grid, GridRef};
use crate::machine::{BlockFrame, Driver, Flow, Frame, LoopFrame, Machine};
use crate::mutate::Mutation;
use crate::plan::{self, Node, NodeKind, Plan};
use crate::registry::{self, Registry, PRIMITIVES};
use crate::shape::Axis;
use crate::value::{ObjectRef, Value};
use gridlang_types::ast::*;
use gridlang_types::Span;
use std::collections::HashMap;
use std::rc::Rc;

/// Where a visible name lives.
pub(crate) enum Home {
    Local,
    Field(ObjectRef),
    Global,
}

/// Root primitive and resolved bounds of a constrained subtype.
#[derive(Debug, Clone)]
pub(crate) struct Subtype {
    pub primitive: String,
    pub bounds: Vec<BoundCheck>,
}

/// Shared state of one script run.
pub struct Interpreter<'p> {
    pub(crate) registry: Registry<'p>,
    /// Script-level bindings.
    pub(crate) globals: Scope,
    /// The script's grid.
    pub(crate) grid: GridRef,
    pub(crate) subtypes: HashMap<String, Subtype>,
    /// Host values by top-level `Input` name.
    host_inputs: HashMap<String, Value>,
    gas: u64,
    gas_limit: u64,
    /// Span of the node being executed.
    pub(crate) span: Span,
    plans: HashMap<(usize, usize), Rc<Plan<'p>>>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, config: EvalConfig) -> EvalResult<Self> {
        let registry = Registry::collect(&program.stmts);
        let host_inputs = map_inputs(&program.stmts, config.inputs);
        let mut interp = Self {
            registry,
            globals: Scope::new(),
            grid: Grid::shared(),
            subtypes: HashMap::new(),
            host_inputs,
            gas: 0,
            gas_limit: config.gas_limit,
            span: program.span,
            plans: HashMap::new(),
        };
        interp.resolve_subtypes(&program.stmts)?;
        Ok(interp)
    }

    pub fn grid(&self) -> &GridRef {
        &self.grid
    }

    /// Consume one unit of gas. Returns error if exhausted.
    pub(crate) fn tick(&mut self) -> EvalResult<()> {
        self.gas += 1;
        if self.gas > self.gas_limit {
            Err(EvalError::GasExhausted)
        } else {
            Ok(())
        }
    }

    /// Plan for a statement list, built once per list.
    pub(crate) fn plan(&mut self, stmts: &'p [Stmt]) -> EvalResult<Rc<Plan<'p>>> {
        let key = (stmts.as_ptr() as usize, stmts.len());
        if let Some(plan) = self.plans.get(&key) {
            return Ok(Rc::clone(plan));
        }
        let plan = Rc::new(plan::build(stmts, &self.registry)?);
        self.plans.insert(key, Rc::clone(&plan));
        Ok(plan)
    }

    /// Evaluate the bounds of every constrained primitive once.
    fn resolve_subtypes(&mut self, stmts: &'p [Stmt]) -> EvalResult<()> {
        let mut scratch = Machine::script(Grid::shared());
        for stmt in stmts {
            let StmtKind::Define(Definition::Type(def)) = &stmt.kind else {
                continue;
            };
            if !matches!(def.base, Some(TypeBase::Primitive { .. })) {
                continue;
            }
            let key = def.name.key();
            let Some((mut primitive, mut bounds)) = self.registry.primitive_of(&key) else {
                continue;
            };
            while !PRIMITIVES.contains(&primitive.as_str()) {
                match self.registry.primitive_of(&primitive) {
                    Some((next, more)) if next != primitive => {
                        bounds.extend(more);
                        primitive = next;
                    }
                    _ => break,
                }
            }
            let mut resolved = Vec::with_capacity(bounds.len());
            for bound in bounds {
                let value = self.eval(&mut scratch, &bound.value)?;
                resolved.push(BoundCheck { op: bound.op, value });
            }
            tracing::trace!(name = %def.name.name, %primitive, "constrained type");
            self.subtypes.insert(
                key,
                Subtype {
                    primitive,
                    bounds: resolved,
                },
            );
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Name resolution
    // ══════════════════════════════════════════════════════════════════════

    /// Locals first, then the receiver's fields, then the globals.
    pub(crate) fn home(&self, m: &Machine<'p>, key: &str) -> Option<Home> {
        if m.locals.get(key).is_some() {
            return Some(Home::Local);
        }
        if let Some(receiver) = &m.receiver {
            if receiver.borrow().field(key).is_some() {
                return Some(Home::Field(Rc::clone(receiver)));
            }
        }
        self.globals.contains(key).then_some(Home::Global)
    }

    /// Snapshot of the binding a name resolves to. Fields read as bindings
    /// carrying their declared axes.
    pub(crate) fn binding(&self, m: &Machine<'p>, key: &str) -> Option<Binding> {
        match self.home(m, key)? {
            Home::Local => m.locals.get(key).cloned(),
            Home::Global => self.globals.get(key).cloned(),
            Home::Field(obj) => {
                let obj = obj.borrow();
                let field = obj.field(key)?;
                let mut binding = Binding::new(BindingKind::Open, field.value.clone());
                binding.constraint.axes = field.axes.clone();
                Some(binding)
            }
        }
    }

    /// Define in the innermost local scope, or the globals at script level.
    pub(crate) fn bind(&mut self, m: &mut Machine<'p>, key: &str, binding: Binding) {
        match m.locals.innermost_mut() {
            Some(scope) => scope.define(key, binding),
            None => self.globals.define(key, binding),
        }
    }

    /// Define at the root of the running context.
    pub(crate) fn bind_root(&mut self, m: &mut Machine<'p>, key: &str, binding: Binding) {
        let script = m.is_script();
        match m.locals.outermost_mut() {
            Some(scope) if !script => scope.define(key, binding),
            _ => self.globals.define(key, binding),
        }
    }

    pub(crate) fn binding_mut<'a>(
        &'a mut self,
        m: &'a mut Machine<'p>,
        key: &str,
    ) -> Option<&'a mut Binding> {
        match m.locals.get_mut(key) {
            Some(b) => Some(b),
            None => self.globals.get_mut(key),
        }
    }

    /// Grid that mirrors a binding's cell.
    pub(crate) fn home_grid(&self, m: &Machine<'p>, home: &Home) -> GridRef {
        match home {
            Home::Global => Rc::clone(&self.grid),
            _ => Rc::clone(&m.grid),
        }
    }

    /// Code of `ty` or a type related to it is running.
    pub(crate) fn inside(&self, m: &Machine<'p>, ty: &str) -> bool {
        m.owner
            .as_deref()
            .is_some_and(|o| self.registry.is_a(ty, o) || self.registry.is_a(o, ty))
    }

    // ══════════════════════════════════════════════════════════════════════
    // Statement execution
    // ══════════════════════════════════════════════════════════════════════

    pub(crate) fn exec_node(&mut self, m: &mut Machine<'p>, node: &Node<'p>) -> EvalResult<Flow<'p>> {
        self.tick()?;
        self.span = node.span;
        match &node.kind {
            NodeKind::Stmt(stmt) => self.exec_stmt(m, *stmt),
            NodeKind::Zip { headers, body } => {
                let mut columns = Vec::with_capacity(headers.len());
                for header in headers {
                    columns.push(self.tuples(m, &header.sources)?);
                }
                let count = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut rows = vec![Vec::new(); count];
                for column in columns {
                    for (row, vars) in rows.iter_mut().zip(column) {
                        row.extend(vars);
                    }
                }
                Ok(Flow::Enter(Frame::Loop(LoopFrame {
                    driver: Driver::Tuples(rows.into_iter()),
                    body: *body,
                })))
            }
        }
    }

    fn exec_stmt(&mut self, m: &mut Machine<'p>, stmt: &'p Stmt) -> EvalResult<Flow<'p>> {
        match &stmt.kind {
            StmtKind::CellAssign { target, value } => {
                let value = self.eval(m, value)?;
                let write = self.cell_write(m, target)?;
                write.apply(&m.grid, &value)?;
                Ok(Flow::Next)
            }
            StmtKind::CellDecl { cell, decl } => {
                let kind = kind_of(decl);
                self.declare(m, decl, kind, Some(*cell))?;
                Ok(Flow::Next)
            }
            StmtKind::Global(decl) => {
                if m.constructing {
                    self.declare_field(m, decl)?;
                } else {
                    self.declare(m, decl, kind_of(decl), None)?;
                }
                Ok(Flow::Next)
            }
            StmtKind::ForDecl { decls, body: None } => {
                for decl in decls {
                    self.declare(m, decl, BindingKind::Deferred, None)?;
                }
                Ok(Flow::Next)
            }
            StmtKind::ForDecl {
                decls,
                body: Some(body),
            } => self.exec_for_decl(m, decls, &body.stmts),
            StmtKind::ForLoop(l) => {
                let rows = self.tuples(m, &l.sources)?;
                let body: &'p [Stmt] = match &l.body {
                    Some(b) => &b.stmts,
                    None => &[],
                };
                Ok(Flow::Enter(Frame::Loop(LoopFrame {
                    driver: Driver::Tuples(rows.into_iter()),
                    body,
                })))
            }
            StmtKind::Let(ls) => self.exec_let(m, ls),
            StmtKind::Input(decl) => self.exec_input(m, decl),
            StmtKind::Output(decl) => self.exec_output(m, decl),
            StmtKind::Push { place, value } => {
                let value = self.eval(m, value)?;
                self.store(m, place, value, Mutation::Push)?;
                Ok(Flow::Next)
            }
            StmtKind::If(ifs) => self.exec_if(m, ifs),
            StmtKind::Guard(condition) => Ok(if self.condition(m, condition)? {
                Flow::Next
            } else {
                Flow::GuardFailed
            }),
            StmtKind::Label {
                target,
                axis,
                labels,
            } => {
                self.exec_label(m, target, axis, labels)?;
                Ok(Flow::Next)
            }
            StmtKind::Return(value) => {
                let value = self.eval(m, value)?;
                Ok(if m.callable {
                    Flow::Yield(value)
                } else {
                    Flow::Next
                })
            }
            StmtKind::Expr(e) => {
                self.eval(m, e)?;
                Ok(Flow::Next)
            }
            StmtKind::Define(_) => Ok(Flow::Next),
        }
    }

    /// Push a scope and run `stmts` inside it.
    pub(crate) fn enter_block(&mut self, m: &mut Machine<'p>, stmts: &'p [Stmt]) -> EvalResult<Flow<'p>> {
        let plan = self.plan(stmts)?;
        m.locals.push_scope();
        Ok(Flow::Enter(Frame::Block(BlockFrame::new(plan, true))))
    }

    // ── For ──────────────────────────────────────────────────────────────

    fn exec_for_decl(
        &mut self,
        m: &mut Machine<'p>,
        decls: &'p [Decl],
        body: &'p [Stmt],
    ) -> EvalResult<Flow<'p>> {
        if let Some((decl, def, args)) = self.generator(decls) {
            tracing::debug!(name = %decl.name.name, callable = %def.name.name, "generator loop");
            let source = self.prepare_call(m, def, args, None)?;
            return Ok(Flow::Enter(Frame::Loop(LoopFrame {
                driver: Driver::Generator {
                    source: Box::new(source),
                    decl,
                },
                body,
            })));
        }
        let flow = self.enter_block(m, body)?;
        for decl in decls {
            self.declare(m, decl, BindingKind::Deferred, None)?;
        }
        Ok(flow)
    }

    /// `For x init Gen(…) do`: a single declaration pulled from a callable
    /// that returns more than once.
    fn generator(&self, decls: &'p [Decl]) -> Option<(&'p Decl, &'p CallableDef, &'p [Expr])> {
        let [decl] = decls else {
            return None;
        };
        let init = decl.init.as_ref()?;
        let ExprKind::Call { callee, args } = &init.value.kind else {
            return None;
        };
        let def = self.registry.callable(&callee.key())?;
        registry::yields(&def.body).then_some((decl, def, args.as_slice()))
    }

    /// Every combination of loop sources, outer source varying slowest.
    pub(crate) fn tuples(
        &mut self,
        m: &mut Machine<'p>,
        sources: &[LoopSource],
    ) -> EvalResult<Vec<Vec<(String, Value)>>> {
        let mut out = Vec::new();
        self.expand(m, sources, Vec::new(), &mut out)?;
        Ok(out)
    }

    fn expand(
        &mut self,
        m: &mut Machine<'p>,
        sources: &[LoopSource],
        prefix: Vec<(String, Value)>,
        out: &mut Vec<Vec<(String, Value)>>,
    ) -> EvalResult<()> {
        let Some((first, rest)) = sources.split_first() else {
            out.push(prefix);
            return Ok(());
        };
        // Inner sources may read outer loop variables.
        m.locals.push_scope();
        if let Some(scope) = m.locals.innermost_mut() {
            for (key, value) in &prefix {
                scope.define(key, Binding::new(BindingKind::Loop, value.clone()));
            }
        }
        let items = self.eval(m, &first.iterable);
        m.locals.pop_scope();
        let items = match items? {
            Value::Array(a) => a.borrow().items().to_vec(),
            Value::Unbound => Vec::new(),
            scalar => vec![scalar],
        };
        for (i, item) in items.into_iter().enumerate() {
            let mut next = prefix.clone();
            next.push((first.var.key(), item));
            if let Some(index) = &first.index {
                next.push((index.key(), Value::Number((i + 1) as f64)));
            }
            self.expand(m, rest, next, out)?;
        }
        Ok(())
    }

    // ── Let ──────────────────────────────────────────────────────────────

    fn exec_let(&mut self, m: &mut Machine<'p>, ls: &'p LetStmt) -> EvalResult<Flow<'p>> {
        let mut holds = true;
        for link in &ls.bindings {
            match &link.value {
                Some(e) => {
                    let mut value = self.eval(m, e)?;
                    if let Some(ty) = &link.ty {
                        value = self.typed(value, &ty.name.key())?;
                    }
                    for bound in &link.bounds {
                        let limit = self.eval(m, &bound.value)?;
                        if !bound_holds(&value, bound.op, &limit) {
                            return Err(EvalError::TypeConstraintViolation(format!(
                                "{value} is not {} {limit}",
                                bound.op.as_str()
                            )));
                        }
                    }
                    self.store(m, &link.target, value, Mutation::Let)?;
                }
                None => {
                    if !self.link_holds(m, link)? {
                        holds = false;
                    }
                }
            }
        }
        match &ls.body {
            Some(body) if holds => self.enter_block(m, &body.stmts),
            Some(_) => Ok(Flow::Next),
            None if holds => Ok(Flow::Next),
            None => Ok(Flow::GuardFailed),
        }
    }

    /// Condition form of a Let link: `x as number <= 5`.
    fn link_holds(&mut self, m: &mut Machine<'p>, link: &LetBinding) -> EvalResult<bool> {
        let Place::Name(name) = &link.target else {
            return Err(EvalError::Runtime(
                "a Let condition must name a binding".into(),
            ));
        };
        let Some(binding) = self.binding(m, &name.key()) else {
            return Ok(false);
        };
        if let Some(ty) = &link.ty {
            let ty = ty.name.key();
            let matches = if binding.value.is_unbound() {
                binding.constraint.ty.as_deref() == Some(ty.as_str())
            } else {
                self.has_type(&binding.value, &ty)
            };
            if !matches {
                return Ok(false);
            }
        }
        for bound in &link.bounds {
            let limit = match self.eval(m, &bound.value) {
                Ok(v) => v,
                Err(EvalError::UndefinedReference(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if !bound_holds(&binding.value, bound.op, &limit) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── If ───────────────────────────────────────────────────────────────

    fn exec_if(&mut self, m: &mut Machine<'p>, ifs: &'p IfStmt) -> EvalResult<Flow<'p>> {
        let mut current = ifs;
        loop {
            if self.condition(m, &current.condition)? {
                return self.enter_block(m, &current.then_block.stmts);
            }
            match &current.else_branch {
                Some(ElseBranch::ElseIf(next)) => current = &**next,
                Some(ElseBranch::Block(block)) => return self.enter_block(m, &block.stmts),
                None => return Ok(Flow::Next),
            }
        }
    }

    // ── Input / Output ───────────────────────────────────────────────────

    fn exec_input(&mut self, m: &mut Machine<'p>, decl: &'p InputDecl) -> EvalResult<Flow<'p>> {
        let ty = decl.ty.as_ref().map(|t| t.name.key());
        for name in &decl.names {
            let key = name.key();
            // Calls and constructors bind their inputs up front.
            if m.locals.get(&key).is_some() || !m.is_script() {
                continue;
            }
            let value = match self.host_inputs.get(&key).cloned() {
                Some(supplied) => match (&ty, &decl.default) {
                    (Some(t), Some(default)) => match self.typed(supplied, t) {
                        Ok(v) => v,
                        Err(_) => {
                            let v = self.eval(m, default)?;
                            self.typed(v, t)?
                        }
                    },
                    (Some(t), None) => self.typed(supplied, t)?,
                    (None, _) => supplied,
                },
                None => match &decl.default {
                    Some(default) => {
                        let v = self.eval(m, default)?;
                        match &ty {
                            Some(t) => self.typed(v, t)?,
                            None => v,
                        }
                    }
                    None => {
                        return Err(EvalError::UndefinedReference(format!(
                            "input `{}` was not supplied",
                            name.name
                        )))
                    }
                },
            };
            let mut binding = Binding::new(BindingKind::Input, value);
            binding.constraint.ty = ty.clone();
            self.bind(m, &key, binding);
        }
        Ok(Flow::Next)
    }

    fn exec_output(&mut self, m: &mut Machine<'p>, decl: &'p OutputDecl) -> EvalResult<Flow<'p>> {
        let key = decl.name.key();
        let ty = decl.ty.as_ref().map(|t| t.name.key());
        let mut value = match &decl.init {
            Some(init) => {
                let v = self.eval(m, &init.value)?;
                match init.mode {
                    InitMode::Init => v.deep_copy(),
                    _ => v,
                }
            }
            None => Value::Unbound,
        };
        if let Some(t) = &ty {
            value = self.typed(value, t)?;
        }
        if !value.is_unbound() {
            if let Some(out) = m.outputs.get(&key) {
                out.target.apply(&out.grid, &value)?;
            }
        }
        let mut binding = Binding::new(BindingKind::Output, value);
        binding.constraint.ty = ty;
        self.bind(m, &key, binding);
        Ok(Flow::Next)
    }

    // ── Labels ───────────────────────────────────────────────────────────

    fn exec_label(
        &mut self,
        m: &mut Machine<'p>,
        target: &Ident,
        axis: &Ident,
        labels: &[Expr],
    ) -> EvalResult<()> {
        let mut names = Vec::with_capacity(labels.len());
        for label in labels {
            names.push(self.eval(m, label)?.to_string());
        }
        let key = target.key();
        let missing = || EvalError::UndefinedReference(format!("`{}` has no axis `{}`", target.name, axis.name));
        match self.home(m, &key) {
            Some(Home::Field(obj)) => {
                let mut obj = obj.borrow_mut();
                let field = obj.field_mut(&key).ok_or_else(missing)?;
                set_labels(field.axes.as_mut(), axis, names).ok_or_else(missing)
            }
            Some(_) => {
                let binding = self.binding_mut(m, &key).ok_or_else(missing)?;
                set_labels(binding.constraint.axes.as_mut(), axis, names).ok_or_else(missing)
            }
            None => Err(EvalError::UndefinedReference(format!("`{}`", target.name))),
        }
    }

    /// Truth of a condition; references that cannot resolve count as false.
    pub(crate) fn condition(&mut self, m: &mut Machine<'p>, e: &Expr) -> EvalResult<bool> {
        match self.eval(m, e) {
            Ok(v) => Ok(v.truthy()),
            Err(EvalError::UndefinedReference(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn set_labels(axes: Option<&mut Vec<Axis>>, axis: &Ident, names: Vec<String>) -> Option<()> {
    let found = axes?.iter_mut().find(|a| a.is_named(axis.bare()))?;
    found.labels = names;
    Some(())
}

/// Binding kind implied by a declaration's initializer.
pub(crate) fn kind_of(decl: &Decl) -> BindingKind {
    match decl.init.as_ref().map(|i| i.mode) {
        Some(InitMode::Equality) => BindingKind::Constant,
        Some(InitMode::Init) => BindingKind::Init,
        Some(InitMode::Default) => BindingKind::Default,
        None => BindingKind::Open,
    }
}

/// Comparison bound, checked elementwise on arrays.
pub(crate) fn bound_holds(value: &Value, op: BinOp, limit: &Value) -> bool {
    match value {
        Value::Unbound => true,
        Value::Array(a) => a.borrow().items().iter().all(|v| bound_holds(v, op, limit)),
        v => crate::ops::binary(op, v, limit).is_ok_and(|r| r.truthy()),
    }
}

/// Top-level `Input` names paired with host values in declaration order.
fn map_inputs(stmts: &[Stmt], supplied: Vec<Value>) -> HashMap<String, Value> {
    let names = stmts.iter().flat_map(|s| match &s.kind {
        StmtKind::Input(decl) => decl.names.iter().map(Ident::key).collect::<Vec<_>>(),
        _ => Vec::new(),
    });
    names.zip(supplied).collect()
}
