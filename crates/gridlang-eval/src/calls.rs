//! Callables, members and object construction.

use crate::env::{Binding, BindingKind};
use crate::error::{EvalError, EvalResult};
use crate::grid::{Grid, GridRef};
use crate::interp::Interpreter;
use crate::machine::{BlockFrame, Frame, Machine, OutputTarget};
use crate::registry::{self, Param};
use crate::shape;
use crate::types::{field_mode, fit_to};
use crate::value::{Array, Field, FieldMode, Object, ObjectRef, Value};
use gridlang_types::ast::*;
use std::cell::RefCell;
use std::rc::Rc;

impl<'p> Interpreter<'p> {
    // ══════════════════════════════════════════════════════════════════════
    // Calls
    // ══════════════════════════════════════════════════════════════════════

    /// Run a user callable to completion and return its result.
    pub(crate) fn call_user(
        &mut self,
        m: &mut Machine<'p>,
        def: &'p CallableDef,
        args: &[Expr],
        leading: Option<Value>,
    ) -> EvalResult<Value> {
        let mut callee = self.prepare_call(m, def, args, leading)?;
        tracing::debug!(callable = %def.name.name, "call");
        let last = self.finish(&mut callee)?;
        Ok(call_result(def, &callee, last))
    }

    /// A suspended machine for `def` with its inputs bound and its output
    /// targets attached. Arguments past the Inputs are output targets.
    pub(crate) fn prepare_call(
        &mut self,
        m: &mut Machine<'p>,
        def: &'p CallableDef,
        args: &[Expr],
        leading: Option<Value>,
    ) -> EvalResult<Machine<'p>> {
        let params = registry::inputs(&def.body);
        let outputs = registry::outputs(&def.body);
        let grid = if registry::has_private_grid(def) {
            Grid::shared()
        } else {
            Rc::clone(&m.grid)
        };
        let mut callee = Machine::call(grid, def.owner.as_ref().map(Ident::key));

        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = leading {
            match (&receiver, params.is_empty()) {
                (Value::Object(obj), true) => callee.receiver = Some(Rc::clone(obj)),
                _ => values.push(receiver),
            }
        }
        let mut targets = Vec::new();
        for arg in args {
            if values.len() >= params.len() {
                if let ExprKind::Cell(target) = &arg.kind {
                    targets.push(self.cell_write(m, target)?);
                    continue;
                }
            }
            values.push(self.eval(m, arg)?);
        }
        if targets.len() > outputs.len() {
            return Err(EvalError::ArityOrShapeMismatch(format!(
                "`{}` has {} outputs but got {} output targets",
                def.name.name,
                outputs.len(),
                targets.len()
            )));
        }
        for (out, target) in outputs.iter().zip(targets) {
            callee.outputs.insert(
                out.name.key(),
                OutputTarget {
                    grid: Rc::clone(&m.grid),
                    target,
                },
            );
        }
        self.bind_inputs(&mut callee, &params, values, true)
            .map_err(|e| match e {
                EvalError::ArityOrShapeMismatch(msg) => {
                    EvalError::ArityOrShapeMismatch(format!("`{}`: {msg}", def.name.name))
                }
                other => other,
            })?;
        let plan = self.plan(&def.body)?;
        callee.push(Frame::Block(BlockFrame::new(plan, false)));
        Ok(callee)
    }

    /// Bind argument values to `Input` parameters in the callee's root
    /// scope. A value that fails the declared type falls back to the
    /// default; missing values use the default, then fail when `strict`.
    pub(crate) fn bind_inputs(
        &mut self,
        callee: &mut Machine<'p>,
        params: &[Param<'p>],
        values: Vec<Value>,
        strict: bool,
    ) -> EvalResult<()> {
        if values.len() > params.len() {
            return Err(EvalError::ArityOrShapeMismatch(format!(
                "expected at most {} arguments, got {}",
                params.len(),
                values.len()
            )));
        }
        let mut values = values.into_iter();
        for param in params {
            let ty = param.ty.map(|t| t.name.key());
            let value = match values.next() {
                Some(Value::Unbound) | None if param.default.is_some() => {
                    self.input_default(callee, param, ty.as_deref())?
                }
                Some(v) if !v.is_unbound() => match &ty {
                    Some(t) => match self.typed(v, t) {
                        Ok(v) => v,
                        Err(e) if param.default.is_none() => return Err(e),
                        Err(_) => self.input_default(callee, param, ty.as_deref())?,
                    },
                    None => v,
                },
                None if strict => {
                    return Err(EvalError::ArityOrShapeMismatch(format!(
                        "missing argument `{}`",
                        param.name.name
                    )))
                }
                _ => Value::Unbound,
            };
            let mut binding = Binding::new(BindingKind::Input, value);
            binding.constraint.ty = ty;
            self.bind(callee, &param.name.key(), binding);
        }
        Ok(())
    }

    fn input_default(
        &mut self,
        callee: &mut Machine<'p>,
        param: &Param<'p>,
        ty: Option<&str>,
    ) -> EvalResult<Value> {
        let Some(default) = param.default else {
            return Ok(Value::Unbound);
        };
        let value = self.eval(callee, default)?;
        match ty {
            Some(t) => self.typed(value, t),
            None => Ok(value),
        }
    }

    // ── Members ──────────────────────────────────────────────────────────

    /// Call a member or private helper found on `obj`'s type chain.
    pub(crate) fn call_member(
        &mut self,
        m: &mut Machine<'p>,
        obj: ObjectRef,
        owner: String,
        def: &'p CallableDef,
        args: &[Expr],
    ) -> EvalResult<Value> {
        let ty = obj.borrow().type_name.to_ascii_lowercase();
        let private = def.hidden || def.kind == CallableKind::PrivateHelper;
        if private && !self.inside(m, &ty) {
            return Err(EvalError::AccessViolation(format!(
                "`{}` is private to `{}`",
                def.name.bare(),
                obj.borrow().type_name
            )));
        }
        if def.kind != CallableKind::PrivateHelper {
            return self.call_user(m, def, args, Some(Value::Object(obj)));
        }

        let grid = obj.borrow().grid.clone().unwrap_or_else(|| Rc::clone(&m.grid));
        let mut callee = Machine::call(grid, Some(owner));
        callee.receiver = Some(Rc::clone(&obj));
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(m, arg)?);
        }
        let params = registry::inputs(&def.body);
        self.bind_inputs(&mut callee, &params, values, true)?;
        let plan = self.plan(&def.body)?;
        callee.push(Frame::Block(BlockFrame::new(plan, false)));
        tracing::debug!(helper = %def.name.name, "private helper");
        self.finish(&mut callee)?;
        Ok(Value::Object(obj))
    }

    /// `obj.Method(args)`, or `Type.Method(args)` as a static call.
    pub(crate) fn eval_method_call(
        &mut self,
        m: &mut Machine<'p>,
        receiver: &Expr,
        method: &Ident,
        args: &[Expr],
    ) -> EvalResult<Value> {
        let key = method.key();
        if let Some(ty) = self.static_type(m, receiver) {
            let (owner, def) = self.registry.dispatch(&ty, &key).ok_or_else(|| {
                EvalError::UndefinedReference(format!("`{}.{}`", ty, method.name))
            })?;
            if def.hidden && !self.inside(m, &owner) {
                return Err(EvalError::AccessViolation(format!(
                    "`{}` is private to `{owner}`",
                    def.name.bare()
                )));
            }
            return self.call_user(m, def, args, None);
        }
        let obj = match self.eval(m, receiver)? {
            Value::Object(obj) => obj,
            other => {
                return Err(EvalError::TypeConstraintViolation(format!(
                    "cannot call `{}` on {other}",
                    method.name
                )))
            }
        };
        let ty = obj.borrow().type_name.to_ascii_lowercase();
        if let Some((owner, def)) = self.registry.dispatch(&ty, &key) {
            return self.call_member(m, obj, owner, def, args);
        }
        let field = obj
            .borrow()
            .field(&key)
            .map(|f| (f.hidden, f.value.clone(), f.axes.clone()));
        match field {
            Some((hidden, value, axes)) => {
                self.check_field_access(m, &obj, method, hidden)?;
                self.index_value(m, value, axes.as_deref(), args)
            }
            None => Err(EvalError::UndefinedReference(format!(
                "`{}` has no member `{}`",
                obj.borrow().type_name,
                method.name
            ))),
        }
    }

    /// A bare type name used as a receiver.
    fn static_type(&self, m: &Machine<'p>, receiver: &Expr) -> Option<String> {
        let ExprKind::Ident(id) = &receiver.kind else {
            return None;
        };
        let key = id.key();
        (self.home(m, &key).is_none() && self.registry.is_type(&key)).then_some(key)
    }

    // ── Fields ───────────────────────────────────────────────────────────

    pub(crate) fn eval_field(&mut self, m: &mut Machine<'p>, object: &Expr, field: &Ident) -> EvalResult<Value> {
        if self.static_type(m, object).is_some() {
            return self.eval_method_call(m, object, field, &[]);
        }
        let target = self.eval(m, object)?;
        self.field_of(m, target, field)
    }

    /// `obj.name`: a field, the object's private grid, or a zero-argument
    /// member call.
    pub(crate) fn field_of(&mut self, m: &mut Machine<'p>, target: Value, field: &Ident) -> EvalResult<Value> {
        let Value::Object(obj) = &target else {
            return Err(EvalError::TypeConstraintViolation(format!(
                "{target} has no field `{}`",
                field.name
            )));
        };
        let key = field.key();
        let found = obj.borrow().field(&key).map(|f| (f.hidden, f.value.clone()));
        if let Some((hidden, value)) = found {
            self.check_field_access(m, obj, field, hidden)?;
            return Ok(value);
        }
        if key == "grid" {
            let grid = obj.borrow().grid.clone();
            return Ok(match grid {
                Some(g) => g.borrow().to_array(),
                None => Value::array(Array::from_parts(vec![0, 0], Vec::new())),
            });
        }
        let ty = obj.borrow().type_name.to_ascii_lowercase();
        match self.registry.dispatch(&ty, &key) {
            Some((owner, def)) => self.call_member(m, Rc::clone(obj), owner, def, &[]),
            None => Err(EvalError::UndefinedReference(format!(
                "`{}` has no field `{}`",
                obj.borrow().type_name,
                field.name
            ))),
        }
    }

    pub(crate) fn check_field_access(
        &self,
        m: &Machine<'p>,
        obj: &ObjectRef,
        field: &Ident,
        hidden: bool,
    ) -> EvalResult<()> {
        if !hidden {
            return Ok(());
        }
        let ty = obj.borrow().type_name.to_ascii_lowercase();
        if self.inside(m, &ty) {
            Ok(())
        } else {
            Err(EvalError::AccessViolation(format!(
                "`{}` is hidden in `{}`",
                field.bare(),
                obj.borrow().type_name
            )))
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Construction
    // ══════════════════════════════════════════════════════════════════════

    pub(crate) fn eval_new(
        &mut self,
        m: &mut Machine<'p>,
        ty: &Ident,
        args: &[Expr],
        with: &[FieldInit],
    ) -> EvalResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(m, arg)?);
        }
        let withs = self.with_values(m, with)?;
        self.new_object(&ty.key(), values, withs)
    }

    /// Evaluate `with (…)` values in the caller; shorthand `g` reads `g`.
    pub(crate) fn with_values<'w>(
        &mut self,
        m: &mut Machine<'p>,
        with: &'w [FieldInit],
    ) -> EvalResult<Vec<(&'w FieldInit, Value)>> {
        let mut out = Vec::with_capacity(with.len());
        for init in with {
            let value = match &init.value {
                Some(e) => self.eval(m, e)?,
                None => self.value_of(m, &init.field.key()).ok_or_else(|| {
                    EvalError::UndefinedReference(format!("`{}`", init.field.name))
                })?,
            };
            out.push((init, value));
        }
        Ok(out)
    }

    pub(crate) fn new_object(
        &mut self,
        ty: &str,
        args: Vec<Value>,
        withs: Vec<(&FieldInit, Value)>,
    ) -> EvalResult<Value> {
        let info = self
            .registry
            .type_info(ty)
            .ok_or_else(|| EvalError::UndefinedReference(format!("type `{ty}`")))?;
        if info.primitive.is_some() {
            return Err(EvalError::TypeConstraintViolation(format!(
                "`{}` is a value type and cannot be constructed",
                info.name
            )));
        }
        let obj = Rc::new(RefCell::new(Object::new(info.name.clone())));
        tracing::debug!(ty = %info.name, "construct");
        self.create_fields(&obj, ty);
        let grid = Grid::shared();
        self.construct(&obj, ty, Some(args), &grid)?;
        self.apply_with(&obj, withs)?;
        obj.borrow_mut().grid = Some(grid);
        Ok(Value::Object(obj))
    }

    /// Fields of the whole chain, base fields first, all Unbound.
    fn create_fields(&self, obj: &ObjectRef, ty: &str) {
        let mut o = obj.borrow_mut();
        for t in self.registry.chain(ty).iter().rev() {
            let Some(info) = self.registry.type_info(t) else {
                continue;
            };
            for stmt in &info.def.body {
                let StmtKind::Global(decl) = &stmt.kind else {
                    continue;
                };
                if o.field(&decl.name.key()).is_some() {
                    continue;
                }
                o.fields.push(Field {
                    name: decl.name.bare().to_string(),
                    hidden: decl.name.is_hidden(),
                    mode: field_mode(decl),
                    value: Value::Unbound,
                    axes: decl.dim.as_ref().and_then(shape::axes_of),
                });
            }
        }
    }

    /// Run the constructor body of `ty` on `obj`. Without an explicit
    /// `Super(…)` the base constructor runs first with no arguments.
    fn construct(
        &mut self,
        obj: &ObjectRef,
        ty: &str,
        args: Option<Vec<Value>>,
        grid: &GridRef,
    ) -> EvalResult<()> {
        let (def, base) = match self.registry.type_info(ty) {
            Some(info) => (info.def, info.base.clone()),
            None => return Err(EvalError::UndefinedReference(format!("type `{ty}`"))),
        };
        let body: &'p [Stmt] = &def.body;
        let params = registry::inputs(body);
        let mut cm = Machine::constructor(Rc::clone(obj), ty.to_string(), Rc::clone(grid));
        match args {
            Some(values) if params.is_empty() => fill_fields(obj, values)?,
            Some(values) => self.bind_inputs(&mut cm, &params, values, true)?,
            None => self.bind_inputs(&mut cm, &params, Vec::new(), false)?,
        }
        if let Some(base) = &base {
            if !calls_super(body) {
                self.construct(obj, base, None, grid)?;
            }
        }
        let plan = self.plan(body)?;
        cm.push(Frame::Block(BlockFrame::new(plan, false)));
        self.finish(&mut cm)?;
        Ok(())
    }

    pub(crate) fn apply_with(&self, obj: &ObjectRef, withs: Vec<(&FieldInit, Value)>) -> EvalResult<()> {
        let mut o = obj.borrow_mut();
        for (init, value) in withs {
            let key = init.field.key();
            let declared = init.dim.as_ref().and_then(shape::axes_of);
            let axes = declared
                .clone()
                .or_else(|| o.field(&key).and_then(|f| f.axes.clone()));
            let value = match &axes {
                Some(axes) if !value.is_unbound() => fit_to(value, axes)?,
                _ => value,
            };
            match o.field_mut(&key) {
                Some(field) => {
                    field.value = value;
                    if declared.is_some() {
                        field.axes = declared;
                    }
                }
                None => o.fields.push(Field {
                    name: init.field.bare().to_string(),
                    hidden: init.field.is_hidden(),
                    mode: FieldMode::Open,
                    value,
                    axes,
                }),
            }
        }
        Ok(())
    }

    /// `Super(args)`: construct the base part of the receiver in place.
    pub(crate) fn eval_super(&mut self, m: &mut Machine<'p>, args: &[Expr]) -> EvalResult<Value> {
        let (Some(obj), Some(owner), true) = (m.receiver.clone(), m.owner.clone(), m.constructing) else {
            return Err(EvalError::Runtime("Super is only valid in a constructor".into()));
        };
        let base = self
            .registry
            .type_info(&owner)
            .and_then(|t| t.base.clone())
            .ok_or_else(|| EvalError::Runtime(format!("`{owner}` has no base type")))?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(m, arg)?);
        }
        let grid = Rc::clone(&m.grid);
        self.construct(&obj, &base, Some(values), &grid)?;
        Ok(Value::Unbound)
    }
}

/// Last returned value, else the single Output, else a record of every
/// Output (carrying the private grid of a subprocess).
fn call_result(def: &CallableDef, callee: &Machine<'_>, last: Option<Value>) -> Value {
    if let Some(value) = last {
        return value;
    }
    let root = callee.locals.outermost();
    let mut fields: Vec<Field> = registry::outputs(&def.body)
        .iter()
        .map(|out| {
            let value = root
                .and_then(|s| s.get(&out.name.key()))
                .map_or(Value::Unbound, |b| b.value.clone());
            Field::new(out.name.bare(), value)
        })
        .collect();
    let grid = registry::has_private_grid(def).then(|| Rc::clone(&callee.grid));
    match (fields.len(), grid) {
        (1, _) => fields.remove(0).value,
        (0, None) => Value::Unbound,
        (_, grid) => Value::object(Object {
            type_name: def.name.bare().to_string(),
            fields,
            grid,
        }),
    }
}

/// Positional `new T(a, b)` for a type without Inputs.
fn fill_fields(obj: &ObjectRef, values: Vec<Value>) -> EvalResult<()> {
    let mut o = obj.borrow_mut();
    let visible = o.visible_fields().count();
    if values.len() > visible {
        return Err(EvalError::ArityOrShapeMismatch(format!(
            "`{}` has {visible} fields but got {} values",
            o.type_name,
            values.len()
        )));
    }
    for (field, value) in o.fields.iter_mut().filter(|f| !f.hidden).zip(values) {
        field.value = match &field.axes {
            Some(axes) if !value.is_unbound() => fit_to(value, axes)?,
            _ => value,
        };
    }
    Ok(())
}

fn calls_super(body: &[Stmt]) -> bool {
    body.iter().any(|s| {
        matches!(
            &s.kind,
            StmtKind::Expr(Expr {
                kind: ExprKind::Super(_),
                ..
            })
        )
    })
}
