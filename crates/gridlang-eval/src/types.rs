//! Declarations, coercion and constraint checks.
//!
//! Every value that lands in a declared binding goes through the same three
//! steps: fit to the declared `dim`, coerce to the declared type, then check
//! the value set and comparison bounds.

use crate::env::{Allowed, Binding, BindingKind, BoundCheck, Constraint};
use crate::error::{EvalError, EvalResult};
use crate::interp::{bound_holds, Interpreter};
use crate::machine::Machine;
use crate::ops;
use crate::shape::{self, Axis};
use crate::value::{Array, Field, FieldMode, Value};
use gridlang_types::ast::*;
use gridlang_types::CellAddr;

impl<'p> Interpreter<'p> {
    // ══════════════════════════════════════════════════════════════════════
    // Declarations
    // ══════════════════════════════════════════════════════════════════════

    pub(crate) fn declare(
        &mut self,
        m: &mut Machine<'p>,
        decl: &Decl,
        kind: BindingKind,
        cell: Option<CellAddr>,
    ) -> EvalResult<()> {
        let value = match &decl.init {
            Some(init) => {
                let v = self.eval(m, &init.value)?;
                match init.mode {
                    InitMode::Init => v.deep_copy(),
                    InitMode::Equality | InitMode::Default => v,
                }
            }
            None => Value::Unbound,
        };
        self.declare_value(m, decl, value, kind, cell)
    }

    /// Bind `decl` to an already evaluated initial value.
    pub(crate) fn declare_value(
        &mut self,
        m: &mut Machine<'p>,
        decl: &Decl,
        value: Value,
        kind: BindingKind,
        cell: Option<CellAddr>,
    ) -> EvalResult<()> {
        let key = decl.name.key();
        let constraint = self.constraint(m, decl)?;
        let value = self.shape_initial(m, decl, &constraint, value)?;
        let value = self.conform(&decl.name.name, value, &constraint)?;
        tracing::trace!(name = %decl.name.name, ?kind, "declare");
        if let Some(cell) = cell {
            m.grid.borrow_mut().assign(cell, &value);
        }
        self.bind(
            m,
            &key,
            Binding {
                value,
                kind,
                constraint,
                cell,
            },
        );
        Ok(())
    }

    /// `:` inside a constructor: the declaration becomes a receiver field.
    pub(crate) fn declare_field(&mut self, m: &mut Machine<'p>, decl: &Decl) -> EvalResult<()> {
        let Some(receiver) = m.receiver.clone() else {
            return self.declare(m, decl, crate::interp::kind_of(decl), None);
        };
        let key = decl.name.key();
        let current = receiver
            .borrow()
            .field(&key)
            .map(|f| f.value.clone())
            .unwrap_or(Value::Unbound);
        let mode = field_mode(decl);
        let value = match &decl.init {
            None => current,
            Some(init) if init.mode == InitMode::Default && !current.is_unbound() => current,
            Some(init) => {
                let v = self.eval(m, &init.value)?;
                if init.mode == InitMode::Init {
                    v.deep_copy()
                } else {
                    v
                }
            }
        };
        let constraint = self.constraint(m, decl)?;
        let value = self.shape_initial(m, decl, &constraint, value)?;
        let value = self.conform(&decl.name.name, value, &constraint)?;
        let mut obj = receiver.borrow_mut();
        match obj.field_mut(&key) {
            Some(field) => {
                field.value = value;
                field.mode = mode;
                field.axes = constraint.axes;
            }
            None => obj.fields.push(Field {
                name: decl.name.bare().to_string(),
                hidden: decl.name.is_hidden(),
                mode,
                value,
                axes: constraint.axes,
            }),
        }
        Ok(())
    }

    /// Constraint of a declaration with its value set and bounds evaluated.
    pub(crate) fn constraint(&mut self, m: &mut Machine<'p>, decl: &Decl) -> EvalResult<Constraint> {
        let mut c = Constraint {
            ty: decl.ty.as_ref().map(|t| t.name.key()),
            unit: decl.unit.as_ref().map(Ident::key),
            ..Constraint::default()
        };
        match &decl.dim {
            Some(DimSpec::Scalar) => c.scalar_only = true,
            Some(dim) => c.axes = shape::axes_of(dim),
            None => {}
        }
        if let Some(allowed) = &decl.allowed {
            c.allowed = Some(match &allowed.kind {
                ExprKind::Range { from, to, step: None } => {
                    let lo = self.number(m, from)?;
                    let hi = self.number(m, to)?;
                    Allowed::Between(lo, hi)
                }
                _ => Allowed::Set(self.eval(m, allowed)?),
            });
        }
        for bound in &decl.bounds {
            let value = self.eval(m, &bound.value)?;
            c.bounds.push(BoundCheck { op: bound.op, value });
        }
        Ok(c)
    }

    /// Record instantiation and default fill, before coercion.
    fn shape_initial(
        &mut self,
        m: &mut Machine<'p>,
        decl: &Decl,
        c: &Constraint,
        value: Value,
    ) -> EvalResult<Value> {
        let record = c.ty.as_deref().filter(|t| self.is_record(t)).map(str::to_string);
        let mut value = value;
        if let Some(ty) = &record {
            value = match value {
                Value::Array(a) if c.axes.is_none() => {
                    let args = a.borrow().items().to_vec();
                    let withs = self.with_values(m, &decl.with)?;
                    self.new_object(ty, args, withs)?
                }
                Value::Unbound if !decl.with.is_empty() => {
                    let withs = self.with_values(m, &decl.with)?;
                    self.new_object(ty, Vec::new(), withs)?
                }
                Value::Object(obj) if !decl.with.is_empty() => {
                    let withs = self.with_values(m, &decl.with)?;
                    self.apply_with(&obj, withs)?;
                    Value::Object(obj)
                }
                other => other,
            };
        }
        if let (Some(axes), Value::Unbound) = (&c.axes, &value) {
            if record.is_none() {
                let fill = match c.ty.as_deref().map(|t| self.root_primitive(t)) {
                    Some("text") => Value::text(""),
                    Some("boolean") => Value::Bool(false),
                    _ => Value::Number(0.0),
                };
                return Ok(Value::array(Array::filled(shape::empty_shape(axes), &fill)));
            }
        }
        Ok(value)
    }

    /// Fit, coerce and check a value headed for a binding.
    pub(crate) fn conform(&self, name: &str, value: Value, c: &Constraint) -> EvalResult<Value> {
        let mut value = value;
        if let Some(axes) = &c.axes {
            if !value.is_unbound() {
                value = fit_to(value, axes)?;
            }
        }
        if let Some(ty) = &c.ty {
            value = self.typed(value, ty)?;
        }
        self.check(name, &value, c)?;
        Ok(value)
    }

    /// Value set, scalar-ness and bounds.
    pub(crate) fn check(&self, name: &str, value: &Value, c: &Constraint) -> EvalResult<()> {
        if value.is_unbound() {
            return Ok(());
        }
        if c.scalar_only && !value.is_scalar() {
            return Err(EvalError::TypeConstraintViolation(format!(
                "`{name}` is declared dim {{}} but got {value}"
            )));
        }
        if let Some(allowed) = &c.allowed {
            let ok = scalars(value).iter().all(|v| match allowed {
                Allowed::Set(set) => ops::member_of(v, set),
                Allowed::Between(lo, hi) => ops::within(v, *lo, *hi),
            });
            if !ok {
                return Err(EvalError::TypeConstraintViolation(format!(
                    "{value} is not an allowed value of `{name}`"
                )));
            }
        }
        for bound in &c.bounds {
            if !bound_holds(value, bound.op, &bound.value) {
                return Err(EvalError::TypeConstraintViolation(format!(
                    "`{name}` = {value} is not {} {}",
                    bound.op.as_str(),
                    bound.value
                )));
            }
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Types
    // ══════════════════════════════════════════════════════════════════════

    pub(crate) fn is_record(&self, ty: &str) -> bool {
        self.registry.is_type(ty) && !self.subtypes.contains_key(ty)
    }

    fn root_primitive<'a>(&'a self, ty: &'a str) -> &'a str {
        self.subtypes.get(ty).map_or(ty, |s| s.primitive.as_str())
    }

    fn known_type(&self, ty: &str) -> bool {
        crate::registry::PRIMITIVES.contains(&ty) || self.registry.is_type(ty)
    }

    /// Whether a value already is of type `ty`; arrays elementwise.
    pub(crate) fn has_type(&self, value: &Value, ty: &str) -> bool {
        match value {
            Value::Array(a) => a.borrow().items().iter().all(|v| self.has_type(v, ty)),
            Value::Unbound => false,
            Value::Number(_) if ty == "number" => true,
            Value::Text(_) if ty == "text" => true,
            Value::Bool(_) if ty == "boolean" => true,
            Value::Object(o) => {
                let own = o.borrow().type_name.to_ascii_lowercase();
                self.registry.is_a(&own, ty)
            }
            scalar => match self.subtypes.get(ty) {
                Some(sub) => {
                    self.has_type(scalar, &sub.primitive)
                        && sub.bounds.iter().all(|b| bound_holds(scalar, b.op, &b.value))
                }
                None => false,
            },
        }
    }

    /// Coerce to `ty`: numeric text parses, numbers and booleans render as
    /// text, and `"true"`/`"false"` read as booleans. Unbound passes.
    pub(crate) fn typed(&self, value: Value, ty: &str) -> EvalResult<Value> {
        if !self.known_type(ty) {
            return Err(EvalError::UndefinedReference(format!("type `{ty}`")));
        }
        if value.is_unbound() || self.has_type(&value, ty) {
            return Ok(value);
        }
        match &value {
            Value::Array(a) => {
                let a = a.borrow();
                let items = a
                    .items()
                    .iter()
                    .map(|v| self.typed(v.clone(), ty))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(Array::from_parts(a.shape().to_vec(), items)))
            }
            Value::Object(_) => Err(violation(&value, ty)),
            scalar => {
                let converted = match (self.root_primitive(ty), scalar) {
                    ("number", Value::Text(s)) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Number)
                        .map_err(|_| violation(scalar, ty))?,
                    ("number", Value::Bool(b)) => Value::Number(if *b { 1.0 } else { 0.0 }),
                    ("text", Value::Number(_) | Value::Bool(_)) => Value::Text(scalar.to_string()),
                    ("boolean", Value::Text(s)) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
                    ("boolean", Value::Text(s)) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
                    ("boolean", Value::Number(n)) => Value::Bool(*n != 0.0),
                    _ => scalar.clone(),
                };
                if self.has_type(&converted, ty) {
                    Ok(converted)
                } else {
                    Err(violation(scalar, ty))
                }
            }
        }
    }

    /// Evaluate to a number.
    pub(crate) fn number(&mut self, m: &mut Machine<'p>, e: &Expr) -> EvalResult<f64> {
        let v = self.eval(m, e)?;
        v.as_number().ok_or_else(|| {
            EvalError::TypeConstraintViolation(format!("expected a number, got {v}"))
        })
    }
}

/// Keep the original storage when it already has the declared shape so that
/// `=` aliases stay shared.
pub(crate) fn fit_to(value: Value, axes: &[Axis]) -> EvalResult<Value> {
    if let Value::Array(a) = &value {
        let a = a.borrow();
        let fits = a.rank() == axes.len()
            && a.shape()
                .iter()
                .zip(axes)
                .all(|(n, ax)| ax.size.map_or(true, |s| s == *n));
        if fits {
            drop(a);
            return Ok(value);
        }
    }
    shape::fit(&value, axes)
}

pub(crate) fn field_mode(decl: &Decl) -> FieldMode {
    match decl.init.as_ref().map(|i| i.mode) {
        Some(InitMode::Equality) => FieldMode::Equality,
        Some(InitMode::Init) => FieldMode::Init,
        Some(InitMode::Default) => FieldMode::Default,
        None => FieldMode::Open,
    }
}

/// Scalar leaves of a value.
fn scalars(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(a) => a.borrow().items().iter().flat_map(scalars).collect(),
        v => vec![v.clone()],
    }
}

fn violation(value: &Value, ty: &str) -> EvalError {
    EvalError::TypeConstraintViolation(format!("{value} is not a {ty}"))
}
