//! Expression evaluation.

use crate::builtins::Builtin;
use crate::error::{EvalError, EvalResult};
use crate::interp::{Home, Interpreter};
use crate::machine::{CellWrite, Machine};
use crate::ops;
use crate::shape::{self, Axis};
use crate::text::{self, Segment};
use crate::value::{Array, Value};
use gridlang_types::ast::*;
use gridlang_types::CellAddr;

impl<'p> Interpreter<'p> {
    // ══════════════════════════════════════════════════════════════════════
    // Expression evaluation
    // ══════════════════════════════════════════════════════════════════════

    /// Evaluate an expression to a Value.
    pub fn eval(&mut self, m: &mut Machine<'p>, e: &Expr) -> EvalResult<Value> {
        self.tick()?;
        match &e.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Text(raw) => Ok(Value::Text(text::unquote(raw))),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Infinity => Ok(Value::Number(f64::INFINITY)),
            ExprKind::NotAvailable => Ok(Value::Number(f64::NAN)),

            ExprKind::Interpolated { template, embedded } => {
                self.eval_interpolated(m, template, embedded)
            }
            ExprKind::Ident(id) => self.eval_ident(m, id),
            ExprKind::Cell(target) => self.eval_cell(m, target),
            ExprKind::Array(rows) => self.eval_array(m, rows),

            ExprKind::Binary { left, op, right } => self.eval_binary(m, left, *op, right),
            ExprKind::Unary { op, operand } => {
                let v = self.eval(m, operand)?;
                ops::unary(*op, &v)
            }
            ExprKind::Range { from, to, step } => {
                let from = self.number(m, from)?;
                let to = self.number(m, to)?;
                let step = match step {
                    Some(s) => Some(self.number(m, s)?),
                    None => None,
                };
                let items = ops::range(from, to, step)?;
                Ok(Value::list(items.into_iter().map(Value::Number).collect()))
            }
            ExprKind::Reshape { value, dims } => {
                let v = self.eval(m, value)?;
                reshape_value(v, dims)
            }
            ExprKind::Test { subject, checks } => self.eval_test(m, subject, checks),

            ExprKind::Call { callee, args } => self.eval_call(m, callee, args),
            ExprKind::Index { target, indices } => self.eval_index(m, target, indices),
            ExprKind::Ordinal { target, position } => {
                let v = self.eval(m, target)?;
                let n = self.integer(m, position)?;
                nth(&v, n)
            }
            ExprKind::LocalCell { target, cell } => {
                let v = self.eval(m, target)?;
                local_cell(&v, *cell)
            }
            ExprKind::LabelLookup {
                target,
                axis,
                label,
            } => self.eval_label_lookup(m, target, axis, label),

            ExprKind::Field { object, field } => self.eval_field(m, object, field),
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.eval_method_call(m, receiver, method, args),
            ExprKind::New { ty, args, with } => self.eval_new(m, ty, args, with),
            ExprKind::Super(args) => self.eval_super(m, args),
        }
    }

    // ── Names ────────────────────────────────────────────────────────────

    /// Current value of a visible name.
    pub(crate) fn value_of(&self, m: &Machine<'p>, key: &str) -> Option<Value> {
        match self.home(m, key)? {
            Home::Local => m.locals.get(key).map(|b| b.value.clone()),
            Home::Global => self.globals.get(key).map(|b| b.value.clone()),
            Home::Field(obj) => obj.borrow().field(key).map(|f| f.value.clone()),
        }
    }

    fn eval_ident(&mut self, m: &mut Machine<'p>, id: &Ident) -> EvalResult<Value> {
        let key = id.key();
        if let Some(v) = self.value_of(m, &key) {
            return Ok(v);
        }
        if key == "grid" {
            return Ok(m.grid.borrow().to_array());
        }
        Err(EvalError::UndefinedReference(format!("`{}`", id.name)))
    }

    /// Value of an expression together with the axes declared for it, when
    /// it names a dimensioned binding or field.
    pub(crate) fn eval_with_axes(
        &mut self,
        m: &mut Machine<'p>,
        e: &Expr,
    ) -> EvalResult<(Value, Option<Vec<Axis>>)> {
        match &e.kind {
            ExprKind::Ident(id) => match self.binding(m, &id.key()) {
                Some(b) => Ok((b.value, b.constraint.axes)),
                None => Ok((self.eval(m, e)?, None)),
            },
            ExprKind::Field { object, field } => {
                let target = self.eval(m, object)?;
                if let Value::Object(obj) = &target {
                    let found = obj.borrow().field(&field.key()).map(|f| {
                        (f.hidden, f.value.clone(), f.axes.clone())
                    });
                    if let Some((hidden, value, axes)) = found {
                        self.check_field_access(m, obj, field, hidden)?;
                        return Ok((value, axes));
                    }
                }
                Ok((self.field_of(m, target, field)?, None))
            }
            _ => Ok((self.eval(m, e)?, None)),
        }
    }

    // ── Text ─────────────────────────────────────────────────────────────

    fn eval_interpolated(
        &mut self,
        m: &mut Machine<'p>,
        template: &str,
        embedded: &[Embedded],
    ) -> EvalResult<Value> {
        let mut out = String::new();
        for segment in text::scan(template) {
            match segment {
                Segment::Literal(s) => out.push_str(&s),
                Segment::Embed { source, width } => {
                    let expr = embedded
                        .iter()
                        .find(|e| e.source.trim() == source.trim())
                        .ok_or_else(|| {
                            EvalError::UndefinedReference(format!("`{{{source}}}` in template"))
                        })?;
                    let rendered = self.eval(m, &expr.expr)?.to_string();
                    match width {
                        Some(w) => out.push_str(&text::pad(&rendered, w)),
                        None => out.push_str(&rendered),
                    }
                }
            }
        }
        Ok(Value::Text(out))
    }

    // ── Arrays ───────────────────────────────────────────────────────────

    fn eval_array(&mut self, m: &mut Machine<'p>, rows: &[Vec<Expr>]) -> EvalResult<Value> {
        let width = rows.first().map_or(0, Vec::len);
        let mut items = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(EvalError::ArityOrShapeMismatch(format!(
                    "array rows of length {width} and {}",
                    row.len()
                )));
            }
            for e in row {
                items.push(self.eval(m, e)?);
            }
        }
        if rows.len() <= 1 {
            return Ok(Value::list(items));
        }
        Ok(Value::array(Array::from_parts(vec![rows.len(), width], items)))
    }

    fn eval_index(&mut self, m: &mut Machine<'p>, target: &Expr, indices: &[Expr]) -> EvalResult<Value> {
        if let ExprKind::Ident(id) = &target.kind {
            if id.key() == "grid" && self.home(m, "grid").is_none() {
                let [row, col] = indices else {
                    return Err(EvalError::ArityOrShapeMismatch(
                        "grid{row, col} takes two indices".into(),
                    ));
                };
                let row = self.integer(m, row)?;
                let col = self.integer(m, col)?;
                return Ok(m.grid.borrow().at(row, col).unwrap_or(Value::Unbound));
            }
        }
        let (value, axes) = self.eval_with_axes(m, target)?;
        self.index_value(m, value, axes.as_deref(), indices)
    }

    /// `D{i, j}`: numbers count from each axis's lower bound, text picks by
    /// label. Fewer indices than axes select a sub-array.
    pub(crate) fn index_value(
        &mut self,
        m: &mut Machine<'p>,
        value: Value,
        axes: Option<&[Axis]>,
        indices: &[Expr],
    ) -> EvalResult<Value> {
        let Value::Array(a) = &value else {
            return Err(EvalError::TypeConstraintViolation(format!(
                "cannot index {value}"
            )));
        };
        let mut current = a.borrow().clone();
        for (k, ix) in indices.iter().enumerate() {
            let axis = axes.and_then(|ax| ax.get(k));
            let at = self.eval(m, ix)?;
            let pos = match &at {
                Value::Text(label) => axis.and_then(|ax| ax.label_position(label)),
                other => other.as_number().and_then(|n| {
                    if n.fract() != 0.0 {
                        return None;
                    }
                    match axis {
                        Some(ax) => ax.position(n as i64),
                        None => usize::try_from(n as i64 - 1).ok(),
                    }
                }),
            };
            current = pos
                .and_then(|p| current.select(0, p))
                .ok_or_else(|| EvalError::UndefinedReference(format!("index {at} is out of range")))?;
        }
        Ok(current.into_value())
    }

    fn eval_label_lookup(
        &mut self,
        m: &mut Machine<'p>,
        target: &Expr,
        axis: &Ident,
        label: &Expr,
    ) -> EvalResult<Value> {
        let (value, axes) = self.eval_with_axes(m, target)?;
        let name = self.eval(m, label)?.to_string();
        let axes = axes.unwrap_or_default();
        let missing = || EvalError::UndefinedReference(format!("no `{}` label \"{name}\"", axis.name));
        let k = axes.iter().position(|a| a.is_named(axis.bare())).ok_or_else(missing)?;
        let pos = axes[k].label_position(&name).ok_or_else(missing)?;
        let Value::Array(a) = &value else {
            return Err(missing());
        };
        let picked = a.borrow().select(k, pos).ok_or_else(missing)?;
        if picked.len() == 1 {
            return Ok(picked.items()[0].clone());
        }
        Ok(picked.into_value())
    }

    // ── Cells ────────────────────────────────────────────────────────────

    pub(crate) fn cell_addr(&mut self, m: &mut Machine<'p>, r: &CellRef) -> EvalResult<CellAddr> {
        let col = match &r.column {
            ColumnRef::Fixed(c) => *c,
            ColumnRef::Offset { base, offset } => {
                let i = self.integer(m, offset)?;
                let c = i64::from(*base) + i - 1;
                u32::try_from(c).ok().filter(|c| *c >= 1).ok_or_else(|| {
                    EvalError::Runtime(format!("column offset {i} leaves the grid"))
                })?
            }
        };
        let row = match &r.row {
            RowRef::Fixed(n) => *n,
            RowRef::Dynamic(e) => {
                let n = self.integer(m, e)?;
                u32::try_from(n)
                    .ok()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| EvalError::Runtime(format!("row {n} is not a grid row")))?
            }
        };
        Ok(CellAddr::new(col, row))
    }

    pub(crate) fn cell_write(&mut self, m: &mut Machine<'p>, target: &CellTarget) -> EvalResult<CellWrite> {
        Ok(match target {
            CellTarget::Single(r) => CellWrite::Single(self.cell_addr(m, r)?),
            CellTarget::Anchor(r) => CellWrite::Anchor(self.cell_addr(m, r)?),
            CellTarget::Range(a, b) => CellWrite::Range(self.cell_addr(m, a)?, self.cell_addr(m, b)?),
        })
    }

    fn eval_cell(&mut self, m: &mut Machine<'p>, target: &CellTarget) -> EvalResult<Value> {
        match self.cell_write(m, target)? {
            CellWrite::Single(addr) | CellWrite::Anchor(addr) => Ok(m.grid.borrow().get(addr)),
            CellWrite::Range(from, to) => Ok(m.grid.borrow().read_range(from, to)),
        }
    }

    /// Evaluate to a whole number.
    pub(crate) fn integer(&mut self, m: &mut Machine<'p>, e: &Expr) -> EvalResult<i64> {
        let n = self.number(m, e)?;
        if !n.is_finite() || n.fract() != 0.0 {
            return Err(EvalError::Runtime(format!("{n} is not a whole number")));
        }
        Ok(n as i64)
    }

    // ── Operators ────────────────────────────────────────────────────────

    fn eval_binary(
        &mut self,
        m: &mut Machine<'p>,
        left: &Expr,
        op: BinOp,
        right: &Expr,
    ) -> EvalResult<Value> {
        match op {
            BinOp::And => {
                let l = self.eval(m, left)?;
                if !l.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(m, right)?.truthy()))
            }
            BinOp::Or => {
                let l = self.eval(m, left)?;
                if l.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(m, right)?.truthy()))
            }
            BinOp::In => {
                let l = self.eval(m, left)?;
                if let ExprKind::Range { from, to, step: None } = &right.kind {
                    let lo = self.number(m, from)?;
                    let hi = self.number(m, to)?;
                    return Ok(Value::Bool(ops::within(&l, lo, hi)));
                }
                let r = self.eval(m, right)?;
                ops::binary(op, &l, &r)
            }
            _ => {
                let l = self.eval(m, left)?;
                let r = self.eval(m, right)?;
                ops::binary(op, &l, &r)
            }
        }
    }

    /// `x as text dim {}`, `x of dollar`: every check must hold.
    fn eval_test(&mut self, m: &mut Machine<'p>, subject: &Expr, checks: &[Check]) -> EvalResult<Value> {
        let (value, constraint) = match &subject.kind {
            ExprKind::Ident(id) => match self.binding(m, &id.key()) {
                Some(b) => (b.value, Some(b.constraint)),
                None => return Err(EvalError::UndefinedReference(format!("`{}`", id.name))),
            },
            _ => (self.eval(m, subject)?, None),
        };
        for check in checks {
            let holds = match check {
                Check::Type(t) => {
                    let ty = t.name.key();
                    if value.is_unbound() {
                        constraint.as_ref().and_then(|c| c.ty.as_deref()) == Some(ty.as_str())
                    } else {
                        self.has_type(&value, &ty)
                    }
                }
                Check::Unit(u) => {
                    constraint.as_ref().and_then(|c| c.unit.as_deref()) == Some(u.key().as_str())
                }
                Check::Dim(dim) => shape::matches_dim(&value, dim),
            };
            if !holds {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }

    // ── Calls ────────────────────────────────────────────────────────────

    /// `f(args)`: array indexing, then user callables, then members of the
    /// running type, then builtins.
    fn eval_call(&mut self, m: &mut Machine<'p>, callee: &Ident, args: &[Expr]) -> EvalResult<Value> {
        let key = callee.key();
        if let Some(b) = self.binding(m, &key) {
            if let Value::Array(_) = &b.value {
                return self.index_value(m, b.value, b.constraint.axes.as_deref(), args);
            }
        }
        if let Some(def) = self.registry.callable(&key) {
            return self.call_user(m, def, args, None);
        }
        if let Some(receiver) = m.receiver.clone() {
            let ty = receiver.borrow().type_name.to_ascii_lowercase();
            if let Some((owner, def)) = self.registry.dispatch(&ty, &key) {
                return self.call_member(m, receiver, owner, def, args);
            }
        }
        if let Some(builtin) = Builtin::from_name(&key) {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(self.eval(m, a)?);
            }
            return builtin.call(&values);
        }
        Err(EvalError::UndefinedReference(format!("`{}`", callee.name)))
    }
}

/// `expr dim {…}`
fn reshape_value(value: Value, dims: &DimSpec) -> EvalResult<Value> {
    let dims: Vec<Option<usize>> = match dims {
        DimSpec::Scalar => Vec::new(),
        DimSpec::Any => vec![None],
        DimSpec::Axes(specs) => specs
            .iter()
            .map(|s| match s.extent {
                Extent::Count(n) => Some(n as usize),
                Extent::Bounds(lo, hi) => Some((hi - lo + 1).max(0) as usize),
                Extent::Growable => None,
            })
            .collect(),
    };
    let array = match &value {
        Value::Array(a) => a.borrow().clone(),
        scalar => Array::list(vec![scalar.clone()]),
    };
    if dims.is_empty() {
        return match array.items() {
            [single] => Ok(single.clone()),
            _ => Err(EvalError::ArityOrShapeMismatch(format!(
                "{value} is not a single value"
            ))),
        };
    }
    Ok(Value::array(shape::reshape(&array, &dims)?))
}

/// `names[3]`: flat, 1-based. Text indexes characters.
fn nth(value: &Value, n: i64) -> EvalResult<Value> {
    let out_of_range = || EvalError::UndefinedReference(format!("position {n} is out of range"));
    let pos = usize::try_from(n - 1).map_err(|_| out_of_range())?;
    match value {
        Value::Array(a) => a.borrow().items().get(pos).cloned().ok_or_else(out_of_range),
        Value::Text(s) => s
            .chars()
            .nth(pos)
            .map(|c| Value::Text(c.to_string()))
            .ok_or_else(out_of_range),
        other => Err(EvalError::TypeConstraintViolation(format!("cannot index {other}"))),
    }
}

/// `Results[B1]`: the array viewed as rows and columns from A1.
fn local_cell(value: &Value, cell: CellAddr) -> EvalResult<Value> {
    let Value::Array(a) = value else {
        return Err(EvalError::TypeConstraintViolation(format!("cannot index {value}")));
    };
    let a = a.borrow();
    let (rows, cols) = a.rows_cols();
    let (r, c) = (cell.row as usize, cell.col as usize);
    if r > rows || c > cols {
        return Err(EvalError::UndefinedReference(format!("{cell} is outside the array")));
    }
    Ok(a.items()[(r - 1) * cols + (c - 1)].clone())
}
