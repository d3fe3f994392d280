//! `Let` and `push` stores.
//!
//! A store lands on a name, an array element, an object field or a cell.
//! Names accept any value their constraint admits; elements must fall
//! inside the declared axes, except that `push` one past the end of a
//! leading `*` axis appends.

use crate::env::{Binding, BindingKind};
use crate::error::{EvalError, EvalResult};
use crate::interp::{Home, Interpreter};
use crate::machine::Machine;
use crate::shape::{self, Axis};
use crate::types::fit_to;
use crate::value::{Array, ArrayRef, FieldMode, Value};
use gridlang_types::ast::{ElementIndex, Expr, Ident, Place};
use gridlang_types::CellAddr;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mutation {
    /// `Let`: may create a name; never grows an array.
    Let,
    /// `push`: the target must already exist.
    Push,
}

impl<'p> Interpreter<'p> {
    pub(crate) fn store(
        &mut self,
        m: &mut Machine<'p>,
        place: &Place,
        value: Value,
        how: Mutation,
    ) -> EvalResult<()> {
        match place {
            Place::Name(name) => self.store_name(m, name, value, how),
            Place::Element { name, index } => self.store_element(m, name, index, value, how),
            Place::Field { object, field } => self.store_field(m, object, field, value),
            Place::Cell(target) => {
                let write = self.cell_write(m, target)?;
                write.apply(&m.grid, &value)
            }
        }
    }

    fn store_name(
        &mut self,
        m: &mut Machine<'p>,
        name: &Ident,
        value: Value,
        how: Mutation,
    ) -> EvalResult<()> {
        let key = name.key();
        tracing::trace!(name = %name.name, ?how, "store");
        let Some(home) = self.home(m, &key) else {
            if how == Mutation::Push {
                return Err(EvalError::UndefinedReference(format!(
                    "cannot push to undeclared `{}`",
                    name.name
                )));
            }
            self.bind_root(m, &key, Binding::new(BindingKind::Let, value));
            return Ok(());
        };

        if let Home::Field(obj) = &home {
            let mut obj = obj.borrow_mut();
            let Some(field) = obj.field_mut(&key) else {
                return Ok(());
            };
            if field.mode == FieldMode::Equality {
                return Err(EvalError::MutationViolation(format!(
                    "field `{}` is fixed by its constructor",
                    field.name
                )));
            }
            field.value = match &field.axes {
                Some(axes) if !value.is_unbound() => fit_to(value, axes)?,
                _ => value,
            };
            return Ok(());
        }

        let Some(binding) = self.binding(m, &key) else {
            return Err(EvalError::UndefinedReference(format!("`{}`", name.name)));
        };
        if binding.kind == BindingKind::Constant && !binding.value.is_unbound() {
            return Err(EvalError::MutationViolation(format!(
                "`{}` is a constant",
                name.name
            )));
        }
        let value = self.conform(&name.name, value, &binding.constraint)?;
        if let Some(b) = self.binding_mut(m, &key) {
            b.value = value.clone();
        }
        self.after_store(m, &home, &key, binding.cell, &value)
    }

    fn store_element(
        &mut self,
        m: &mut Machine<'p>,
        name: &Ident,
        index: &ElementIndex,
        value: Value,
        how: Mutation,
    ) -> EvalResult<()> {
        let key = name.key();
        let Some(home) = self.home(m, &key) else {
            if key == "grid" {
                return self.store_grid(m, index, &value);
            }
            return Err(EvalError::UndefinedReference(format!("`{}`", name.name)));
        };
        if let Home::Field(obj) = &home {
            let fixed = obj
                .borrow()
                .field(&key)
                .is_some_and(|f| f.mode == FieldMode::Equality);
            if fixed {
                return Err(EvalError::MutationViolation(format!(
                    "field `{}` is fixed by its constructor",
                    name.name
                )));
            }
        }
        let Some(binding) = self.binding(m, &key) else {
            return Err(EvalError::UndefinedReference(format!("`{}`", name.name)));
        };
        let Some(axes) = binding.constraint.axes.clone() else {
            return Err(EvalError::MutationViolation(format!(
                "`{}` has no declared dimension",
                name.name
            )));
        };
        let value = match &binding.constraint.ty {
            Some(ty) => self.typed(value, ty)?,
            None => value,
        };
        self.check(&name.name, &value, &binding.constraint)?;

        let array = match &binding.value {
            Value::Array(a) => Rc::clone(a),
            Value::Unbound if binding.constraint.is_growable() => {
                let a: ArrayRef = Rc::new(RefCell::new(Array::from_parts(
                    shape::empty_shape(&axes),
                    Vec::new(),
                )));
                self.write_back(m, &home, &key, Value::Array(Rc::clone(&a)));
                a
            }
            other => {
                return Err(EvalError::TypeConstraintViolation(format!(
                    "`{}` holds {other}, not an array",
                    name.name
                )))
            }
        };

        let offset = self.element_offset(m, &array, &axes, index, how)?.ok_or_else(|| {
            EvalError::MutationViolation(format!("index out of bounds for `{}`", name.name))
        })?;
        array.borrow_mut().items_mut()[offset] = value;
        self.after_store(m, &home, &key, binding.cell, &Value::Array(array))
    }

    /// Row-major offset of the addressed element, growing the array first
    /// when a `push` lands one past the end of a leading `*` axis.
    fn element_offset(
        &mut self,
        m: &mut Machine<'p>,
        array: &ArrayRef,
        axes: &[Axis],
        index: &ElementIndex,
        how: Mutation,
    ) -> EvalResult<Option<usize>> {
        let shape = array.borrow().shape().to_vec();
        let leading_growable = axes.first().is_some_and(|ax| ax.size.is_none());
        match index {
            ElementIndex::Axes(ix) => {
                if ix.len() != shape.len() {
                    return Err(EvalError::ArityOrShapeMismatch(format!(
                        "{} indices for an array of rank {}",
                        ix.len(),
                        shape.len()
                    )));
                }
                let mut at = Vec::with_capacity(ix.len());
                for (k, e) in ix.iter().enumerate() {
                    match self.axis_position(m, axes.get(k), e)? {
                        Some(p) => at.push(p),
                        None => return Ok(None),
                    }
                }
                let appends = how == Mutation::Push
                    && leading_growable
                    && at.first().zip(shape.first()).is_some_and(|(i, n)| i == n)
                    && at.iter().zip(&shape).skip(1).all(|(i, n)| i < n);
                if appends {
                    array.borrow_mut().grow_leading();
                }
                Ok(array.borrow().offset_of(&at))
            }
            ElementIndex::Ordinal(e) => {
                let n = self.integer(m, e)?;
                let Ok(pos) = usize::try_from(n - 1) else {
                    return Ok(None);
                };
                let len = array.borrow().len();
                if pos == len && how == Mutation::Push && leading_growable && shape.len() == 1 {
                    array.borrow_mut().grow_leading();
                }
                Ok((pos < array.borrow().len()).then_some(pos))
            }
            ElementIndex::Cell(addr) => {
                let (rows, cols) = array.borrow().rows_cols();
                Ok(local_offset(*addr, rows, cols))
            }
        }
    }

    fn axis_position(&mut self, m: &mut Machine<'p>, axis: Option<&Axis>, e: &Expr) -> EvalResult<Option<usize>> {
        Ok(match self.eval(m, e)? {
            Value::Text(label) => axis.and_then(|ax| ax.label_position(&label)),
            other => {
                let n = other.as_number().ok_or_else(|| {
                    EvalError::TypeConstraintViolation(format!("{other} is not an index"))
                })?;
                if n.fract() != 0.0 {
                    return Ok(None);
                }
                match axis {
                    Some(ax) => ax.position(n as i64),
                    None => usize::try_from(n as i64 - 1).ok(),
                }
            }
        })
    }

    /// `push grid{r, c} = e` with no `grid` binding in scope.
    fn store_grid(&mut self, m: &mut Machine<'p>, index: &ElementIndex, value: &Value) -> EvalResult<()> {
        match index {
            ElementIndex::Axes(ix) if ix.len() == 2 => {
                let row = self.integer(m, &ix[0])?;
                let col = self.integer(m, &ix[1])?;
                m.grid.borrow_mut().set_at(row, col, value)
            }
            ElementIndex::Cell(addr) => {
                m.grid.borrow_mut().assign(*addr, value);
                Ok(())
            }
            _ => Err(EvalError::ArityOrShapeMismatch(
                "grid positions take a row and a column".into(),
            )),
        }
    }

    fn store_field(
        &mut self,
        m: &mut Machine<'p>,
        object: &Expr,
        field: &Ident,
        value: Value,
    ) -> EvalResult<()> {
        let obj = match self.eval(m, object)? {
            Value::Object(obj) => obj,
            other => {
                return Err(EvalError::TypeConstraintViolation(format!(
                    "{other} has no field `{}`",
                    field.name
                )))
            }
        };
        let key = field.key();
        let found = obj.borrow().field(&key).map(|f| (f.hidden, f.mode, f.axes.clone()));
        let Some((hidden, mode, axes)) = found else {
            return Err(EvalError::UndefinedReference(format!(
                "`{}` has no field `{}`",
                obj.borrow().type_name,
                field.name
            )));
        };
        self.check_field_access(m, &obj, field, hidden)?;
        if mode == FieldMode::Equality {
            return Err(EvalError::MutationViolation(format!(
                "field `{}` is fixed by its constructor",
                field.bare()
            )));
        }
        let value = match &axes {
            Some(axes) if !value.is_unbound() => fit_to(value, axes)?,
            _ => value,
        };
        if let Some(f) = obj.borrow_mut().field_mut(&key) {
            f.value = value;
        }
        Ok(())
    }

    fn write_back(&mut self, m: &mut Machine<'p>, home: &Home, key: &str, value: Value) {
        match home {
            Home::Field(obj) => {
                if let Some(f) = obj.borrow_mut().field_mut(key) {
                    f.value = value;
                }
            }
            _ => {
                if let Some(b) = self.binding_mut(m, key) {
                    b.value = value;
                }
            }
        }
    }

    /// Mirror to the bound cell and spill to a caller's output target.
    fn after_store(
        &mut self,
        m: &mut Machine<'p>,
        home: &Home,
        key: &str,
        cell: Option<CellAddr>,
        value: &Value,
    ) -> EvalResult<()> {
        if let Some(cell) = cell {
            self.home_grid(m, home).borrow_mut().assign(cell, value);
        }
        if matches!(home, Home::Local) {
            if let Some(out) = m.outputs.get(key) {
                out.target.apply(&out.grid, value)?;
            }
        }
        Ok(())
    }
}

/// `x[B2]`: the array's own A1-origin coordinates over its `(rows, cols)` view.
fn local_offset(addr: CellAddr, rows: usize, cols: usize) -> Option<usize> {
    let row = (addr.row as usize).checked_sub(1)?;
    let col = (addr.col as usize).checked_sub(1)?;
    (row < rows && col < cols).then_some(row * cols + col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_offset_is_row_major() {
        assert_eq!(local_offset(CellAddr::new(1, 1), 2, 3), Some(0));
        assert_eq!(local_offset(CellAddr::new(3, 2), 2, 3), Some(5));
        assert_eq!(local_offset(CellAddr::new(4, 1), 2, 3), None);
        assert_eq!(local_offset(CellAddr::new(1, 3), 2, 3), None);
    }

    #[test]
    fn test_grow_leading_appends_a_row() {
        let mut a = Array::from_parts(vec![0, 2], Vec::new());
        a.grow_leading();
        assert_eq!(a.shape(), &[1, 2]);
        assert_eq!(a.len(), 2);
        let mut list = Array::list(vec![Value::Number(1.0)]);
        list.grow_leading();
        assert_eq!(list.shape(), &[2]);
        assert!(list.items()[1].is_unbound());
    }
}
