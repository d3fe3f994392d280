//! Sparse grid store and the spill algorithm.
//!
//! The grid maps addresses to values; unset cells read as [`Value::Unbound`].
//! Writes come in three shapes: a single cell (composite values stored
//! whole), an anchor spill (composite values laid out from the anchor), and
//! a range write (source repeated across the target rectangle).

use crate::error::{EvalError, EvalResult};
use crate::value::{Array, Object, Value};
use gridlang_types::CellAddr;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type GridRef = Rc<RefCell<Grid>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    cells: BTreeMap<CellAddr, Value>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> GridRef {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn get(&self, addr: CellAddr) -> Value {
        self.cells.get(&addr).cloned().unwrap_or(Value::Unbound)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellAddr, &Value)> {
        self.cells.iter()
    }

    /// `[A1] := v`: composite values are stored whole, detached from their
    /// source.
    pub fn assign(&mut self, addr: CellAddr, value: &Value) {
        match value {
            Value::Unbound => {}
            composite => {
                tracing::trace!(cell = %addr, "cell write");
                self.cells.insert(addr, composite.deep_copy());
            }
        }
    }

    // ── Spill ────────────────────────────────────────────────────────────

    /// `[^A1] := v`
    pub fn spill(&mut self, anchor: CellAddr, value: &Value) -> EvalResult<()> {
        match value {
            Value::Object(o) => {
                let row = flatten_object(&o.borrow());
                self.write_row(anchor, &row)
            }
            Value::Array(a) => {
                let a = a.borrow();
                match a.rank() {
                    0 | 1 if a.items().iter().all(|v| matches!(v, Value::Object(_)))
                        && !a.is_empty() =>
                    {
                        for (i, item) in a.items().iter().enumerate() {
                            let at = shift(anchor, 0, i)?;
                            self.spill(at, item)?;
                        }
                        Ok(())
                    }
                    0 | 1 => {
                        let mut row = Vec::with_capacity(a.len());
                        for item in a.items() {
                            match item {
                                Value::Object(o) => row.extend(flatten_object(&o.borrow())),
                                other => row.push(other.clone()),
                            }
                        }
                        self.write_row(anchor, &row)
                    }
                    2 => {
                        let (rows, cols) = a.rows_cols();
                        self.write_block(anchor, &a, rows, cols, |r, c| r * cols + c)
                    }
                    _ => {
                        // Layers along the trailing axes stack downward.
                        let shape = a.shape();
                        let (d0, d1) = (shape[0], shape[1]);
                        let layers: usize = shape[2..].iter().product();
                        self.write_block(anchor, &a, d0 * layers, d1, |r, c| {
                            let (layer, i) = (r / d0, r % d0);
                            (i * d1 + c) * layers + layer
                        })
                    }
                }
            }
            scalar => {
                self.assign(anchor, scalar);
                Ok(())
            }
        }
    }

    fn write_row(&mut self, anchor: CellAddr, row: &[Value]) -> EvalResult<()> {
        for (c, item) in row.iter().enumerate() {
            let at = shift(anchor, c, 0)?;
            self.assign(at, item);
        }
        Ok(())
    }

    fn write_block(
        &mut self,
        anchor: CellAddr,
        array: &Array,
        rows: usize,
        cols: usize,
        offset: impl Fn(usize, usize) -> usize,
    ) -> EvalResult<()> {
        tracing::debug!(anchor = %anchor, rows, cols, "spill block");
        for r in 0..rows {
            for c in 0..cols {
                if let Some(item) = array.items().get(offset(r, c)) {
                    self.assign(shift(anchor, c, r)?, item);
                }
            }
        }
        Ok(())
    }

    // ── Ranges ───────────────────────────────────────────────────────────

    /// `[A1:C2] := v`: the source repeats to cover the target.
    pub fn write_range(&mut self, from: CellAddr, to: CellAddr, value: &Value) -> EvalResult<()> {
        let (top, left, rows, cols) = rect(from, to);
        let origin = CellAddr::new(left, top);
        let source: Option<(Vec<Value>, usize, usize)> = match value {
            Value::Array(a) => {
                let a = a.borrow();
                let (r, c) = match a.shape() {
                    [n] if cols == 1 && rows == *n as u32 => (*n, 1),
                    _ => a.rows_cols(),
                };
                Some((a.items().to_vec(), r, c))
            }
            _ => None,
        };
        for r in 0..rows as usize {
            for c in 0..cols as usize {
                let at = shift(origin, c, r)?;
                match &source {
                    Some((items, sr, sc)) if *sr > 0 && *sc > 0 => {
                        let item = &items[(r % sr) * sc + (c % sc)];
                        self.assign(at, item);
                    }
                    Some(_) => {}
                    None => self.assign(at, value),
                }
            }
        }
        Ok(())
    }

    /// `[A1:C2]` as a `(rows, cols)` array.
    pub fn read_range(&self, from: CellAddr, to: CellAddr) -> Value {
        let (top, left, rows, cols) = rect(from, to);
        let mut items = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                items.push(self.get(CellAddr::new(left + c, top + r)));
            }
        }
        Value::array(Array::from_parts(vec![rows as usize, cols as usize], items))
    }

    /// Everything from A1 to the furthest written cell, unset cells Unbound.
    pub fn to_array(&self) -> Value {
        let rows = self.cells.keys().map(|a| a.row).max().unwrap_or(0);
        let cols = self.cells.keys().map(|a| a.col).max().unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Value::array(Array::from_parts(vec![0, 0], Vec::new()));
        }
        self.read_range(CellAddr::new(1, 1), CellAddr::new(cols, rows))
    }

    /// Row/column reads through `grid{r, c}`.
    pub fn at(&self, row: i64, col: i64) -> EvalResult<Value> {
        Ok(self.get(position(row, col)?))
    }

    pub fn set_at(&mut self, row: i64, col: i64, value: &Value) -> EvalResult<()> {
        let addr = position(row, col)?;
        self.assign(addr, value);
        Ok(())
    }

    pub fn into_sheet(self) -> Sheet {
        Sheet { cells: self.cells }
    }
}

fn position(row: i64, col: i64) -> EvalResult<CellAddr> {
    let (Ok(row), Ok(col)) = (u32::try_from(row), u32::try_from(col)) else {
        return Err(EvalError::MutationViolation(format!(
            "grid position {row}, {col} is off the grid"
        )));
    };
    if row == 0 || col == 0 {
        return Err(EvalError::MutationViolation(format!(
            "grid position {row}, {col} is off the grid"
        )));
    }
    Ok(CellAddr::new(col, row))
}

fn shift(anchor: CellAddr, cols: usize, rows: usize) -> EvalResult<CellAddr> {
    anchor
        .offset(cols as i64, rows as i64)
        .ok_or_else(|| EvalError::Runtime(format!("spill from {anchor} leaves the grid")))
}

/// `(top, left, rows, cols)` of the rectangle spanned by two corners.
fn rect(a: CellAddr, b: CellAddr) -> (u32, u32, u32, u32) {
    let (top, bottom) = (a.row.min(b.row), a.row.max(b.row));
    let (left, right) = (a.col.min(b.col), a.col.max(b.col));
    (top, left, bottom - top + 1, right - left + 1)
}

/// Visible fields in declaration order, nested objects inlined.
fn flatten_object(object: &Object) -> Vec<Value> {
    let mut out = Vec::new();
    for field in object.visible_fields() {
        match &field.value {
            Value::Object(inner) => out.extend(flatten_object(&inner.borrow())),
            other => out.push(other.clone()),
        }
    }
    out
}

// ══════════════════════════════════════════════════════════════════════════════
// Sheet
// ══════════════════════════════════════════════════════════════════════════════

/// Final cell contents of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    cells: BTreeMap<CellAddr, Value>,
}

impl Sheet {
    /// Value at an `A1`-style address.
    pub fn get(&self, a1: &str) -> Option<&Value> {
        let addr = CellAddr::parse(a1).ok()?;
        self.cells.get(&addr)
    }

    pub fn number(&self, a1: &str) -> Option<f64> {
        match self.get(a1)? {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, a1: &str) -> Option<&str> {
        match self.get(a1)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Populated addresses in row-major order.
    pub fn addresses(&self) -> Vec<String> {
        self.cells.keys().map(CellAddr::to_string).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellAddr, &Value)> {
        self.cells.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .cells
            .iter()
            .map(|(addr, value)| (addr.to_string(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl Serialize for Sheet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (addr, value) in &self.cells {
            map.serialize_entry(&addr.to_string(), &value.to_json())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Field;

    fn a1(s: &str) -> CellAddr {
        CellAddr::parse(s).unwrap()
    }

    fn nums(values: &[f64]) -> Value {
        Value::list(values.iter().map(|v| Value::Number(*v)).collect())
    }

    fn matrix(rows: usize, cols: usize, values: &[f64]) -> Value {
        Value::array(Array::from_parts(
            vec![rows, cols],
            values.iter().map(|v| Value::Number(*v)).collect(),
        ))
    }

    fn number_at(grid: &Grid, at: &str) -> Option<f64> {
        match grid.get(a1(at)) {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[test]
    fn test_spill_row_and_block() {
        let mut grid = Grid::new();
        grid.spill(a1("B2"), &nums(&[12.0, 8.0])).unwrap();
        grid.spill(a1("A4"), &matrix(2, 2, &[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(number_at(&grid, "C2"), Some(8.0));
        assert_eq!(number_at(&grid, "A5"), Some(3.0));
        assert_eq!(number_at(&grid, "B5"), Some(4.0));
        assert_eq!(grid.cells().count(), 6);
    }

    #[test]
    fn test_spill_objects_one_per_row() {
        let dot = |x: f64, y: f64| {
            let mut o = Object::new("Dot");
            o.fields.push(Field::new("x", Value::Number(x)));
            o.fields.push(Field::new("y", Value::Number(y)));
            Value::object(o)
        };
        let mut grid = Grid::new();
        grid.spill(a1("C3"), &Value::list(vec![dot(1.0, 2.0), dot(3.0, 4.0)]))
            .unwrap();
        assert_eq!(number_at(&grid, "C4"), Some(3.0));
        assert_eq!(number_at(&grid, "D3"), Some(2.0));
    }

    #[test]
    fn test_range_write_broadcasts() {
        let mut grid = Grid::new();
        grid.write_range(a1("B2"), a1("B4"), &nums(&[9.0, 8.0, 7.0])).unwrap();
        assert_eq!(number_at(&grid, "B4"), Some(7.0));

        let mut grid = Grid::new();
        grid.write_range(a1("A2"), a1("B4"), &nums(&[1.0, 2.0])).unwrap();
        assert_eq!(number_at(&grid, "A4"), Some(1.0));
        assert_eq!(number_at(&grid, "B3"), Some(2.0));
        assert_eq!(grid.cells().count(), 6);
    }

    #[test]
    fn test_read_range_is_two_dimensional() {
        let mut grid = Grid::new();
        grid.write_range(a1("A1"), a1("B1"), &Value::Number(1.0)).unwrap();
        let v = grid.read_range(a1("A1"), a1("B2"));
        assert_eq!(v.shape(), vec![2, 2]);
    }

    #[test]
    fn test_to_array_spans_from_a1() {
        let mut grid = Grid::new();
        grid.set_at(1, 2, &Value::Number(1.0)).unwrap();
        grid.set_at(2, 3, &Value::Number(2.0)).unwrap();
        let v = grid.to_array();
        assert_eq!(v.shape(), vec![2, 3]);
        assert!(grid.set_at(0, 1, &Value::Number(1.0)).is_err());
    }

    #[test]
    fn test_sheet_serializes_by_address() {
        let mut grid = Grid::new();
        grid.assign(a1("A1"), &Value::Number(51.0));
        grid.assign(a1("B1"), &Value::text("ok"));
        let json = serde_json::to_value(grid.into_sheet()).unwrap();
        assert_eq!(json, serde_json::json!({"A1": 51, "B1": "ok"}));
    }
}
