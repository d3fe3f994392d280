//! Runtime values.
//!
//! Arrays and objects live behind `Rc<RefCell<…>>` so that an equality
//! binding (`: p = f`) aliases the same storage and observes later `push`
//! mutations, while `init` bindings take a [`Value::deep_copy`].

use crate::grid::GridRef;
use crate::shape::Axis;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type ArrayRef = Rc<RefCell<Array>>;
pub type ObjectRef = Rc<RefCell<Object>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Array(ArrayRef),
    Object(ObjectRef),
    /// Declared but not yet materialized; reads as zero/empty.
    Unbound,
}

impl Value {
    pub fn array(array: Array) -> Self {
        Value::Array(Rc::new(RefCell::new(array)))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::array(Array::list(items))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self, Value::Unbound)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Number(_) => "number".into(),
            Value::Text(_) => "text".into(),
            Value::Bool(_) => "boolean".into(),
            Value::Array(_) => "array".into(),
            Value::Object(o) => o.borrow().type_name.clone(),
            Value::Unbound => "unbound".into(),
        }
    }

    /// Shape of the value; empty for scalars.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(a) => a.borrow().shape().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Numeric view used by arithmetic. Unbound reads as zero.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Unbound => Some(0.0),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().items().is_empty(),
            Value::Object(_) => true,
            Value::Unbound => false,
        }
    }

    /// Structural copy: no storage shared with the original.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(a) => {
                let a = a.borrow();
                let items = a.items().iter().map(Value::deep_copy).collect();
                Value::array(Array::from_parts(a.shape().to_vec(), items))
            }
            Value::Object(o) => {
                let o = o.borrow();
                Value::object(Object {
                    type_name: o.type_name.clone(),
                    fields: o
                        .fields
                        .iter()
                        .map(|f| Field {
                            value: f.value.deep_copy(),
                            ..f.clone()
                        })
                        .collect(),
                    grid: o
                        .grid
                        .as_ref()
                        .map(|g| Rc::new(RefCell::new(g.borrow().clone()))),
                })
            }
            other => other.clone(),
        }
    }

    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(n), Value::Bool(b)) | (Value::Bool(b), Value::Number(n)) => {
                *n == if *b { 1.0 } else { 0.0 }
            }
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.shape() == b.shape()
                    && a.items()
                        .iter()
                        .zip(b.items())
                        .all(|(x, y)| x.structural_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.type_name.eq_ignore_ascii_case(&b.type_name)
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.name == y.name && x.value.structural_eq(&y.value))
            }
            (Value::Unbound, Value::Unbound) => true,
            _ => false,
        }
    }

    /// Host-facing JSON form of a cell value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Number(n) => number_to_json(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Array(a) => {
                let a = a.borrow();
                nested_json(a.shape(), a.items())
            }
            Value::Object(o) => {
                let o = o.borrow();
                let mut map = serde_json::Map::new();
                for f in o.fields.iter().filter(|f| !f.hidden) {
                    map.insert(f.name.clone(), f.value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Unbound => serde_json::Value::Null,
        }
    }
}

fn nested_json(shape: &[usize], items: &[Value]) -> serde_json::Value {
    match shape {
        [] | [_] => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product();
            if stride == 0 {
                return serde_json::Value::Array(Vec::new());
            }
            serde_json::Value::Array(
                items
                    .chunks(stride)
                    .map(|chunk| nested_json(rest, chunk))
                    .collect(),
            )
        }
    }
}

/// Integral numbers serialize as integers; non-finite ones use the
/// language spellings.
pub fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_nan() {
        serde_json::Value::String("#N/A".into())
    } else if n.is_infinite() {
        serde_json::Value::String(if n > 0.0 { "#INF" } else { "-#INF" }.into())
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Value::from(n)
    }
}

/// Text rendering used by `&` and interpolation.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#N/A".into()
    } else if n.is_infinite() {
        if n > 0.0 { "#INF" } else { "-#INF" }.into()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Array(a) => {
                let a = a.borrow();
                let cols = a.shape().last().copied().unwrap_or(0).max(1);
                f.write_str("{")?;
                for (i, item) in a.items().iter().enumerate() {
                    if i > 0 {
                        f.write_str(if i % cols == 0 { "; " } else { ", " })?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Value::Object(o) => {
                let o = o.borrow();
                write!(f, "{}(", o.type_name)?;
                for (i, field) in o.fields.iter().filter(|x| !x.hidden).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.value)?;
                }
                f.write_str(")")
            }
            Value::Unbound => Ok(()),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Arrays
// ══════════════════════════════════════════════════════════════════════════════

/// Rectangular array, items stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    items: Vec<Value>,
}

impl Array {
    /// 1-D array.
    pub fn list(items: Vec<Value>) -> Self {
        Self {
            shape: vec![items.len()],
            items,
        }
    }

    /// Caller guarantees `shape` multiplies out to `items.len()`.
    pub(crate) fn from_parts(shape: Vec<usize>, items: Vec<Value>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), items.len());
        Self { shape, items }
    }

    pub fn filled(shape: Vec<usize>, value: &Value) -> Self {
        let count = shape.iter().product();
        let items = (0..count).map(|_| value.deep_copy()).collect();
        Self { shape, items }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Value] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `(rows, cols)` view: 1-D arrays are one row; higher ranks fold their
    /// leading axes into rows.
    pub fn rows_cols(&self) -> (usize, usize) {
        match self.shape.as_slice() {
            [] => (1, 1),
            [n] => (1, *n),
            [.., last] => (self.items.len() / (*last).max(1), *last),
        }
    }

    /// Row-major offset of a 0-based index tuple.
    pub fn offset_of(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, extent) in index.iter().zip(&self.shape) {
            if i >= extent {
                return None;
            }
            offset = offset * extent + i;
        }
        Some(offset)
    }

    /// Sub-array at `pos` along `axis`, with that axis removed.
    pub fn select(&self, axis: usize, pos: usize) -> Option<Array> {
        let extent = *self.shape.get(axis)?;
        if pos >= extent {
            return None;
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let mut items = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * extent + pos) * inner;
            items.extend(self.items[start..start + inner].iter().cloned());
        }
        let mut shape = self.shape.clone();
        shape.remove(axis);
        Some(Array { shape, items })
    }

    /// Append to a 1-D array.
    pub fn push(&mut self, value: Value) {
        self.items.push(value);
        self.shape = vec![self.items.len()];
    }

    /// Append one Unbound slice along the leading axis.
    pub fn grow_leading(&mut self) {
        if self.shape.is_empty() {
            self.shape = vec![self.items.len()];
        }
        let slice: usize = self.shape[1..].iter().product();
        self.items.extend((0..slice).map(|_| Value::Unbound));
        self.shape[0] += 1;
    }

    /// Unwraps single-element results to a scalar.
    pub fn into_value(self) -> Value {
        if self.shape.is_empty() && self.items.len() == 1 {
            self.items.into_iter().next().unwrap_or(Value::Unbound)
        } else {
            Value::array(self)
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Objects
// ══════════════════════════════════════════════════════════════════════════════

/// How a field got its value; governs whether `push` may change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    /// Declared without initializer.
    Open,
    /// `init expr`
    Init,
    /// `= expr`: fixed by the constructor.
    Equality,
    /// `or = expr`
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Declared spelling, `$` stripped.
    pub name: String,
    pub hidden: bool,
    pub mode: FieldMode,
    pub value: Value,
    pub axes: Option<Vec<Axis>>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            hidden: false,
            mode: FieldMode::Open,
            value,
            axes: None,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        self.name.eq_ignore_ascii_case(key)
    }
}

/// Instance of a user type, or the result record of a subprocess call.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub type_name: String,
    pub fields: Vec<Field>,
    /// Private grid written by the constructor or subprocess body.
    pub grid: Option<GridRef>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
            grid: None,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.matches(key))
    }

    pub fn field_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.matches(key))
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[f64]) -> Value {
        Value::list(values.iter().map(|v| Value::Number(*v)).collect())
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(0.055), "0.055");
        assert_eq!(format_number(-4.9), "-4.9");
        assert_eq!(format_number(f64::INFINITY), "#INF");
        assert_eq!(format_number(f64::NEG_INFINITY), "-#INF");
        assert_eq!(format_number(f64::NAN), "#N/A");
    }

    #[test]
    fn test_deep_copy_detaches_storage() {
        let original = nums(&[1.0, 2.0]);
        let alias = original.clone();
        let copy = original.deep_copy();
        if let Value::Array(a) = &original {
            a.borrow_mut().items_mut()[0] = Value::Number(9.0);
        }
        assert!(alias.structural_eq(&nums(&[9.0, 2.0])));
        assert!(copy.structural_eq(&nums(&[1.0, 2.0])));
    }

    #[test]
    fn test_json_nesting_follows_shape() {
        let m = Value::array(Array::from_parts(
            vec![2, 2],
            [1.0, 5.0, 13.0, 15.0].iter().map(|n| Value::Number(*n)).collect(),
        ));
        assert_eq!(m.to_json(), serde_json::json!([[1, 5], [13, 15]]));
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::json!("#N/A"));
        assert_eq!(Value::Number(0.25).to_json(), serde_json::json!(0.25));
    }

    #[test]
    fn test_object_json_skips_hidden_fields() {
        let mut o = Object::new("SecretPoint");
        o.fields.push(Field::new("x", Value::Number(7.0)));
        o.fields.push(Field {
            hidden: true,
            ..Field::new("secret", Value::Number(99.0))
        });
        assert_eq!(Value::object(o).to_json(), serde_json::json!({"x": 7}));
    }

    #[test]
    fn test_select_removes_axis() {
        let a = Array::from_parts(
            vec![2, 3],
            (1..=6).map(|n| Value::Number(n as f64)).collect(),
        );
        let row = a.select(0, 1).unwrap();
        assert_eq!(row.shape(), &[3]);
        assert!(Value::array(row).structural_eq(&nums(&[4.0, 5.0, 6.0])));
        let col = a.select(1, 2).unwrap();
        assert!(Value::array(col).structural_eq(&nums(&[3.0, 6.0])));
        assert!(a.select(1, 3).is_none());
    }

    #[test]
    fn test_rows_cols_view() {
        assert_eq!(Array::list(vec![Value::Unbound; 4]).rows_cols(), (1, 4));
        let cube = Array::filled(vec![2, 3, 4], &Value::Number(0.0));
        assert_eq!(cube.rows_cols(), (6, 4));
    }
}
