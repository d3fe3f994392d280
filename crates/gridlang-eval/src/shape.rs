//! Array shape math: declared axes, reshaping, stacking and fitting values
//! to a declared `dim`.

use crate::error::{EvalError, EvalResult};
use crate::value::{Array, Value};
use gridlang_types::ast::{AxisSpec, DimSpec, Extent};

/// One declared axis of a dimensioned binding or field.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: Option<String>,
    /// Index of the first element (`0 to 4` → 0, `4` → 1).
    pub lower: i64,
    /// `None` for a growable (`*`) axis.
    pub size: Option<usize>,
    pub labels: Vec<String>,
}

impl Axis {
    pub fn growable() -> Self {
        Self {
            name: None,
            lower: 1,
            size: None,
            labels: Vec::new(),
        }
    }

    pub fn from_spec(spec: &AxisSpec) -> Self {
        let name = spec.name.as_ref().map(|n| n.bare().to_string());
        match spec.extent {
            Extent::Count(n) => Self {
                name,
                lower: 1,
                size: Some(n as usize),
                labels: Vec::new(),
            },
            Extent::Bounds(lo, hi) => Self {
                name,
                lower: lo,
                size: Some((hi - lo + 1).max(0) as usize),
                labels: Vec::new(),
            },
            Extent::Growable => Self {
                name,
                ..Self::growable()
            },
        }
    }

    /// 0-based position of a declared index.
    pub fn position(&self, index: i64) -> Option<usize> {
        let pos = index - self.lower;
        if pos < 0 {
            return None;
        }
        Some(pos as usize)
    }

    pub fn label_position(&self, label: &str) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| l.eq_ignore_ascii_case(label))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Declared axes of a `dim` spec; `None` for `dim {}`.
pub fn axes_of(dim: &DimSpec) -> Option<Vec<Axis>> {
    match dim {
        DimSpec::Scalar => None,
        DimSpec::Any => Some(vec![Axis::growable()]),
        DimSpec::Axes(specs) => Some(specs.iter().map(Axis::from_spec).collect()),
    }
}

pub fn has_growable(axes: &[Axis]) -> bool {
    axes.iter().any(|a| a.size.is_none())
}

/// Shape implied by the axes with growable axes at zero length.
pub fn empty_shape(axes: &[Axis]) -> Vec<usize> {
    axes.iter().map(|a| a.size.unwrap_or(0)).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Reshape and Stack
// ══════════════════════════════════════════════════════════════════════════════

/// Reshape row-major; at most one `None` axis is inferred.
pub fn reshape(array: &Array, dims: &[Option<usize>]) -> EvalResult<Array> {
    let count = array.len();
    let known: usize = dims.iter().flatten().product();
    let wildcards = dims.iter().filter(|d| d.is_none()).count();
    let shape: Vec<usize> = match wildcards {
        0 => dims.iter().flatten().copied().collect(),
        1 => {
            if known == 0 || count % known != 0 {
                return Err(EvalError::ArityOrShapeMismatch(format!(
                    "cannot reshape {count} elements by {known}"
                )));
            }
            dims.iter().map(|d| d.unwrap_or(count / known)).collect()
        }
        _ => {
            return Err(EvalError::ArityOrShapeMismatch(
                "reshape infers at most one axis".into(),
            ))
        }
    };
    if shape.iter().product::<usize>() != count {
        return Err(EvalError::ArityOrShapeMismatch(format!(
            "cannot reshape {count} elements to {shape:?}"
        )));
    }
    Ok(Array::from_parts(shape, array.items().to_vec()))
}

/// `a | b`: concatenate along the leading axis. 1-D operands count as one row.
pub fn stack(a: &Array, b: &Array) -> EvalResult<Array> {
    let as_rows = |x: &Array| -> Vec<usize> {
        if x.rank() <= 1 {
            vec![1, x.len()]
        } else {
            x.shape().to_vec()
        }
    };
    let (sa, sb) = (as_rows(a), as_rows(b));
    if sa[1..] != sb[1..] {
        return Err(EvalError::ArityOrShapeMismatch(format!(
            "cannot stack {:?} on {:?}",
            sb, sa
        )));
    }
    let mut shape = sa.clone();
    shape[0] += sb[0];
    let mut items = a.items().to_vec();
    items.extend(b.items().iter().cloned());
    Ok(Array::from_parts(shape, items))
}

// ══════════════════════════════════════════════════════════════════════════════
// Fitting to Declared Dimensions
// ══════════════════════════════════════════════════════════════════════════════

/// Coerce `value` into the shape declared by `axes`.
///
/// Scalars fill the whole shape. Arrays with a matching element count are
/// reshaped row-major, except that a 2-D `(k·a, b)` value declared as
/// `{a, b, k}` is folded layer by layer. A growable axis absorbs whatever
/// count the fixed axes leave over.
pub fn fit(value: &Value, axes: &[Axis]) -> EvalResult<Value> {
    let fixed: usize = axes.iter().filter_map(|a| a.size).product();
    match value {
        Value::Array(a) => {
            let a = a.borrow();
            let count = a.len();
            let shape = if has_growable(axes) {
                if fixed == 0 || count % fixed != 0 {
                    return Err(mismatch(count, axes));
                }
                let mut remaining = Some(count / fixed);
                axes.iter()
                    .map(|ax| ax.size.unwrap_or_else(|| remaining.take().unwrap_or(1)))
                    .collect::<Vec<_>>()
            } else {
                if count != fixed {
                    return Err(mismatch(count, axes));
                }
                axes.iter().filter_map(|ax| ax.size).collect()
            };
            if let ([rows, cols], [da, db, dk]) = (a.shape(), shape.as_slice()) {
                if *rows == da * dk && cols == db && *dk > 1 {
                    return Ok(Value::array(fold_layers(&a, *da, *db, *dk)));
                }
            }
            Ok(Value::array(Array::from_parts(shape, a.items().to_vec())))
        }
        scalar => {
            let shape: Vec<usize> = axes.iter().map(|ax| ax.size.unwrap_or(1)).collect();
            Ok(Value::array(Array::filled(shape, scalar)))
        }
    }
}

fn mismatch(count: usize, axes: &[Axis]) -> EvalError {
    let dims: Vec<String> = axes
        .iter()
        .map(|a| a.size.map_or("*".to_string(), |n| n.to_string()))
        .collect();
    EvalError::ArityOrShapeMismatch(format!(
        "{count} elements do not fit dim {{{}}}",
        dims.join(", ")
    ))
}

/// `(k·a, b)` stacked layers → `{a, b, k}` where `out(i, j, l) = src(l·a + i, j)`.
fn fold_layers(src: &Array, a: usize, b: usize, k: usize) -> Array {
    let mut items = Vec::with_capacity(a * b * k);
    for i in 0..a {
        for j in 0..b {
            for l in 0..k {
                let offset = (l * a + i) * b + j;
                items.push(src.items()[offset].clone());
            }
        }
    }
    Array::from_parts(vec![a, b, k], items)
}

/// Declared-shape check used by `x dim …` predicates.
pub fn matches_dim(value: &Value, dim: &DimSpec) -> bool {
    let shape = value.shape();
    match dim {
        DimSpec::Scalar => shape.is_empty(),
        DimSpec::Any => !shape.is_empty(),
        DimSpec::Axes(specs) => {
            shape.len() == specs.len()
                && specs.iter().zip(&shape).all(|(spec, n)| match spec.extent {
                    Extent::Count(c) => c as usize == *n,
                    Extent::Bounds(lo, hi) => (hi - lo + 1) as usize == *n,
                    Extent::Growable => true,
                })
        }
    }
}
