//! Bindings and scoped environments.

use crate::shape::Axis;
use crate::value::Value;
use gridlang_types::ast::BinOp;
use gridlang_types::CellAddr;
use std::collections::BTreeMap;

/// How a binding came to exist; decides what may change it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `: x = e`: fixed once materialized.
    Constant,
    /// `: x init e`
    Init,
    /// `: x or = e`
    Default,
    /// `For x [= e]`
    Deferred,
    Input,
    /// Created by `Let` with no prior declaration.
    Let,
    /// Loop variable or index.
    Loop,
    /// Declared without an initializer.
    Open,
    Output,
}

/// A resolved comparison bound: `x <= 5`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCheck {
    pub op: BinOp,
    pub value: Value,
}

/// `in {…}` or `in lo to hi`.
#[derive(Debug, Clone)]
pub enum Allowed {
    Set(Value),
    Between(f64, f64),
}

/// Declared constraints checked on every materialization.
#[derive(Debug, Clone, Default)]
pub struct Constraint {
    /// Lower-cased type name.
    pub ty: Option<String>,
    /// `None` when no `dim` was declared.
    pub axes: Option<Vec<Axis>>,
    /// `dim {}`
    pub scalar_only: bool,
    pub unit: Option<String>,
    pub allowed: Option<Allowed>,
    pub bounds: Vec<BoundCheck>,
}

impl Constraint {
    pub fn is_growable(&self) -> bool {
        self.axes
            .as_ref()
            .is_some_and(|axes| crate::shape::has_growable(axes))
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub kind: BindingKind,
    pub constraint: Constraint,
    /// Cell mirrored on every materialization (`[A1] : width`).
    pub cell: Option<CellAddr>,
}

impl Binding {
    pub fn new(kind: BindingKind, value: Value) -> Self {
        Self {
            value,
            kind,
            constraint: Constraint::default(),
            cell: None,
        }
    }
}

/// A single scope level, keyed by case-folded name.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: BTreeMap<String, Binding>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, key: &str, binding: Binding) {
        self.bindings.insert(key.to_string(), binding);
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.bindings.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Binding> {
        self.bindings.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }
}

/// Local scopes of one execution context, innermost last.
///
/// Lookups search from innermost scope outward; `define` always creates in
/// the innermost scope.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment whose outermost local scope is `scope`.
    pub fn with_scope(scope: Scope) -> Self {
        Self {
            scopes: vec![scope],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn innermost_mut(&mut self) -> Option<&mut Scope> {
        self.scopes.last_mut()
    }

    pub fn outermost(&self) -> Option<&Scope> {
        self.scopes.first()
    }

    pub fn outermost_mut(&mut self) -> Option<&mut Scope> {
        self.scopes.first_mut()
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(key))
    }
}
