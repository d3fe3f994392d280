//! Hoisted definitions: user types, free callables and per-type members.
//!
//! Member dispatch walks the receiver's inheritance chain from the most
//! derived type upward and takes the first type that defines the member.

use gridlang_types::ast::{
    Block, Bound, CallableDef, CallableKind, Definition, ElseBranch, Expr, Ident, IfStmt,
    OutputDecl, Stmt, StmtKind, TypeBase, TypeDef, TypeRef,
};
use std::collections::HashMap;

/// Built-in value type names usable in `as T`.
pub const PRIMITIVES: [&str; 3] = ["number", "text", "boolean"];

#[derive(Debug, Clone)]
pub struct TypeInfo<'p> {
    /// Declared spelling.
    pub name: String,
    pub def: &'p TypeDef,
    /// Record base type key.
    pub base: Option<String>,
    /// `Type(Number) >= lo <= hi`
    pub primitive: Option<String>,
    pub bounds: &'p [Bound],
}

/// One `Input` parameter.
#[derive(Debug, Clone, Copy)]
pub struct Param<'p> {
    pub name: &'p Ident,
    pub ty: Option<&'p TypeRef>,
    pub default: Option<&'p Expr>,
}

#[derive(Debug, Default)]
pub struct Registry<'p> {
    types: HashMap<String, TypeInfo<'p>>,
    callables: HashMap<String, &'p CallableDef>,
    members: HashMap<String, HashMap<String, &'p CallableDef>>,
}

impl<'p> Registry<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hoist every definition in a statement list.
    pub fn collect(stmts: &'p [Stmt]) -> Self {
        let mut registry = Self::new();
        for stmt in stmts {
            if let StmtKind::Define(def) = &stmt.kind {
                registry.register(def);
            }
        }
        registry
    }

    pub fn register(&mut self, def: &'p Definition) {
        match def {
            Definition::Type(t) => {
                let (base, primitive, bounds): (_, _, &'p [Bound]) = match &t.base {
                    Some(TypeBase::Record(b)) => (Some(b.key()), None, &[]),
                    Some(TypeBase::Primitive { name, bounds }) => {
                        (None, Some(name.key()), bounds.as_slice())
                    }
                    None => (None, None, &[]),
                };
                tracing::trace!(name = %t.name.name, "register type");
                self.types.insert(
                    t.name.key(),
                    TypeInfo {
                        name: t.name.bare().to_string(),
                        def: t,
                        base,
                        primitive,
                        bounds,
                    },
                );
            }
            Definition::Callable(c) => match &c.owner {
                Some(owner) => {
                    self.members
                        .entry(owner.key())
                        .or_default()
                        .insert(c.name.key(), c);
                }
                None => {
                    self.callables.insert(c.name.key(), c);
                }
            },
        }
    }

    pub fn type_info(&self, key: &str) -> Option<&TypeInfo<'p>> {
        self.types.get(key)
    }

    pub fn is_type(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    pub fn callable(&self, key: &str) -> Option<&'p CallableDef> {
        self.callables.get(key).copied()
    }

    pub fn member(&self, owner: &str, name: &str) -> Option<&'p CallableDef> {
        self.members.get(owner)?.get(name).copied()
    }

    /// Every member of any type with this name.
    pub fn members_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'p CallableDef> + 'a {
        self.members.values().filter_map(move |m| m.get(name).copied())
    }

    /// `ty` followed by its bases, most derived first.
    pub fn chain(&self, ty: &str) -> Vec<String> {
        let mut out = vec![ty.to_string()];
        let mut current = ty.to_string();
        while let Some(base) = self.types.get(&current).and_then(|t| t.base.clone()) {
            if out.contains(&base) {
                break;
            }
            out.push(base.clone());
            current = base;
        }
        out
    }

    pub fn is_a(&self, ty: &str, ancestor: &str) -> bool {
        self.chain(ty).iter().any(|t| t == ancestor)
    }

    /// Most-derived member `name` along the chain of `ty`, with its owner key.
    pub fn dispatch(&self, ty: &str, name: &str) -> Option<(String, &'p CallableDef)> {
        self.chain(ty)
            .into_iter()
            .find_map(|owner| self.member(&owner, name).map(|def| (owner, def)))
    }

    /// The root primitive of a constrained subtype chain, with every bound.
    pub fn primitive_of(&self, ty: &str) -> Option<(String, Vec<&'p Bound>)> {
        let mut bounds = Vec::new();
        for key in self.chain(ty) {
            let info = self.types.get(&key)?;
            bounds.extend(info.bounds.iter());
            if let Some(p) = &info.primitive {
                return Some((p.clone(), bounds));
            }
        }
        None
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Signatures
// ══════════════════════════════════════════════════════════════════════════════

/// `Input` parameters in declaration order.
pub fn inputs(body: &[Stmt]) -> Vec<Param<'_>> {
    body.iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Input(decl) => Some(decl),
            _ => None,
        })
        .flat_map(|decl| {
            decl.names.iter().map(move |name| Param {
                name,
                ty: decl.ty.as_ref(),
                default: decl.default.as_ref(),
            })
        })
        .collect()
}

pub fn outputs(body: &[Stmt]) -> Vec<&OutputDecl> {
    body.iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Output(decl) => Some(decl),
            _ => None,
        })
        .collect()
}

/// Whether a body contains `return` anywhere, nested blocks included.
pub fn yields(body: &[Stmt]) -> bool {
    fn block(b: &Option<Block>) -> bool {
        b.as_ref().is_some_and(|b| yields(&b.stmts))
    }
    fn branch(ifs: &IfStmt) -> bool {
        yields(&ifs.then_block.stmts)
            || match &ifs.else_branch {
                Some(ElseBranch::ElseIf(next)) => branch(next),
                Some(ElseBranch::Block(b)) => yields(&b.stmts),
                None => false,
            }
    }
    body.iter().any(|s| match &s.kind {
        StmtKind::Return(_) => true,
        StmtKind::ForDecl { body, .. } => block(body),
        StmtKind::ForLoop(l) => block(&l.body),
        StmtKind::Let(ls) => block(&ls.body),
        StmtKind::If(ifs) => branch(ifs),
        _ => false,
    })
}

/// Whether calls of this callable get a private grid.
pub fn has_private_grid(def: &CallableDef) -> bool {
    def.kind == CallableKind::Subprocess
}
