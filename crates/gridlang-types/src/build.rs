//! Programmatic AST construction.
//!
//! Hosts that embed the evaluator without the text front end, and the test
//! suites, assemble programs through these helpers. Every node gets the
//! zero [`Span`]; statement order is the order of the `Vec`s passed in.
//!
//! ```
//! use gridlang_types::build::*;
//!
//! // : y = x + 1
//! // : x as number = 5
//! // [A1] := y
//! let prog = program(vec![
//!     global(decl("y").equals(add(var("x"), num(1.0)))),
//!     global(decl("x").of_type("number").equals(num(5.0))),
//!     assign(at("A1"), var("y")),
//! ]);
//! assert_eq!(prog.stmts.len(), 3);
//! ```

use crate::ast::*;
use crate::{column_index, CellAddr, Span};

fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, Span::default())
}

fn s(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::default())
}

pub fn program(stmts: Vec<Stmt>) -> Program {
    Program {
        stmts,
        span: Span::default(),
    }
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block {
        stmts,
        span: Span::default(),
    }
}

pub fn id(name: &str) -> Ident {
    Ident::new(name, Span::default())
}

fn type_ref(name: &str) -> TypeRef {
    TypeRef { name: id(name) }
}

/// Parse a literal `A1` address.
///
/// # Panics
/// On a malformed address; builder input is program text, not user data.
pub fn addr(a1: &str) -> CellAddr {
    match CellAddr::parse(a1) {
        Ok(addr) => addr,
        Err(err) => panic!("bad cell address `{a1}`: {err}"),
    }
}

fn column(letters: &str) -> u32 {
    match column_index(letters) {
        Ok(col) => col,
        Err(err) => panic!("bad column `{letters}`: {err}"),
    }
}

// ── Literals and names ──────────────────────────────────────────────────────

pub fn num(n: f64) -> Expr {
    e(ExprKind::Number(n))
}

pub fn text(raw: &str) -> Expr {
    e(ExprKind::Text(raw.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    e(ExprKind::Bool(b))
}

/// `#INF`
pub fn inf() -> Expr {
    e(ExprKind::Infinity)
}

/// `#N/A`
pub fn na() -> Expr {
    e(ExprKind::NotAvailable)
}

pub fn var(name: &str) -> Expr {
    e(ExprKind::Ident(id(name)))
}

/// `{a, b, c}`
pub fn list(items: Vec<Expr>) -> Expr {
    e(ExprKind::Array(vec![items]))
}

/// `{1, 2; 3, 4}`
pub fn matrix(rows: Vec<Vec<Expr>>) -> Expr {
    e(ExprKind::Array(rows))
}

pub fn nums(values: &[f64]) -> Expr {
    list(values.iter().map(|v| num(*v)).collect())
}

pub fn texts(values: &[&str]) -> Expr {
    list(values.iter().map(|v| text(v)).collect())
}

/// `$"template"` with the parsed expression of each `{…}` segment.
pub fn interp(template: &str, embedded: Vec<(&str, Expr)>) -> Expr {
    e(ExprKind::Interpolated {
        template: template.to_string(),
        embedded: embedded
            .into_iter()
            .map(|(source, expr)| Embedded {
                source: source.to_string(),
                expr,
            })
            .collect(),
    })
}

// ── Operators ───────────────────────────────────────────────────────────────

pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    e(ExprKind::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

macro_rules! binary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(left: Expr, right: Expr) -> Expr {
                binary(left, BinOp::$op, right)
            }
        )*
    };
}

binary_helpers! {
    add => Add,
    sub => Sub,
    mul => Mul,
    div => Div,
    pow => Pow,
    modulo => Mod,
    idiv => IntDiv,
    concat => Concat,
    stack => Stack,
    lt => Lt,
    le => Le,
    gt => Gt,
    ge => Ge,
    eq => Eq,
    ne => NotEq,
    and => And,
    or => Or,
    is_in => In,
}

pub fn neg(operand: Expr) -> Expr {
    e(ExprKind::Unary {
        op: UnaryOp::Neg,
        operand: Box::new(operand),
    })
}

pub fn not(operand: Expr) -> Expr {
    e(ExprKind::Unary {
        op: UnaryOp::Not,
        operand: Box::new(operand),
    })
}

/// `from to to`
pub fn to(from: Expr, to: Expr) -> Expr {
    e(ExprKind::Range {
        from: Box::new(from),
        to: Box::new(to),
        step: None,
    })
}

/// `from to to step step`
pub fn to_step(from: Expr, to: Expr, step: Expr) -> Expr {
    e(ExprKind::Range {
        from: Box::new(from),
        to: Box::new(to),
        step: Some(Box::new(step)),
    })
}

pub fn reshape(value: Expr, dims: DimSpec) -> Expr {
    e(ExprKind::Reshape {
        value: Box::new(value),
        dims,
    })
}

// ── Condition predicates ────────────────────────────────────────────────────

pub fn test(subject: Expr, checks: Vec<Check>) -> Expr {
    e(ExprKind::Test {
        subject: Box::new(subject),
        checks,
    })
}

pub fn is_type(ty: &str) -> Check {
    Check::Type(type_ref(ty))
}

pub fn of_unit(unit: &str) -> Check {
    Check::Unit(id(unit))
}

pub fn has_dim(dims: DimSpec) -> Check {
    Check::Dim(dims)
}

// ── Dimensions ──────────────────────────────────────────────────────────────

/// `{}`
pub fn scalar_dim() -> DimSpec {
    DimSpec::Scalar
}

/// `*`
pub fn any_dim() -> DimSpec {
    DimSpec::Any
}

/// `{4, 4, 2}`
pub fn dims(extents: &[u32]) -> DimSpec {
    DimSpec::Axes(
        extents
            .iter()
            .map(|n| AxisSpec {
                name: None,
                extent: Extent::Count(*n),
            })
            .collect(),
    )
}

/// Mixed extents: `{*, 1}`, `{0 to 10, 0 to 10}`.
pub fn extents(extents: Vec<Extent>) -> DimSpec {
    DimSpec::Axes(
        extents
            .into_iter()
            .map(|extent| AxisSpec { name: None, extent })
            .collect(),
    )
}

/// `{Dept: *, Quarter: 4}`
pub fn named_dims(axes: Vec<(&str, Extent)>) -> DimSpec {
    DimSpec::Axes(
        axes.into_iter()
            .map(|(name, extent)| AxisSpec {
                name: Some(id(name)),
                extent,
            })
            .collect(),
    )
}

// ── Grid references ─────────────────────────────────────────────────────────

/// `[A1]`
pub fn at(a1: &str) -> CellTarget {
    CellTarget::Single(CellRef::fixed(addr(a1)))
}

/// `[^A1]`
pub fn anchor(a1: &str) -> CellTarget {
    CellTarget::Anchor(CellRef::fixed(addr(a1)))
}

/// `[A1:C2]`
pub fn span_of(from: &str, to: &str) -> CellTarget {
    CellTarget::Range(CellRef::fixed(addr(from)), CellRef::fixed(addr(to)))
}

/// `[A{row}]`
pub fn at_row(column_letters: &str, row: Expr) -> CellTarget {
    CellTarget::Single(CellRef {
        column: ColumnRef::Fixed(column(column_letters)),
        row: RowRef::Dynamic(Box::new(row)),
    })
}

/// `[{offset :BASE}row]`
pub fn at_col(offset: Expr, base_letters: &str, row: u32) -> CellTarget {
    CellTarget::Single(CellRef {
        column: ColumnRef::Offset {
            base: column(base_letters),
            offset: Box::new(offset),
        },
        row: RowRef::Fixed(row),
    })
}

/// Read a cell target as an expression.
pub fn grid(target: CellTarget) -> Expr {
    e(ExprKind::Cell(target))
}

/// Read `[A1]`.
pub fn cell(a1: &str) -> Expr {
    grid(at(a1))
}

/// Read `[A1:B2]`.
pub fn cells(from: &str, to: &str) -> Expr {
    grid(span_of(from, to))
}

// ── Access and calls ────────────────────────────────────────────────────────

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    e(ExprKind::Call {
        callee: id(name),
        args,
    })
}

/// `target{i, j}`
pub fn index(target: Expr, indices: Vec<Expr>) -> Expr {
    e(ExprKind::Index {
        target: Box::new(target),
        indices,
    })
}

/// `target[n]`
pub fn ordinal(target: Expr, position: Expr) -> Expr {
    e(ExprKind::Ordinal {
        target: Box::new(target),
        position: Box::new(position),
    })
}

/// `target[B1]`
pub fn local_cell(target: Expr, a1: &str) -> Expr {
    e(ExprKind::LocalCell {
        target: Box::new(target),
        cell: addr(a1),
    })
}

/// `target!Axis(label)`
pub fn label_of(target: Expr, axis: &str, label: Expr) -> Expr {
    e(ExprKind::LabelLookup {
        target: Box::new(target),
        axis: id(axis),
        label: Box::new(label),
    })
}

pub fn field(object: Expr, name: &str) -> Expr {
    e(ExprKind::Field {
        object: Box::new(object),
        field: id(name),
    })
}

pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    e(ExprKind::MethodCall {
        receiver: Box::new(receiver),
        method: id(name),
        args,
    })
}

/// `new T(args)`
pub fn new_obj(ty: &str, args: Vec<Expr>) -> Expr {
    new_with(ty, args, Vec::new())
}

/// `new T(args) with (…)`
pub fn new_with(ty: &str, args: Vec<Expr>, with: Vec<FieldInit>) -> Expr {
    e(ExprKind::New { ty: id(ty), args, with })
}

/// `field = value` inside `with (…)`
pub fn set(name: &str, value: Expr) -> FieldInit {
    FieldInit {
        field: id(name),
        dim: None,
        value: Some(value),
    }
}

/// `name` shorthand inside `with (…)`
pub fn shorthand(name: &str) -> FieldInit {
    FieldInit {
        field: id(name),
        dim: None,
        value: None,
    }
}

/// `name dim {…} = value` inside `with (…)`
pub fn set_dim(name: &str, dim: DimSpec, value: Expr) -> FieldInit {
    FieldInit {
        field: id(name),
        dim: Some(dim),
        value: Some(value),
    }
}

pub fn super_call(args: Vec<Expr>) -> Expr {
    e(ExprKind::Super(args))
}

// ── Declarations ────────────────────────────────────────────────────────────

/// An unconstrained declaration; refine with the builder methods.
pub fn decl(name: &str) -> Decl {
    Decl {
        name: id(name),
        ty: None,
        dim: None,
        unit: None,
        allowed: None,
        bounds: Vec::new(),
        with: Vec::new(),
        init: None,
        span: Span::default(),
    }
}

pub fn bound(op: BinOp, value: Expr) -> Bound {
    Bound { op, value }
}

impl Decl {
    pub fn of_type(mut self, ty: &str) -> Self {
        self.ty = Some(type_ref(ty));
        self
    }

    pub fn dim(mut self, dim: DimSpec) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(id(unit));
        self
    }

    pub fn within(mut self, allowed: Expr) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn bound(mut self, op: BinOp, value: Expr) -> Self {
        self.bounds.push(Bound { op, value });
        self
    }

    pub fn with(mut self, fields: Vec<FieldInit>) -> Self {
        self.with = fields;
        self
    }

    /// `= value`
    pub fn equals(self, value: Expr) -> Self {
        self.initialized(InitMode::Equality, value)
    }

    /// `init value`
    pub fn init(self, value: Expr) -> Self {
        self.initialized(InitMode::Init, value)
    }

    /// `or = value`
    pub fn or_default(self, value: Expr) -> Self {
        self.initialized(InitMode::Default, value)
    }

    fn initialized(mut self, mode: InitMode, value: Expr) -> Self {
        self.init = Some(Initializer { mode, value });
        self
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// `target := value`
pub fn assign(target: CellTarget, value: Expr) -> Stmt {
    s(StmtKind::CellAssign { target, value })
}

/// `[A1] : decl`
pub fn cell_decl(a1: &str, decl: Decl) -> Stmt {
    s(StmtKind::CellDecl {
        cell: addr(a1),
        decl,
    })
}

/// `: decl`
pub fn global(decl: Decl) -> Stmt {
    s(StmtKind::Global(decl))
}

/// `For decl`
pub fn for_decl(decl: Decl) -> Stmt {
    for_decls(vec![decl], None)
}

/// `For a = … and b = … [do … End]`
pub fn for_decls(decls: Vec<Decl>, body: Option<Vec<Stmt>>) -> Stmt {
    s(StmtKind::ForDecl {
        decls,
        body: body.map(block),
    })
}

/// `For decl do … End`
pub fn for_decl_do(decl: Decl, body: Vec<Stmt>) -> Stmt {
    for_decls(vec![decl], Some(body))
}

/// `var in iterable`
pub fn source(var: &str, iterable: Expr) -> LoopSource {
    LoopSource {
        var: id(var),
        iterable,
        index: None,
    }
}

impl LoopSource {
    /// `… index name`
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(id(name));
        self
    }
}

/// `For sources do body End`
pub fn for_loop(sources: Vec<LoopSource>, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::ForLoop(ForLoop {
        sources,
        body: Some(block(body)),
        span: Span::default(),
    }))
}

/// `For sources` with the rest of the scope as its body.
pub fn for_rest(sources: Vec<LoopSource>) -> Stmt {
    s(StmtKind::ForLoop(ForLoop {
        sources,
        body: None,
        span: Span::default(),
    }))
}

/// A `Let` chain member assigning `value` to `name`.
pub fn binding(name: &str, value: Expr) -> LetBinding {
    LetBinding {
        target: Place::Name(id(name)),
        ty: None,
        bounds: Vec::new(),
        value: Some(value),
    }
}

/// A value-less `Let` member, refined with `of_type`/`bound`.
pub fn constrain(name: &str) -> LetBinding {
    LetBinding {
        target: Place::Name(id(name)),
        ty: None,
        bounds: Vec::new(),
        value: None,
    }
}

impl LetBinding {
    pub fn of_type(mut self, ty: &str) -> Self {
        self.ty = Some(type_ref(ty));
        self
    }

    pub fn bound(mut self, op: BinOp, value: Expr) -> Self {
        self.bounds.push(Bound { op, value });
        self
    }
}

/// `Let name = value`
pub fn let_value(name: &str, value: Expr) -> Stmt {
    let_chain(vec![binding(name, value)])
}

/// `Let a = … and b = …`
pub fn let_chain(bindings: Vec<LetBinding>) -> Stmt {
    s(StmtKind::Let(LetStmt {
        bindings,
        body: None,
    }))
}

/// `Let name(…) = value` and friends.
pub fn let_at(name: &str, index: ElementIndex, value: Expr) -> Stmt {
    let_chain(vec![LetBinding {
        target: Place::Element {
            name: id(name),
            index,
        },
        ty: None,
        bounds: Vec::new(),
        value: Some(value),
    }])
}

/// `Let binding then body End`
pub fn let_then(binding: LetBinding, body: Vec<Stmt>) -> Stmt {
    s(StmtKind::Let(LetStmt {
        bindings: vec![binding],
        body: Some(block(body)),
    }))
}

/// `(i, j)` / `{i, j}`
pub fn axes(indices: Vec<Expr>) -> ElementIndex {
    ElementIndex::Axes(indices)
}

/// `[n]`
pub fn nth(position: Expr) -> ElementIndex {
    ElementIndex::Ordinal(Box::new(position))
}

/// `[B1]`
pub fn local(a1: &str) -> ElementIndex {
    ElementIndex::Cell(addr(a1))
}

/// `Input a, b [as T] [or = default]`
pub fn input(names: &[&str], ty: Option<&str>, default: Option<Expr>) -> Stmt {
    s(StmtKind::Input(InputDecl {
        names: names.iter().map(|n| id(n)).collect(),
        ty: ty.map(type_ref),
        default,
    }))
}

/// `Output name [as T] [init …| = …]`
pub fn output(name: &str, ty: Option<&str>, init: Option<(InitMode, Expr)>) -> Stmt {
    s(StmtKind::Output(OutputDecl {
        name: id(name),
        ty: ty.map(type_ref),
        init: init.map(|(mode, value)| Initializer { mode, value }),
    }))
}

pub fn push(place: Place, value: Expr) -> Stmt {
    s(StmtKind::Push { place, value })
}

pub fn to_name(name: &str) -> Place {
    Place::Name(id(name))
}

pub fn to_elem(name: &str, index: ElementIndex) -> Place {
    Place::Element {
        name: id(name),
        index,
    }
}

pub fn to_field(object: Expr, name: &str) -> Place {
    Place::Field {
        object: Box::new(object),
        field: id(name),
    }
}

pub fn to_cell(target: CellTarget) -> Place {
    Place::Cell(target)
}

/// `If cond then … End`
pub fn if_then(condition: Expr, then: Vec<Stmt>) -> Stmt {
    if_chain(vec![(condition, then)], None)
}

/// `If cond then … Else … End`
pub fn if_else(condition: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt>) -> Stmt {
    if_chain(vec![(condition, then)], Some(otherwise))
}

/// `If … elseif … [else …] End`
///
/// # Panics
/// When `branches` is empty.
pub fn if_chain(branches: Vec<(Expr, Vec<Stmt>)>, otherwise: Option<Vec<Stmt>>) -> Stmt {
    let mut tail = otherwise.map(|stmts| ElseBranch::Block(block(stmts)));
    let mut branches = branches;
    let (condition, then) = match branches.first() {
        Some(_) => branches.remove(0),
        None => panic!("if_chain needs at least one branch"),
    };
    for (cond, body) in branches.into_iter().rev() {
        tail = Some(ElseBranch::ElseIf(Box::new(IfStmt {
            condition: cond,
            then_block: block(body),
            else_branch: tail,
            span: Span::default(),
        })));
    }
    s(StmtKind::If(IfStmt {
        condition,
        then_block: block(then),
        else_branch: tail,
        span: Span::default(),
    }))
}

/// Bare `If cond`
pub fn guard(condition: Expr) -> Stmt {
    s(StmtKind::Guard(condition))
}

/// `target!axis.Label{labels}`
pub fn label(target: &str, axis: &str, labels: &[&str]) -> Stmt {
    s(StmtKind::Label {
        target: id(target),
        axis: id(axis),
        labels: labels.iter().map(|l| text(l)).collect(),
    })
}

pub fn ret(value: Expr) -> Stmt {
    s(StmtKind::Return(value))
}

/// An expression evaluated for its effects.
pub fn effect(expr: Expr) -> Stmt {
    s(StmtKind::Expr(expr))
}

// ── Definitions ─────────────────────────────────────────────────────────────

fn define(def: Definition) -> Stmt {
    s(StmtKind::Define(def))
}

/// `Define name as Type … End`
pub fn define_type(name: &str, body: Vec<Stmt>) -> Stmt {
    define(Definition::Type(TypeDef {
        name: id(name),
        base: None,
        body,
        span: Span::default(),
    }))
}

/// `Define name as Type(base) … End`
pub fn define_subtype(name: &str, base: &str, body: Vec<Stmt>) -> Stmt {
    define(Definition::Type(TypeDef {
        name: id(name),
        base: Some(TypeBase::Record(id(base))),
        body,
        span: Span::default(),
    }))
}

/// `Define name as Type(Number) >= lo <= hi`
pub fn define_constrained(name: &str, primitive: &str, bounds: Vec<Bound>) -> Stmt {
    define(Definition::Type(TypeDef {
        name: id(name),
        base: Some(TypeBase::Primitive {
            name: id(primitive),
            bounds,
        }),
        body: Vec::new(),
        span: Span::default(),
    }))
}

fn callable(owner: Option<&str>, name: &str, kind: CallableKind, hidden: bool, body: Vec<Stmt>) -> Stmt {
    define(Definition::Callable(CallableDef {
        name: id(name),
        owner: owner.map(id),
        kind,
        hidden,
        body,
        span: Span::default(),
    }))
}

pub fn define_function(name: &str, body: Vec<Stmt>) -> Stmt {
    callable(None, name, CallableKind::Function, false, body)
}

pub fn define_subprocess(name: &str, body: Vec<Stmt>) -> Stmt {
    callable(None, name, CallableKind::Subprocess, false, body)
}

/// `Define Owner.name as Function`
pub fn define_member(owner: &str, name: &str, body: Vec<Stmt>) -> Stmt {
    callable(Some(owner), name, CallableKind::Function, false, body)
}

/// `Define $Owner.name as Function`
pub fn define_hidden_member(owner: &str, name: &str, body: Vec<Stmt>) -> Stmt {
    callable(Some(owner), name, CallableKind::Function, true, body)
}

/// `Define Owner.name as PrivateHelper`
pub fn define_helper(owner: &str, name: &str, body: Vec<Stmt>) -> Stmt {
    callable(Some(owner), name, CallableKind::PrivateHelper, false, body)
}
