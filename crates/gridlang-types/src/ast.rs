//! AST node types for GridLang.
//!
//! Every statement and expression carries a [`Span`]. Statement lists keep
//! source order: the evaluator schedules by data dependency but breaks ties
//! by position, so order is part of the contract.
//!
//! Names are case-insensitive; [`Ident::key`] is the comparison form.

use crate::{CellAddr, Span};

// ══════════════════════════════════════════════════════════════════════════════
// Top Level
// ══════════════════════════════════════════════════════════════════════════════

/// A complete GridLang script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// A `do … End` / `then … End` body.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

// ══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ══════════════════════════════════════════════════════════════════════════════

/// A spanned identifier, spelled as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }

    /// Hidden names start with `$`.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('$')
    }

    /// The name without its hidden marker, original casing.
    pub fn bare(&self) -> &str {
        self.name.trim_start_matches('$')
    }

    /// Case-folded lookup key, hidden marker stripped.
    pub fn key(&self) -> String {
        self.bare().to_ascii_lowercase()
    }
}

/// A type name as written in `as T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: Ident,
}

// ══════════════════════════════════════════════════════════════════════════════
// Cell References
// ══════════════════════════════════════════════════════════════════════════════

/// Column part of a cell reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRef {
    /// `A`, `AB`
    Fixed(u32),
    /// `{i :A}`: column `base + i - 1`
    Offset { base: u32, offset: Box<Expr> },
}

/// Row part of a cell reference.
#[derive(Debug, Clone, PartialEq)]
pub enum RowRef {
    /// `1`
    Fixed(u32),
    /// `{n + 1}`
    Dynamic(Box<Expr>),
}

/// One cell position, possibly interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRef {
    pub column: ColumnRef,
    pub row: RowRef,
}

impl CellRef {
    pub fn fixed(addr: CellAddr) -> Self {
        Self {
            column: ColumnRef::Fixed(addr.col),
            row: RowRef::Fixed(addr.row),
        }
    }

    /// The address when no part is interpolated.
    pub fn as_fixed(&self) -> Option<CellAddr> {
        match (&self.column, &self.row) {
            (ColumnRef::Fixed(col), RowRef::Fixed(row)) => Some(CellAddr::new(*col, *row)),
            _ => None,
        }
    }
}

/// Bracketed grid reference.
#[derive(Debug, Clone, PartialEq)]
pub enum CellTarget {
    /// `[A1]`
    Single(CellRef),
    /// `[^A1]`: spill anchor
    Anchor(CellRef),
    /// `[A1:C2]`
    Range(CellRef, CellRef),
}

// ══════════════════════════════════════════════════════════════════════════════
// Dimensions and Constraints
// ══════════════════════════════════════════════════════════════════════════════

/// Extent of one array axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extent {
    /// `4`: indices 1..=4
    Count(u32),
    /// `0 to 4`: indices 0..=4
    Bounds(i64, i64),
    /// `*`
    Growable,
}

/// One axis of a `dim` spec, optionally named (`Quarter: 4`).
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSpec {
    pub name: Option<Ident>,
    pub extent: Extent,
}

/// `dim {}` | `dim *` | `dim 15` | `dim {Dept: *, Quarter: 4}`
#[derive(Debug, Clone, PartialEq)]
pub enum DimSpec {
    /// `{}`: scalar only
    Scalar,
    /// `*`: any array (a single growable axis when declaring)
    Any,
    Axes(Vec<AxisSpec>),
}

/// Comparison bound on a declaration: `For v <= vmax`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub op: BinOp,
    pub value: Expr,
}

/// How an initializer binds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// `= expr`: live equality (aliases arrays and objects)
    Equality,
    /// `init expr`: one-shot copy, later changed only by `push`
    Init,
    /// `or = expr`: fallback used when nothing else supplies a value
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
    pub mode: InitMode,
    pub value: Expr,
}

/// Field assignment inside `with (...)`.
///
/// `with (x)` is shorthand for `with (x = x)`; a `dim` adds a dimensioned field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub field: Ident,
    pub dim: Option<DimSpec>,
    pub value: Option<Expr>,
}

/// A declared name with its constraints.
///
/// Shared by `:` globals, cell-bound declarations, `For` declarations and
/// type fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: Ident,
    pub ty: Option<TypeRef>,
    pub dim: Option<DimSpec>,
    pub unit: Option<Ident>,
    /// `in {1, 2, 3}` or `in 1 to 10`
    pub allowed: Option<Expr>,
    pub bounds: Vec<Bound>,
    pub with: Vec<FieldInit>,
    pub init: Option<Initializer>,
    pub span: Span,
}

// ══════════════════════════════════════════════════════════════════════════════
// Statements
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `[A1] := expr`, `[^A1] := expr`, `[A1:C2] := expr`
    CellAssign { target: CellTarget, value: Expr },

    /// `[A1] : name [as T] [= expr]`
    CellDecl { cell: CellAddr, decl: Decl },

    /// `: name [constraints] [= expr | init expr | or = expr]`
    Global(Decl),

    /// `For a = 3 and b = 7 [do … End]`
    ForDecl { decls: Vec<Decl>, body: Option<Block> },

    /// `For v in src [index i] [and …] [do … End]`
    ForLoop(ForLoop),

    /// `Let X = 2 and Y = X * 5`, `Let x < 10`, `Let x > 10 then … End`
    Let(LetStmt),

    /// `Input a, b as number or = 0`
    Input(InputDecl),

    /// `Output r as number [init expr | = expr]`
    Output(OutputDecl),

    /// `push place = expr`
    Push { place: Place, value: Expr },

    /// Scoped conditional: `If cond then … [elseif …] [else …] End`
    If(IfStmt),

    /// Bare `If cond`: prunes the rest of the enclosing scope when false.
    Guard(Expr),

    /// `Results!Quarter.Label{"Q1", "Q2"}`
    Label {
        target: Ident,
        axis: Ident,
        labels: Vec<Expr>,
    },

    /// `return expr`
    Return(Expr),

    /// Calls and `Super(...)` used for their effects.
    Expr(Expr),

    /// `Define … End`
    Define(Definition),
}

/// Loop over ranges or sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// AND-joined sources, outermost first.
    pub sources: Vec<LoopSource>,
    /// `None` for the unscoped form, whose body is the rest of the scope.
    pub body: Option<Block>,
    pub span: Span,
}

/// `var in iterable [index i]`
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSource {
    pub var: Ident,
    pub iterable: Expr,
    pub index: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    /// AND-joined chain members, evaluated strictly left to right.
    pub bindings: Vec<LetBinding>,
    /// `then … End`
    pub body: Option<Block>,
}

/// One link of a `Let` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub target: Place,
    pub ty: Option<TypeRef>,
    pub bounds: Vec<Bound>,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub names: Vec<Ident>,
    pub ty: Option<TypeRef>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDecl {
    pub name: Ident,
    pub ty: Option<TypeRef>,
    pub init: Option<Initializer>,
}

/// Assignable location for `Let` and `push`.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    /// `x`
    Name(Ident),
    /// `D(i)`, `D{i, j}`, `D[3]`, `D[B1]`
    Element { name: Ident, index: ElementIndex },
    /// `P2.y`
    Field { object: Box<Expr>, field: Ident },
    /// `[A{i}]`
    Cell(CellTarget),
}

impl Place {
    /// The binding a mutation of this place lands on.
    pub fn root(&self) -> Option<&Ident> {
        match self {
            Place::Name(name) | Place::Element { name, .. } => Some(name),
            Place::Field { object, .. } => object.root_ident(),
            Place::Cell(_) => None,
        }
    }
}

/// Element selector.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementIndex {
    /// `(i, j)` / `{i, j}`: relative to declared axis lower bounds
    Axes(Vec<Expr>),
    /// `[n]`: 1-based position
    Ordinal(Box<Expr>),
    /// `[B1]`: the array's own A1-origin coordinates
    Cell(CellAddr),
}

/// `If cond then … [elseif …] [else …]`
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_block: Block,
    pub else_branch: Option<ElseBranch>,
    pub span: Span,
}

/// The else branch of an `If`: either another `If` (elseif) or a block.
#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    ElseIf(Box<IfStmt>),
    Block(Block),
}

// ══════════════════════════════════════════════════════════════════════════════
// Definitions
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Type(TypeDef),
    Callable(CallableDef),
}

/// Base of a type definition.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeBase {
    /// `Type(Point)`
    Record(Ident),
    /// `Type(Number) >= 0.0 <= 1.0`
    Primitive { name: Ident, bounds: Vec<Bound> },
}

/// `Define Name as Type[(Base)] … End Name`
///
/// The body holds `Input` constructor parameters, `:` field declarations,
/// `Super(...)`, helper calls and any other statements run at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: Ident,
    pub base: Option<TypeBase>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Subprocess,
    PrivateHelper,
}

/// `Define [Owner.]Name as Function | Subprocess | PrivateHelper … End`
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDef {
    pub name: Ident,
    /// Owning type for member functions and helpers.
    pub owner: Option<Ident>,
    pub kind: CallableKind,
    /// `Define $Point.OnTheRight`: callable only from inside the type.
    pub hidden: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ══════════════════════════════════════════════════════════════════════════════
// Expressions
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The identifier at the root of a field/index chain (`a.b.c` → `a`).
    pub fn root_ident(&self) -> Option<&Ident> {
        match &self.kind {
            ExprKind::Ident(id) => Some(id),
            ExprKind::Field { object, .. } => object.root_ident(),
            ExprKind::Index { target, .. }
            | ExprKind::Ordinal { target, .. }
            | ExprKind::LocalCell { target, .. } => target.root_ident(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    /// Raw literal body; doubled quotes collapse at evaluation.
    Text(String),
    Bool(bool),
    /// `#INF`
    Infinity,
    /// `#N/A`
    NotAvailable,

    /// `$"Hello, {name}!"`: the raw template plus the parsed expressions
    /// for each `{…}` segment, keyed by their source text.
    Interpolated {
        template: String,
        embedded: Vec<Embedded>,
    },

    Ident(Ident),

    /// `[A1]`, `[A1:B3]`
    Cell(CellTarget),

    /// `{1, 2; 3, 4}`: rows separated by `;`. A single row is 1-D.
    Array(Vec<Vec<Expr>>),

    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// `a to b [step s]`
    Range {
        from: Box<Expr>,
        to: Box<Expr>,
        step: Option<Box<Expr>>,
    },

    /// `expr dim {*, 1}`
    Reshape { value: Box<Expr>, dims: DimSpec },

    /// Condition predicates: `x as text dim {}`, `x of dollar`, `x dim 2`.
    Test {
        subject: Box<Expr>,
        checks: Vec<Check>,
    },

    /// `f(a, b)`: a function, builtin, helper, or parenthesised indexing
    /// when `f` names an array.
    Call { callee: Ident, args: Vec<Expr> },

    /// `D{i, j}`
    Index { target: Box<Expr>, indices: Vec<Expr> },

    /// `names[3]`
    Ordinal { target: Box<Expr>, position: Box<Expr> },

    /// `Results[B1]`
    LocalCell { target: Box<Expr>, cell: CellAddr },

    /// `Results!Quarter("Q2")`
    LabelLookup {
        target: Box<Expr>,
        axis: Ident,
        label: Box<Expr>,
    },

    /// `p.y`; also a zero-argument member call when `y` is a member function.
    Field { object: Box<Expr>, field: Ident },

    /// `R.OnTheLeft(S)`, `Point.GoSlightlyRight(p)`
    MethodCall {
        receiver: Box<Expr>,
        method: Ident,
        args: Vec<Expr>,
    },

    /// `new T(args) [with (…)]`
    New {
        ty: Ident,
        args: Vec<Expr>,
        with: Vec<FieldInit>,
    },

    /// `Super(args)` inside a derived constructor.
    Super(Vec<Expr>),
}

/// Parsed expression for one `{…}` segment of an interpolated template.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    /// Segment text between the braces, width suffix excluded.
    pub source: String,
    pub expr: Expr,
}

/// A single predicate inside a condition test.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// `as text`
    Type(TypeRef),
    /// `of dollar`
    Unit(Ident),
    /// `dim {2, 2}`
    Dim(DimSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    /// `\`
    IntDiv,
    /// `&`
    Concat,
    /// `|`
    Stack,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
    In,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Mod => "mod",
            BinOp::IntDiv => "\\",
            BinOp::Concat => "&",
            BinOp::Stack => "|",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "=",
            BinOp::NotEq => "not =",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::In => "in",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::NotEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}
