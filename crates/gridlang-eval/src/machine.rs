//! Resumable execution state.
//!
//! A [`Machine`] is an explicit stack of frames instead of native recursion,
//! so a callable body can stop at `return`, hand a value to whoever is
//! pulling, and continue from the same point on the next pull. Direct calls
//! simply pull until the stack is empty.

use crate::env::{Binding, BindingKind, Environment};
use crate::error::EvalResult;
use crate::grid::GridRef;
use crate::interp::Interpreter;
use crate::plan::Plan;
use crate::value::{ObjectRef, Value};
use gridlang_types::ast::{Decl, Stmt};
use gridlang_types::CellAddr;
use std::collections::HashMap;
use std::rc::Rc;

/// Resolved destination of a cell write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellWrite {
    Single(CellAddr),
    Anchor(CellAddr),
    Range(CellAddr, CellAddr),
}

impl CellWrite {
    pub fn apply(&self, grid: &GridRef, value: &Value) -> EvalResult<()> {
        let mut grid = grid.borrow_mut();
        match *self {
            CellWrite::Single(addr) => {
                grid.assign(addr, value);
                Ok(())
            }
            CellWrite::Anchor(addr) => grid.spill(addr, value),
            CellWrite::Range(from, to) => grid.write_range(from, to, value),
        }
    }
}

/// Caller-owned cell that receives every push to one `Output`.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub grid: GridRef,
    pub target: CellWrite,
}

pub struct BlockFrame<'p> {
    pub plan: Rc<Plan<'p>>,
    pub cursor: usize,
    /// Nodes pruned by a failed guard.
    pub skipped: Vec<bool>,
    /// Pops a local scope when the block finishes.
    pub scoped: bool,
}

impl<'p> BlockFrame<'p> {
    pub fn new(plan: Rc<Plan<'p>>, scoped: bool) -> Self {
        let skipped = vec![false; plan.len()];
        Self {
            plan,
            cursor: 0,
            skipped,
            scoped,
        }
    }
}

pub enum Driver<'p> {
    /// Precomputed variable bindings, one entry per iteration.
    Tuples(std::vec::IntoIter<Vec<(String, Value)>>),
    /// A suspended callable pulled once per iteration.
    Generator {
        source: Box<Machine<'p>>,
        decl: &'p Decl,
    },
}

pub struct LoopFrame<'p> {
    pub driver: Driver<'p>,
    pub body: &'p [Stmt],
}

pub enum Frame<'p> {
    Block(BlockFrame<'p>),
    Loop(LoopFrame<'p>),
}

/// What a statement asks the scheduler to do next.
pub enum Flow<'p> {
    Next,
    Enter(Frame<'p>),
    Yield(Value),
    GuardFailed,
}

enum Pulled<'p> {
    Vars(Vec<(String, Value)>),
    Value(&'p Decl, Value),
}

/// One execution context: the script itself, a call, or a constructor run.
pub struct Machine<'p> {
    pub(crate) frames: Vec<Frame<'p>>,
    pub locals: Environment,
    /// Object whose fields are in scope (constructors and private helpers).
    pub receiver: Option<ObjectRef>,
    /// Type whose code is running; grants access to hidden members.
    pub owner: Option<String>,
    /// Target of cell reads and writes.
    pub grid: GridRef,
    /// Output name → caller cell that mirrors it.
    pub outputs: HashMap<String, OutputTarget>,
    /// `:` declarations become receiver fields.
    pub constructing: bool,
    /// `return` yields to the caller.
    pub callable: bool,
}

impl<'p> Machine<'p> {
    /// The script's own context: declarations land in the globals.
    pub fn script(grid: GridRef) -> Self {
        Self {
            frames: Vec::new(),
            locals: Environment::new(),
            receiver: None,
            owner: None,
            grid,
            outputs: HashMap::new(),
            constructing: false,
            callable: false,
        }
    }

    pub fn call(grid: GridRef, owner: Option<String>) -> Self {
        Self {
            locals: Environment::with_scope(Default::default()),
            owner,
            callable: true,
            ..Self::script(grid)
        }
    }

    pub fn constructor(receiver: ObjectRef, owner: String, grid: GridRef) -> Self {
        Self {
            locals: Environment::with_scope(Default::default()),
            receiver: Some(receiver),
            owner: Some(owner),
            constructing: true,
            ..Self::script(grid)
        }
    }

    pub fn is_script(&self) -> bool {
        !self.callable && !self.constructing
    }

    pub fn push(&mut self, frame: Frame<'p>) {
        self.frames.push(frame);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Scheduling loop
// ══════════════════════════════════════════════════════════════════════════════

impl<'p> Interpreter<'p> {
    /// Run until the next yield (`Some`) or until the machine has no frames
    /// left (`None`).
    pub fn resume(&mut self, m: &mut Machine<'p>) -> EvalResult<Option<Value>> {
        while let Some(frame) = m.frames.pop() {
            match frame {
                Frame::Block(mut block) => {
                    let Some(&idx) = block.plan.order.get(block.cursor) else {
                        if block.scoped {
                            m.locals.pop_scope();
                        }
                        continue;
                    };
                    block.cursor += 1;
                    let plan = Rc::clone(&block.plan);
                    let pruned = block.skipped[idx];
                    m.frames.push(Frame::Block(block));
                    if pruned {
                        continue;
                    }
                    match self.exec_node(m, &plan.nodes[idx])? {
                        Flow::Next => {}
                        Flow::Enter(inner) => m.frames.push(inner),
                        Flow::Yield(value) => return Ok(Some(value)),
                        Flow::GuardFailed => {
                            tracing::debug!(node = idx, pruned = plan.prunes[idx].len(), "guard failed");
                            if let Some(Frame::Block(top)) = m.frames.last_mut() {
                                for &j in &plan.prunes[idx] {
                                    top.skipped[j] = true;
                                }
                            }
                        }
                    }
                }
                Frame::Loop(mut lp) => {
                    self.tick()?;
                    let pulled = match &mut lp.driver {
                        Driver::Tuples(rows) => rows.next().map(Pulled::Vars),
                        Driver::Generator { source, decl } => {
                            tracing::trace!(name = %decl.name.name, "generator resumed");
                            self.resume(source)?.map(|v| Pulled::Value(*decl, v))
                        }
                    };
                    let Some(pulled) = pulled else {
                        continue;
                    };
                    let plan = self.plan(lp.body)?;
                    m.frames.push(Frame::Loop(lp));
                    m.locals.push_scope();
                    match pulled {
                        Pulled::Vars(vars) => {
                            if let Some(scope) = m.locals.innermost_mut() {
                                for (key, value) in vars {
                                    scope.define(&key, Binding::new(BindingKind::Loop, value));
                                }
                            }
                        }
                        Pulled::Value(decl, value) => {
                            self.declare_value(m, decl, value, BindingKind::Deferred, None)?;
                        }
                    }
                    m.frames.push(Frame::Block(BlockFrame::new(plan, true)));
                }
            }
        }
        Ok(None)
    }

    /// Drive a machine to completion; the last yielded value, if any.
    pub fn finish(&mut self, m: &mut Machine<'p>) -> EvalResult<Option<Value>> {
        let mut last = None;
        while let Some(value) = self.resume(m)? {
            last = Some(value);
        }
        Ok(last)
    }
}
