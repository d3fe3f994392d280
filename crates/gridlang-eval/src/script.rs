//! Host-facing entry point: evaluate a whole program into a sheet.

use crate::config::EvalConfig;
use crate::error::{EvalError, EvalResult};
use crate::grid::Sheet;
use crate::interp::Interpreter;
use crate::machine::{BlockFrame, Frame, Machine};
use gridlang_types::ast::Program;
use gridlang_types::{Diagnostic, Span};
use std::rc::Rc;

/// One evaluation of a program. Each [`Script::run`] starts from an empty
/// grid and fresh bindings.
#[derive(Debug, Clone)]
pub struct Script<'p> {
    program: &'p Program,
    config: EvalConfig,
}

impl<'p> Script<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self::with_config(program, EvalConfig::default())
    }

    pub fn with_config(program: &'p Program, config: EvalConfig) -> Self {
        Self { program, config }
    }

    /// Run to completion and return the populated grid.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&self) -> EvalResult<Sheet> {
        self.execute().map_err(|(e, _)| e)
    }

    /// Like [`Script::run`], with failures rendered as a diagnostic that
    /// points at the statement being executed.
    pub fn diagnose(&self) -> Result<Sheet, Diagnostic> {
        self.execute().map_err(|(e, span)| e.to_diagnostic(span))
    }

    fn execute(&self) -> Result<Sheet, (EvalError, Span)> {
        let mut interp = Interpreter::new(self.program, self.config.clone())
            .map_err(|e| (e, self.program.span))?;
        let mut m = Machine::script(Rc::clone(interp.grid()));
        let outcome = interp.plan(&self.program.stmts).and_then(|plan| {
            m.push(Frame::Block(BlockFrame::new(plan, false)));
            interp.finish(&mut m)
        });
        match outcome {
            Ok(_) => {
                let sheet = interp.grid().borrow().clone().into_sheet();
                tracing::debug!(cells = sheet.len(), "script finished");
                Ok(sheet)
            }
            Err(e) => {
                tracing::debug!(error = %e, "script failed");
                Err((e, interp.span))
            }
        }
    }
}

/// Evaluate `program` with the default configuration.
pub fn run(program: &Program) -> EvalResult<Sheet> {
    Script::new(program).run()
}
