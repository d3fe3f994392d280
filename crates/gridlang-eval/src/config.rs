//! Evaluation settings supplied by the host.

use crate::value::Value;

/// Default step budget for one script run.
pub const DEFAULT_GAS_LIMIT: u64 = 5_000_000;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Steps allowed before the run fails with `GasExhausted`.
    pub gas_limit: u64,
    /// Host values consumed by `Input` declarations in order.
    pub inputs: Vec<Value>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            inputs: Vec::new(),
        }
    }
}

impl EvalConfig {
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Inputs as the host typed them; each is coerced to its `Input` type
    /// when consumed.
    pub fn with_text_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(|s| Value::Text(s.into())).collect();
        self
    }
}
