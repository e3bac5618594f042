//! Sandboxed Python interpreter: an AST-walking evaluator for LLM-generated
//! code, in sync ([`Interpreter`]) and async ([`AsyncInterpreter`]) variants.
//!
//! Three guarantees hold for every evaluation:
//!
//! 1. **Allowlisted imports** — importing a module whose top-level name is not
//!    allowlisted fails with `import not allowed: <name>`.
//! 2. **Bounded operations** — every call, attribute access, subscript,
//!    binary op, comparison, and loop iteration ticks an operation counter;
//!    exceeding the cap fails with `operation limit exceeded`.
//! 3. **No raw escape hatches** — `eval`, `exec`, `open`, `__import__`, and
//!    friends do not exist; only a curated builtin set is injected.
//!
//! Tools are bound into the global namespace under their sanitized names and
//! grouped under a `functions` object, so generated code may call either
//! `tool_name(...)` or `functions.tool_name(...)`. A built-in
//! `final_answer(x)` raises a private signal caught at the top level; the
//! run then reports `is_final_answer = true` with `x` as the value.

mod ast;
mod builtins;
mod eval;
mod eval_async;
mod ops;
mod parser;
mod state;
mod token;
mod value;

pub use eval::Interpreter;
pub use eval_async::AsyncInterpreter;
pub use state::{ToolBinding, ToolHandle, ToolSink};
pub use value::Value;

use thiserror::Error;

/// Hard interpreter failures. Unlike Python-level exceptions these cannot be
/// caught by the evaluated code; they end the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpreterError {
    #[error("import not allowed: {0}")]
    ImportNotAllowed(String),
    #[error("operation limit exceeded")]
    OperationLimit,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("async tool '{0}' requires the async interpreter")]
    AsyncToolInSync(String),
}

/// Interpreter knobs. `allowed_imports` extends the static allowlist.
#[derive(Clone, Debug)]
pub struct InterpreterConfig {
    pub allowed_imports: Vec<String>,
    pub op_cap: u64,
    pub max_print_outputs_length: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            allowed_imports: Vec::new(),
            op_cap: 1_000_000,
            max_print_outputs_length: 50_000,
        }
    }
}

/// Outcome of one evaluation.
///
/// On success, `value` is the last expression value or the `final_answer`
/// payload. On failure, `error` holds a compact deterministic description
/// (error kind + message + line) and `value` mirrors it as a string.
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub value: Value,
    pub logs: String,
    pub is_final_answer: bool,
    pub error: Option<String>,
}

impl ExecResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    /// Text view of the value, for prompts and answers.
    pub fn value_text(&self) -> String {
        self.value.str()
    }
}
