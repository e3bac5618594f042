//! Shared evaluator state: namespaces, operation budget, print buffer, tool
//! bindings, and the control-flow signals both evaluators use.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value as Json;

use crate::tools::{Tool, ToolError, ToolSpec};

use super::value::Value;
use super::{InterpreterConfig, InterpreterError};

/// Modules importable by default (plus caller-supplied additions).
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "json",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// How a tool is invoked from interpreted code.
pub enum ToolBinding {
    /// Plain function; callable from both evaluators.
    Sync(Arc<dyn Fn(Json) -> Result<Json, ToolError> + Send + Sync>),
    /// Async tool; the async evaluator awaits it, the sync evaluator rejects it.
    Async(Arc<dyn Tool>),
}

/// A tool bound into the interpreter namespace.
pub struct ToolHandle {
    /// Sanitized name the code calls.
    pub name: String,
    pub spec: ToolSpec,
    pub binding: ToolBinding,
}

impl ToolHandle {
    /// Maps positional + keyword call arguments onto the spec's input names.
    pub fn build_args(
        &self,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Json, PyExc> {
        let names = self.spec.input_names();
        if args.len() > names.len() && !names.is_empty() {
            return Err(PyExc::new(
                "TypeError",
                format!(
                    "{}() takes at most {} arguments ({} given)",
                    self.name,
                    names.len(),
                    args.len()
                ),
            ));
        }
        let mut obj = serde_json::Map::new();
        for (i, arg) in args.iter().enumerate() {
            let key = names
                .get(i)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("arg{i}"));
            obj.insert(key, arg.to_json());
        }
        for (k, v) in kwargs {
            obj.insert(k.clone(), v.to_json());
        }
        Ok(Json::Object(obj))
    }
}

/// A Python-level exception: catchable by `except` clauses in the evaluated
/// code.
#[derive(Clone, Debug, PartialEq)]
pub struct PyExc {
    pub kind: String,
    pub message: String,
}

impl PyExc {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// True when this exception matches the handler's type name (exact kind,
    /// or the catch-all `Exception`).
    pub fn matches(&self, type_name: &str) -> bool {
        type_name == "Exception" || type_name == "BaseException" || type_name == self.kind
    }
}

/// Non-local control during evaluation.
pub enum Signal {
    /// Sandbox violation; not catchable by evaluated code.
    Hard(InterpreterError),
    /// Python exception; catchable.
    Exc(PyExc),
    /// `final_answer(x)` was called.
    Final(Value),
}

impl From<PyExc> for Signal {
    fn from(e: PyExc) -> Self {
        Signal::Exc(e)
    }
}

/// Statement-level flow.
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Local scope stack; empty means module level (globals).
pub type Locals = Vec<HashMap<String, Value>>;

/// Shared, concurrently-insertable tool namespace. The `load_tool` meta-tool
/// injects new tools through this map while an evaluation is in progress, so
/// a freshly loaded tool is callable in the same run.
pub type ToolSink = Arc<DashMap<String, Arc<ToolHandle>>>;

/// State shared by the sync and async evaluators.
pub struct InterpState {
    pub globals: HashMap<String, Value>,
    pub tools: ToolSink,
    pub allowed_imports: HashSet<String>,
    pub op_count: u64,
    pub op_cap: u64,
    pub print_log: String,
    pub max_print: usize,
    pub print_truncated: bool,
}

impl InterpState {
    pub fn new(config: &InterpreterConfig) -> Self {
        let mut allowed: HashSet<String> = DEFAULT_ALLOWED_IMPORTS
            .iter()
            .map(|s| s.to_string())
            .collect();
        allowed.extend(config.allowed_imports.iter().cloned());
        Self {
            globals: HashMap::new(),
            tools: Arc::new(DashMap::new()),
            allowed_imports: allowed,
            op_count: 0,
            op_cap: config.op_cap,
            print_log: String::new(),
            max_print: config.max_print_outputs_length,
            print_truncated: false,
        }
    }

    /// Ticks the operation counter; errors once the cap is exceeded.
    pub fn tick(&mut self) -> Result<(), Signal> {
        self.op_count += 1;
        if self.op_count > self.op_cap {
            Err(Signal::Hard(InterpreterError::OperationLimit))
        } else {
            Ok(())
        }
    }

    /// Appends one line to the print buffer, truncating at the cap with an
    /// explicit notice.
    pub fn print_line(&mut self, text: &str) {
        if self.print_truncated {
            return;
        }
        if self.print_log.len() + text.len() + 1 > self.max_print {
            let remaining = self.max_print.saturating_sub(self.print_log.len());
            let clipped: String = text.chars().take(remaining).collect();
            self.print_log.push_str(&clipped);
            self.print_log
                .push_str("\n[print output truncated: limit reached]\n");
            self.print_truncated = true;
            return;
        }
        self.print_log.push_str(text);
        self.print_log.push('\n');
    }

    /// Resolves a name: locals (innermost first), then globals, then tools.
    /// `functions` resolves to a live snapshot of the tool namespace.
    pub fn lookup(&self, locals: &Locals, name: &str) -> Option<Value> {
        for frame in locals.iter().rev() {
            if let Some(v) = frame.get(name) {
                return Some(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Some(v.clone());
        }
        if let Some(t) = self.tools.get(name) {
            return Some(Value::Tool(Arc::clone(t.value())));
        }
        if name == "functions" {
            return Some(self.functions_namespace());
        }
        None
    }

    /// Snapshot of the tool namespace as a `functions` module object.
    pub fn functions_namespace(&self) -> Value {
        let attrs: HashMap<String, Value> = self
            .tools
            .iter()
            .map(|entry| (entry.key().clone(), Value::Tool(Arc::clone(entry.value()))))
            .collect();
        Value::Module(Arc::new(super::value::ModuleObj {
            name: "functions".to_string(),
            attrs,
        }))
    }

    /// Binds a name in the innermost scope (globals at module level).
    pub fn bind(&mut self, locals: &mut Locals, name: &str, value: Value) {
        if let Some(frame) = locals.last_mut() {
            frame.insert(name.to_string(), value);
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    /// Binds a tool under its sanitized name; it is also reachable through
    /// the `functions` namespace object.
    pub fn bind_tool(&mut self, handle: ToolHandle) {
        let handle = Arc::new(handle);
        self.tools.insert(handle.name.clone(), handle);
    }

    /// Shared handle to the tool namespace, for external injection while a
    /// run is in progress.
    pub fn tool_sink(&self) -> ToolSink {
        Arc::clone(&self.tools)
    }
}

/// Formats a failure per the return contract: error kind + message + line.
pub fn format_error(kind: &str, message: &str, line: Option<u32>) -> String {
    match line {
        Some(line) => format!("{kind}: {message} (line {line})"),
        None => format!("{kind}: {message}"),
    }
}

/// Formats a [`Signal`] that escaped to the top level.
pub fn format_signal(signal: &Signal, line: Option<u32>) -> String {
    match signal {
        Signal::Hard(e) => format_error("InterpreterError", &e.to_string(), line),
        Signal::Exc(e) => format_error(&e.kind, &e.message, line),
        Signal::Final(_) => "final answer".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_enforces_cap() {
        let mut st = InterpState::new(&InterpreterConfig {
            op_cap: 2,
            ..Default::default()
        });
        assert!(st.tick().is_ok());
        assert!(st.tick().is_ok());
        assert!(matches!(
            st.tick(),
            Err(Signal::Hard(InterpreterError::OperationLimit))
        ));
    }

    #[test]
    fn print_truncates_with_notice() {
        let mut st = InterpState::new(&InterpreterConfig {
            max_print_outputs_length: 20,
            ..Default::default()
        });
        st.print_line("0123456789");
        st.print_line("0123456789");
        st.print_line("more");
        assert!(st.print_log.contains("[print output truncated"));
        assert!(st.print_truncated);
    }

    #[test]
    fn lookup_prefers_locals_over_globals() {
        let mut st = InterpState::new(&InterpreterConfig::default());
        st.globals.insert("x".into(), Value::Int(1));
        let locals = vec![HashMap::from([("x".to_string(), Value::Int(2))])];
        let v = st.lookup(&locals, "x").unwrap();
        assert!(matches!(v, Value::Int(2)));
    }

    #[test]
    fn exception_matching_includes_catch_all() {
        let e = PyExc::new("ValueError", "bad");
        assert!(e.matches("ValueError"));
        assert!(e.matches("Exception"));
        assert!(!e.matches("KeyError"));
    }
}
