//! Synchronous AST-walking evaluator.
//!
//! Namespaces are explicit: a local scope stack (empty at module level) over
//! the global map, with tools resolvable by sanitized name. Functions run
//! with a fresh scope stack, so there is no host-language scoping leakage.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::tools::{ToolError, ToolSpec};

use super::ast::*;
use super::builtins;
use super::ops;
use super::parser;
use super::state::{
    format_error, Flow, InterpState, Locals, PyExc, Signal, ToolBinding, ToolHandle,
};
use super::value::{Key, PyClass, PyFunction, PyInstance, Value};
use super::{ExecResult, InterpreterConfig, InterpreterError};

/// Nesting cap for user-function calls; past it a `RecursionError` is
/// raised instead of exhausting the host stack.
const MAX_CALL_DEPTH: usize = 200;

/// Synchronous sandboxed interpreter. One instance owns one namespace; state
/// persists across [`run`](Interpreter::run) calls, REPL-style.
pub struct Interpreter {
    st: InterpState,
    current_line: u32,
    /// Exception being handled, for bare `raise`.
    current_exc: Option<PyExc>,
    depth: usize,
}

impl Interpreter {
    pub fn new(config: &InterpreterConfig) -> Self {
        let mut st = InterpState::new(config);
        builtins::install(&mut st);
        Self {
            st,
            current_line: 0,
            current_exc: None,
            depth: 0,
        }
    }

    /// Binds a sync tool under its sanitized name (and into `functions`).
    pub fn add_sync_tool(
        &mut self,
        name: &str,
        spec: ToolSpec,
        f: Arc<dyn Fn(Json) -> Result<Json, ToolError> + Send + Sync>,
    ) {
        self.st.bind_tool(ToolHandle {
            name: crate::tools::sanitize_tool_name(name),
            spec,
            binding: ToolBinding::Sync(f),
        });
    }

    /// Sets a global variable.
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.st.globals.insert(name.to_string(), value);
    }

    /// Shared tool namespace for external injection during a run.
    pub fn tool_sink(&self) -> super::state::ToolSink {
        self.st.tool_sink()
    }

    /// Reads a global variable.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.st.globals.get(name).cloned()
    }

    /// Runs a script for its definitions (skill scripts); the print log and
    /// last-value tracking are left untouched.
    pub fn inject_script(&mut self, source: &str) -> Result<(), String> {
        let stmts = parser::parse(source).map_err(|e| e.to_string())?;
        let mut locals: Locals = Vec::new();
        for stmt in &stmts {
            match self.exec_stmt(stmt, &mut locals) {
                Ok(_) => {}
                Err(signal) => return Err(super::state::format_signal(&signal, Some(stmt.line))),
            }
        }
        Ok(())
    }

    /// Evaluates a source string per the return contract.
    pub fn run(&mut self, source: &str) -> ExecResult {
        let logs_start = self.st.print_log.len();
        let stmts = match parser::parse(source) {
            Ok(stmts) => stmts,
            Err(e) => {
                return ExecResult {
                    value: Value::Str(format_error("InterpreterError", &e.to_string(), None)),
                    logs: String::new(),
                    is_final_answer: false,
                    error: Some(format_error("InterpreterError", &e.to_string(), None)),
                }
            }
        };

        let mut locals: Locals = Vec::new();
        let mut outcome: Result<(), Signal> = Ok(());
        for stmt in &stmts {
            self.current_line = stmt.line;
            let result = match &stmt.kind {
                // bare expression at statement position: evaluate, remember
                // as `_`, and show non-call expressions in the log
                StmtKind::Expr(expr) => match self.eval_expr(expr, &mut locals) {
                    Ok(value) => {
                        if !matches!(expr, Expr::Call { .. })
                            && !matches!(value, Value::None)
                        {
                            let text = value.str();
                            self.st.print_line(&text);
                        }
                        self.st.globals.insert("_".to_string(), value);
                        Ok(Flow::Normal)
                    }
                    Err(e) => Err(e),
                },
                _ => self.exec_stmt(stmt, &mut locals),
            };
            match result {
                Ok(Flow::Normal) => {}
                Ok(Flow::Return(_)) | Ok(Flow::Break) | Ok(Flow::Continue) => {
                    outcome = Err(Signal::Exc(PyExc::new(
                        "SyntaxError",
                        "'return', 'break', or 'continue' outside function or loop",
                    )));
                    break;
                }
                Err(signal) => {
                    outcome = Err(signal);
                    break;
                }
            }
        }

        let logs = self.st.print_log[logs_start..].to_string();
        match outcome {
            Ok(()) => ExecResult {
                value: self
                    .st
                    .globals
                    .get("_")
                    .cloned()
                    .unwrap_or(Value::None),
                logs,
                is_final_answer: false,
                error: None,
            },
            Err(Signal::Final(value)) => ExecResult {
                value,
                logs,
                is_final_answer: true,
                error: None,
            },
            Err(signal) => {
                let error = super::state::format_signal(&signal, Some(self.current_line));
                ExecResult {
                    value: Value::Str(error.clone()),
                    logs,
                    is_final_answer: false,
                    error: Some(error),
                }
            }
        }
    }

    // ---- statements ----

    fn exec_block(&mut self, stmts: &[Stmt], locals: &mut Locals) -> Result<Flow, Signal> {
        for stmt in stmts {
            self.current_line = stmt.line;
            match self.exec_stmt(stmt, locals)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, locals: &mut Locals) -> Result<Flow, Signal> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let value = self.eval_expr(expr, locals)?;
                if locals.is_empty() {
                    self.st.globals.insert("_".to_string(), value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value, locals)?;
                for target in targets {
                    self.assign(target, value.clone(), locals)?;
                }
                if locals.is_empty() {
                    self.st.globals.insert("_".to_string(), value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval_target_value(target, locals)?;
                let rhs = self.eval_expr(value, locals)?;
                self.st.tick()?;
                let updated = ops::binary(*op, &current, &rhs).map_err(Signal::Exc)?;
                self.assign(target, updated, locals)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { cond, body, orelse } => {
                let test = self.eval_expr(cond, locals)?;
                if test.truthy() {
                    self.exec_block(body, locals)
                } else {
                    self.exec_block(orelse, locals)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.st.tick()?;
                    if !self.eval_expr(cond, locals)?.truthy() {
                        break;
                    }
                    match self.exec_block(body, locals)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval_expr(iter, locals)?;
                let items = ops::iterate(&iterable).map_err(Signal::Exc)?;
                let mut broke = false;
                for item in items {
                    self.st.tick()?;
                    self.assign(target, item, locals)?;
                    match self.exec_block(body, locals)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                if !broke {
                    match self.exec_block(orelse, locals)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::FuncDef { name, params, body } => {
                let defaults = self.eval_defaults(params, locals)?;
                let func = Value::Function(Arc::new(PyFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: Arc::clone(body),
                    lambda_body: None,
                    defaults,
                }));
                self.st.bind(locals, name, func);
                Ok(Flow::Normal)
            }
            StmtKind::ClassDef { name, bases, body } => {
                let mut base_classes = Vec::new();
                for base in bases {
                    match self.eval_expr(base, locals)? {
                        Value::Class(c) => base_classes.push(c),
                        other => {
                            return Err(Signal::Exc(ops::type_error(format!(
                                "class base must be a class, not '{}'",
                                other.type_name()
                            ))))
                        }
                    }
                }
                let mut class_locals: Locals = vec![HashMap::new()];
                self.exec_block(body, &mut class_locals)?;
                let methods = class_locals.pop().unwrap_or_default();
                let class = Value::Class(Arc::new(PyClass {
                    name: name.clone(),
                    methods,
                    bases: base_classes,
                }));
                self.st.bind(locals, name, class);
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval_expr(e, locals)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Import { modules } => {
                for (path, alias) in modules {
                    let module = self.import_module(path)?;
                    let bind_name = alias
                        .clone()
                        .unwrap_or_else(|| path.split('.').next().unwrap_or(path).to_string());
                    self.st.bind(locals, &bind_name, module);
                }
                Ok(Flow::Normal)
            }
            StmtKind::FromImport { module, names } => {
                let module_value = self.import_module(module)?;
                let Value::Module(m) = &module_value else {
                    return Err(Signal::Exc(PyExc::new("ImportError", "not a module")));
                };
                for (name, alias) in names {
                    let value = m.attrs.get(name).cloned().ok_or_else(|| {
                        Signal::Exc(PyExc::new(
                            "ImportError",
                            format!("cannot import name '{name}' from '{module}'"),
                        ))
                    })?;
                    self.st.bind(locals, alias.as_deref().unwrap_or(name), value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.exec_try(body, handlers, orelse, finalbody, locals),
            StmtKind::Raise { exc } => {
                let exc = match exc {
                    None => self.current_exc.clone().ok_or_else(|| {
                        Signal::Exc(PyExc::new("RuntimeError", "No active exception to reraise"))
                    })?,
                    Some(expr) => match self.eval_expr(expr, locals)? {
                        Value::Exc(e) => (*e).clone(),
                        Value::Builtin(b) if builtins::is_exception_name(b.name) => {
                            PyExc::new(b.name, "")
                        }
                        other => {
                            return Err(Signal::Exc(ops::type_error(format!(
                                "exceptions must derive from BaseException, not '{}'",
                                other.type_name()
                            ))))
                        }
                    },
                };
                Err(Signal::Exc(exc))
            }
            StmtKind::With { items, body } => {
                let mut entered: Vec<Value> = Vec::new();
                for (expr, target) in items {
                    let ctx = self.eval_expr(expr, locals)?;
                    let value = match &ctx {
                        Value::Instance(inst) if inst.class.find_method("__enter__").is_some() => {
                            let enter = inst.class.find_method("__enter__").unwrap();
                            self.call_value(enter_bound(enter, inst), vec![], vec![])?
                        }
                        other => other.clone(),
                    };
                    entered.push(ctx.clone());
                    if let Some(target) = target {
                        self.assign(target, value, locals)?;
                    }
                }
                let result = self.exec_block(body, locals);
                for ctx in entered.iter().rev() {
                    if let Value::Instance(inst) = ctx {
                        if let Some(exit) = inst.class.find_method("__exit__") {
                            let _ = self.call_value(
                                enter_bound(exit, inst),
                                vec![Value::None, Value::None, Value::None],
                                vec![],
                            );
                        }
                    }
                }
                result
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval_expr(test, locals)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval_expr(m, locals)?.str(),
                        None => String::new(),
                    };
                    return Err(Signal::Exc(PyExc::new("AssertionError", message)));
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        locals: &mut Locals,
    ) -> Result<Flow, Signal> {
        let result = self.exec_block(body, locals);
        let result = match result {
            Ok(Flow::Normal) => self.exec_block(orelse, locals),
            Ok(flow) => Ok(flow),
            Err(Signal::Exc(exc)) => {
                let handler = handlers.iter().find(|h| {
                    h.exc_types.is_empty() || h.exc_types.iter().any(|t| exc.matches(t))
                });
                match handler {
                    Some(h) => {
                        if let Some(name) = &h.name {
                            self.st
                                .bind(locals, name, Value::Exc(Arc::new(exc.clone())));
                        }
                        let saved = self.current_exc.replace(exc);
                        let handled = self.exec_block(&h.body, locals);
                        self.current_exc = saved;
                        handled
                    }
                    None => Err(Signal::Exc(exc)),
                }
            }
            // hard signals and final_answer skip handlers
            Err(other) => Err(other),
        };
        // finally runs for everything except hard sandbox violations
        if !matches!(result, Err(Signal::Hard(_))) && !finalbody.is_empty() {
            match self.exec_block(finalbody, locals)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    fn eval_defaults(
        &mut self,
        params: &[ParamSig],
        locals: &mut Locals,
    ) -> Result<Vec<Value>, Signal> {
        let mut defaults = Vec::new();
        for p in params {
            if let Some(d) = &p.default {
                defaults.push(self.eval_expr(d, locals)?);
            }
        }
        Ok(defaults)
    }

    fn import_module(&mut self, path: &str) -> Result<Value, Signal> {
        let top = path.split('.').next().unwrap_or(path);
        if !self.st.allowed_imports.contains(top) {
            return Err(Signal::Hard(InterpreterError::ImportNotAllowed(
                top.to_string(),
            )));
        }
        Ok(builtins::make_module(top))
    }

    // ---- assignment ----

    fn assign(&mut self, target: &Target, value: Value, locals: &mut Locals) -> Result<(), Signal> {
        match target {
            Target::Name(name) => {
                self.st.bind(locals, name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = ops::iterate(&value).map_err(Signal::Exc)?;
                if items.len() != targets.len() {
                    return Err(Signal::Exc(PyExc::new(
                        "ValueError",
                        format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            targets.len()
                        ),
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v, locals)?;
                }
                Ok(())
            }
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval_expr(obj, locals)?;
                match obj {
                    Value::Instance(inst) => {
                        inst.fields.lock().unwrap().insert(attr.clone(), value);
                        Ok(())
                    }
                    other => Err(Signal::Exc(ops::type_error(format!(
                        "cannot set attribute on '{}'",
                        other.type_name()
                    )))),
                }
            }
            Target::Subscript { value: obj, index } => {
                let container = self.eval_expr(obj, locals)?;
                match index {
                    Index::Single(i) => {
                        let idx = self.eval_expr(i, locals)?;
                        self.st.tick()?;
                        ops::subscript_set(&container, &idx, value).map_err(Signal::Exc)
                    }
                    Index::Slice { .. } => Err(Signal::Exc(ops::type_error(
                        "slice assignment is not supported",
                    ))),
                }
            }
        }
    }

    /// Reads a target's current value (for augmented assignment).
    fn eval_target_value(&mut self, target: &Target, locals: &mut Locals) -> Result<Value, Signal> {
        match target {
            Target::Name(name) => self
                .st
                .lookup(locals, name)
                .ok_or_else(|| Signal::Exc(PyExc::new("NameError", format!("name '{name}' is not defined")))),
            Target::Attribute { value, attr } => {
                let obj = self.eval_expr(value, locals)?;
                self.get_attribute(&obj, attr)
            }
            Target::Subscript { value, index } => {
                let container = self.eval_expr(value, locals)?;
                match index {
                    Index::Single(i) => {
                        let idx = self.eval_expr(i, locals)?;
                        ops::subscript_get(&container, &idx).map_err(Signal::Exc)
                    }
                    Index::Slice { .. } => Err(Signal::Exc(ops::type_error(
                        "augmented slice assignment is not supported",
                    ))),
                }
            }
            Target::Tuple(_) => Err(Signal::Exc(ops::type_error(
                "augmented assignment to tuple is not supported",
            ))),
        }
    }

    // ---- expressions ----

    fn eval_expr(&mut self, expr: &Expr, locals: &mut Locals) -> Result<Value, Signal> {
        match expr {
            Expr::Const(c) => Ok(const_value(c)),
            Expr::Name(name) => self.st.lookup(locals, name).ok_or_else(|| {
                Signal::Exc(PyExc::new(
                    "NameError",
                    format!("name '{name}' is not defined"),
                ))
            }),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item, locals)?);
                }
                Ok(Value::list(out))
            }
            Expr::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item, locals)?);
                }
                Ok(Value::Tuple(Arc::new(out)))
            }
            Expr::Set(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    let v = self.eval_expr(item, locals)?;
                    keys.push(v.as_key().ok_or_else(|| {
                        Signal::Exc(ops::type_error(format!(
                            "unhashable type: '{}'",
                            v.type_name()
                        )))
                    })?);
                }
                Ok(Value::set_of(keys))
            }
            Expr::Dict { keys, values } => {
                let mut entries = Vec::with_capacity(keys.len());
                for (k, v) in keys.iter().zip(values.iter()) {
                    let key_value = self.eval_expr(k, locals)?;
                    let key = key_value.as_key().ok_or_else(|| {
                        Signal::Exc(ops::type_error(format!(
                            "unhashable type: '{}'",
                            key_value.type_name()
                        )))
                    })?;
                    entries.push((key, self.eval_expr(v, locals)?));
                }
                Ok(Value::dict(entries))
            }
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Literal(text) => out.push_str(text),
                        FPart::Expr {
                            expr,
                            format_spec,
                            conversion,
                        } => {
                            let value = self.eval_expr(expr, locals)?;
                            let rendered = match conversion {
                                Some('r') => value.repr(),
                                _ => match format_spec {
                                    Some(spec) => ops::apply_format_spec(&value, spec),
                                    None => value.str(),
                                },
                            };
                            out.push_str(&rendered);
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::BinOp { left, op, right } => {
                let l = self.eval_expr(left, locals)?;
                let r = self.eval_expr(right, locals)?;
                self.st.tick()?;
                ops::binary(*op, &l, &r).map_err(Signal::Exc)
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.eval_expr(operand, locals)?;
                ops::unary(*op, &v).map_err(Signal::Exc)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for (i, v) in values.iter().enumerate() {
                    last = self.eval_expr(v, locals)?;
                    let is_last = i == values.len() - 1;
                    if !is_last {
                        match op {
                            BoolOpKind::And if !last.truthy() => return Ok(last),
                            BoolOpKind::Or if last.truthy() => return Ok(last),
                            _ => {}
                        }
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut current = self.eval_expr(left, locals)?;
                for (op, comparator) in cmp_ops.iter().zip(comparators.iter()) {
                    let next = self.eval_expr(comparator, locals)?;
                    self.st.tick()?;
                    if !ops::compare(*op, &current, &next).map_err(Signal::Exc)? {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval_expr(func, locals)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval_expr(a, locals)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, v) in kwargs {
                    kwarg_values.push((name.clone(), self.eval_expr(v, locals)?));
                }
                self.call_value(callee, arg_values, kwarg_values)
            }
            Expr::Attribute { value, attr } => {
                let obj = self.eval_expr(value, locals)?;
                self.st.tick()?;
                self.get_attribute(&obj, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval_expr(value, locals)?;
                self.st.tick()?;
                match &**index {
                    Index::Single(i) => {
                        let idx = self.eval_expr(i, locals)?;
                        ops::subscript_get(&container, &idx).map_err(Signal::Exc)
                    }
                    Index::Slice { lower, upper, step } => {
                        let lower = self.eval_slice_bound(lower, locals)?;
                        let upper = self.eval_slice_bound(upper, locals)?;
                        let step = self.eval_slice_bound(step, locals)?;
                        ops::slice_get(&container, lower, upper, step).map_err(Signal::Exc)
                    }
                }
            }
            Expr::IfExp { cond, then, orelse } => {
                if self.eval_expr(cond, locals)?.truthy() {
                    self.eval_expr(then, locals)
                } else {
                    self.eval_expr(orelse, locals)
                }
            }
            Expr::Lambda { params, body } => {
                let defaults = self.eval_defaults(params, locals)?;
                Ok(Value::Function(Arc::new(PyFunction {
                    name: "<lambda>".to_string(),
                    params: params.clone(),
                    body: Arc::new(Vec::new()),
                    lambda_body: Some(Arc::new((**body).clone())),
                    defaults,
                })))
            }
            Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
                let mut out = Vec::new();
                self.run_comprehension(generators, 0, locals, &mut |this, locals| {
                    out.push(this.eval_expr(elt, locals)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::SetComp { elt, generators } => {
                let mut keys: Vec<Key> = Vec::new();
                self.run_comprehension(generators, 0, locals, &mut |this, locals| {
                    let v = this.eval_expr(elt, locals)?;
                    let key = v.as_key().ok_or_else(|| {
                        Signal::Exc(ops::type_error(format!(
                            "unhashable type: '{}'",
                            v.type_name()
                        )))
                    })?;
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                    Ok(())
                })?;
                Ok(Value::set_of(keys))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut entries: Vec<(Key, Value)> = Vec::new();
                self.run_comprehension(generators, 0, locals, &mut |this, locals| {
                    let k = this.eval_expr(key, locals)?;
                    let key = k.as_key().ok_or_else(|| {
                        Signal::Exc(ops::type_error(format!(
                            "unhashable type: '{}'",
                            k.type_name()
                        )))
                    })?;
                    let v = this.eval_expr(value, locals)?;
                    if let Some(slot) = entries.iter_mut().find(|(ek, _)| *ek == key) {
                        slot.1 = v;
                    } else {
                        entries.push((key, v));
                    }
                    Ok(())
                })?;
                Ok(Value::dict(entries))
            }
        }
    }

    fn eval_slice_bound(
        &mut self,
        bound: &Option<Expr>,
        locals: &mut Locals,
    ) -> Result<Option<i64>, Signal> {
        match bound {
            None => Ok(None),
            Some(e) => match self.eval_expr(e, locals)? {
                Value::None => Ok(None),
                Value::Int(i) => Ok(Some(i)),
                Value::Bool(b) => Ok(Some(if b { 1 } else { 0 })),
                other => Err(Signal::Exc(ops::type_error(format!(
                    "slice indices must be integers or None, not '{}'",
                    other.type_name()
                )))),
            },
        }
    }

    fn run_comprehension(
        &mut self,
        generators: &[Comprehension],
        depth: usize,
        locals: &mut Locals,
        emit: &mut dyn FnMut(&mut Self, &mut Locals) -> Result<(), Signal>,
    ) -> Result<(), Signal> {
        if depth == generators.len() {
            return emit(self, locals);
        }
        let generator = &generators[depth];
        let iterable = self.eval_expr(&generator.iter, locals)?;
        let items = ops::iterate(&iterable).map_err(Signal::Exc)?;
        // comprehension variables live in their own frame
        locals.push(HashMap::new());
        let result = (|| {
            'items: for item in items {
                self.st.tick()?;
                self.assign(&generator.target, item, locals)?;
                for cond in &generator.ifs {
                    if !self.eval_expr(cond, locals)?.truthy() {
                        continue 'items;
                    }
                }
                self.run_comprehension(generators, depth + 1, locals, &mut *emit)?;
            }
            Ok(())
        })();
        locals.pop();
        result
    }

    fn get_attribute(&mut self, obj: &Value, attr: &str) -> Result<Value, Signal> {
        match obj {
            Value::Module(m) => m.attrs.get(attr).cloned().ok_or_else(|| {
                Signal::Exc(PyExc::new(
                    "AttributeError",
                    format!("module '{}' has no attribute '{}'", m.name, attr),
                ))
            }),
            Value::Instance(inst) => {
                if let Some(v) = inst.fields.lock().unwrap().get(attr) {
                    return Ok(v.clone());
                }
                match inst.class.find_method(attr) {
                    Some(Value::Function(func)) => Ok(Value::BoundMethod {
                        recv: Arc::clone(inst),
                        func,
                    }),
                    Some(other) => Ok(other),
                    None => Err(Signal::Exc(PyExc::new(
                        "AttributeError",
                        format!(
                            "'{}' object has no attribute '{}'",
                            inst.class.name, attr
                        ),
                    ))),
                }
            }
            Value::Class(c) => c.find_method(attr).ok_or_else(|| {
                Signal::Exc(PyExc::new(
                    "AttributeError",
                    format!("type '{}' has no attribute '{}'", c.name, attr),
                ))
            }),
            // builtin-type method access resolves to a bound builtin; validity
            // is checked at call time
            other => Ok(Value::BoundBuiltin {
                recv: Box::new(other.clone()),
                method: attr.to_string(),
            }),
        }
    }

    // ---- calls ----

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Signal> {
        self.st.tick()?;
        match callee {
            Value::Builtin(b) => match b.f {
                Some(f) => f(args, &kwargs)
                    .map_err(|(kind, message)| Signal::Exc(PyExc { kind, message })),
                None => self.call_special_builtin(b.name, args, kwargs),
            },
            Value::BoundBuiltin { recv, method } => {
                ops::call_builtin_method(&recv, &method, args).map_err(Signal::Exc)
            }
            Value::Function(func) => self.call_function(&func, None, args, kwargs),
            Value::BoundMethod { recv, func } => {
                self.call_function(&func, Some(recv), args, kwargs)
            }
            Value::Class(class) => {
                let instance = Arc::new(PyInstance {
                    class: Arc::clone(&class),
                    fields: std::sync::Mutex::new(HashMap::new()),
                });
                if let Some(Value::Function(init)) = class.find_method("__init__") {
                    self.call_function(&init, Some(Arc::clone(&instance)), args, kwargs)?;
                }
                Ok(Value::Instance(instance))
            }
            Value::Tool(handle) => self.call_tool(&handle, args, kwargs),
            other => Err(Signal::Exc(ops::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            )))),
        }
    }

    fn call_tool(
        &mut self,
        handle: &ToolHandle,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Signal> {
        let json_args = handle.build_args(&args, &kwargs).map_err(Signal::Exc)?;
        match &handle.binding {
            ToolBinding::Sync(f) => match f(json_args) {
                Ok(result) => Ok(Value::from_json(&result)),
                Err(e) => Err(Signal::Exc(PyExc::new("RuntimeError", e.to_string()))),
            },
            ToolBinding::Async(_) => Err(Signal::Hard(InterpreterError::AsyncToolInSync(
                handle.name.clone(),
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &PyFunction,
        recv: Option<Arc<PyInstance>>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Signal> {
        self.depth += 1;
        if self.depth > MAX_CALL_DEPTH {
            self.depth -= 1;
            return Err(Signal::Exc(PyExc::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            )));
        }
        let result = (|| {
            let frame = bind_params(func, recv, args, kwargs).map_err(Signal::Exc)?;
            let mut fn_locals: Locals = vec![frame];
            if let Some(lambda_body) = &func.lambda_body {
                return self.eval_expr(lambda_body, &mut fn_locals);
            }
            match self.exec_block(&func.body, &mut fn_locals)? {
                Flow::Return(v) => Ok(v),
                _ => Ok(Value::None),
            }
        })();
        self.depth -= 1;
        result
    }

    fn call_special_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Signal> {
        match name {
            "print" => {
                let sep = kwargs
                    .iter()
                    .find(|(k, _)| k == "sep")
                    .map(|(_, v)| v.str())
                    .unwrap_or_else(|| " ".to_string());
                let text = args.iter().map(Value::str).collect::<Vec<_>>().join(&sep);
                self.st.print_line(&text);
                Ok(Value::None)
            }
            "final_answer" => Err(Signal::Final(args.into_iter().next().unwrap_or(Value::None))),
            "map" => {
                let f = args.first().cloned().ok_or_else(|| {
                    Signal::Exc(ops::type_error("map() missing function argument"))
                })?;
                let items =
                    ops::iterate(args.get(1).unwrap_or(&Value::None)).map_err(Signal::Exc)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.call_value(f.clone(), vec![item], vec![])?);
                }
                Ok(Value::list(out))
            }
            "filter" => {
                let f = args.first().cloned().ok_or_else(|| {
                    Signal::Exc(ops::type_error("filter() missing function argument"))
                })?;
                let items =
                    ops::iterate(args.get(1).unwrap_or(&Value::None)).map_err(Signal::Exc)?;
                let mut out = Vec::new();
                for item in items {
                    let keep = match &f {
                        Value::None => item.truthy(),
                        _ => self.call_value(f.clone(), vec![item.clone()], vec![])?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            "sorted" => {
                let items =
                    ops::iterate(args.first().unwrap_or(&Value::None)).map_err(Signal::Exc)?;
                let key_fn = kwargs.iter().find(|(k, _)| k == "key").map(|(_, v)| v.clone());
                let reverse = kwargs
                    .iter()
                    .find(|(k, _)| k == "reverse")
                    .map(|(_, v)| v.truthy())
                    .unwrap_or(false);
                let mut decorated: Vec<(Value, Value)> = Vec::with_capacity(items.len());
                for item in items {
                    let key = match &key_fn {
                        Some(f) => self.call_value(f.clone(), vec![item.clone()], vec![])?,
                        None => item.clone(),
                    };
                    decorated.push((key, item));
                }
                let mut err = None;
                decorated.sort_by(|a, b| match ops::py_cmp(&a.0, &b.0) {
                    Ok(ord) => ord,
                    Err(e) => {
                        err.get_or_insert(e);
                        std::cmp::Ordering::Equal
                    }
                });
                if let Some(e) = err {
                    return Err(Signal::Exc(e));
                }
                if reverse {
                    decorated.reverse();
                }
                Ok(Value::list(decorated.into_iter().map(|(_, v)| v).collect()))
            }
            "min" | "max" => {
                let items = if args.len() == 1 {
                    ops::iterate(&args[0]).map_err(Signal::Exc)?
                } else {
                    args
                };
                if items.is_empty() {
                    return Err(Signal::Exc(PyExc::new(
                        "ValueError",
                        format!("{name}() arg is an empty sequence"),
                    )));
                }
                let key_fn = kwargs.iter().find(|(k, _)| k == "key").map(|(_, v)| v.clone());
                let mut best: Option<(Value, Value)> = None;
                for item in items {
                    let key = match &key_fn {
                        Some(f) => self.call_value(f.clone(), vec![item.clone()], vec![])?,
                        None => item.clone(),
                    };
                    let replace = match &best {
                        None => true,
                        Some((best_key, _)) => {
                            let ord = ops::py_cmp(&key, best_key).map_err(Signal::Exc)?;
                            if name == "min" {
                                ord == std::cmp::Ordering::Less
                            } else {
                                ord == std::cmp::Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        best = Some((key, item));
                    }
                }
                Ok(best.map(|(_, v)| v).unwrap_or(Value::None))
            }
            name if builtins::is_exception_name(name) => {
                let message = args.first().map(Value::str).unwrap_or_default();
                Ok(Value::Exc(Arc::new(PyExc::new(name, message))))
            }
            other => Err(Signal::Exc(PyExc::new(
                "NameError",
                format!("builtin '{other}' is not callable here"),
            ))),
        }
    }
}

fn enter_bound(method: Value, inst: &Arc<PyInstance>) -> Value {
    match method {
        Value::Function(func) => Value::BoundMethod {
            recv: Arc::clone(inst),
            func,
        },
        other => other,
    }
}

fn const_value(c: &Const) -> Value {
    match c {
        Const::None => Value::None,
        Const::Bool(b) => Value::Bool(*b),
        Const::Int(i) => Value::Int(*i),
        Const::Float(f) => Value::Float(*f),
        Const::Str(s) => Value::Str(s.clone()),
    }
}

/// Binds call arguments to a function's parameters: receiver, positionals,
/// keywords, then rightmost-aligned defaults.
pub(crate) fn bind_params(
    func: &PyFunction,
    recv: Option<Arc<PyInstance>>,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<HashMap<String, Value>, PyExc> {
    let mut frame = HashMap::new();
    let mut positional = args;
    if let Some(inst) = recv {
        positional.insert(0, Value::Instance(inst));
    }
    if positional.len() > func.params.len() {
        return Err(ops::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            func.name,
            func.params.len(),
            positional.len()
        )));
    }
    for (param, value) in func.params.iter().zip(positional.iter()) {
        frame.insert(param.name.clone(), value.clone());
    }
    for (name, value) in kwargs {
        if !func.params.iter().any(|p| p.name == name) {
            return Err(ops::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func.name, name
            )));
        }
        frame.insert(name, value);
    }
    // defaults align to the last parameters
    let defaults_offset = func.params.len() - func.defaults.len();
    for (i, param) in func.params.iter().enumerate() {
        if !frame.contains_key(&param.name) {
            if i >= defaults_offset {
                frame.insert(param.name.clone(), func.defaults[i - defaults_offset].clone());
            } else {
                return Err(ops::type_error(format!(
                    "{}() missing required argument: '{}'",
                    func.name, param.name
                )));
            }
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> ExecResult {
        Interpreter::new(&InterpreterConfig::default()).run(code)
    }

    #[test]
    fn arithmetic_and_final_answer() {
        let r = run("result = 234 * 568\nfinal_answer(result)\n");
        assert!(r.is_final_answer);
        assert_eq!(r.value_text(), "132912");
        assert!(r.ok());
    }

    #[test]
    fn bare_expression_is_inspected() {
        let r = run("x = 41\nx + 1\n");
        assert!(r.logs.contains("42"));
        assert_eq!(r.value_text(), "42");
        assert!(!r.is_final_answer);
    }

    #[test]
    fn underscore_holds_last_expression() {
        let r = run("1 + 1\n_ * 10\n");
        assert_eq!(r.value_text(), "20");
    }

    #[test]
    fn print_goes_to_logs() {
        let r = run("print('hello', 42)\n");
        assert_eq!(r.logs, "hello 42\n");
    }

    #[test]
    fn disallowed_import_fails_with_exact_message() {
        let r = run("import os\n");
        let err = r.error.unwrap();
        assert!(err.contains("import not allowed: os"), "got: {err}");
    }

    #[test]
    fn allowed_import_works() {
        let r = run("import math\nfinal_answer(math.floor(math.pi))\n");
        assert!(r.is_final_answer);
        assert_eq!(r.value_text(), "3");
    }

    #[test]
    fn operation_cap_is_enforced() {
        let mut interp = Interpreter::new(&InterpreterConfig {
            op_cap: 100,
            ..Default::default()
        });
        let r = interp.run("i = 0\nwhile True:\n    i = i + 1\n");
        assert!(!r.is_final_answer);
        assert!(r.error.unwrap().contains("operation limit exceeded"));
    }

    #[test]
    fn functions_with_defaults_and_recursion() {
        let r = run(
            "def fib(n, a=0, b=1):\n    if n == 0:\n        return a\n    return fib(n - 1, b, a + b)\nfinal_answer(fib(10))\n",
        );
        assert_eq!(r.value_text(), "55");
    }

    #[test]
    fn classes_methods_and_fields() {
        let r = run(
            "class Counter:\n    def __init__(self, start):\n        self.n = start\n    def bump(self):\n        self.n += 1\n        return self.n\nc = Counter(5)\nc.bump()\nfinal_answer(c.bump())\n",
        );
        assert_eq!(r.value_text(), "7");
    }

    #[test]
    fn try_except_catches_matching_kind() {
        let r = run(
            "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    msg = str(e)\nfinal_answer(msg)\n",
        );
        assert_eq!(r.value_text(), "division by zero");
    }

    #[test]
    fn finally_always_runs() {
        let r = run(
            "log = []\ntry:\n    log.append('try')\n    raise ValueError('boom')\nexcept ValueError:\n    log.append('except')\nfinally:\n    log.append('finally')\nfinal_answer(log)\n",
        );
        assert_eq!(r.value_text(), "['try', 'except', 'finally']");
    }

    #[test]
    fn uncaught_exception_formats_compactly() {
        let r = run("raise ValueError('bad input')\n");
        let err = r.error.unwrap();
        assert!(err.starts_with("ValueError: bad input"), "got {err}");
        assert!(err.contains("line 1"));
    }

    #[test]
    fn comprehensions_and_generators() {
        let r = run("final_answer(sum(i * i for i in range(5)))\n");
        assert_eq!(r.value_text(), "30");
        let r = run("final_answer([i for i in range(10) if i % 3 == 0])\n");
        assert_eq!(r.value_text(), "[0, 3, 6, 9]");
        let r = run("final_answer({k: k * 2 for k in ['a', 'b']})\n");
        assert_eq!(r.value_text(), "{'a': 'aa', 'b': 'bb'}");
    }

    #[test]
    fn fstring_formatting() {
        let r = run("x = 3.14159\nfinal_answer(f'pi is {x:.2f}!')\n");
        assert_eq!(r.value_text(), "pi is 3.14!");
    }

    #[test]
    fn tuple_unpacking_and_swap() {
        let r = run("a, b = 1, 2\na, b = b, a\nfinal_answer([a, b])\n");
        assert_eq!(r.value_text(), "[2, 1]");
    }

    #[test]
    fn sorted_with_key_and_lambda() {
        let r = run(
            "words = ['bbb', 'a', 'cc']\nfinal_answer(sorted(words, key=lambda w: len(w)))\n",
        );
        assert_eq!(r.value_text(), "['a', 'cc', 'bbb']");
    }

    #[test]
    fn while_with_break_and_continue() {
        let r = run(
            "total = 0\ni = 0\nwhile True:\n    i += 1\n    if i > 10:\n        break\n    if i % 2 == 0:\n        continue\n    total += i\nfinal_answer(total)\n",
        );
        assert_eq!(r.value_text(), "25");
    }

    #[test]
    fn sync_tool_dispatch_via_name_and_functions_namespace() {
        let mut interp = Interpreter::new(&InterpreterConfig::default());
        let spec = crate::tools::ToolSpec::new("adder", "adds")
            .with_input("a", crate::tools::ParamSpec::required("integer", ""))
            .with_input("b", crate::tools::ParamSpec::required("integer", ""));
        interp.add_sync_tool(
            "adder",
            spec,
            Arc::new(|args: Json| {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(serde_json::json!(a + b))
            }),
        );
        let r = interp.run("final_answer(adder(2, 3))\n");
        assert_eq!(r.value_text(), "5");
        let r = interp.run("final_answer(functions.adder(b=10, a=1))\n");
        assert_eq!(r.value_text(), "11");
    }

    #[test]
    fn state_persists_across_runs() {
        let mut interp = Interpreter::new(&InterpreterConfig::default());
        interp.run("x = 10\n");
        let r = interp.run("final_answer(x * 2)\n");
        assert_eq!(r.value_text(), "20");
    }

    #[test]
    fn with_statement_calls_enter_and_exit() {
        let r = run(
            "events = []\nclass Ctx:\n    def __enter__(self):\n        events.append('enter')\n        return 42\n    def __exit__(self, a, b, c):\n        events.append('exit')\nwith Ctx() as v:\n    events.append(v)\nfinal_answer(events)\n",
        );
        assert_eq!(r.value_text(), "['enter', 42, 'exit']");
    }

    #[test]
    fn slicing_and_methods() {
        let r = run("s = 'hello world'\nfinal_answer(s[::-1].split(' ')[0])\n");
        assert_eq!(r.value_text(), "dlrow");
    }
}
