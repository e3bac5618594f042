//! Asynchronous AST-walking evaluator.
//!
//! Semantics match the sync evaluator; the difference is call handling: a
//! called tool that is async is awaited, sync tools are off-loaded to the
//! blocking pool, and the `multi_tool_use.parallel` helper runs a batch of
//! tool invocations concurrently. Sub-evaluations that cannot suspend
//! (binary ops, comparisons, attribute access) stay synchronous via the
//! shared `ops` module.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value as Json;

use crate::tools::{Tool, ToolError, ToolSpec};

use super::ast::*;
use super::builtins;
use super::eval::bind_params;
use super::ops;
use super::parser;
use super::state::{
    format_error, Flow, InterpState, Locals, PyExc, Signal, ToolBinding, ToolHandle,
};
use super::value::{Key, ModuleObj, PyClass, PyFunction, PyInstance, Value};
use super::{ExecResult, InterpreterConfig, InterpreterError};

/// Nesting cap for user-function calls, matching the sync evaluator.
const MAX_CALL_DEPTH: usize = 200;

/// Asynchronous sandboxed interpreter. Namespace persists across
/// [`run`](AsyncInterpreter::run) calls.
pub struct AsyncInterpreter {
    st: InterpState,
    current_line: u32,
    current_exc: Option<PyExc>,
    depth: usize,
}

impl AsyncInterpreter {
    pub fn new(config: &InterpreterConfig) -> Self {
        let mut st = InterpState::new(config);
        builtins::install(&mut st);
        // multi_tool_use.parallel lives only on the async variant
        let mut attrs = HashMap::new();
        attrs.insert(
            "parallel".to_string(),
            Value::Builtin(Arc::new(super::value::Builtin {
                name: "multi_tool_use.parallel",
                f: None,
            })),
        );
        st.globals.insert(
            "multi_tool_use".to_string(),
            Value::Module(Arc::new(ModuleObj {
                name: "multi_tool_use".to_string(),
                attrs,
            })),
        );
        Self {
            st,
            current_line: 0,
            current_exc: None,
            depth: 0,
        }
    }

    /// Binds an async tool under its sanitized name (and into `functions`).
    pub fn add_async_tool(&mut self, tool: Arc<dyn Tool>) {
        let spec = tool.spec();
        self.st.bind_tool(ToolHandle {
            name: crate::tools::sanitize_tool_name(tool.name()),
            spec,
            binding: ToolBinding::Async(tool),
        });
    }

    /// Binds a sync tool; it runs on the blocking pool when called.
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

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.st.globals.insert(name.to_string(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.st.globals.get(name).cloned()
    }

    /// Shared tool namespace for external injection during a run.
    pub fn tool_sink(&self) -> super::state::ToolSink {
        self.st.tool_sink()
    }

    /// Runs a script for its definitions (skill scripts).
    pub async fn inject_script(&mut self, source: &str) -> Result<(), String> {
        let stmts = parser::parse(source).map_err(|e| e.to_string())?;
        let mut locals: Locals = Vec::new();
        for stmt in &stmts {
            if let Err(signal) = self.exec_stmt(stmt, &mut locals).await {
                return Err(super::state::format_signal(&signal, Some(stmt.line)));
            }
        }
        Ok(())
    }

    /// Evaluates a source string per the return contract.
    pub async fn run(&mut self, source: &str) -> ExecResult {
        let logs_start = self.st.print_log.len();
        let stmts = match parser::parse(source) {
            Ok(stmts) => stmts,
            Err(e) => {
                let error = format_error("InterpreterError", &e.to_string(), None);
                return ExecResult {
                    value: Value::Str(error.clone()),
                    logs: String::new(),
                    is_final_answer: false,
                    error: Some(error),
                };
            }
        };

        let mut locals: Locals = Vec::new();
        let mut outcome: Result<(), Signal> = Ok(());
        for stmt in &stmts {
            self.current_line = stmt.line;
            let result = match &stmt.kind {
                StmtKind::Expr(expr) => match self.eval_expr(expr, &mut locals).await {
                    Ok(value) => {
                        if !matches!(expr, Expr::Call { .. }) && !matches!(value, Value::None) {
                            let text = value.str();
                            self.st.print_line(&text);
                        }
                        self.st.globals.insert("_".to_string(), value);
                        Ok(Flow::Normal)
                    }
                    Err(e) => Err(e),
                },
                _ => self.exec_stmt(stmt, &mut locals).await,
            };
            match result {
                Ok(Flow::Normal) => {}
                Ok(_) => {
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
                value: self.st.globals.get("_").cloned().unwrap_or(Value::None),
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

    fn exec_block<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
        locals: &'a mut Locals,
    ) -> BoxFuture<'a, Result<Flow, Signal>> {
        Box::pin(async move {
            for stmt in stmts {
                self.current_line = stmt.line;
                match self.exec_stmt(stmt, locals).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_stmt<'a>(
        &'a mut self,
        stmt: &'a Stmt,
        locals: &'a mut Locals,
    ) -> BoxFuture<'a, Result<Flow, Signal>> {
        Box::pin(async move {
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    let value = self.eval_expr(expr, locals).await?;
                    if locals.is_empty() {
                        self.st.globals.insert("_".to_string(), value);
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::Assign { targets, value } => {
                    let value = self.eval_expr(value, locals).await?;
                    for target in targets {
                        self.assign(target, value.clone(), locals).await?;
                    }
                    if locals.is_empty() {
                        self.st.globals.insert("_".to_string(), value);
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::AugAssign { target, op, value } => {
                    let current = self.eval_target_value(target, locals).await?;
                    let rhs = self.eval_expr(value, locals).await?;
                    self.st.tick()?;
                    let updated = ops::binary(*op, &current, &rhs).map_err(Signal::Exc)?;
                    self.assign(target, updated, locals).await?;
                    Ok(Flow::Normal)
                }
                StmtKind::If { cond, body, orelse } => {
                    if self.eval_expr(cond, locals).await?.truthy() {
                        self.exec_block(body, locals).await
                    } else {
                        self.exec_block(orelse, locals).await
                    }
                }
                StmtKind::While { cond, body } => {
                    loop {
                        self.st.tick()?;
                        if !self.eval_expr(cond, locals).await?.truthy() {
                            break;
                        }
                        match self.exec_block(body, locals).await? {
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
                    let iterable = self.eval_expr(iter, locals).await?;
                    let items = ops::iterate(&iterable).map_err(Signal::Exc)?;
                    let mut broke = false;
                    for item in items {
                        self.st.tick()?;
                        self.assign(target, item, locals).await?;
                        match self.exec_block(body, locals).await? {
                            Flow::Break => {
                                broke = true;
                                break;
                            }
                            Flow::Continue | Flow::Normal => {}
                            flow @ Flow::Return(_) => return Ok(flow),
                        }
                    }
                    if !broke {
                        match self.exec_block(orelse, locals).await? {
                            Flow::Normal => {}
                            flow => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                }
                StmtKind::FuncDef { name, params, body } => {
                    let defaults = self.eval_defaults(params, locals).await?;
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
                        match self.eval_expr(base, locals).await? {
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
                    self.exec_block(body, &mut class_locals).await?;
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
                        Some(e) => self.eval_expr(e, locals).await?,
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
                } => {
                    let result = match self.exec_block(body, locals).await {
                        Ok(Flow::Normal) => self.exec_block(orelse, locals).await,
                        Ok(flow) => Ok(flow),
                        Err(Signal::Exc(exc)) => {
                            let handler = handlers.iter().find(|h| {
                                h.exc_types.is_empty()
                                    || h.exc_types.iter().any(|t| exc.matches(t))
                            });
                            match handler {
                                Some(h) => {
                                    if let Some(name) = &h.name {
                                        self.st.bind(
                                            locals,
                                            name,
                                            Value::Exc(Arc::new(exc.clone())),
                                        );
                                    }
                                    let saved = self.current_exc.replace(exc);
                                    let handled = self.exec_block(&h.body, locals).await;
                                    self.current_exc = saved;
                                    handled
                                }
                                None => Err(Signal::Exc(exc)),
                            }
                        }
                        Err(other) => Err(other),
                    };
                    if !matches!(result, Err(Signal::Hard(_))) && !finalbody.is_empty() {
                        match self.exec_block(finalbody, locals).await? {
                            Flow::Normal => {}
                            flow => return Ok(flow),
                        }
                    }
                    result
                }
                StmtKind::Raise { exc } => {
                    let exc = match exc {
                        None => self.current_exc.clone().ok_or_else(|| {
                            Signal::Exc(PyExc::new(
                                "RuntimeError",
                                "No active exception to reraise",
                            ))
                        })?,
                        Some(expr) => match self.eval_expr(expr, locals).await? {
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
                        let ctx = self.eval_expr(expr, locals).await?;
                        let value = match &ctx {
                            Value::Instance(inst)
                                if inst.class.find_method("__enter__").is_some() =>
                            {
                                let enter = inst.class.find_method("__enter__").unwrap();
                                self.call_value(bound(enter, inst), vec![], vec![]).await?
                            }
                            other => other.clone(),
                        };
                        entered.push(ctx.clone());
                        if let Some(target) = target {
                            self.assign(target, value, locals).await?;
                        }
                    }
                    let result = self.exec_block(body, locals).await;
                    for ctx in entered.iter().rev() {
                        if let Value::Instance(inst) = ctx {
                            if let Some(exit) = inst.class.find_method("__exit__") {
                                let _ = self
                                    .call_value(
                                        bound(exit, inst),
                                        vec![Value::None, Value::None, Value::None],
                                        vec![],
                                    )
                                    .await;
                            }
                        }
                    }
                    result
                }
                StmtKind::Assert { test, msg } => {
                    if !self.eval_expr(test, locals).await?.truthy() {
                        let message = match msg {
                            Some(m) => self.eval_expr(m, locals).await?.str(),
                            None => String::new(),
                        };
                        return Err(Signal::Exc(PyExc::new("AssertionError", message)));
                    }
                    Ok(Flow::Normal)
                }
            }
        })
    }

    async fn eval_defaults(
        &mut self,
        params: &[ParamSig],
        locals: &mut Locals,
    ) -> Result<Vec<Value>, Signal> {
        let mut defaults = Vec::new();
        for p in params {
            if let Some(d) = &p.default {
                defaults.push(self.eval_expr(d, locals).await?);
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

    fn assign<'a>(
        &'a mut self,
        target: &'a Target,
        value: Value,
        locals: &'a mut Locals,
    ) -> BoxFuture<'a, Result<(), Signal>> {
        Box::pin(async move {
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
                        self.assign(t, v, locals).await?;
                    }
                    Ok(())
                }
                Target::Attribute { value: obj, attr } => {
                    let obj = self.eval_expr(obj, locals).await?;
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
                    let container = self.eval_expr(obj, locals).await?;
                    match index {
                        Index::Single(i) => {
                            let idx = self.eval_expr(i, locals).await?;
                            self.st.tick()?;
                            ops::subscript_set(&container, &idx, value).map_err(Signal::Exc)
                        }
                        Index::Slice { .. } => Err(Signal::Exc(ops::type_error(
                            "slice assignment is not supported",
                        ))),
                    }
                }
            }
        })
    }

    async fn eval_target_value(
        &mut self,
        target: &Target,
        locals: &mut Locals,
    ) -> Result<Value, Signal> {
        match target {
            Target::Name(name) => self.st.lookup(locals, name).ok_or_else(|| {
                Signal::Exc(PyExc::new(
                    "NameError",
                    format!("name '{name}' is not defined"),
                ))
            }),
            Target::Attribute { value, attr } => {
                let obj = self.eval_expr(value, locals).await?;
                self.get_attribute(&obj, attr)
            }
            Target::Subscript { value, index } => {
                let container = self.eval_expr(value, locals).await?;
                match index {
                    Index::Single(i) => {
                        let idx = self.eval_expr(i, locals).await?;
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

    fn eval_expr<'a>(
        &'a mut self,
        expr: &'a Expr,
        locals: &'a mut Locals,
    ) -> BoxFuture<'a, Result<Value, Signal>> {
        Box::pin(async move {
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
                        out.push(self.eval_expr(item, locals).await?);
                    }
                    Ok(Value::list(out))
                }
                Expr::Tuple(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval_expr(item, locals).await?);
                    }
                    Ok(Value::Tuple(Arc::new(out)))
                }
                Expr::Set(items) => {
                    let mut keys = Vec::with_capacity(items.len());
                    for item in items {
                        let v = self.eval_expr(item, locals).await?;
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
                        let key_value = self.eval_expr(k, locals).await?;
                        let key = key_value.as_key().ok_or_else(|| {
                            Signal::Exc(ops::type_error(format!(
                                "unhashable type: '{}'",
                                key_value.type_name()
                            )))
                        })?;
                        entries.push((key, self.eval_expr(v, locals).await?));
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
                                let value = self.eval_expr(expr, locals).await?;
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
                    let l = self.eval_expr(left, locals).await?;
                    let r = self.eval_expr(right, locals).await?;
                    self.st.tick()?;
                    ops::binary(*op, &l, &r).map_err(Signal::Exc)
                }
                Expr::UnaryOp { op, operand } => {
                    let v = self.eval_expr(operand, locals).await?;
                    ops::unary(*op, &v).map_err(Signal::Exc)
                }
                Expr::BoolOp { op, values } => {
                    let mut last = Value::None;
                    for (i, v) in values.iter().enumerate() {
                        last = self.eval_expr(v, locals).await?;
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
                    let mut current = self.eval_expr(left, locals).await?;
                    for (op, comparator) in cmp_ops.iter().zip(comparators.iter()) {
                        let next = self.eval_expr(comparator, locals).await?;
                        self.st.tick()?;
                        if !ops::compare(*op, &current, &next).map_err(Signal::Exc)? {
                            return Ok(Value::Bool(false));
                        }
                        current = next;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::Call { func, args, kwargs } => {
                    let callee = self.eval_expr(func, locals).await?;
                    let mut arg_values = Vec::with_capacity(args.len());
                    for a in args {
                        arg_values.push(self.eval_expr(a, locals).await?);
                    }
                    let mut kwarg_values = Vec::with_capacity(kwargs.len());
                    for (name, v) in kwargs {
                        kwarg_values.push((name.clone(), self.eval_expr(v, locals).await?));
                    }
                    self.call_value(callee, arg_values, kwarg_values).await
                }
                Expr::Attribute { value, attr } => {
                    let obj = self.eval_expr(value, locals).await?;
                    self.st.tick()?;
                    self.get_attribute(&obj, attr)
                }
                Expr::Subscript { value, index } => {
                    let container = self.eval_expr(value, locals).await?;
                    self.st.tick()?;
                    match &**index {
                        Index::Single(i) => {
                            let idx = self.eval_expr(i, locals).await?;
                            ops::subscript_get(&container, &idx).map_err(Signal::Exc)
                        }
                        Index::Slice { lower, upper, step } => {
                            let lower = self.eval_slice_bound(lower, locals).await?;
                            let upper = self.eval_slice_bound(upper, locals).await?;
                            let step = self.eval_slice_bound(step, locals).await?;
                            ops::slice_get(&container, lower, upper, step).map_err(Signal::Exc)
                        }
                    }
                }
                Expr::IfExp { cond, then, orelse } => {
                    if self.eval_expr(cond, locals).await?.truthy() {
                        self.eval_expr(then, locals).await
                    } else {
                        self.eval_expr(orelse, locals).await
                    }
                }
                Expr::Lambda { params, body } => {
                    let defaults = self.eval_defaults(params, locals).await?;
                    Ok(Value::Function(Arc::new(PyFunction {
                        name: "<lambda>".to_string(),
                        params: params.clone(),
                        body: Arc::new(Vec::new()),
                        lambda_body: Some(Arc::new((**body).clone())),
                        defaults,
                    })))
                }
                Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
                    let mut rows = Vec::new();
                    self.eval_comp(generators, 0, locals, elt, None, &mut rows)
                        .await?;
                    Ok(Value::list(rows.into_iter().map(|(v, _)| v).collect()))
                }
                Expr::SetComp { elt, generators } => {
                    let mut rows = Vec::new();
                    self.eval_comp(generators, 0, locals, elt, None, &mut rows)
                        .await?;
                    let mut keys: Vec<Key> = Vec::new();
                    for (v, _) in rows {
                        let key = v.as_key().ok_or_else(|| {
                            Signal::Exc(ops::type_error(format!(
                                "unhashable type: '{}'",
                                v.type_name()
                            )))
                        })?;
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    Ok(Value::set_of(keys))
                }
                Expr::DictComp {
                    key,
                    value,
                    generators,
                } => {
                    let mut rows = Vec::new();
                    self.eval_comp(generators, 0, locals, key, Some(&**value), &mut rows)
                        .await?;
                    let mut entries: Vec<(Key, Value)> = Vec::new();
                    for (k, v) in rows {
                        let key = k.as_key().ok_or_else(|| {
                            Signal::Exc(ops::type_error(format!(
                                "unhashable type: '{}'",
                                k.type_name()
                            )))
                        })?;
                        let v = v.unwrap_or(Value::None);
                        if let Some(slot) = entries.iter_mut().find(|(ek, _)| *ek == key) {
                            slot.1 = v;
                        } else {
                            entries.push((key, v));
                        }
                    }
                    Ok(Value::dict(entries))
                }
            }
        })
    }

    async fn eval_slice_bound(
        &mut self,
        bound: &Option<Expr>,
        locals: &mut Locals,
    ) -> Result<Option<i64>, Signal> {
        match bound {
            None => Ok(None),
            Some(e) => match self.eval_expr(e, locals).await? {
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

    /// Comprehension driver: collects (first, second) evaluations per binding
    /// row; `second` is used by dict comprehensions.
    fn eval_comp<'a>(
        &'a mut self,
        generators: &'a [Comprehension],
        depth: usize,
        locals: &'a mut Locals,
        first: &'a Expr,
        second: Option<&'a Expr>,
        out: &'a mut Vec<(Value, Option<Value>)>,
    ) -> BoxFuture<'a, Result<(), Signal>> {
        Box::pin(async move {
            if depth == generators.len() {
                let a = self.eval_expr(first, locals).await?;
                let b = match second {
                    Some(e) => Some(self.eval_expr(e, locals).await?),
                    None => None,
                };
                out.push((a, b));
                return Ok(());
            }
            let generator = &generators[depth];
            let iterable = self.eval_expr(&generator.iter, locals).await?;
            let items = ops::iterate(&iterable).map_err(Signal::Exc)?;
            locals.push(HashMap::new());
            let result = async {
                'items: for item in items {
                    self.st.tick()?;
                    self.assign(&generator.target, item, locals).await?;
                    for cond in &generator.ifs {
                        if !self.eval_expr(cond, locals).await?.truthy() {
                            continue 'items;
                        }
                    }
                    self.eval_comp(generators, depth + 1, locals, first, second, &mut *out)
                        .await?;
                }
                Ok(())
            }
            .await;
            locals.pop();
            result
        })
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
                        format!("'{}' object has no attribute '{}'", inst.class.name, attr),
                    ))),
                }
            }
            Value::Class(c) => c.find_method(attr).ok_or_else(|| {
                Signal::Exc(PyExc::new(
                    "AttributeError",
                    format!("type '{}' has no attribute '{}'", c.name, attr),
                ))
            }),
            other => Ok(Value::BoundBuiltin {
                recv: Box::new(other.clone()),
                method: attr.to_string(),
            }),
        }
    }

    fn call_value<'a>(
        &'a mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<Value, Signal>> {
        Box::pin(async move {
            self.st.tick()?;
            match callee {
                Value::Builtin(b) => match b.f {
                    Some(f) => f(args, &kwargs)
                        .map_err(|(kind, message)| Signal::Exc(PyExc { kind, message })),
                    None => self.call_special_builtin(b.name, args, kwargs).await,
                },
                Value::BoundBuiltin { recv, method } => {
                    ops::call_builtin_method(&recv, &method, args).map_err(Signal::Exc)
                }
                Value::Function(func) => self.call_function(&func, None, args, kwargs).await,
                Value::BoundMethod { recv, func } => {
                    self.call_function(&func, Some(recv), args, kwargs).await
                }
                Value::Class(class) => {
                    let instance = Arc::new(PyInstance {
                        class: Arc::clone(&class),
                        fields: std::sync::Mutex::new(HashMap::new()),
                    });
                    if let Some(Value::Function(init)) = class.find_method("__init__") {
                        self.call_function(&init, Some(Arc::clone(&instance)), args, kwargs)
                            .await?;
                    }
                    Ok(Value::Instance(instance))
                }
                // any called tool that is (or returns) an awaitable is awaited
                Value::Tool(handle) => {
                    let json_args = handle.build_args(&args, &kwargs).map_err(Signal::Exc)?;
                    call_tool_async(&handle, json_args).await
                }
                other => Err(Signal::Exc(ops::type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                )))),
            }
        })
    }

    async fn call_function(
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
        let result = async {
            let frame = bind_params(func, recv, args, kwargs).map_err(Signal::Exc)?;
            let mut fn_locals: Locals = vec![frame];
            if let Some(lambda_body) = &func.lambda_body {
                let lambda_body = Arc::clone(lambda_body);
                return self.eval_expr(&lambda_body, &mut fn_locals).await;
            }
            let body = Arc::clone(&func.body);
            match self.exec_block(&body, &mut fn_locals).await? {
                Flow::Return(v) => Ok(v),
                _ => Ok(Value::None),
            }
        }
        .await;
        self.depth -= 1;
        result
    }

    async fn call_special_builtin(
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
            "multi_tool_use.parallel" => self.parallel_tool_use(args).await,
            "map" => {
                let f = args.first().cloned().ok_or_else(|| {
                    Signal::Exc(ops::type_error("map() missing function argument"))
                })?;
                let items =
                    ops::iterate(args.get(1).unwrap_or(&Value::None)).map_err(Signal::Exc)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.call_value(f.clone(), vec![item], vec![]).await?);
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
                        _ => self
                            .call_value(f.clone(), vec![item.clone()], vec![])
                            .await?
                            .truthy(),
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
                        Some(f) => self.call_value(f.clone(), vec![item.clone()], vec![]).await?,
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
                        Some(f) => self.call_value(f.clone(), vec![item.clone()], vec![]).await?,
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

    /// `multi_tool_use.parallel({tool_uses: [{recipient_name, parameters}…]})`:
    /// runs the batch concurrently. Unknown tools become per-entry failures,
    /// not failures of the whole batch.
    async fn parallel_tool_use(&mut self, args: Vec<Value>) -> Result<Value, Signal> {
        let config = args.into_iter().next().unwrap_or(Value::None).to_json();
        let uses = config
            .get("tool_uses")
            .and_then(Json::as_array)
            .cloned()
            .ok_or_else(|| {
                Signal::Exc(ops::type_error(
                    "parallel() requires a config with a tool_uses list",
                ))
            })?;

        let mut futures = Vec::with_capacity(uses.len());
        for use_spec in &uses {
            let recipient = use_spec
                .get("recipient_name")
                .and_then(Json::as_str)
                .unwrap_or("")
                .to_string();
            let parameters = use_spec
                .get("parameters")
                .cloned()
                .unwrap_or(Json::Object(Default::default()));
            let sanitized = crate::tools::sanitize_tool_name(
                recipient.strip_prefix("functions.").unwrap_or(&recipient),
            );
            let handle = self.st.tools.get(&sanitized).map(|e| Arc::clone(e.value()));
            futures.push(async move {
                match handle {
                    None => serde_json::json!({"success": false, "error": "tool not found"}),
                    Some(handle) => match call_tool_async(&handle, parameters).await {
                        Ok(value) => {
                            serde_json::json!({"success": true, "result": value.to_json()})
                        }
                        Err(signal) => {
                            let message = super::state::format_signal(&signal, None);
                            serde_json::json!({"success": false, "error": message})
                        }
                    },
                }
            });
        }
        let results: Vec<Json> = futures::future::join_all(futures).await;
        let successful = results
            .iter()
            .filter(|r| r.get("success").and_then(Json::as_bool).unwrap_or(false))
            .count();
        let total = results.len();
        Ok(Value::from_json(&serde_json::json!({
            "results": results,
            "total_calls": total,
            "successful_calls": successful,
            "failed_calls": total - successful,
        })))
    }
}

/// Dispatches one tool call, awaiting async tools and off-loading sync tools
/// to the blocking pool.
async fn call_tool_async(handle: &ToolHandle, json_args: Json) -> Result<Value, Signal> {
    match &handle.binding {
        ToolBinding::Async(tool) => match tool.call(json_args).await {
            Ok(result) => Ok(Value::from_json(&result)),
            Err(e) => Err(Signal::Exc(PyExc::new("RuntimeError", e.to_string()))),
        },
        ToolBinding::Sync(f) => {
            let f = Arc::clone(f);
            match tokio::task::spawn_blocking(move || f(json_args)).await {
                Ok(Ok(result)) => Ok(Value::from_json(&result)),
                Ok(Err(e)) => Err(Signal::Exc(PyExc::new("RuntimeError", e.to_string()))),
                Err(e) => Err(Signal::Exc(PyExc::new(
                    "RuntimeError",
                    format!("blocking task failed: {e}"),
                ))),
            }
        }
    }
}

fn bound(method: Value, inst: &Arc<PyInstance>) -> Value {
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
