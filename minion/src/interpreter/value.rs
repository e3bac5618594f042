//! Runtime value model for the sandboxed interpreter.
//!
//! Values are `Send + Sync` (mutable containers behind `std::sync::Mutex`) so
//! the async evaluator may hold them across await points. Dicts and sets keep
//! insertion order; keys are restricted to hashable [`Key`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ast::{Expr, ParamSig, Stmt};
use super::state::{PyExc, ToolHandle};

/// Hashable dict/set key.
#[derive(Clone, Debug, PartialEq)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Tuple(Vec<Key>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Tuple(items) => Value::Tuple(Arc::new(items.iter().map(Key::to_value).collect())),
        }
    }
}

/// Ordered dict storage; lookup is linear, which the operation cap bounds.
#[derive(Default, Debug)]
pub struct DictInner {
    pub entries: Vec<(Key, Value)>,
}

impl DictInner {
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Key, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }
}

/// Ordered set storage.
#[derive(Default, Debug)]
pub struct SetInner {
    pub entries: Vec<Key>,
}

impl SetInner {
    pub fn insert(&mut self, key: Key) {
        if !self.entries.contains(&key) {
            self.entries.push(key);
        }
    }
}

/// A user-defined function (or lambda).
pub struct PyFunction {
    pub name: String,
    pub params: Vec<ParamSig>,
    /// Statement body for `def`; empty for lambdas.
    pub body: Arc<Vec<Stmt>>,
    /// Expression body for lambdas.
    pub lambda_body: Option<Arc<Expr>>,
    /// Defaults evaluated at definition time, rightmost-aligned.
    pub defaults: Vec<Value>,
}

/// A user-defined class: methods plus base classes.
pub struct PyClass {
    pub name: String,
    pub methods: HashMap<String, Value>,
    pub bases: Vec<Arc<PyClass>>,
}

impl PyClass {
    /// Method lookup through the class then its bases, depth-first.
    pub fn find_method(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.methods.get(name) {
            return Some(m.clone());
        }
        self.bases.iter().find_map(|b| b.find_method(name))
    }
}

/// An instance: class reference plus mutable fields.
pub struct PyInstance {
    pub class: Arc<PyClass>,
    pub fields: Mutex<HashMap<String, Value>>,
}

/// A module-like object: name plus attributes. Used for imported modules and
/// for the `functions` / `multi_tool_use` namespaces.
pub struct ModuleObj {
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

/// Signature of a pure builtin function.
pub type BuiltinImpl = fn(Vec<Value>, &[(String, Value)]) -> Result<Value, (String, String)>;

/// A named builtin. `print`, `final_answer`, and `multi_tool_use.parallel`
/// carry no `f` and are intercepted by the evaluators.
pub struct Builtin {
    pub name: &'static str,
    pub f: Option<BuiltinImpl>,
}

/// One runtime value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<Mutex<DictInner>>),
    Set(Arc<Mutex<SetInner>>),
    Range(i64, i64, i64),
    Function(Arc<PyFunction>),
    BoundMethod { recv: Arc<PyInstance>, func: Arc<PyFunction> },
    /// Builtin-type method bound to a receiver (`"x".upper`, `lst.append`).
    BoundBuiltin { recv: Box<Value>, method: String },
    Builtin(Arc<Builtin>),
    Class(Arc<PyClass>),
    Instance(Arc<PyInstance>),
    Module(Arc<ModuleObj>),
    Tool(Arc<ToolHandle>),
    /// An exception instance (`ValueError("bad")`); raised via `raise`,
    /// bound by `except ... as e`.
    Exc(Arc<PyExc>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn dict(entries: Vec<(Key, Value)>) -> Value {
        Value::Dict(Arc::new(Mutex::new(DictInner { entries })))
    }

    pub fn set_of(entries: Vec<Key>) -> Value {
        let mut inner = SetInner::default();
        for k in entries {
            inner.insert(k);
        }
        Value::Set(Arc::new(Mutex::new(inner)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(..) => "range",
            Value::Function(_) | Value::BoundMethod { .. } => "function",
            Value::BoundBuiltin { .. } => "builtin_function_or_method",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Class(_) => "type",
            Value::Instance(_) => "object",
            Value::Module(_) => "module",
            Value::Tool(_) => "tool",
            Value::Exc(_) => "exception",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.lock().unwrap().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.lock().unwrap().entries.is_empty(),
            Value::Set(s) => !s.lock().unwrap().entries.is_empty(),
            Value::Range(start, stop, step) => {
                (*step > 0 && start < stop) || (*step < 0 && start > stop)
            }
            _ => true,
        }
    }

    /// Hashable key view; `None` for unhashable values.
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Value::None => Some(Key::None),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 => Some(Key::Int(*f as i64)),
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Tuple(items) => items
                .iter()
                .map(Value::as_key)
                .collect::<Option<Vec<Key>>>()
                .map(Key::Tuple),
            _ => None,
        }
    }

    /// `str()` view: strings bare, exceptions show their message, everything
    /// else as `repr`.
    pub fn str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Exc(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr()` view, Python-style.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(l) => {
                let items = l.lock().unwrap();
                format!(
                    "[{}]",
                    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
                )
            }
            Value::Tuple(t) => {
                if t.len() == 1 {
                    format!("({},)", t[0].repr())
                } else {
                    format!(
                        "({})",
                        t.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
                    )
                }
            }
            Value::Dict(d) => {
                let inner = d.lock().unwrap();
                format!(
                    "{{{}}}",
                    inner
                        .entries
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            Value::Set(s) => {
                let inner = s.lock().unwrap();
                if inner.entries.is_empty() {
                    "set()".to_string()
                } else {
                    format!(
                        "{{{}}}",
                        inner
                            .entries
                            .iter()
                            .map(|k| k.to_value().repr())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                }
            }
            Value::Range(start, stop, step) => {
                if *step == 1 {
                    format!("range({start}, {stop})")
                } else {
                    format!("range({start}, {stop}, {step})")
                }
            }
            Value::Function(f) => format!("<function {}>", f.name),
            Value::BoundMethod { func, .. } => format!("<bound method {}>", func.name),
            Value::BoundBuiltin { method, .. } => format!("<built-in method {method}>"),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
            Value::Class(c) => format!("<class '{}'>", c.name),
            Value::Instance(i) => format!("<{} object>", i.class.name),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Tool(t) => format!("<tool {}>", t.name),
            Value::Exc(e) => format!("{}('{}')", e.kind, e.message),
        }
    }

    /// JSON view for tool arguments and results. Unrepresentable values
    /// (functions, modules) serialize as their repr string.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Str(s) => J::String(s.clone()),
            Value::List(l) => J::Array(l.lock().unwrap().iter().map(Value::to_json).collect()),
            Value::Tuple(t) => J::Array(t.iter().map(Value::to_json).collect()),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in &d.lock().unwrap().entries {
                    map.insert(k.to_value().str(), v.to_json());
                }
                J::Object(map)
            }
            Value::Set(s) => J::Array(
                s.lock()
                    .unwrap()
                    .entries
                    .iter()
                    .map(|k| k.to_value().to_json())
                    .collect(),
            ),
            Value::Range(start, stop, step) => {
                let mut out = Vec::new();
                let mut i = *start;
                while (*step > 0 && i < *stop) || (*step < 0 && i > *stop) {
                    out.push(J::Number(i.into()));
                    i += step;
                }
                J::Array(out)
            }
            other => J::String(other.repr()),
        }
    }

    /// Converts a JSON value (tool result) into an interpreter value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::Str(s.clone()),
            J::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            J::Object(map) => Value::dict(
                map.iter()
                    .map(|(k, v)| (Key::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repr())
    }
}

/// Python-style float formatting: whole floats keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python_conventions() {
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Str("a'b".into()).repr(), "'a\\'b'");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Str("x".into())]).repr(),
            "[1, 'x']"
        );
        assert_eq!(
            Value::Tuple(Arc::new(vec![Value::Int(1)])).repr(),
            "(1,)"
        );
    }

    #[test]
    fn truthiness_follows_python() {
        assert!(!Value::None.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::list(vec![Value::None]).truthy());
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let d = Value::dict(vec![
            (Key::Str("b".into()), Value::Int(1)),
            (Key::Str("a".into()), Value::Int(2)),
        ]);
        assert_eq!(d.repr(), "{'b': 1, 'a': 2}");
    }

    #[test]
    fn json_roundtrip_for_plain_data() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null, true]});
        let v = Value::from_json(&json);
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn unhashable_values_have_no_key() {
        assert!(Value::list(vec![]).as_key().is_none());
        assert!(Value::Str("k".into()).as_key().is_some());
        assert!(Value::Tuple(Arc::new(vec![Value::Int(1)])).as_key().is_some());
    }
}
