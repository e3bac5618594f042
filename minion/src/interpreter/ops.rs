//! Operator semantics shared by both evaluators: binary/unary/comparison
//! operators, subscripting, slicing, iteration, and builtin-type methods.

use std::cmp::Ordering;
use std::sync::Arc;

use super::ast::{BinOpKind, CmpOpKind, UnaryOpKind};
use super::state::PyExc;
use super::value::{DictInner, Key, SetInner, Value};

pub fn type_error(msg: impl Into<String>) -> PyExc {
    PyExc::new("TypeError", msg)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

/// Structural equality with numeric cross-type comparison.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let xv = x.lock().unwrap().clone();
            let yv = y.lock().unwrap().clone();
            xv.len() == yv.len() && xv.iter().zip(yv.iter()).all(|(a, b)| py_eq(a, b))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| py_eq(a, b))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let xv = x.lock().unwrap();
            let yv = y.lock().unwrap();
            xv.entries.len() == yv.entries.len()
                && xv
                    .entries
                    .iter()
                    .all(|(k, v)| yv.get(k).map(|w| py_eq(v, w)).unwrap_or(false))
        }
        (Value::Set(x), Value::Set(y)) => {
            let xv = x.lock().unwrap();
            let yv = y.lock().unwrap();
            xv.entries.len() == yv.entries.len()
                && xv.entries.iter().all(|k| yv.entries.contains(k))
        }
        _ => {
            if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
                x == y
            } else {
                false
            }
        }
    }
}

/// Ordering for numbers, strings, lists, and tuples.
pub fn py_cmp(a: &Value, b: &Value) -> Result<Ordering, PyExc> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).ok_or_else(|| {
            type_error("comparison of NaN is undefined")
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let xv = x.lock().unwrap().clone();
            let yv = y.lock().unwrap().clone();
            seq_cmp(&xv, &yv)
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => Err(type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Result<Ordering, PyExc> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !py_eq(x, y) {
            return py_cmp(x, y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn binary(op: BinOpKind, left: &Value, right: &Value) -> Result<Value, PyExc> {
    use BinOpKind::*;
    match op {
        Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.lock().unwrap().clone();
                out.extend(b.lock().unwrap().iter().cloned());
                Ok(Value::list(out))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                let mut out = (**a).clone();
                out.extend(b.iter().cloned());
                Ok(Value::Tuple(Arc::new(out)))
            }
            _ => numeric_binop(op, left, right),
        },
        Mul => match (left, right) {
            (Value::Str(s), n) | (n, Value::Str(s)) if as_int(n).is_some() => {
                let count = as_int(n).unwrap().max(0) as usize;
                Ok(Value::Str(s.repeat(count)))
            }
            (Value::List(l), n) | (n, Value::List(l)) if as_int(n).is_some() => {
                let count = as_int(n).unwrap().max(0) as usize;
                let items = l.lock().unwrap().clone();
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            _ => numeric_binop(op, left, right),
        },
        Mod => match (left, right) {
            // printf-style formatting for the common "%s" % x case
            (Value::Str(fmt), v) => Ok(Value::Str(percent_format(fmt, v))),
            _ => numeric_binop(op, left, right),
        },
        BitAnd | BitOr | BitXor | Shl | Shr => {
            let (Some(a), Some(b)) = (as_int(left), as_int(right)) else {
                if let (Value::Set(a), Value::Set(b)) = (left, right) {
                    return set_op(op, a, b);
                }
                return Err(type_error(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                )));
            };
            Ok(Value::Int(match op {
                BitAnd => a & b,
                BitOr => a | b,
                BitXor => a ^ b,
                Shl => a.checked_shl(b.max(0) as u32).unwrap_or(0),
                Shr => a.checked_shr(b.max(0) as u32).unwrap_or(0),
                _ => unreachable!(),
            }))
        }
        _ => numeric_binop(op, left, right),
    }
}

fn set_op(
    op: BinOpKind,
    a: &Arc<std::sync::Mutex<SetInner>>,
    b: &Arc<std::sync::Mutex<SetInner>>,
) -> Result<Value, PyExc> {
    let av = a.lock().unwrap().entries.clone();
    let bv = b.lock().unwrap().entries.clone();
    let entries: Vec<Key> = match op {
        BinOpKind::BitAnd => av.into_iter().filter(|k| bv.contains(k)).collect(),
        BinOpKind::BitOr => {
            let mut out = av;
            for k in bv {
                if !out.contains(&k) {
                    out.push(k);
                }
            }
            out
        }
        BinOpKind::BitXor => {
            let mut out: Vec<Key> = Vec::new();
            for k in av.iter() {
                if !bv.contains(k) {
                    out.push(k.clone());
                }
            }
            for k in bv.iter() {
                if !av.contains(k) {
                    out.push(k.clone());
                }
            }
            out
        }
        _ => return Err(type_error("unsupported set operation")),
    };
    Ok(Value::set_of(entries))
}

fn numeric_binop(op: BinOpKind, left: &Value, right: &Value) -> Result<Value, PyExc> {
    use BinOpKind::*;
    let both_int = matches!(left, Value::Int(_) | Value::Bool(_))
        && matches!(right, Value::Int(_) | Value::Bool(_));
    let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
        return Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    if both_int {
        let (ia, ib) = (as_int(left).unwrap(), as_int(right).unwrap());
        return match op {
            Add => Ok(Value::Int(ia.wrapping_add(ib))),
            Sub => Ok(Value::Int(ia.wrapping_sub(ib))),
            Mul => Ok(Value::Int(ia.wrapping_mul(ib))),
            Div => {
                if ib == 0 {
                    Err(PyExc::new("ZeroDivisionError", "division by zero"))
                } else {
                    Ok(Value::Float(ia as f64 / ib as f64))
                }
            }
            FloorDiv => {
                if ib == 0 {
                    Err(PyExc::new("ZeroDivisionError", "integer division or modulo by zero"))
                } else {
                    Ok(Value::Int(ia.div_euclid(ib)))
                }
            }
            Mod => {
                if ib == 0 {
                    Err(PyExc::new("ZeroDivisionError", "integer division or modulo by zero"))
                } else {
                    Ok(Value::Int(ia.rem_euclid(ib)))
                }
            }
            Pow => {
                if ib >= 0 {
                    Ok(Value::Int(ia.pow(ib.min(u32::MAX as i64) as u32)))
                } else {
                    Ok(Value::Float((ia as f64).powf(ib as f64)))
                }
            }
            _ => unreachable!(),
        };
    }
    match op {
        Add => Ok(Value::Float(a + b)),
        Sub => Ok(Value::Float(a - b)),
        Mul => Ok(Value::Float(a * b)),
        Div => {
            if b == 0.0 {
                Err(PyExc::new("ZeroDivisionError", "float division by zero"))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        FloorDiv => {
            if b == 0.0 {
                Err(PyExc::new("ZeroDivisionError", "float floor division by zero"))
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        Mod => {
            if b == 0.0 {
                Err(PyExc::new("ZeroDivisionError", "float modulo"))
            } else {
                Ok(Value::Float(a.rem_euclid(b)))
            }
        }
        Pow => Ok(Value::Float(a.powf(b))),
        _ => Err(type_error("unsupported float operation")),
    }
}

fn percent_format(fmt: &str, value: &Value) -> String {
    let args: Vec<Value> = match value {
        Value::Tuple(items) => (**items).clone(),
        other => vec![other.clone()],
    };
    let mut out = String::new();
    let mut arg_iter = args.into_iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => out.push_str(&arg_iter.next().map(|v| v.str()).unwrap_or_default()),
            Some('d') => out.push_str(
                &arg_iter
                    .next()
                    .and_then(|v| as_number(&v).map(|n| (n as i64).to_string()))
                    .unwrap_or_default(),
            ),
            Some('r') => out.push_str(&arg_iter.next().map(|v| v.repr()).unwrap_or_default()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

pub fn unary(op: UnaryOpKind, operand: &Value) -> Result<Value, PyExc> {
    match op {
        UnaryOpKind::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOpKind::Neg => match operand {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(if *b { -1 } else { 0 })),
            _ => Err(type_error(format!(
                "bad operand type for unary -: '{}'",
                operand.type_name()
            ))),
        },
        UnaryOpKind::Pos => match operand {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(operand.clone()),
            _ => Err(type_error(format!(
                "bad operand type for unary +: '{}'",
                operand.type_name()
            ))),
        },
        UnaryOpKind::Invert => match as_int(operand) {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(type_error(format!(
                "bad operand type for unary ~: '{}'",
                operand.type_name()
            ))),
        },
    }
}

pub fn compare(op: CmpOpKind, left: &Value, right: &Value) -> Result<bool, PyExc> {
    use CmpOpKind::*;
    match op {
        Eq => Ok(py_eq(left, right)),
        NotEq => Ok(!py_eq(left, right)),
        Lt => Ok(py_cmp(left, right)? == Ordering::Less),
        LtE => Ok(py_cmp(left, right)? != Ordering::Greater),
        Gt => Ok(py_cmp(left, right)? == Ordering::Greater),
        GtE => Ok(py_cmp(left, right)? != Ordering::Less),
        In => contains(right, left),
        NotIn => contains(right, left).map(|b| !b),
        // identity approximated by equality for immutable values, pointer
        // equality for containers
        Is => Ok(match (left, right) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            (Value::None, _) | (_, Value::None) => false,
            _ => py_eq(left, right),
        }),
        IsNot => compare(Is, left, right).map(|b| !b),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, PyExc> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(type_error("'in <string>' requires string as left operand")),
        },
        Value::List(l) => Ok(l.lock().unwrap().iter().any(|v| py_eq(v, item))),
        Value::Tuple(t) => Ok(t.iter().any(|v| py_eq(v, item))),
        Value::Set(s) => {
            let key = item
                .as_key()
                .ok_or_else(|| type_error(format!("unhashable type: '{}'", item.type_name())))?;
            Ok(s.lock().unwrap().entries.contains(&key))
        }
        Value::Dict(d) => {
            let key = item
                .as_key()
                .ok_or_else(|| type_error(format!("unhashable type: '{}'", item.type_name())))?;
            Ok(d.lock().unwrap().get(&key).is_some())
        }
        Value::Range(start, stop, step) => {
            let Some(i) = as_int(item) else {
                return Ok(false);
            };
            if *step > 0 {
                Ok(i >= *start && i < *stop && (i - start) % step == 0)
            } else if *step < 0 {
                Ok(i <= *start && i > *stop && (start - i) % (-step) == 0)
            } else {
                Ok(false)
            }
        }
        _ => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

/// Materializes the items of an iterable. Containers are snapshotted so the
/// body may mutate them during iteration.
pub fn iterate(value: &Value) -> Result<Vec<Value>, PyExc> {
    match value {
        Value::List(l) => Ok(l.lock().unwrap().clone()),
        Value::Tuple(t) => Ok((**t).clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(d) => Ok(d
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(k, _)| k.to_value())
            .collect()),
        Value::Set(s) => Ok(s
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(Key::to_value)
            .collect()),
        Value::Range(start, stop, step) => {
            if *step == 0 {
                return Err(PyExc::new("ValueError", "range() arg 3 must not be zero"));
            }
            let mut out = Vec::new();
            let mut i = *start;
            while (*step > 0 && i < *stop) || (*step < 0 && i > *stop) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(out)
        }
        _ => Err(type_error(format!(
            "'{}' object is not iterable",
            value.type_name()
        ))),
    }
}

pub fn py_len(value: &Value) -> Result<i64, PyExc> {
    match value {
        Value::Str(s) => Ok(s.chars().count() as i64),
        Value::List(l) => Ok(l.lock().unwrap().len() as i64),
        Value::Tuple(t) => Ok(t.len() as i64),
        Value::Dict(d) => Ok(d.lock().unwrap().entries.len() as i64),
        Value::Set(s) => Ok(s.lock().unwrap().entries.len() as i64),
        Value::Range(start, stop, step) => {
            if *step == 0 {
                return Ok(0);
            }
            let len = if *step > 0 {
                (stop - start + step - 1).div_euclid(*step)
            } else {
                (start - stop + (-step) - 1).div_euclid(-step)
            };
            Ok(len.max(0))
        }
        _ => Err(type_error(format!(
            "object of type '{}' has no len()",
            value.type_name()
        ))),
    }
}

fn normalize_index(idx: i64, len: usize) -> Result<usize, PyExc> {
    let len = len as i64;
    let adjusted = if idx < 0 { idx + len } else { idx };
    if adjusted < 0 || adjusted >= len {
        Err(PyExc::new("IndexError", "index out of range"))
    } else {
        Ok(adjusted as usize)
    }
}

pub fn subscript_get(value: &Value, index: &Value) -> Result<Value, PyExc> {
    match value {
        Value::List(l) => {
            let items = l.lock().unwrap();
            let i = as_int(index)
                .ok_or_else(|| type_error("list indices must be integers or slices"))?;
            Ok(items[normalize_index(i, items.len())?].clone())
        }
        Value::Tuple(t) => {
            let i = as_int(index)
                .ok_or_else(|| type_error("tuple indices must be integers or slices"))?;
            Ok(t[normalize_index(i, t.len())?].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = as_int(index).ok_or_else(|| type_error("string indices must be integers"))?;
            Ok(Value::Str(
                chars[normalize_index(i, chars.len())?].to_string(),
            ))
        }
        Value::Dict(d) => {
            let key = index
                .as_key()
                .ok_or_else(|| type_error(format!("unhashable type: '{}'", index.type_name())))?;
            d.lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| PyExc::new("KeyError", index.repr()))
        }
        Value::Range(..) => {
            let items = iterate(value)?;
            let i = as_int(index).ok_or_else(|| type_error("range indices must be integers"))?;
            Ok(items[normalize_index(i, items.len())?].clone())
        }
        _ => Err(type_error(format!(
            "'{}' object is not subscriptable",
            value.type_name()
        ))),
    }
}

pub fn subscript_set(value: &Value, index: &Value, new_value: Value) -> Result<(), PyExc> {
    match value {
        Value::List(l) => {
            let mut items = l.lock().unwrap();
            let i = as_int(index).ok_or_else(|| type_error("list indices must be integers"))?;
            let idx = normalize_index(i, items.len())?;
            items[idx] = new_value;
            Ok(())
        }
        Value::Dict(d) => {
            let key = index
                .as_key()
                .ok_or_else(|| type_error(format!("unhashable type: '{}'", index.type_name())))?;
            d.lock().unwrap().insert(key, new_value);
            Ok(())
        }
        _ => Err(type_error(format!(
            "'{}' object does not support item assignment",
            value.type_name()
        ))),
    }
}

/// Slice with Python clamping semantics.
pub fn slice_get(
    value: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value, PyExc> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(PyExc::new("ValueError", "slice step cannot be zero"));
    }
    match value {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lower, upper, step);
            Ok(Value::Str(picked.into_iter().map(|i| chars[i]).collect()))
        }
        Value::List(l) => {
            let items = l.lock().unwrap().clone();
            let picked = slice_indices(items.len(), lower, upper, step);
            Ok(Value::list(
                picked.into_iter().map(|i| items[i].clone()).collect(),
            ))
        }
        Value::Tuple(t) => {
            let picked = slice_indices(t.len(), lower, upper, step);
            Ok(Value::Tuple(Arc::new(
                picked.into_iter().map(|i| t[i].clone()).collect(),
            )))
        }
        _ => Err(type_error(format!(
            "'{}' object is not sliceable",
            value.type_name()
        ))),
    }
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        v.clamp(if step > 0 { 0 } else { -1 }, len)
    };
    let (start, stop) = if step > 0 {
        (clamp(lower.unwrap_or(0)), clamp(upper.unwrap_or(len)))
    } else {
        (
            lower.map(clamp).unwrap_or(len - 1).min(len - 1),
            upper.map(clamp).unwrap_or(-1),
        )
    };
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            if i >= 0 && i < len {
                out.push(i as usize);
            }
            i += step;
        }
    } else {
        while i > stop {
            if i >= 0 && i < len {
                out.push(i as usize);
            }
            i += step;
        }
    }
    out
}

/// Calls a builtin-type method (`"x".upper()`, `lst.append(1)`, `d.get(k)`).
pub fn call_builtin_method(recv: &Value, method: &str, args: Vec<Value>) -> Result<Value, PyExc> {
    match recv {
        Value::Str(s) => str_method(s, method, args),
        Value::List(l) => list_method(l, method, args),
        Value::Dict(d) => dict_method(d, method, args),
        Value::Set(set) => set_method(set, method, args),
        Value::Tuple(t) => match method {
            "count" => {
                let target = args.first().cloned().unwrap_or(Value::None);
                Ok(Value::Int(t.iter().filter(|v| py_eq(v, &target)).count() as i64))
            }
            "index" => {
                let target = args.first().cloned().unwrap_or(Value::None);
                t.iter()
                    .position(|v| py_eq(v, &target))
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| PyExc::new("ValueError", "tuple.index(x): x not in tuple"))
            }
            _ => Err(no_attr(recv, method)),
        },
        _ => Err(no_attr(recv, method)),
    }
}

fn no_attr(recv: &Value, method: &str) -> PyExc {
    PyExc::new(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", recv.type_name(), method),
    )
}

fn str_arg(args: &[Value], i: usize, method: &str) -> Result<String, PyExc> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(type_error(format!(
            "{method}() argument must be str, not '{}'",
            other.type_name()
        ))),
        None => Err(type_error(format!("{method}() missing argument"))),
    }
}

fn str_method(s: &str, method: &str, args: Vec<Value>) -> Result<Value, PyExc> {
    match method {
        "upper" => Ok(Value::Str(s.to_uppercase())),
        "lower" => Ok(Value::Str(s.to_lowercase())),
        "strip" => Ok(Value::Str(match args.first() {
            Some(Value::Str(chars)) => s
                .trim_matches(|c: char| chars.contains(c))
                .to_string(),
            _ => s.trim().to_string(),
        })),
        "lstrip" => Ok(Value::Str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::Str(s.trim_end().to_string())),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                Some(Value::Str(sep)) => s
                    .split(sep.as_str())
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                _ => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::list(parts))
        }
        "splitlines" => Ok(Value::list(
            s.lines().map(|l| Value::Str(l.to_string())).collect(),
        )),
        "join" => {
            let items = iterate(args.first().unwrap_or(&Value::None))?;
            let parts: Result<Vec<String>, PyExc> = items
                .iter()
                .map(|v| match v {
                    Value::Str(p) => Ok(p.clone()),
                    other => Err(type_error(format!(
                        "sequence item: expected str instance, '{}' found",
                        other.type_name()
                    ))),
                })
                .collect();
            Ok(Value::Str(parts?.join(s)))
        }
        "replace" => {
            let from = str_arg(&args, 0, "replace")?;
            let to = str_arg(&args, 1, "replace")?;
            Ok(Value::Str(s.replace(&from, &to)))
        }
        "startswith" => Ok(Value::Bool(s.starts_with(&str_arg(&args, 0, "startswith")?))),
        "endswith" => Ok(Value::Bool(s.ends_with(&str_arg(&args, 0, "endswith")?))),
        "find" => Ok(Value::Int(
            s.find(&str_arg(&args, 0, "find")?)
                .map(|i| s[..i].chars().count() as i64)
                .unwrap_or(-1),
        )),
        "index" => {
            let sub = str_arg(&args, 0, "index")?;
            s.find(&sub)
                .map(|i| Value::Int(s[..i].chars().count() as i64))
                .ok_or_else(|| PyExc::new("ValueError", "substring not found"))
        }
        "count" => Ok(Value::Int(
            s.matches(&str_arg(&args, 0, "count")?).count() as i64
        )),
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "isalpha" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(char::is_alphabetic),
        )),
        "title" => Ok(Value::Str(
            s.split(' ')
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>()
                                + &chars.as_str().to_lowercase()
                        }
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "capitalize" => {
            let mut chars = s.chars();
            Ok(Value::Str(match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }))
        }
        "zfill" => {
            let width = args.first().and_then(as_int).unwrap_or(0).max(0) as usize;
            Ok(Value::Str(if s.len() >= width {
                s.to_string()
            } else {
                "0".repeat(width - s.len()) + s
            }))
        }
        "format" => Err(type_error(
            "str.format is not supported; use f-strings instead",
        )),
        _ => Err(no_attr(&Value::Str(s.to_string()), method)),
    }
}

fn list_method(
    l: &Arc<std::sync::Mutex<Vec<Value>>>,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, PyExc> {
    match method {
        "append" => {
            l.lock()
                .unwrap()
                .push(args.into_iter().next().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "extend" => {
            let items = iterate(args.first().unwrap_or(&Value::None))?;
            l.lock().unwrap().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            let mut items = l.lock().unwrap();
            let i = args
                .first()
                .and_then(as_int)
                .unwrap_or(0)
                .clamp(0, items.len() as i64) as usize;
            items.insert(i, args.get(1).cloned().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "pop" => {
            let mut items = l.lock().unwrap();
            if items.is_empty() {
                return Err(PyExc::new("IndexError", "pop from empty list"));
            }
            let idx = match args.first().and_then(as_int) {
                Some(i) => normalize_index(i, items.len())?,
                None => items.len() - 1,
            };
            Ok(items.remove(idx))
        }
        "remove" => {
            let mut items = l.lock().unwrap();
            let target = args.into_iter().next().unwrap_or(Value::None);
            let idx = items
                .iter()
                .position(|v| py_eq(v, &target))
                .ok_or_else(|| PyExc::new("ValueError", "list.remove(x): x not in list"))?;
            items.remove(idx);
            Ok(Value::None)
        }
        "sort" => {
            let mut items = l.lock().unwrap();
            let mut err = None;
            items.sort_by(|a, b| match py_cmp(a, b) {
                Ok(ord) => ord,
                Err(e) => {
                    err.get_or_insert(e);
                    Ordering::Equal
                }
            });
            match err {
                Some(e) => Err(e),
                None => Ok(Value::None),
            }
        }
        "reverse" => {
            l.lock().unwrap().reverse();
            Ok(Value::None)
        }
        "index" => {
            let items = l.lock().unwrap();
            let target = args.into_iter().next().unwrap_or(Value::None);
            items
                .iter()
                .position(|v| py_eq(v, &target))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| PyExc::new("ValueError", "x not in list"))
        }
        "count" => {
            let items = l.lock().unwrap();
            let target = args.into_iter().next().unwrap_or(Value::None);
            Ok(Value::Int(
                items.iter().filter(|v| py_eq(v, &target)).count() as i64
            ))
        }
        "clear" => {
            l.lock().unwrap().clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(l.lock().unwrap().clone())),
        _ => Err(no_attr(&Value::List(Arc::clone(l)), method)),
    }
}

fn dict_method(
    d: &Arc<std::sync::Mutex<DictInner>>,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, PyExc> {
    match method {
        "get" => {
            let key = args
                .first()
                .and_then(Value::as_key)
                .ok_or_else(|| type_error("unhashable key"))?;
            Ok(d.lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => Ok(Value::list(
            d.lock()
                .unwrap()
                .entries
                .iter()
                .map(|(k, _)| k.to_value())
                .collect(),
        )),
        "values" => Ok(Value::list(
            d.lock()
                .unwrap()
                .entries
                .iter()
                .map(|(_, v)| v.clone())
                .collect(),
        )),
        "items" => Ok(Value::list(
            d.lock()
                .unwrap()
                .entries
                .iter()
                .map(|(k, v)| Value::Tuple(Arc::new(vec![k.to_value(), v.clone()])))
                .collect(),
        )),
        "pop" => {
            let key = args
                .first()
                .and_then(Value::as_key)
                .ok_or_else(|| type_error("unhashable key"))?;
            match d.lock().unwrap().remove(&key) {
                Some(v) => Ok(v),
                None => args
                    .get(1)
                    .cloned()
                    .ok_or_else(|| PyExc::new("KeyError", key.to_value().repr())),
            }
        }
        "update" => {
            let other = match args.first() {
                Some(Value::Dict(other)) => other.lock().unwrap().entries.clone(),
                _ => return Err(type_error("update() requires a dict")),
            };
            let mut inner = d.lock().unwrap();
            for (k, v) in other {
                inner.insert(k, v);
            }
            Ok(Value::None)
        }
        "setdefault" => {
            let key = args
                .first()
                .and_then(Value::as_key)
                .ok_or_else(|| type_error("unhashable key"))?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let mut inner = d.lock().unwrap();
            if let Some(v) = inner.get(&key) {
                Ok(v.clone())
            } else {
                inner.insert(key, default.clone());
                Ok(default)
            }
        }
        "clear" => {
            d.lock().unwrap().entries.clear();
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(d.lock().unwrap().entries.clone())),
        _ => Err(no_attr(&Value::Dict(Arc::clone(d)), method)),
    }
}

fn set_method(
    s: &Arc<std::sync::Mutex<SetInner>>,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, PyExc> {
    match method {
        "add" => {
            let key = args
                .first()
                .and_then(Value::as_key)
                .ok_or_else(|| type_error("unhashable value"))?;
            s.lock().unwrap().insert(key);
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let key = args
                .first()
                .and_then(Value::as_key)
                .ok_or_else(|| type_error("unhashable value"))?;
            let mut inner = s.lock().unwrap();
            let pos = inner.entries.iter().position(|k| *k == key);
            match pos {
                Some(i) => {
                    inner.entries.remove(i);
                    Ok(Value::None)
                }
                None if method == "discard" => Ok(Value::None),
                None => Err(PyExc::new("KeyError", key.to_value().repr())),
            }
        }
        "union" => {
            let mut out = s.lock().unwrap().entries.clone();
            for item in iterate(args.first().unwrap_or(&Value::None))? {
                let key = item
                    .as_key()
                    .ok_or_else(|| type_error("unhashable value"))?;
                if !out.contains(&key) {
                    out.push(key);
                }
            }
            Ok(Value::set_of(out))
        }
        "intersection" => {
            let other: Vec<Key> = iterate(args.first().unwrap_or(&Value::None))?
                .iter()
                .filter_map(Value::as_key)
                .collect();
            let out: Vec<Key> = s
                .lock()
                .unwrap()
                .entries
                .iter()
                .filter(|k| other.contains(k))
                .cloned()
                .collect();
            Ok(Value::set_of(out))
        }
        "clear" => {
            s.lock().unwrap().entries.clear();
            Ok(Value::None)
        }
        _ => Err(no_attr(&Value::Set(Arc::clone(s)), method)),
    }
}

/// Applies an f-string format spec (width/alignment subset plus `.Nf`).
pub fn apply_format_spec(value: &Value, spec: &str) -> String {
    if spec.is_empty() {
        return value.str();
    }
    // precision: .Nf / .Ne / .N%
    if let Some(dot) = spec.find('.') {
        let rest = &spec[dot + 1..];
        if let Some(stripped) = rest.strip_suffix('f') {
            if let (Ok(precision), Some(n)) = (stripped.parse::<usize>(), as_number(value)) {
                return format!("{n:.precision$}");
            }
        }
        if let Some(stripped) = rest.strip_suffix('%') {
            if let (Ok(precision), Some(n)) = (stripped.parse::<usize>(), as_number(value)) {
                return format!("{:.precision$}%", n * 100.0);
            }
        }
    }
    if spec == "d" {
        if let Some(n) = as_number(value) {
            return format!("{}", n as i64);
        }
    }
    if let Some(comma_stripped) = spec.strip_suffix(',') {
        if comma_stripped.is_empty() {
            if let Some(n) = as_int(value) {
                return group_thousands(n);
            }
        }
    }
    // width with optional fill/align: [[fill]align][width]
    let mut chars = spec.chars().peekable();
    let mut fill = ' ';
    let mut align = None;
    let first: Vec<char> = spec.chars().take(2).collect();
    if first.len() == 2 && matches!(first[1], '<' | '>' | '^') {
        fill = first[0];
        align = Some(first[1]);
        chars.next();
        chars.next();
    } else if matches!(first.first(), Some('<') | Some('>') | Some('^')) {
        align = Some(first[0]);
        chars.next();
    }
    let width: String = chars.collect();
    if let Ok(width) = width.parse::<usize>() {
        let text = value.str();
        let pad = width.saturating_sub(text.chars().count());
        return match align.unwrap_or('<') {
            '>' => fill.to_string().repeat(pad) + &text,
            '^' => {
                let left = pad / 2;
                fill.to_string().repeat(left) + &text + &fill.to_string().repeat(pad - left)
            }
            _ => text + &fill.to_string().repeat(pad),
        };
    }
    value.str()
}

fn group_thousands(n: i64) -> String {
    let raw = n.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}
