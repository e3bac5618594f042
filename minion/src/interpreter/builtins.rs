//! Curated builtin set and the built-in module table.
//!
//! Pure builtins are plain functions over values. Builtins that must invoke
//! user code or touch evaluator state (`print`, `final_answer`, `map`,
//! `filter`, `sorted`, `min`, `max`) are registered with `f: None` and
//! intercepted by the evaluators. `eval`, `exec`, `open`, `__import__`,
//! `compile`, `input`, `globals`, and `locals` are deliberately absent.

use std::sync::Arc;

use super::ops;
use super::state::InterpState;
use super::value::{Builtin, Key, ModuleObj, Value};

type BResult = Result<Value, (String, String)>;

fn type_err(msg: impl Into<String>) -> (String, String) {
    ("TypeError".to_string(), msg.into())
}

fn value_err(msg: impl Into<String>) -> (String, String) {
    ("ValueError".to_string(), msg.into())
}

fn from_exc(e: super::state::PyExc) -> (String, String) {
    (e.kind, e.message)
}

fn num(v: &Value, what: &str) -> Result<f64, (String, String)> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(type_err(format!(
            "{what} argument must be a number, not '{}'",
            v.type_name()
        ))),
    }
}

fn int_of(v: &Value, what: &str) -> Result<i64, (String, String)> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
        _ => Err(type_err(format!(
            "{what} argument must be an integer, not '{}'",
            v.type_name()
        ))),
    }
}

/// Installs the curated builtins into the global namespace.
pub fn install(state: &mut InterpState) {
    let pure: &[(&'static str, super::value::BuiltinImpl)] = &[
        ("len", b_len),
        ("range", b_range),
        ("list", b_list),
        ("dict", b_dict),
        ("set", b_set),
        ("tuple", b_tuple),
        ("str", b_str),
        ("int", b_int),
        ("float", b_float),
        ("bool", b_bool),
        ("sum", b_sum),
        ("enumerate", b_enumerate),
        ("zip", b_zip),
        ("reversed", b_reversed),
        ("abs", b_abs),
        ("round", b_round),
        ("any", b_any),
        ("all", b_all),
        ("isinstance", b_isinstance),
        ("type", b_type),
        ("repr", b_repr),
        ("ord", b_ord),
        ("chr", b_chr),
        ("divmod", b_divmod),
        ("pow", b_pow),
    ];
    for (name, f) in pure {
        state.globals.insert(
            name.to_string(),
            Value::Builtin(Arc::new(Builtin {
                name,
                f: Some(*f),
            })),
        );
    }
    // evaluator-intercepted builtins
    for name in ["print", "final_answer", "map", "filter", "sorted", "min", "max"] {
        state.globals.insert(
            name.to_string(),
            Value::Builtin(Arc::new(Builtin { name, f: None })),
        );
    }
    // exception constructors, so `raise ValueError("msg")` works
    for name in [
        "Exception",
        "ValueError",
        "TypeError",
        "KeyError",
        "IndexError",
        "RuntimeError",
        "ZeroDivisionError",
        "StopIteration",
        "NotImplementedError",
        "AssertionError",
        "AttributeError",
        "NameError",
    ] {
        state.globals.insert(
            name.to_string(),
            Value::Builtin(Arc::new(Builtin { name, f: None })),
        );
    }
}

fn b_len(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let v = args.first().ok_or_else(|| type_err("len() missing argument"))?;
    ops::py_len(v).map(Value::Int).map_err(from_exc)
}

fn b_range(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let ints: Result<Vec<i64>, _> = args.iter().map(|v| int_of(v, "range()")).collect();
    let ints = ints?;
    match ints.len() {
        1 => Ok(Value::Range(0, ints[0], 1)),
        2 => Ok(Value::Range(ints[0], ints[1], 1)),
        3 => {
            if ints[2] == 0 {
                Err(value_err("range() arg 3 must not be zero"))
            } else {
                Ok(Value::Range(ints[0], ints[1], ints[2]))
            }
        }
        n => Err(type_err(format!("range expected 1 to 3 arguments, got {n}"))),
    }
}

fn b_list(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        None => Ok(Value::list(Vec::new())),
        Some(v) => ops::iterate(v).map(Value::list).map_err(from_exc),
    }
}

fn b_dict(args: Vec<Value>, kwargs: &[(String, Value)]) -> BResult {
    let mut entries: Vec<(Key, Value)> = Vec::new();
    if let Some(Value::Dict(d)) = args.first() {
        entries = d.lock().unwrap().entries.clone();
    } else if let Some(v) = args.first() {
        for item in ops::iterate(v).map_err(from_exc)? {
            let pair = ops::iterate(&item).map_err(from_exc)?;
            if pair.len() != 2 {
                return Err(value_err("dictionary update sequence element is not a pair"));
            }
            let key = pair[0]
                .as_key()
                .ok_or_else(|| type_err("unhashable key"))?;
            entries.push((key, pair[1].clone()));
        }
    }
    for (k, v) in kwargs {
        entries.push((Key::Str(k.clone()), v.clone()));
    }
    Ok(Value::dict(entries))
}

fn b_set(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        None => Ok(Value::set_of(Vec::new())),
        Some(v) => {
            let items = ops::iterate(v).map_err(from_exc)?;
            let keys: Result<Vec<Key>, _> = items
                .iter()
                .map(|i| {
                    i.as_key()
                        .ok_or_else(|| type_err(format!("unhashable type: '{}'", i.type_name())))
                })
                .collect();
            Ok(Value::set_of(keys?))
        }
    }
}

fn b_tuple(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        None => Ok(Value::Tuple(Arc::new(Vec::new()))),
        Some(v) => ops::iterate(v)
            .map(|items| Value::Tuple(Arc::new(items)))
            .map_err(from_exc),
    }
}

fn b_str(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    Ok(Value::Str(
        args.first().map(Value::str).unwrap_or_default(),
    ))
}

fn b_int(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(if *b { 1 } else { 0 })),
        Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
        Some(Value::Str(s)) => {
            let base = args.get(1).map(|v| int_of(v, "int()")).transpose()?.unwrap_or(10);
            i64::from_str_radix(s.trim(), base as u32)
                .map(Value::Int)
                .map_err(|_| value_err(format!("invalid literal for int(): '{s}'")))
        }
        Some(other) => Err(type_err(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn b_float(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        None => Ok(Value::Float(0.0)),
        Some(Value::Float(f)) => Ok(Value::Float(*f)),
        Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
        Some(Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Some(Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| value_err(format!("could not convert string to float: '{s}'"))),
        Some(other) => Err(type_err(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn b_bool(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    Ok(Value::Bool(args.first().map(Value::truthy).unwrap_or(false)))
}

fn b_sum(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("sum() missing argument"))?)
        .map_err(from_exc)?;
    let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in items {
        acc = ops::binary(super::ast::BinOpKind::Add, &acc, &item).map_err(from_exc)?;
    }
    Ok(acc)
}

fn b_enumerate(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(
        args.first()
            .ok_or_else(|| type_err("enumerate() missing argument"))?,
    )
    .map_err(from_exc)?;
    let start = args.get(1).map(|v| int_of(v, "enumerate()")).transpose()?.unwrap_or(0);
    Ok(Value::list(
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| Value::Tuple(Arc::new(vec![Value::Int(start + i as i64), v])))
            .collect(),
    ))
}

fn b_zip(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let seqs: Result<Vec<Vec<Value>>, _> = args.iter().map(ops::iterate).collect();
    let seqs = seqs.map_err(from_exc)?;
    let shortest = seqs.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..shortest)
            .map(|i| Value::Tuple(Arc::new(seqs.iter().map(|s| s[i].clone()).collect())))
            .collect(),
    ))
}

fn b_reversed(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let mut items = ops::iterate(
        args.first()
            .ok_or_else(|| type_err("reversed() missing argument"))?,
    )
    .map_err(from_exc)?;
    items.reverse();
    Ok(Value::list(items))
}

fn b_abs(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i.abs())),
        Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
        Some(other) => Err(type_err(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
        None => Err(type_err("abs() missing argument")),
    }
}

fn b_round(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(
        args.first().ok_or_else(|| type_err("round() missing argument"))?,
        "round()",
    )?;
    match args.get(1) {
        None | Some(Value::None) => Ok(Value::Int(x.round_ties_even() as i64)),
        Some(v) => {
            let digits = int_of(v, "round()")?;
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Float((x * factor).round_ties_even() / factor))
        }
    }
}

fn b_any(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("any() missing argument"))?)
        .map_err(from_exc)?;
    Ok(Value::Bool(items.iter().any(Value::truthy)))
}

fn b_all(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("all() missing argument"))?)
        .map_err(from_exc)?;
    Ok(Value::Bool(items.iter().all(Value::truthy)))
}

fn type_matches(value: &Value, type_value: &Value) -> bool {
    match type_value {
        Value::Builtin(b) => match b.name {
            "int" => matches!(value, Value::Int(_)),
            "float" => matches!(value, Value::Float(_)),
            "str" => matches!(value, Value::Str(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "set" => matches!(value, Value::Set(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            name if is_exception_name(name) => {
                matches!(value, Value::Exc(e) if e.matches(name))
            }
            _ => false,
        },
        Value::Class(c) => match value {
            Value::Instance(i) => {
                fn is_subclass(class: &super::value::PyClass, name: &str) -> bool {
                    class.name == name || class.bases.iter().any(|b| is_subclass(b, name))
                }
                is_subclass(&i.class, &c.name)
            }
            _ => false,
        },
        _ => false,
    }
}

fn b_isinstance(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let value = args
        .first()
        .ok_or_else(|| type_err("isinstance() missing argument"))?;
    let types = args
        .get(1)
        .ok_or_else(|| type_err("isinstance() missing type argument"))?;
    let matched = match types {
        Value::Tuple(items) => items.iter().any(|t| type_matches(value, t)),
        single => type_matches(value, single),
    };
    Ok(Value::Bool(matched))
}

fn b_type(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    Ok(Value::Str(
        args.first()
            .map(|v| v.type_name().to_string())
            .unwrap_or_default(),
    ))
}

fn b_repr(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    Ok(Value::Str(args.first().map(Value::repr).unwrap_or_default()))
}

fn b_ord(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        Some(Value::Str(s)) if s.chars().count() == 1 => {
            Ok(Value::Int(s.chars().next().unwrap() as i64))
        }
        _ => Err(type_err("ord() expected a character")),
    }
}

fn b_chr(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let code = int_of(
        args.first().ok_or_else(|| type_err("chr() missing argument"))?,
        "chr()",
    )?;
    char::from_u32(code as u32)
        .map(|c| Value::Str(c.to_string()))
        .ok_or_else(|| value_err("chr() arg not in range"))
}

fn b_divmod(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let a = int_of(args.first().ok_or_else(|| type_err("divmod() missing argument"))?, "divmod()")?;
    let b = int_of(args.get(1).ok_or_else(|| type_err("divmod() missing argument"))?, "divmod()")?;
    if b == 0 {
        return Err(("ZeroDivisionError".to_string(), "divmod by zero".to_string()));
    }
    Ok(Value::Tuple(Arc::new(vec![
        Value::Int(a.div_euclid(b)),
        Value::Int(a.rem_euclid(b)),
    ])))
}

fn b_pow(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let base = args.first().ok_or_else(|| type_err("pow() missing argument"))?;
    let exp = args.get(1).ok_or_else(|| type_err("pow() missing argument"))?;
    ops::binary(super::ast::BinOpKind::Pow, base, exp).map_err(from_exc)
}

// ---- built-in modules ----

fn module(name: &str, attrs: Vec<(&str, Value)>) -> Value {
    Value::Module(Arc::new(ModuleObj {
        name: name.to_string(),
        attrs: attrs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }))
}

fn mod_fn(name: &'static str, f: super::value::BuiltinImpl) -> Value {
    Value::Builtin(Arc::new(Builtin { name, f: Some(f) }))
}

/// Builds a built-in module object by name. Allowlisted modules without a
/// concrete implementation import as empty module objects.
pub fn make_module(name: &str) -> Value {
    match name {
        "math" => module(
            "math",
            vec![
                ("pi", Value::Float(std::f64::consts::PI)),
                ("e", Value::Float(std::f64::consts::E)),
                ("tau", Value::Float(std::f64::consts::TAU)),
                ("inf", Value::Float(f64::INFINITY)),
                ("nan", Value::Float(f64::NAN)),
                ("sqrt", mod_fn("math.sqrt", m_sqrt)),
                ("floor", mod_fn("math.floor", m_floor)),
                ("ceil", mod_fn("math.ceil", m_ceil)),
                ("fabs", mod_fn("math.fabs", m_fabs)),
                ("trunc", mod_fn("math.trunc", m_trunc)),
                ("exp", mod_fn("math.exp", m_exp)),
                ("log", mod_fn("math.log", m_log)),
                ("log2", mod_fn("math.log2", m_log2)),
                ("log10", mod_fn("math.log10", m_log10)),
                ("sin", mod_fn("math.sin", m_sin)),
                ("cos", mod_fn("math.cos", m_cos)),
                ("tan", mod_fn("math.tan", m_tan)),
                ("asin", mod_fn("math.asin", m_asin)),
                ("acos", mod_fn("math.acos", m_acos)),
                ("atan", mod_fn("math.atan", m_atan)),
                ("atan2", mod_fn("math.atan2", m_atan2)),
                ("degrees", mod_fn("math.degrees", m_degrees)),
                ("radians", mod_fn("math.radians", m_radians)),
                ("gcd", mod_fn("math.gcd", m_gcd)),
                ("factorial", mod_fn("math.factorial", m_factorial)),
                ("hypot", mod_fn("math.hypot", m_hypot)),
                ("isclose", mod_fn("math.isclose", m_isclose)),
                ("pow", mod_fn("math.pow", m_pow)),
            ],
        ),
        "json" => module(
            "json",
            vec![
                ("dumps", mod_fn("json.dumps", j_dumps)),
                ("loads", mod_fn("json.loads", j_loads)),
            ],
        ),
        "random" => module(
            "random",
            vec![
                ("random", mod_fn("random.random", r_random)),
                ("randint", mod_fn("random.randint", r_randint)),
                ("uniform", mod_fn("random.uniform", r_uniform)),
                ("choice", mod_fn("random.choice", r_choice)),
                ("shuffle", mod_fn("random.shuffle", r_shuffle)),
                ("seed", mod_fn("random.seed", r_seed)),
            ],
        ),
        "statistics" => module(
            "statistics",
            vec![
                ("mean", mod_fn("statistics.mean", s_mean)),
                ("median", mod_fn("statistics.median", s_median)),
            ],
        ),
        "time" => module("time", vec![("time", mod_fn("time.time", t_time))]),
        other => module(other, vec![]),
    }
}

macro_rules! math1 {
    ($name:ident, $f:expr) => {
        fn $name(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
            let x = num(
                args.first().ok_or_else(|| type_err("missing argument"))?,
                "math",
            )?;
            let f: fn(f64) -> f64 = $f;
            Ok(Value::Float(f(x)))
        }
    };
}

math1!(m_exp, f64::exp);
math1!(m_log2, f64::log2);
math1!(m_log10, f64::log10);
math1!(m_sin, f64::sin);
math1!(m_cos, f64::cos);
math1!(m_tan, f64::tan);
math1!(m_asin, f64::asin);
math1!(m_acos, f64::acos);
math1!(m_atan, f64::atan);
math1!(m_fabs, f64::abs);
math1!(m_degrees, f64::to_degrees);
math1!(m_radians, f64::to_radians);

fn m_sqrt(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(args.first().ok_or_else(|| type_err("missing argument"))?, "sqrt")?;
    if x < 0.0 {
        return Err(value_err("math domain error"));
    }
    Ok(Value::Float(x.sqrt()))
}

fn m_floor(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(args.first().ok_or_else(|| type_err("missing argument"))?, "floor")?;
    Ok(Value::Int(x.floor() as i64))
}

fn m_ceil(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(args.first().ok_or_else(|| type_err("missing argument"))?, "ceil")?;
    Ok(Value::Int(x.ceil() as i64))
}

fn m_trunc(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(args.first().ok_or_else(|| type_err("missing argument"))?, "trunc")?;
    Ok(Value::Int(x.trunc() as i64))
}

fn m_log(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let x = num(args.first().ok_or_else(|| type_err("missing argument"))?, "log")?;
    if x <= 0.0 {
        return Err(value_err("math domain error"));
    }
    match args.get(1) {
        Some(base) => Ok(Value::Float(x.log(num(base, "log")?))),
        None => Ok(Value::Float(x.ln())),
    }
}

fn m_atan2(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let y = num(args.first().ok_or_else(|| type_err("missing argument"))?, "atan2")?;
    let x = num(args.get(1).ok_or_else(|| type_err("missing argument"))?, "atan2")?;
    Ok(Value::Float(y.atan2(x)))
}

fn m_hypot(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let mut acc = 0.0;
    for a in &args {
        let x = num(a, "hypot")?;
        acc += x * x;
    }
    Ok(Value::Float(acc.sqrt()))
}

fn m_gcd(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let mut g = 0i64;
    for a in &args {
        let mut x = int_of(a, "gcd")?.abs();
        let mut y = g;
        while x != 0 {
            let t = y % x;
            y = x;
            x = t;
        }
        g = y.abs();
    }
    Ok(Value::Int(g))
}

fn m_factorial(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let n = int_of(args.first().ok_or_else(|| type_err("missing argument"))?, "factorial")?;
    if n < 0 {
        return Err(value_err("factorial() not defined for negative values"));
    }
    let mut acc: i64 = 1;
    for i in 2..=n {
        acc = acc
            .checked_mul(i)
            .ok_or_else(|| ("OverflowError".to_string(), "factorial result too large".to_string()))?;
    }
    Ok(Value::Int(acc))
}

fn m_isclose(args: Vec<Value>, kwargs: &[(String, Value)]) -> BResult {
    let a = num(args.first().ok_or_else(|| type_err("missing argument"))?, "isclose")?;
    let b = num(args.get(1).ok_or_else(|| type_err("missing argument"))?, "isclose")?;
    let rel_tol = kwargs
        .iter()
        .find(|(k, _)| k == "rel_tol")
        .map(|(_, v)| num(v, "isclose"))
        .transpose()?
        .unwrap_or(1e-9);
    let abs_tol = kwargs
        .iter()
        .find(|(k, _)| k == "abs_tol")
        .map(|(_, v)| num(v, "isclose"))
        .transpose()?
        .unwrap_or(0.0);
    let close = (a - b).abs() <= f64::max(rel_tol * f64::max(a.abs(), b.abs()), abs_tol);
    Ok(Value::Bool(close))
}

fn m_pow(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let a = num(args.first().ok_or_else(|| type_err("missing argument"))?, "pow")?;
    let b = num(args.get(1).ok_or_else(|| type_err("missing argument"))?, "pow")?;
    Ok(Value::Float(a.powf(b)))
}

fn j_dumps(args: Vec<Value>, kwargs: &[(String, Value)]) -> BResult {
    let v = args.first().ok_or_else(|| type_err("dumps() missing argument"))?;
    let json = v.to_json();
    let indent = kwargs
        .iter()
        .find(|(k, _)| k == "indent")
        .map(|(_, v)| int_of(v, "dumps"))
        .transpose()?;
    let text = if indent.is_some() {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|e| value_err(e.to_string()))?;
    Ok(Value::Str(text))
}

fn j_loads(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    match args.first() {
        Some(Value::Str(s)) => serde_json::from_str::<serde_json::Value>(s)
            .map(|j| Value::from_json(&j))
            .map_err(|e| value_err(format!("invalid JSON: {e}"))),
        _ => Err(type_err("loads() argument must be str")),
    }
}

fn r_random(_args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    Ok(Value::Float(rand::random::<f64>()))
}

fn r_randint(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let a = int_of(args.first().ok_or_else(|| type_err("missing argument"))?, "randint")?;
    let b = int_of(args.get(1).ok_or_else(|| type_err("missing argument"))?, "randint")?;
    if a > b {
        return Err(value_err("empty range for randint()"));
    }
    let span = (b - a + 1) as u64;
    Ok(Value::Int(a + (rand::random::<u64>() % span) as i64))
}

fn r_uniform(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let a = num(args.first().ok_or_else(|| type_err("missing argument"))?, "uniform")?;
    let b = num(args.get(1).ok_or_else(|| type_err("missing argument"))?, "uniform")?;
    Ok(Value::Float(a + rand::random::<f64>() * (b - a)))
}

fn r_choice(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("missing argument"))?)
        .map_err(from_exc)?;
    if items.is_empty() {
        return Err(("IndexError".to_string(), "cannot choose from an empty sequence".to_string()));
    }
    let idx = (rand::random::<u64>() as usize) % items.len();
    Ok(items[idx].clone())
}

fn r_shuffle(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    if let Some(Value::List(l)) = args.first() {
        let mut items = l.lock().unwrap();
        let n = items.len();
        for i in (1..n).rev() {
            let j = (rand::random::<u64>() as usize) % (i + 1);
            items.swap(i, j);
        }
        Ok(Value::None)
    } else {
        Err(type_err("shuffle() argument must be a list"))
    }
}

fn r_seed(_args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    // process-global RNG; seeding is a no-op
    Ok(Value::None)
}

fn s_mean(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("missing argument"))?)
        .map_err(from_exc)?;
    if items.is_empty() {
        return Err(("StatisticsError".to_string(), "mean requires at least one data point".to_string()));
    }
    let mut acc = 0.0;
    for item in &items {
        acc += num(item, "mean")?;
    }
    Ok(Value::Float(acc / items.len() as f64))
}

fn s_median(args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let items = ops::iterate(args.first().ok_or_else(|| type_err("missing argument"))?)
        .map_err(from_exc)?;
    if items.is_empty() {
        return Err(("StatisticsError".to_string(), "no median for empty data".to_string()));
    }
    let mut nums: Vec<f64> = Vec::with_capacity(items.len());
    for item in &items {
        nums.push(num(item, "median")?);
    }
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = nums.len();
    let median = if n % 2 == 1 {
        nums[n / 2]
    } else {
        (nums[n / 2 - 1] + nums[n / 2]) / 2.0
    };
    Ok(Value::Float(median))
}

fn t_time(_args: Vec<Value>, _kwargs: &[(String, Value)]) -> BResult {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Float(now))
}

/// Exception-constructor names intercepted by the evaluators.
pub fn is_exception_name(name: &str) -> bool {
    matches!(
        name,
        "Exception"
            | "ValueError"
            | "TypeError"
            | "KeyError"
            | "IndexError"
            | "RuntimeError"
            | "ZeroDivisionError"
            | "StopIteration"
            | "NotImplementedError"
            | "AssertionError"
            | "AttributeError"
            | "NameError"
    )
}

/// Builds a map for `collections`-free dict lookups of installed globals,
/// used by tests to assert the denylist.
pub fn denylisted() -> &'static [&'static str] {
    &[
        "eval", "exec", "open", "__import__", "compile", "input", "globals", "locals", "vars",
        "exit", "quit", "help", "dir", "getattr", "setattr", "delattr",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::InterpreterConfig;

    fn fresh_state() -> InterpState {
        let mut st = InterpState::new(&InterpreterConfig::default());
        install(&mut st);
        st
    }

    #[test]
    fn denylisted_builtins_are_absent() {
        let st = fresh_state();
        for name in denylisted() {
            assert!(
                !st.globals.contains_key(*name),
                "{name} must not be injected"
            );
        }
    }

    #[test]
    fn curated_builtins_are_present() {
        let st = fresh_state();
        for name in [
            "len", "range", "print", "list", "dict", "sum", "min", "max", "sorted", "enumerate",
            "zip", "reversed", "abs", "round", "any", "all", "map", "filter", "isinstance",
            "final_answer",
        ] {
            assert!(st.globals.contains_key(name), "{name} missing");
        }
    }

    #[test]
    fn int_parses_strings_and_truncates_floats() {
        assert!(matches!(
            b_int(vec![Value::Str(" 42 ".into())], &[]).unwrap(),
            Value::Int(42)
        ));
        assert!(matches!(
            b_int(vec![Value::Float(3.9)], &[]).unwrap(),
            Value::Int(3)
        ));
        assert!(b_int(vec![Value::Str("nope".into())], &[]).is_err());
    }

    #[test]
    fn math_module_has_constants_and_functions() {
        let Value::Module(m) = make_module("math") else {
            panic!()
        };
        assert!(m.attrs.contains_key("pi"));
        assert!(m.attrs.contains_key("sqrt"));
    }

    #[test]
    fn json_roundtrip_through_module_functions() {
        let v = Value::dict(vec![(Key::Str("a".into()), Value::Int(1))]);
        let dumped = j_dumps(vec![v], &[]).unwrap();
        let Value::Str(text) = &dumped else { panic!() };
        let loaded = j_loads(vec![dumped.clone()], &[]).unwrap();
        assert_eq!(loaded.repr(), "{'a': 1}");
        assert_eq!(text, "{\"a\":1}");
    }

    #[test]
    fn round_uses_bankers_rounding() {
        assert!(matches!(
            b_round(vec![Value::Float(2.5)], &[]).unwrap(),
            Value::Int(2)
        ));
        assert!(matches!(
            b_round(vec![Value::Float(3.5)], &[]).unwrap(),
            Value::Int(4)
        ));
    }
}
