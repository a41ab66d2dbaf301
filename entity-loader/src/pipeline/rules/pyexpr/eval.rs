//! Evaluator for `py:` expressions
//!
//! Only names resolvable through the record scope are visible. There is no
//! attribute access outside `record.<field>` and no call outside the builtin
//! and method whitelists, so an expression cannot reach the host.

use super::ast::*;
use crate::pipeline::Value;

/// Resolves bare names and `record.<field>` references
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// Evaluation error
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        EvalError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

type EvalResult = Result<PyValue, EvalError>;

/// Longest string `str * n` may build
const MAX_STR_LEN: usize = 1 << 20;

/// Namespace name exposing record fields as attributes
const RECORD_NAMESPACE: &str = "record";

pub fn eval(expr: &PyExpr, scope: &dyn NameResolver) -> EvalResult {
    match expr {
        PyExpr::Constant(v) => Ok(v.clone()),

        PyExpr::Name(name) => scope
            .resolve(name)
            .map(|v| PyValue::from_value(&v))
            .ok_or_else(|| EvalError::new(format!("name '{}' is not defined", name))),

        PyExpr::Attribute { object, name } => match object.as_ref() {
            PyExpr::Name(ns) if ns == RECORD_NAMESPACE => scope
                .resolve(name)
                .map(|v| PyValue::from_value(&v))
                .ok_or_else(|| EvalError::new(format!("record has no field '{}'", name))),
            _ => Err(EvalError::new(format!("attribute access '.{}' is not allowed", name))),
        },

        PyExpr::List(items) => Ok(PyValue::List(
            items.iter().map(|e| eval(e, scope)).collect::<Result<_, _>>()?,
        )),

        PyExpr::Dict(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = eval(k, scope)?;
                let value = eval(v, scope)?;
                match out.iter_mut().find(|(existing, _)| py_eq(existing, &key)) {
                    Some((_, slot)) => *slot = value,
                    None => out.push((key, value)),
                }
            }
            Ok(PyValue::Dict(out))
        }

        PyExpr::Negate(inner) => match eval(inner, scope)? {
            PyValue::Int(i) => Ok(i.checked_neg().map_or(PyValue::Float(-(i as f64)), PyValue::Int)),
            PyValue::Float(f) => Ok(PyValue::Float(-f)),
            PyValue::Bool(b) => Ok(PyValue::Int(-(b as i64))),
            other => Err(type_error("unary -", &other, None)),
        },

        PyExpr::Not(inner) => Ok(PyValue::Bool(!eval(inner, scope)?.truthy())),

        PyExpr::Binary { left, op, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            binary(*op, l, r)
        }

        PyExpr::Compare { left, op, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            compare(*op, &l, &r).map(PyValue::Bool)
        }

        PyExpr::Bool { left, op, right } => {
            let l = eval(left, scope)?;
            match (op, l.truthy()) {
                (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                _ => eval(right, scope),
            }
        }

        PyExpr::Conditional { body, test, orelse } => {
            if eval(test, scope)?.truthy() {
                eval(body, scope)
            } else {
                eval(orelse, scope)
            }
        }

        PyExpr::Index { object, index } => {
            let obj = eval(object, scope)?;
            let idx = eval(index, scope)?;
            index_value(&obj, &idx)
        }

        PyExpr::Slice { object, start, stop } => {
            let obj = eval(object, scope)?;
            let start = start.as_ref().map(|e| eval(e, scope)).transpose()?;
            let stop = stop.as_ref().map(|e| eval(e, scope)).transpose()?;
            slice_value(&obj, start.as_ref(), stop.as_ref())
        }

        PyExpr::Call { func, args } => {
            let args = args.iter().map(|e| eval(e, scope)).collect::<Result<Vec<_>, _>>()?;
            call_builtin(func, args)
        }

        PyExpr::Method { object, method, args } => {
            let obj = eval(object, scope)?;
            let args = args.iter().map(|e| eval(e, scope)).collect::<Result<Vec<_>, _>>()?;
            call_method(obj, method, args)
        }
    }
}

/// Python equality, with numeric cross-type comparison
pub fn py_eq(a: &PyValue, b: &PyValue) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => return x.as_f64() == y.as_f64(),
        (Some(_), None) | (None, Some(_)) => return false,
        _ => {}
    }
    match (a, b) {
        (PyValue::None, PyValue::None) => true,
        (PyValue::Str(x), PyValue::Str(y)) => x == y,
        (PyValue::List(x), PyValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| py_eq(p, q))
        }
        (PyValue::Dict(x), PyValue::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| dict_get(y, k).is_some_and(|other| py_eq(v, other)))
        }
        _ => false,
    }
}

/// Look a key up in dict entries
pub fn dict_get<'a>(entries: &'a [(PyValue, PyValue)], key: &PyValue) -> Option<&'a PyValue> {
    entries.iter().find(|(k, _)| py_eq(k, key)).map(|(_, v)| v)
}

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        }
    }
}

fn number(v: &PyValue) -> Option<Num> {
    match v {
        PyValue::Int(i) => Some(Num::I(*i)),
        PyValue::Float(f) => Some(Num::F(*f)),
        PyValue::Bool(b) => Some(Num::I(*b as i64)),
        _ => None,
    }
}

fn type_error(op: &str, left: &PyValue, right: Option<&PyValue>) -> EvalError {
    match right {
        Some(r) => EvalError::new(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op,
            left.type_name(),
            r.type_name()
        )),
        None => EvalError::new(format!("bad operand type for {}: '{}'", op, left.type_name())),
    }
}

fn binary(op: BinOp, l: PyValue, r: PyValue) -> EvalResult {
    if let (Some(a), Some(b)) = (number(&l), number(&r)) {
        return arithmetic(op, a, b);
    }

    match (op, l, r) {
        (BinOp::Add, PyValue::Str(a), PyValue::Str(b)) => Ok(PyValue::Str(a + &b)),
        (BinOp::Add, PyValue::List(mut a), PyValue::List(b)) => {
            a.extend(b);
            Ok(PyValue::List(a))
        }
        (BinOp::Mul, PyValue::Str(s), PyValue::Int(n)) | (BinOp::Mul, PyValue::Int(n), PyValue::Str(s)) => {
            let n = usize::try_from(n).unwrap_or(0);
            if s.len().saturating_mul(n) > MAX_STR_LEN {
                return Err(EvalError::new(format!("string repeat longer than {} bytes", MAX_STR_LEN)));
            }
            Ok(PyValue::Str(s.repeat(n)))
        }
        (op, l, r) => Err(type_error(op_symbol(op), &l, Some(&r))),
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
    }
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> EvalResult {
    if let (Num::I(x), Num::I(y)) = (a, b) {
        let result = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Div => None,
            BinOp::Mod => {
                if y == 0 {
                    return Err(EvalError::new("integer modulo by zero"));
                }
                // result takes the divisor's sign; MIN % -1 falls through to float
                x.checked_rem(y)
                    .map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
            }
        };
        if let Some(v) = result {
            return Ok(PyValue::Int(v));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(EvalError::new("division by zero"));
            }
            x / y
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(EvalError::new("float modulo"));
            }
            x - y * (x / y).floor()
        }
    };
    Ok(PyValue::Float(v))
}

fn compare(op: CmpOp, l: &PyValue, r: &PyValue) -> Result<bool, EvalError> {
    match op {
        CmpOp::Eq => return Ok(py_eq(l, r)),
        CmpOp::Ne => return Ok(!py_eq(l, r)),
        CmpOp::In => return contains(r, l),
        CmpOp::NotIn => return contains(r, l).map(|b| !b),
        _ => {}
    }

    let ordering = match (number(l), number(r)) {
        (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        _ => match (l, r) {
            (PyValue::Str(a), PyValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return Err(type_error("comparison", l, Some(r)));
    };

    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        _ => false,
    })
}

fn contains(container: &PyValue, item: &PyValue) -> Result<bool, EvalError> {
    match (container, item) {
        (PyValue::Str(hay), PyValue::Str(needle)) => Ok(hay.contains(needle.as_str())),
        (PyValue::List(items), _) => Ok(items.iter().any(|v| py_eq(v, item))),
        (PyValue::Dict(entries), _) => Ok(dict_get(entries, item).is_some()),
        _ => Err(type_error("in", item, Some(container))),
    }
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    (0..len as i64).contains(&idx).then_some(idx as usize)
}

fn index_value(obj: &PyValue, idx: &PyValue) -> EvalResult {
    match obj {
        PyValue::Dict(entries) => dict_get(entries, idx)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("key {} not found", idx.repr()))),
        PyValue::List(items) => {
            let PyValue::Int(i) = idx else {
                return Err(EvalError::new("list indices must be integers"));
            };
            normalize_index(*i, items.len())
                .map(|n| items[n].clone())
                .ok_or_else(|| EvalError::new("list index out of range"))
        }
        PyValue::Str(s) => {
            let PyValue::Int(i) = idx else {
                return Err(EvalError::new("string indices must be integers"));
            };
            let chars: Vec<char> = s.chars().collect();
            normalize_index(*i, chars.len())
                .map(|n| PyValue::Str(chars[n].to_string()))
                .ok_or_else(|| EvalError::new("string index out of range"))
        }
        other => Err(EvalError::new(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

fn slice_bounds(len: usize, start: Option<&PyValue>, stop: Option<&PyValue>) -> Result<(usize, usize), EvalError> {
    let clamp = |v: Option<&PyValue>, default: usize| -> Result<usize, EvalError> {
        match v {
            None | Some(PyValue::None) => Ok(default),
            Some(PyValue::Int(i)) => {
                let i = if *i < 0 { len as i64 + i } else { *i };
                Ok(i.clamp(0, len as i64) as usize)
            }
            Some(_) => Err(EvalError::new("slice indices must be integers")),
        }
    };
    let s = clamp(start, 0)?;
    let e = clamp(stop, len)?;
    Ok((s, e.max(s)))
}

fn slice_value(obj: &PyValue, start: Option<&PyValue>, stop: Option<&PyValue>) -> EvalResult {
    match obj {
        PyValue::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (a, b) = slice_bounds(chars.len(), start, stop)?;
            Ok(PyValue::Str(chars[a..b].iter().collect()))
        }
        PyValue::List(items) => {
            let (a, b) = slice_bounds(items.len(), start, stop)?;
            Ok(PyValue::List(items[a..b].to_vec()))
        }
        other => Err(EvalError::new(format!("'{}' object is not sliceable", other.type_name()))),
    }
}

fn arity(name: &str, args: &[PyValue], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        return Err(EvalError::new(format!(
            "{}() takes {}..{} arguments ({} given)",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn call_builtin(func: &str, mut args: Vec<PyValue>) -> EvalResult {
    match func {
        "str" => {
            arity(func, &args, 0, 1)?;
            Ok(PyValue::Str(args.first().map(PyValue::to_str).unwrap_or_default()))
        }
        "int" => {
            arity(func, &args, 1, 1)?;
            match &args[0] {
                PyValue::Int(i) => Ok(PyValue::Int(*i)),
                PyValue::Float(f) => Ok(PyValue::Int(f.trunc() as i64)),
                PyValue::Bool(b) => Ok(PyValue::Int(*b as i64)),
                PyValue::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(PyValue::Int)
                    .map_err(|_| EvalError::new(format!("invalid literal for int(): '{}'", s))),
                other => Err(type_error("int()", other, None)),
            }
        }
        "float" => {
            arity(func, &args, 1, 1)?;
            match &args[0] {
                PyValue::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(PyValue::Float)
                    .map_err(|_| EvalError::new(format!("could not convert string to float: '{}'", s))),
                other => number(other)
                    .map(|n| PyValue::Float(n.as_f64()))
                    .ok_or_else(|| type_error("float()", other, None)),
            }
        }
        "len" => {
            arity(func, &args, 1, 1)?;
            let n = match &args[0] {
                PyValue::Str(s) => s.chars().count(),
                PyValue::List(items) => items.len(),
                PyValue::Dict(entries) => entries.len(),
                other => return Err(type_error("len()", other, None)),
            };
            Ok(PyValue::Int(n as i64))
        }
        "abs" => {
            arity(func, &args, 1, 1)?;
            match number(&args[0]) {
                Some(Num::I(i)) => Ok(i.checked_abs().map_or(PyValue::Float((i as f64).abs()), PyValue::Int)),
                Some(Num::F(f)) => Ok(PyValue::Float(f.abs())),
                None => Err(type_error("abs()", &args[0], None)),
            }
        }
        "round" => {
            arity(func, &args, 1, 2)?;
            let Some(x) = number(&args[0]) else {
                return Err(type_error("round()", &args[0], None));
            };
            match args.get(1) {
                None | Some(PyValue::None) => match x {
                    Num::I(i) => Ok(PyValue::Int(i)),
                    Num::F(f) => Ok(PyValue::Int(f.round_ties_even() as i64)),
                },
                Some(PyValue::Int(digits)) => {
                    let factor = 10f64.powi(*digits as i32);
                    Ok(PyValue::Float((x.as_f64() * factor).round_ties_even() / factor))
                }
                Some(other) => Err(type_error("round()", other, None)),
            }
        }
        "min" | "max" => {
            if args.len() == 1 {
                if let PyValue::List(items) = args.remove(0) {
                    args = items;
                } else {
                    return Err(EvalError::new(format!("{}() argument must be a list", func)));
                }
            }
            let mut iter = args.into_iter();
            let mut best = iter
                .next()
                .ok_or_else(|| EvalError::new(format!("{}() arg is an empty sequence", func)))?;
            for candidate in iter {
                let better = if func == "min" {
                    compare(CmpOp::Lt, &candidate, &best)?
                } else {
                    compare(CmpOp::Gt, &candidate, &best)?
                };
                if better {
                    best = candidate;
                }
            }
            Ok(best)
        }
        other => Err(EvalError::new(format!("call to '{}' is not allowed", other))),
    }
}

fn str_arg<'a>(method: &str, args: &'a [PyValue], i: usize) -> Result<&'a str, EvalError> {
    match args.get(i) {
        Some(PyValue::Str(s)) => Ok(s),
        Some(other) => Err(EvalError::new(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
        None => Err(EvalError::new(format!("{}() missing argument", method))),
    }
}

fn call_method(obj: PyValue, method: &str, args: Vec<PyValue>) -> EvalResult {
    match (&obj, method) {
        (PyValue::Dict(entries), "get") => {
            arity(method, &args, 1, 2)?;
            Ok(dict_get(entries, &args[0])
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(PyValue::None)))
        }
        (PyValue::Str(s), "strip" | "lstrip" | "rstrip") => {
            arity(method, &args, 0, 1)?;
            let chars: Vec<char> = match args.first() {
                Some(PyValue::Str(set)) => set.chars().collect(),
                _ => Vec::new(),
            };
            let pred = |c: char| if chars.is_empty() { c.is_whitespace() } else { chars.contains(&c) };
            let out = match method {
                "lstrip" => s.trim_start_matches(pred),
                "rstrip" => s.trim_end_matches(pred),
                _ => s.trim_matches(pred),
            };
            Ok(PyValue::Str(out.to_string()))
        }
        (PyValue::Str(s), "lower") => Ok(PyValue::Str(s.to_lowercase())),
        (PyValue::Str(s), "upper") => Ok(PyValue::Str(s.to_uppercase())),
        (PyValue::Str(s), "replace") => {
            arity(method, &args, 2, 2)?;
            Ok(PyValue::Str(s.replace(str_arg(method, &args, 0)?, str_arg(method, &args, 1)?)))
        }
        (PyValue::Str(s), "split") => {
            arity(method, &args, 0, 1)?;
            let parts: Vec<PyValue> = match args.first() {
                None | Some(PyValue::None) => s
                    .split_whitespace()
                    .map(|p| PyValue::Str(p.to_string()))
                    .collect(),
                Some(_) => {
                    let sep = str_arg(method, &args, 0)?;
                    if sep.is_empty() {
                        return Err(EvalError::new("empty separator"));
                    }
                    s.split(sep).map(|p| PyValue::Str(p.to_string())).collect()
                }
            };
            Ok(PyValue::List(parts))
        }
        (PyValue::Str(s), "startswith") => {
            arity(method, &args, 1, 1)?;
            Ok(PyValue::Bool(s.starts_with(str_arg(method, &args, 0)?)))
        }
        (PyValue::Str(s), "endswith") => {
            arity(method, &args, 1, 1)?;
            Ok(PyValue::Bool(s.ends_with(str_arg(method, &args, 0)?)))
        }
        (PyValue::Str(sep), "join") => {
            arity(method, &args, 1, 1)?;
            let PyValue::List(items) = &args[0] else {
                return Err(EvalError::new("join() argument must be a list"));
            };
            Ok(PyValue::Str(items.iter().map(PyValue::to_str).collect::<Vec<_>>().join(sep)))
        }
        _ => Err(EvalError::new(format!(
            "'{}' object has no method '{}'",
            obj.type_name(),
            method
        ))),
    }
}
