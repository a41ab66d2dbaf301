//! AST and runtime values for `py:` expressions

use crate::pipeline::Value;

/// Runtime value of a `py:` expression
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PyValue>),
    /// Insertion-ordered mapping
    Dict(Vec<(PyValue, PyValue)>),
}

impl PyValue {
    pub fn truthy(&self) -> bool {
        match self {
            PyValue::None => false,
            PyValue::Bool(b) => *b,
            PyValue::Int(i) => *i != 0,
            PyValue::Float(f) => *f != 0.0,
            PyValue::Str(s) => !s.is_empty(),
            PyValue::List(items) => !items.is_empty(),
            PyValue::Dict(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Str(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Dict(_) => "dict",
        }
    }

    /// `str(x)`
    pub fn to_str(&self) -> String {
        match self {
            PyValue::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(x)`
    pub fn repr(&self) -> String {
        match self {
            PyValue::None => "None".to_string(),
            PyValue::Bool(true) => "True".to_string(),
            PyValue::Bool(false) => "False".to_string(),
            PyValue::Int(i) => i.to_string(),
            PyValue::Float(f) => crate::pipeline::format_float(*f),
            PyValue::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
            PyValue::List(items) => {
                let inner: Vec<String> = items.iter().map(PyValue::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            PyValue::Dict(items) => {
                let inner: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PyValue::None,
            Value::String(s) => PyValue::Str(s.clone()),
            Value::Int(i) => PyValue::Int(*i),
            Value::Float(f) => PyValue::Float(*f),
            Value::Bool(b) => PyValue::Bool(*b),
            Value::Json(j) => Self::from_json(j),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Array(items) => {
                PyValue::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => PyValue::Dict(
                map.iter()
                    .map(|(k, v)| (PyValue::Str(k.clone()), Self::from_json(v)))
                    .collect(),
            ),
            other => Self::from_value(&Value::from_json(other)),
        }
    }

    /// Convert a result back into a pipeline value; `None` is unresolved
    pub fn into_value(self) -> Option<Value> {
        match self {
            PyValue::None => None,
            PyValue::Bool(b) => Some(Value::Bool(b)),
            PyValue::Int(i) => Some(Value::Int(i)),
            PyValue::Float(f) => Some(Value::Float(f)),
            PyValue::Str(s) => Some(Value::String(s)),
            other => Some(Value::Json(other.to_json())),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            PyValue::List(items) => {
                serde_json::Value::Array(items.iter().map(PyValue::to_json).collect())
            }
            PyValue::Dict(items) => serde_json::Value::Object(
                items.iter().map(|(k, v)| (k.to_str(), v.to_json())).collect(),
            ),
            other => other.clone().into_value().map(|v| v.to_json()).unwrap_or_default(),
        }
    }
}

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Short-circuit boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A parsed `py:` expression
#[derive(Debug, Clone, PartialEq)]
pub enum PyExpr {
    Constant(PyValue),
    /// Record field or the `record` namespace
    Name(String),
    /// `obj.attr`, only meaningful on `record`
    Attribute {
        object: Box<PyExpr>,
        name: String,
    },
    List(Vec<PyExpr>),
    Dict(Vec<(PyExpr, PyExpr)>),
    Negate(Box<PyExpr>),
    Not(Box<PyExpr>),
    Binary {
        left: Box<PyExpr>,
        op: BinOp,
        right: Box<PyExpr>,
    },
    Compare {
        left: Box<PyExpr>,
        op: CmpOp,
        right: Box<PyExpr>,
    },
    Bool {
        left: Box<PyExpr>,
        op: BoolOp,
        right: Box<PyExpr>,
    },
    /// `body if test else orelse`
    Conditional {
        body: Box<PyExpr>,
        test: Box<PyExpr>,
        orelse: Box<PyExpr>,
    },
    Index {
        object: Box<PyExpr>,
        index: Box<PyExpr>,
    },
    Slice {
        object: Box<PyExpr>,
        start: Option<Box<PyExpr>>,
        stop: Option<Box<PyExpr>>,
    },
    /// Whitelisted builtin call
    Call {
        func: String,
        args: Vec<PyExpr>,
    },
    /// Whitelisted method call
    Method {
        object: Box<PyExpr>,
        method: String,
        args: Vec<PyExpr>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!PyValue::None.truthy());
        assert!(!PyValue::Str(String::new()).truthy());
        assert!(PyValue::Str("0".into()).truthy());
        assert!(!PyValue::Int(0).truthy());
        assert!(!PyValue::List(vec![]).truthy());
    }

    #[test]
    fn test_str_and_repr() {
        assert_eq!(PyValue::Float(1.0).to_str(), "1.0");
        assert_eq!(PyValue::Bool(true).to_str(), "True");
        let list = PyValue::List(vec![PyValue::Str("a".into()), PyValue::Int(1)]);
        assert_eq!(list.to_str(), "['a', 1]");
    }

    #[test]
    fn test_into_value() {
        assert_eq!(PyValue::None.into_value(), None);
        assert_eq!(PyValue::Int(3).into_value(), Some(Value::Int(3)));
        let list = PyValue::List(vec![PyValue::Int(1)]);
        assert_eq!(list.into_value(), Some(Value::Json(serde_json::json!([1]))));
    }
}
