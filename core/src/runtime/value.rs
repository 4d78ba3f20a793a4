use std::fmt;
use std::sync::Arc;

use crate::codegen::Type;

use super::{ScriptFunction, ScriptObject};

/// Runtime value seen by generated units and adapters.
#[derive(Clone, Default)]
pub enum Val {
    #[default]
    Undefined,
    Bool(bool),
    Int(i32),
    Long(i64),
    Number(f64),
    Str(Arc<str>),
    Object(ScriptObject),
    Function(ScriptFunction),
}

impl Val {
    pub fn str(s: &str) -> Val {
        Val::Str(Arc::from(s))
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Val::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Undefined => "undefined",
            Val::Bool(_) => "boolean",
            Val::Int(_) | Val::Long(_) | Val::Number(_) => "number",
            Val::Str(_) => "string",
            Val::Object(_) => "object",
            Val::Function(_) => "function",
        }
    }

    /// Whether the value is representable as `ty` without loss.
    pub fn fits(&self, ty: Type) -> bool {
        match ty {
            Type::Object => true,
            Type::Int => matches!(self, Val::Int(_)),
            Type::Long => matches!(self, Val::Int(_) | Val::Long(_)),
            Type::Number => matches!(self, Val::Int(_) | Val::Long(_) | Val::Number(_)),
            Type::Boolean => matches!(self, Val::Bool(_)),
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Val::Undefined => f64::NAN,
            Val::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Val::Int(i) => f64::from(*i),
            Val::Long(l) => *l as f64,
            Val::Number(n) => *n,
            Val::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Val::Object(_) | Val::Function(_) => f64::NAN,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Long(l) => *l != 0,
            Val::Number(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::Object(_) | Val::Function(_) => true,
        }
    }

    /// Lossy conversion to `ty`, used where no speculation is in effect.
    pub fn coerce(&self, ty: Type) -> Val {
        match ty {
            Type::Object => self.clone(),
            Type::Boolean => Val::Bool(self.truthy()),
            Type::Number => match self {
                Val::Number(_) => self.clone(),
                other => Val::Number(other.to_number()),
            },
            Type::Int => match self {
                Val::Int(_) => self.clone(),
                other => Val::Int(to_int32(other.to_number())),
            },
            Type::Long => match self {
                Val::Long(_) => self.clone(),
                Val::Int(i) => Val::Long(i64::from(*i)),
                other => {
                    let n = other.to_number();
                    Val::Long(if n.is_finite() { n.trunc() as i64 } else { 0 })
                }
            },
        }
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    if modulo >= 2_147_483_648.0 {
        (modulo - 4_294_967_296.0) as i32
    } else {
        modulo as i32
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Undefined, Val::Undefined) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Long(a), Val::Long(b)) => a == b,
            (Val::Number(a), Val::Number(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Object(a), Val::Object(b)) => a.ptr_eq(b),
            (Val::Function(a), Val::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

// Objects are printed by identity only; scope chains can be long and cyclic through globals.
impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Undefined => f.write_str("undefined"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Int(i) => write!(f, "{i}"),
            Val::Long(l) => write!(f, "{l}L"),
            Val::Number(n) => write!(f, "{n:?}"),
            Val::Str(s) => write!(f, "{s:?}"),
            Val::Object(o) => write!(f, "[object #{}]", o.id()),
            Val::Function(func) => write!(f, "[function {}]", func.name()),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => f.write_str(s),
            Val::Number(n) => write!(f, "{n}"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<i32> for Val {
    fn from(value: i32) -> Self {
        Val::Int(value)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Number(value)
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Bool(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::str(value)
    }
}

impl From<ScriptObject> for Val {
    fn from(value: ScriptObject) -> Self {
        Val::Object(value)
    }
}

impl From<ScriptFunction> for Val {
    fn from(value: ScriptFunction) -> Self {
        Val::Function(value)
    }
}
