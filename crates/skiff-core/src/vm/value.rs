//! Runtime values

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::capture::Channel;
use crate::lang::ast::TypeRef;

use super::throwable::Throwable;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Rc<str>),
    Array(Rc<Array>),
    Object(Rc<Object>),
    Throwable(Rc<Throwable>),
    /// `System.out` or `System.err`
    Stream(Channel),
}

#[derive(Debug)]
pub struct Array {
    pub elem: TypeRef,
    pub items: RefCell<Vec<Value>>,
}

#[derive(Debug)]
pub struct Object {
    pub class: String,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Zero value of a field or array element of type `ty`
    pub const fn default_for(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Int => Self::Int(0),
            TypeRef::Long => Self::Long(0),
            TypeRef::Double => Self::Double(0.0),
            TypeRef::Boolean => Self::Bool(false),
            TypeRef::Char => Self::Char('\0'),
            _ => Self::Null,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the value's runtime type, as used in error messages
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "boolean".into(),
            Self::Char(_) => "char".into(),
            Self::Int(_) => "int".into(),
            Self::Long(_) => "long".into(),
            Self::Double(_) => "double".into(),
            Self::Str(_) => "String".into(),
            Self::Array(array) => format!("{}[]", array.elem_display()),
            Self::Object(object) => object.class.clone(),
            Self::Throwable(t) => t.class.clone(),
            Self::Stream(_) => "PrintStream".into(),
        }
    }

    /// Identity hash of a reference value
    pub fn identity(&self) -> i32 {
        let addr = match self {
            Self::Str(s) => Rc::as_ptr(s).cast::<u8>() as usize,
            Self::Array(a) => Rc::as_ptr(a) as usize,
            Self::Object(o) => Rc::as_ptr(o) as usize,
            Self::Throwable(t) => Rc::as_ptr(t) as usize,
            _ => 0,
        };
        #[allow(clippy::cast_possible_truncation)]
        let folded = ((addr >> 4) ^ (addr >> 36)) as u32;
        i32::from_ne_bytes(folded.to_ne_bytes()) & i32::MAX
    }

    /// Reference equality, value equality for primitives and strings
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Throwable(a), Self::Throwable(b)) => Rc::ptr_eq(a, b),
            (Self::Stream(a), Self::Stream(b)) => a == b,
            (a, b) => match (Num::of(a), Num::of(b)) {
                (Some(x), Some(y)) => {
                    let (x, y) = x.promote_with(y);
                    x.eq_num(y)
                }
                _ => false,
            },
        }
    }

    /// Convert for storage in a slot of type `ty`
    pub fn coerce(self, ty: &TypeRef) -> Self {
        match (ty, self) {
            (TypeRef::Long, Self::Int(v)) => Self::Long(i64::from(v)),
            (TypeRef::Long, Self::Char(c)) => Self::Long(i64::from(u32::from(c))),
            (TypeRef::Double, Self::Int(v)) => Self::Double(f64::from(v)),
            #[allow(clippy::cast_precision_loss)]
            (TypeRef::Double, Self::Long(v)) => Self::Double(v as f64),
            (TypeRef::Double, Self::Char(c)) => Self::Double(f64::from(u32::from(c))),
            (TypeRef::Int, Self::Char(c)) => Self::Int(char_code(c)),
            (TypeRef::Char, Self::Int(v)) => Self::Char(code_char(i64::from(v))),
            (_, value) => value,
        }
    }
}

impl Array {
    pub fn elem_display(&self) -> String {
        self.elem.to_string()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }
}

pub fn char_code(c: char) -> i32 {
    i32::try_from(u32::from(c)).unwrap_or(i32::MAX)
}

/// Character for a 16-bit code unit, lone surrogates become U+FFFD
pub fn code_char(code: i64) -> char {
    let unit = u32::try_from(code & 0xFFFF).unwrap_or(0);
    char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// A value taking part in arithmetic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i32),
    Long(i64),
    Double(f64),
}

impl Num {
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(Self::Int(*v)),
            Value::Char(c) => Some(Self::Int(char_code(*c))),
            Value::Long(v) => Some(Self::Long(*v)),
            Value::Double(v) => Some(Self::Double(*v)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_double(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Long(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    pub const fn as_long(self) -> i64 {
        match self {
            Self::Int(v) => v as i64,
            Self::Long(v) => v,
            #[allow(clippy::cast_possible_truncation)]
            Self::Double(v) => v as i64,
        }
    }

    /// Binary numeric promotion, pairs converted to the wider kind
    pub const fn promote_with(self, other: Self) -> (Self, Self) {
        match (self, other) {
            (Self::Double(_), _) | (_, Self::Double(_)) => {
                (Self::Double(self.as_double()), Self::Double(other.as_double()))
            }
            (Self::Long(_), _) | (_, Self::Long(_)) => (Self::Long(self.as_long()), Self::Long(other.as_long())),
            (Self::Int(_), Self::Int(_)) => (self, other),
        }
    }

    fn eq_num(self, other: Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Double(a), Self::Double(b)) => a == b,
            _ => false,
        }
    }

    pub const fn into_value(self) -> Value {
        match self {
            Self::Int(v) => Value::Int(v),
            Self::Long(v) => Value::Long(v),
            Self::Double(v) => Value::Double(v),
        }
    }
}

/// `Double.toString` formatting
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".into();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0.0" } else { "0.0" }.into();
    }
    let abs = d.abs();
    if (1e-3..1e7).contains(&abs) {
        let plain = format!("{d}");
        if plain.contains('.') {
            plain
        } else {
            plain + ".0"
        }
    } else {
        let sci = format!("{d:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
        if mantissa.contains('.') {
            format!("{mantissa}E{exponent}")
        } else {
            format!("{mantissa}.0E{exponent}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_print_like_java() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_double(1e7), "1.0E7");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(-0.0), "-0.0");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(123_456.5), "123456.5");
    }

    #[test]
    fn coercion_widens() {
        assert!(matches!(Value::Int(3).coerce(&TypeRef::Long), Value::Long(3)));
        assert!(matches!(Value::Char('a').coerce(&TypeRef::Int), Value::Int(97)));
        assert!(matches!(Value::Int(98).coerce(&TypeRef::Char), Value::Char('b')));
        assert!(matches!(Value::Long(2).coerce(&TypeRef::Double), Value::Double(v) if v == 2.0));
    }

    #[test]
    fn equality_promotes_numbers() {
        assert!(Value::Int(2).same(&Value::Long(2)));
        assert!(Value::Char('a').same(&Value::Int(97)));
        assert!(!Value::Int(1).same(&Value::Bool(true)));
        assert!(Value::str("x").same(&Value::str("x")));
    }
}
