//! Signatures of the built-in classes.
//!
//! The native checker uses these tables to validate calls ahead of time and
//! the interpreter implements exactly the members listed here.

use super::ast::TypeRef;

/// Return type of a built-in member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returns {
    Type(TypeRef),
    /// Binary numeric promotion of the arguments (`Math.max`)
    ArgPromotion,
}

use Returns::{ArgPromotion, Type};

/// Non-throwable built-in classes that may be named in source
pub const CLASSES: &[&str] = &[
    "Object",
    "String",
    "System",
    "Math",
    "Integer",
    "Long",
    "Double",
    "Boolean",
    "Character",
    "Thread",
];

/// Built-in throwables and their superclass
const THROWABLES: &[(&str, Option<&str>)] = &[
    ("Throwable", None),
    ("Exception", Some("Throwable")),
    ("Error", Some("Throwable")),
    ("RuntimeException", Some("Exception")),
    ("ArithmeticException", Some("RuntimeException")),
    ("NullPointerException", Some("RuntimeException")),
    ("IndexOutOfBoundsException", Some("RuntimeException")),
    ("ArrayIndexOutOfBoundsException", Some("IndexOutOfBoundsException")),
    ("StringIndexOutOfBoundsException", Some("IndexOutOfBoundsException")),
    ("IllegalArgumentException", Some("RuntimeException")),
    ("NumberFormatException", Some("IllegalArgumentException")),
    ("IllegalStateException", Some("RuntimeException")),
    ("NegativeArraySizeException", Some("RuntimeException")),
    ("ClassCastException", Some("RuntimeException")),
    ("SecurityException", Some("RuntimeException")),
    ("UnsupportedOperationException", Some("RuntimeException")),
    ("IllegalAccessException", Some("Exception")),
    ("InvocationTargetException", Some("Exception")),
    ("StackOverflowError", Some("Error")),
    ("OutOfMemoryError", Some("Error")),
    ("NoSuchFieldError", Some("Error")),
    ("NoSuchMethodError", Some("Error")),
];

pub fn is_throwable(name: &str) -> bool {
    THROWABLES.iter().any(|(n, _)| *n == name)
}

fn parent(name: &str) -> Option<&'static str> {
    THROWABLES
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, p)| *p)
}

/// Whether `sub` is `sup` or one of its descendants
pub fn is_subclass(sub: &str, sup: &str) -> bool {
    if sub == sup || sup == "Object" {
        return true;
    }
    let mut current = parent(sub);
    while let Some(name) = current {
        if name == sup {
            return true;
        }
        current = parent(name);
    }
    false
}

/// Any class name the language knows without a user declaration
pub fn is_builtin_class(name: &str) -> bool {
    CLASSES.contains(&name) || is_throwable(name)
}

pub fn static_field(class: &str, name: &str) -> Option<TypeRef> {
    let ty = match (class, name) {
        ("System", "out" | "err") => TypeRef::Named("PrintStream".into()),
        ("Integer", "MAX_VALUE" | "MIN_VALUE") => TypeRef::Int,
        ("Long", "MAX_VALUE" | "MIN_VALUE") => TypeRef::Long,
        ("Double", "MAX_VALUE" | "MIN_VALUE") => TypeRef::Double,
        ("Math", "PI" | "E") => TypeRef::Double,
        _ => return None,
    };
    Some(ty)
}

pub fn static_method(class: &str, name: &str, arity: usize) -> Option<Returns> {
    let returns = match (class, name, arity) {
        ("System", "currentTimeMillis" | "nanoTime", 0) => Type(TypeRef::Long),
        ("System", "exit", 1) => Type(TypeRef::Void),
        ("System", "lineSeparator", 0) => Type(TypeRef::string()),
        ("Math", "abs", 1) | ("Math", "max" | "min", 2) => ArgPromotion,
        ("Math", "pow", 2) | ("Math", "sqrt" | "floor" | "ceil", 1) => Type(TypeRef::Double),
        ("Math", "round", 1) => Type(TypeRef::Long),
        ("Integer", "parseInt" | "valueOf", 1) => Type(TypeRef::Int),
        ("Long", "parseLong" | "valueOf", 1) => Type(TypeRef::Long),
        ("Double", "parseDouble" | "valueOf", 1) => Type(TypeRef::Double),
        ("Boolean", "parseBoolean", 1) => Type(TypeRef::Boolean),
        ("Integer" | "Long" | "Double" | "Boolean" | "Character" | "String", "toString", 1)
        | ("String", "valueOf", 1) => Type(TypeRef::string()),
        ("Character", "isDigit" | "isLetter" | "isWhitespace", 1) => Type(TypeRef::Boolean),
        ("Character", "toUpperCase" | "toLowerCase", 1) => Type(TypeRef::Char),
        ("Thread", "sleep", 1) => Type(TypeRef::Void),
        _ => return None,
    };
    Some(returns)
}

/// Members of `System.out` and `System.err`
pub fn print_method(name: &str, arity: usize) -> Option<TypeRef> {
    match (name, arity) {
        ("print", 1) | ("println", 0 | 1) | ("flush", 0) => Some(TypeRef::Void),
        _ => None,
    }
}

pub fn string_method(name: &str, arity: usize) -> Option<TypeRef> {
    let ty = match (name, arity) {
        ("length" | "hashCode", 0) | ("indexOf" | "compareTo", 1) => TypeRef::Int,
        ("charAt", 1) => TypeRef::Char,
        ("isEmpty", 0)
        | ("contains" | "equals" | "equalsIgnoreCase" | "startsWith" | "endsWith", 1) => {
            TypeRef::Boolean
        }
        ("toUpperCase" | "toLowerCase" | "trim" | "toString", 0)
        | ("substring", 1 | 2)
        | ("concat" | "repeat", 1)
        | ("replace", 2) => TypeRef::string(),
        ("split", 1) => TypeRef::string().array_of(),
        ("toCharArray", 0) => TypeRef::Char.array_of(),
        _ => return None,
    };
    Some(ty)
}

pub fn throwable_method(name: &str, arity: usize) -> Option<TypeRef> {
    match (name, arity) {
        ("getMessage" | "toString", 0) => Some(TypeRef::string()),
        ("getCause", 0) => Some(TypeRef::Named("Throwable".into())),
        _ => object_method(name, arity),
    }
}

/// Members every object answers
pub fn object_method(name: &str, arity: usize) -> Option<TypeRef> {
    match (name, arity) {
        ("toString", 0) => Some(TypeRef::string()),
        ("equals", 1) => Some(TypeRef::Boolean),
        ("hashCode", 0) => Some(TypeRef::Int),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throwable_hierarchy() {
        assert!(is_subclass("ArithmeticException", "RuntimeException"));
        assert!(is_subclass("ArithmeticException", "Throwable"));
        assert!(is_subclass("NumberFormatException", "IllegalArgumentException"));
        assert!(!is_subclass("StackOverflowError", "Exception"));
        assert!(!is_subclass("Exception", "RuntimeException"));
        assert!(is_subclass("Question", "Object"));
    }

    #[test]
    fn static_lookups() {
        assert_eq!(static_method("Math", "max", 2), Some(Returns::ArgPromotion));
        assert_eq!(static_method("Math", "max", 1), None);
        assert_eq!(
            static_method("Integer", "parseInt", 1),
            Some(Returns::Type(TypeRef::Int))
        );
        assert_eq!(static_field("Integer", "MAX_VALUE"), Some(TypeRef::Int));
        assert!(is_builtin_class("Thread"));
        assert!(!is_builtin_class("Scanner"));
    }
}
