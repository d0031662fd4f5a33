//! Built-in classes and members, as listed in `lang::library`

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::capture::{self, Channel};
use crate::lang::ast::TypeRef;
use crate::permission::Capability;

use super::interp::{Abort, Exec, Interpreter};
use super::throwable::Throwable;
use super::value::{code_char, Array, Num, Object, Value};

fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// `String.trim`: strip code points up to and including space
fn java_trim(s: &str) -> &str {
    s.trim_matches(|c: char| c <= ' ')
}

fn char_array(chars: impl Iterator<Item = char>) -> Value {
    Value::Array(Rc::new(Array {
        elem: TypeRef::Char,
        items: RefCell::new(chars.map(Value::Char).collect()),
    }))
}

fn string_array(parts: Vec<String>) -> Value {
    Value::Array(Rc::new(Array {
        elem: TypeRef::string(),
        items: RefCell::new(parts.into_iter().map(Value::str).collect()),
    }))
}

/// Literal split, except `\s+` which splits on runs of whitespace
fn split(s: &str, pattern: &str) -> Vec<String> {
    if s.is_empty() {
        return vec![String::new()];
    }
    let mut parts: Vec<String> = if pattern == "\\s+" {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_gap = false;
        for c in s.chars() {
            if c.is_whitespace() {
                if !in_gap {
                    parts.push(std::mem::take(&mut current));
                }
                in_gap = true;
            } else {
                current.push(c);
                in_gap = false;
            }
        }
        parts.push(current);
        parts
    } else if pattern.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(pattern).map(str::to_string).collect()
    };
    while parts.len() > 1 && parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    parts
}

fn compare_strings(a: &str, b: &str) -> i32 {
    let (a, b): (Vec<u16>, Vec<u16>) = (a.encode_utf16().collect(), b.encode_utf16().collect());
    for (x, y) in a.iter().zip(&b) {
        if x != y {
            return i32::from(*x) - i32::from(*y);
        }
    }
    let diff = i64::try_from(a.len()).unwrap_or(i64::MAX) - i64::try_from(b.len()).unwrap_or(i64::MAX);
    i32::try_from(diff).unwrap_or(0)
}

fn to_index(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

impl Interpreter<'_> {
    fn str_arg(&self, value: &Value) -> Exec<Rc<str>> {
        match value {
            Value::Str(s) => Ok(Rc::clone(s)),
            Value::Null => Err(self.npe("read the string argument")),
            other => Err(self.type_error(other, "String")),
        }
    }

    fn double_arg(&self, value: &Value) -> Exec<f64> {
        Num::of(value)
            .map(Num::as_double)
            .ok_or_else(|| self.type_error(value, "double"))
    }

    fn long_arg(&self, value: &Value) -> Exec<i64> {
        match Num::of(value) {
            Some(n @ (Num::Int(_) | Num::Long(_))) => Ok(n.as_long()),
            _ => Err(self.type_error(value, "long")),
        }
    }

    fn char_arg(&self, value: &Value) -> Exec<char> {
        match value {
            Value::Char(c) => Ok(*c),
            Value::Int(v) => Ok(code_char(i64::from(*v))),
            other => Err(self.type_error(other, "char")),
        }
    }

    /// A `char` or `String` argument as text
    fn text_arg(&self, value: &Value) -> Exec<String> {
        match value {
            Value::Char(c) => Ok(c.to_string()),
            other => self.str_arg(other).map(|s| s.to_string()),
        }
    }

    fn no_such_method(&self, owner: &str, name: &str) -> Abort {
        self.throw("NoSuchMethodError", format!("{owner}.{name}"))
    }

    fn number_format(&self, input: &str) -> Abort {
        self.throw("NumberFormatException", format!("For input string: \"{input}\""))
    }

    pub(super) fn builtin_static_field(&self, class: &str, name: &str) -> Option<Value> {
        let value = match (class, name) {
            ("System", "out") => Value::Stream(Channel::Out),
            ("System", "err") => Value::Stream(Channel::Err),
            ("Integer", "MAX_VALUE") => Value::Int(i32::MAX),
            ("Integer", "MIN_VALUE") => Value::Int(i32::MIN),
            ("Long", "MAX_VALUE") => Value::Long(i64::MAX),
            ("Long", "MIN_VALUE") => Value::Long(i64::MIN),
            ("Double", "MAX_VALUE") => Value::Double(f64::MAX),
            ("Double", "MIN_VALUE") => Value::Double(f64::from_bits(1)),
            ("Math", "PI") => Value::Double(std::f64::consts::PI),
            ("Math", "E") => Value::Double(std::f64::consts::E),
            _ => return None,
        };
        Some(value)
    }

    #[allow(clippy::too_many_lines)]
    pub(super) fn call_static(&mut self, class: &str, name: &str, args: Vec<Value>) -> Exec<Value> {
        self.tick()?;
        let arg = args.first().cloned().unwrap_or(Value::Null);
        match (class, name, args.len()) {
            ("System", "currentTimeMillis", 0) => Ok(Value::Long(chrono::Utc::now().timestamp_millis())),
            ("System", "nanoTime", 0) => Ok(Value::Long(
                i64::try_from(self.started.elapsed().as_nanos()).unwrap_or(i64::MAX),
            )),
            ("System", "lineSeparator", 0) => Ok(Value::str("\n")),
            ("System", "exit", 1) => {
                let status = self.int_value(&arg)?;
                if self.permissions.check(Capability::ProcessControl).is_err() {
                    return Err(self.throw("SecurityException", "access denied (process-control)"));
                }
                tracing::debug!(status, "program requested exit");
                Err(Abort::Exit(status))
            }
            ("Thread", "sleep", 1) => {
                let millis = self.long_arg(&arg)?;
                let Ok(millis) = u64::try_from(millis) else {
                    return Err(self.throw("IllegalArgumentException", "timeout value is negative"));
                };
                if self.kill.sleep(Duration::from_millis(millis)) {
                    return Err(Abort::Killed);
                }
                Ok(Value::Null)
            }
            ("Math", "abs", 1) => match Num::of(&arg) {
                Some(Num::Int(v)) => Ok(Value::Int(v.wrapping_abs())),
                Some(Num::Long(v)) => Ok(Value::Long(v.wrapping_abs())),
                Some(Num::Double(v)) => Ok(Value::Double(v.abs())),
                None => Err(self.type_error(&arg, "a numeric type")),
            },
            ("Math", "max" | "min", 2) => {
                let (Some(a), Some(b)) = (Num::of(&args[0]), Num::of(&args[1])) else {
                    return Err(self.type_error(&arg, "a numeric type"));
                };
                let max = name == "max";
                Ok(match a.promote_with(b) {
                    (Num::Int(x), Num::Int(y)) => Value::Int(if max { x.max(y) } else { x.min(y) }),
                    (Num::Long(x), Num::Long(y)) => Value::Long(if max { x.max(y) } else { x.min(y) }),
                    (x, y) => {
                        let (x, y) = (x.as_double(), y.as_double());
                        Value::Double(if x.is_nan() || y.is_nan() {
                            f64::NAN
                        } else if max {
                            x.max(y)
                        } else {
                            x.min(y)
                        })
                    }
                })
            }
            ("Math", "pow", 2) => {
                let base = self.double_arg(&args[0])?;
                let exponent = self.double_arg(&args[1])?;
                Ok(Value::Double(base.powf(exponent)))
            }
            ("Math", "sqrt", 1) => Ok(Value::Double(self.double_arg(&arg)?.sqrt())),
            ("Math", "floor", 1) => Ok(Value::Double(self.double_arg(&arg)?.floor())),
            ("Math", "ceil", 1) => Ok(Value::Double(self.double_arg(&arg)?.ceil())),
            #[allow(clippy::cast_possible_truncation)]
            ("Math", "round", 1) => Ok(Value::Long((self.double_arg(&arg)? + 0.5).floor() as i64)),
            ("Integer", "parseInt" | "valueOf", 1) => {
                let text = self.str_arg(&arg)?;
                text.parse::<i32>()
                    .map(Value::Int)
                    .map_err(|_| self.number_format(&text))
            }
            ("Long", "parseLong" | "valueOf", 1) => {
                let text = self.str_arg(&arg)?;
                text.parse::<i64>()
                    .map(Value::Long)
                    .map_err(|_| self.number_format(&text))
            }
            ("Double", "parseDouble" | "valueOf", 1) => {
                let text = self.str_arg(&arg)?;
                let trimmed = java_trim(&text);
                let parsed = match trimmed {
                    "NaN" => Some(f64::NAN),
                    "Infinity" | "+Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    // Rust also accepts `inf` and `nan` spellings
                    _ if trimmed.to_ascii_lowercase().contains(['i', 'n']) => None,
                    _ => trimmed.parse::<f64>().ok(),
                };
                parsed.map(Value::Double).ok_or_else(|| self.number_format(&text))
            }
            ("Boolean", "parseBoolean", 1) => Ok(Value::Bool(match &arg {
                Value::Str(s) => s.eq_ignore_ascii_case("true"),
                _ => false,
            })),
            ("Integer" | "Long" | "Double" | "Boolean" | "Character" | "String", "toString", 1)
            | ("String", "valueOf", 1) => Ok(Value::str(self.stringify(&arg)?)),
            ("Character", "isDigit", 1) => Ok(Value::Bool(self.char_arg(&arg)?.is_numeric())),
            ("Character", "isLetter", 1) => Ok(Value::Bool(self.char_arg(&arg)?.is_alphabetic())),
            ("Character", "isWhitespace", 1) => Ok(Value::Bool(self.char_arg(&arg)?.is_whitespace())),
            ("Character", "toUpperCase", 1) => {
                let c = self.char_arg(&arg)?;
                Ok(Value::Char(c.to_uppercase().next().unwrap_or(c)))
            }
            ("Character", "toLowerCase", 1) => {
                let c = self.char_arg(&arg)?;
                Ok(Value::Char(c.to_lowercase().next().unwrap_or(c)))
            }
            _ => Err(self.no_such_method(class, name)),
        }
    }

    /// `new` on a class that is not user-declared
    pub(super) fn new_builtin(&mut self, class: &str, args: Vec<Value>) -> Exec<Value> {
        if crate::lang::library::is_throwable(class) {
            let (message, cause) = match args.as_slice() {
                [] => (None, None),
                [Value::Throwable(cause)] => (Some(cause.summary()), Some(cause)),
                [Value::Null] => (None, None),
                [message] => (Some(self.str_arg(message)?.to_string()), None),
                [message, cause] => {
                    let message = match message {
                        Value::Null => None,
                        other => Some(self.str_arg(other)?.to_string()),
                    };
                    match cause {
                        Value::Throwable(cause) => (message, Some(cause)),
                        Value::Null => (message, None),
                        other => return Err(self.type_error(other, "Throwable")),
                    }
                }
                _ => return Err(self.no_such_method(class, "<init>")),
            };
            let mut throwable = self.throwable(class, message);
            if let Some(cause) = cause {
                throwable = throwable.with_cause(Throwable::clone(cause));
            }
            return Ok(Value::Throwable(Rc::new(throwable)));
        }
        match (class, args.as_slice()) {
            ("Object", []) => Ok(Value::Object(Rc::new(Object {
                class: "Object".into(),
                fields: RefCell::new(std::collections::HashMap::new()),
            }))),
            ("String", []) => Ok(Value::str("")),
            ("String", [Value::Str(s)]) => Ok(Value::str(s.as_ref())),
            ("String", [Value::Array(chars)]) if chars.elem == TypeRef::Char => {
                let text: String = chars
                    .items
                    .borrow()
                    .iter()
                    .filter_map(|v| match v {
                        Value::Char(c) => Some(*c),
                        _ => None,
                    })
                    .collect();
                Ok(Value::str(text))
            }
            _ => Err(self.no_such_method(class, "<init>")),
        }
    }

    pub(super) fn print_method(&mut self, channel: Channel, name: &str, args: Vec<Value>) -> Exec<Value> {
        self.tick()?;
        let text = match (name, args.as_slice()) {
            ("print", [value]) => self.stringify(value)?,
            ("println", []) => "\n".to_string(),
            ("println", [value]) => {
                let mut text = self.stringify(value)?;
                text.push('\n');
                text
            }
            ("flush", []) => return Ok(Value::Null),
            _ => return Err(self.no_such_method("PrintStream", name)),
        };
        capture::emit(channel, text.as_bytes(), &self.kill).map_err(|_| Abort::Killed)?;
        Ok(Value::Null)
    }

    fn string_index(&self, index: i32, len: usize) -> Abort {
        self.throw(
            "StringIndexOutOfBoundsException",
            format!("Index {index} out of bounds for length {len}"),
        )
    }

    #[allow(clippy::too_many_lines)]
    pub(super) fn string_method(&mut self, s: &Rc<str>, name: &str, args: Vec<Value>) -> Exec<Value> {
        self.tick()?;
        let chars: Vec<char> = s.chars().collect();
        let arg = args.first().cloned().unwrap_or(Value::Null);
        let value = match (name, args.len()) {
            ("length", 0) => Value::Int(to_index(chars.len())),
            ("hashCode", 0) => Value::Int(java_hash(s)),
            ("isEmpty", 0) => Value::Bool(s.is_empty()),
            ("toString", 0) => Value::Str(Rc::clone(s)),
            ("toUpperCase", 0) => Value::str(s.to_uppercase()),
            ("toLowerCase", 0) => Value::str(s.to_lowercase()),
            ("trim", 0) => Value::str(java_trim(s)),
            ("toCharArray", 0) => char_array(chars.into_iter()),
            ("charAt", 1) => {
                let index = self.int_value(&arg)?;
                match usize::try_from(index).ok().and_then(|i| chars.get(i)) {
                    Some(c) => Value::Char(*c),
                    None => return Err(self.string_index(index, chars.len())),
                }
            }
            ("substring", 1 | 2) => {
                let begin = self.int_value(&arg)?;
                let end = match args.get(1) {
                    Some(end) => self.int_value(end)?,
                    None => to_index(chars.len()),
                };
                let range = usize::try_from(begin)
                    .ok()
                    .zip(usize::try_from(end).ok())
                    .filter(|(b, e)| b <= e && *e <= chars.len());
                let Some((b, e)) = range else {
                    return Err(self.throw(
                        "StringIndexOutOfBoundsException",
                        format!("begin {begin}, end {end}, length {}", chars.len()),
                    ));
                };
                Value::str(chars[b..e].iter().collect::<String>())
            }
            ("indexOf", 1) => {
                let needle = self.text_arg(&arg)?;
                Value::Int(
                    s.find(needle.as_str())
                        .map_or(-1, |byte| to_index(s[..byte].chars().count())),
                )
            }
            ("compareTo", 1) => Value::Int(compare_strings(s, &self.str_arg(&arg)?)),
            ("contains", 1) => Value::Bool(s.contains(&*self.str_arg(&arg)?)),
            ("startsWith", 1) => Value::Bool(s.starts_with(&*self.str_arg(&arg)?)),
            ("endsWith", 1) => Value::Bool(s.ends_with(&*self.str_arg(&arg)?)),
            ("equals", 1) => Value::Bool(matches!(&arg, Value::Str(other) if **other == **s)),
            ("equalsIgnoreCase", 1) => Value::Bool(match &arg {
                Value::Str(other) => other.to_lowercase() == s.to_lowercase(),
                _ => false,
            }),
            ("concat", 1) => {
                let tail = self.str_arg(&arg)?;
                self.string_fits(s.len().saturating_add(tail.len()))?;
                Value::str(format!("{s}{tail}"))
            }
            ("repeat", 1) => {
                let count = self.int_value(&arg)?;
                let Ok(count) = usize::try_from(count) else {
                    return Err(self.throw("IllegalArgumentException", format!("count is negative: {count}")));
                };
                self.string_fits(s.len().saturating_mul(count))?;
                Value::str(s.repeat(count))
            }
            ("replace", 2) => {
                let from = self.text_arg(&arg)?;
                let to = self.text_arg(&args[1])?;
                let hits = s.matches(from.as_str()).count();
                let len = (s.len() - hits * from.len()).saturating_add(hits.saturating_mul(to.len()));
                self.string_fits(len)?;
                Value::str(s.replace(from.as_str(), &to))
            }
            ("split", 1) => string_array(split(s, &self.str_arg(&arg)?)),
            _ => return self.object_method(&Value::Str(Rc::clone(s)), name, args),
        };
        Ok(value)
    }

    pub(super) fn throwable_method(&mut self, t: &Rc<Throwable>, name: &str, args: Vec<Value>) -> Exec<Value> {
        match (name, args.len()) {
            ("getMessage", 0) => Ok(t.message.as_deref().map_or(Value::Null, Value::str)),
            ("toString", 0) => Ok(Value::str(t.summary())),
            ("getCause", 0) => Ok(t
                .cause
                .as_deref()
                .map_or(Value::Null, |cause| Value::Throwable(Rc::new(cause.clone())))),
            _ => self.object_method(&Value::Throwable(Rc::clone(t)), name, args),
        }
    }

    /// Members every value answers
    pub(super) fn object_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Exec<Value> {
        match (name, args.as_slice()) {
            ("toString", []) => Ok(Value::str(self.stringify(receiver)?)),
            ("equals", [other]) => Ok(Value::Bool(receiver.same(other))),
            ("hashCode", []) => Ok(Value::Int(match receiver {
                Value::Str(s) => java_hash(s),
                other => other.identity(),
            })),
            _ => Err(self.no_such_method(&receiver.type_name(), name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::interp::tests::run_in;
    use super::super::interp::Completion;
    use super::*;
    use crate::permission::PermissionSet;

    fn output_of(body: &str) -> String {
        let text = format!("public class Question {{\n    public static void main(String[] args) {{\n{body}\n    }}\n}}\n");
        let (completion, output) = run_in(&text, PermissionSet::minimal());
        assert_eq!(completion, Completion::Returned, "output so far: {output}");
        output
    }

    #[test]
    fn splitting() {
        assert_eq!(split("a,b,,c,,", ","), vec!["a", "b", "", "c"]);
        assert_eq!(split("  two   words ", "\\s+"), vec!["", "two", "words"]);
        assert_eq!(split("", ","), vec![""]);
    }

    #[test]
    fn hashes_match_java() {
        assert_eq!(java_hash(""), 0);
        assert_eq!(java_hash("hello"), 99_162_322);
        assert_eq!(compare_strings("apple", "banana"), -1);
        assert_eq!(compare_strings("ab", "abc"), -1);
    }

    #[test]
    fn string_members() {
        assert_eq!(
            output_of("String s = \"  Skiff  \".trim(); System.out.println(s + s.indexOf('f') + s.replace(\"f\", \"ph\") + s.equals(\"Skiff\"));"),
            "Skiff3Skiphphtrue\n"
        );
        assert_eq!(
            output_of("String[] parts = \"x y  z\".split(\"\\\\s+\"); System.out.println(parts.length + parts[2]);"),
            "3z\n"
        );
    }

    #[test]
    fn parse_failures_throw() {
        let text = "public class Question { public static void main(String[] a) { Integer.parseInt(\"12x\"); } }";
        match run_in(text, PermissionSet::minimal()).0 {
            Completion::Threw(t) => {
                assert_eq!(t.unwrap_invocation().summary(), "NumberFormatException: For input string: \"12x\"");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn math_and_wrappers() {
        assert_eq!(
            output_of("System.out.println(Math.max(3, 7L) + \" \" + Math.abs(-2.5) + \" \" + Math.round(2.5) + \" \" + Integer.parseInt(\"-41\"));"),
            "7 2.5 3 -41\n"
        );
    }

    #[test]
    fn string_growth_is_bounded() {
        assert_eq!(
            output_of("String s = \"ab\"; try { for (int i = 0; i < 20; i++) { s = s + s; } } catch (OutOfMemoryError e) { System.out.println(s.length() + \" \" + e.getMessage()); }"),
            "65536 Requested string length exceeds VM limit\n"
        );
        for grow in ["s.concat(s)", "s.replace(\"a\", \"aa\")", "s.repeat(2)"] {
            let body = format!("String s = \"a\".repeat(40000); try {{ {grow}; }} catch (OutOfMemoryError e) {{ System.out.print(\"refused\"); }}");
            assert_eq!(output_of(&body), "refused", "{grow}");
        }
    }

    #[test]
    fn both_channels_are_captured() {
        assert_eq!(output_of("System.out.print(\"a\"); System.err.print(\"b\"); System.out.println();"), "ab\n");
    }
}
