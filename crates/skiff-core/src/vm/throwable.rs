//! Exceptions raised by executed code

use std::fmt::{self, Write as _};

/// One frame of a captured stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceElement {
    pub class: String,
    pub method: String,
    pub unit: String,
    pub line: u32,
}

impl fmt::Display for TraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({}:{})", self.class, self.method, self.unit, self.line)
    }
}

/// A thrown value, immutable once constructed
///
/// Plain data so that it can leave the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    pub class: String,
    pub message: Option<String>,
    pub trace: Vec<TraceElement>,
    pub cause: Option<Box<Throwable>>,
}

pub const INVOCATION_TARGET: &str = "InvocationTargetException";

impl Throwable {
    pub fn new(class: impl Into<String>, message: Option<String>, trace: Vec<TraceElement>) -> Self {
        Self {
            class: class.into(),
            message,
            trace,
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wraps an exception that escaped a reflectively invoked method
    pub fn invocation_target(cause: Self) -> Self {
        Self::new(INVOCATION_TARGET, None, Vec::new()).with_cause(cause)
    }

    /// Peel off exactly one invocation envelope, if present
    #[must_use]
    pub fn unwrap_invocation(self) -> Self {
        match self {
            Self {
                ref class,
                cause: Some(cause),
                ..
            } if class == INVOCATION_TARGET => *cause,
            other => other,
        }
    }

    /// `Class: message`, or just the class without a message
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {message}", self.class),
            None => self.class.clone(),
        }
    }

    /// Stack trace text with frames and the cause chain
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current = Some(self);
        let mut first = true;
        while let Some(throwable) = current {
            if !first {
                out.push_str("Caused by: ");
            }
            first = false;
            let _ = writeln!(out, "{}", throwable.summary());
            for frame in &throwable.trace {
                let _ = writeln!(out, "\tat {frame}");
            }
            current = throwable.cause.as_deref();
        }
        out
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(method: &str, line: u32) -> TraceElement {
        TraceElement {
            class: "Question".into(),
            method: method.into(),
            unit: "Question.java".into(),
            line,
        }
    }

    #[test]
    fn renders_frames_and_causes() {
        let root = Throwable::new("IllegalStateException", Some("inner".into()), vec![frame("helper", 7)]);
        let outer = Throwable::new("RuntimeException", Some("outer".into()), vec![frame("main", 3)])
            .with_cause(root);
        assert_eq!(
            outer.render(),
            "RuntimeException: outer\n\tat Question.main(Question.java:3)\n\
             Caused by: IllegalStateException: inner\n\tat Question.helper(Question.java:7)\n"
        );
    }

    #[test]
    fn unwraps_one_envelope() {
        let inner = Throwable::new("ArithmeticException", Some("/ by zero".into()), vec![]);
        let twice = Throwable::invocation_target(Throwable::invocation_target(inner.clone()));
        let once = twice.unwrap_invocation();
        assert_eq!(once.class, INVOCATION_TARGET);
        assert_eq!(once.unwrap_invocation(), inner);
        assert_eq!(inner.clone().unwrap_invocation().summary(), "ArithmeticException: / by zero");
    }
}
