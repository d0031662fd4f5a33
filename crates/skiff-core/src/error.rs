//! Error types for skiff-core

use std::error::Error as _;
use std::time::Duration;

use thiserror::Error;

use crate::lang::Diagnostic;
use crate::vm::Throwable;

#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("{0}")]
    Compile(Diagnostic),

    #[error("no method `{method}(String[])` found in class `{class}`")]
    MissingEntryPoint { class: String, method: String },

    #[error("entry point `{class}.{method}` is not static")]
    NotStaticEntryPoint { class: String, method: String },

    #[error("{}", .0.summary())]
    ExecutionCrash(Throwable),

    #[error("timeout after {} ms", .0.as_millis())]
    ExecutionTimeout(Duration),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

impl SkiffError {
    /// Full trace text stored next to the message in a result record
    #[must_use]
    pub fn trace(&self) -> String {
        match self {
            Self::Compile(diagnostic) => diagnostic.render(),
            Self::ExecutionCrash(throwable) => throwable.render(),
            other => {
                let mut out = format!("SkiffError: {other}");
                let mut source = other.source();
                while let Some(cause) = source {
                    out.push_str(&format!("\nCaused by: {cause}"));
                    source = cause.source();
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_messages() {
        let missing = SkiffError::MissingEntryPoint {
            class: "Question".into(),
            method: "main".into(),
        };
        assert_eq!(
            missing.to_string(),
            "no method `main(String[])` found in class `Question`"
        );
        assert!(missing.trace().starts_with("SkiffError: no method"));
    }

    #[test]
    fn trace_follows_sources() {
        let io = std::io::Error::other("pipe closed");
        let err = SkiffError::from(io);
        assert_eq!(err.trace(), "SkiffError: io error: pipe closed\nCaused by: pipe closed");
    }
}
