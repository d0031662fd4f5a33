//! Compile diagnostics with source location

use std::fmt;

use crate::source::SourceUnit;

/// A compile error located in a source unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Unit the error was found in
    pub unit: String,
    /// 1-based line, 0 when the error has no location
    pub line: u32,
    /// 1-based column, 0 when unknown
    pub column: u32,
    /// Human-readable message
    pub message: String,
    /// Source line the error points at
    pub snippet: Option<String>,
    /// Backend that reported the error
    pub backend: Option<&'static str>,
}

impl Diagnostic {
    pub fn new(unit: &SourceUnit, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            unit: unit.name().to_string(),
            line,
            column,
            message: message.into(),
            snippet: unit.line(line).map(str::to_string),
            backend: None,
        }
    }

    /// Diagnostic not tied to a position, e.g. a duplicate class
    pub fn unit_level(unit: &SourceUnit, message: impl Into<String>) -> Self {
        Self {
            unit: unit.name().to_string(),
            line: 0,
            column: 0,
            message: message.into(),
            snippet: None,
            backend: None,
        }
    }

    #[must_use]
    pub const fn with_backend(mut self, backend: &'static str) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Multi-line rendering with the offending line and a caret
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{self}\n");
        if let Some(snippet) = &self.snippet {
            let gutter = self.line.to_string();
            let pad = " ".repeat(gutter.len());
            out.push_str(&format!("{gutter} | {snippet}\n"));
            if self.column > 0 {
                let caret_pad: String = snippet
                    .chars()
                    .take(self.column as usize - 1)
                    .map(|c| if c == '\t' { '\t' } else { ' ' })
                    .collect();
                out.push_str(&format!("{pad} | {caret_pad}^\n"));
            }
        }
        if let Some(backend) = self.backend {
            out.push_str(&format!("\treported by the {backend} backend\n"));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: error: {}", self.unit, self.message)
        } else {
            write!(
                f,
                "{}:{}:{}: error: {}",
                self.unit, self.line, self.column, self.message
            )
        }
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_points_at_column() {
        let unit = SourceUnit::new("Q.java", "class Q {\n    int x = 1\n}");
        let diag = Diagnostic::new(&unit, 2, 14, "expected `;`").with_backend("native");
        assert_eq!(diag.to_string(), "Q.java:2:14: error: expected `;`");

        let rendered = diag.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "2 |     int x = 1");
        assert_eq!(lines[2], "  |              ^");
        assert!(lines[3].contains("native backend"));
    }

    #[test]
    fn unit_level_has_no_position() {
        let unit = SourceUnit::new("Q.java", "");
        let diag = Diagnostic::unit_level(&unit, "duplicate class: Q");
        assert_eq!(diag.to_string(), "Q.java: error: duplicate class: Q");
        assert_eq!(diag.render(), "Q.java: error: duplicate class: Q\n");
    }
}
