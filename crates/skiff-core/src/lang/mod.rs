//! The submitted language
//!
//! - `lexer` tokenizes a unit with logos
//! - `parser` builds the syntax tree, in a lenient or full dialect
//! - `check` resolves names and types ahead of time for the native backend
//! - `library` lists the built-in classes and their members

pub mod ast;
pub mod check;
pub mod diagnostic;
pub mod lexer;
pub mod library;
pub mod parser;

pub use self::diagnostic::Diagnostic;
pub use self::parser::{parse, Dialect};
