//! Tree-walking interpreter for compiled artifacts
//!
//! The interpreter runs on the worker thread and polls its kill switch at
//! every statement, loop iteration, call and output write. A kill unwinds
//! straight out of the program; `try`, `catch` and `finally` never see it.

mod builtins;
mod interp;
mod throwable;
mod value;

pub use self::interp::{Abort, Completion, Interpreter, Limits};
pub use self::throwable::{TraceElement, Throwable, INVOCATION_TARGET};
pub use self::value::{format_double, Value};
