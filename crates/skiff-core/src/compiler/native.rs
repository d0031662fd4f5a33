//! Slower, authoritative backend
//!
//! Full dialect plus ahead-of-time semantic checks. A unit only sees the
//! classes of the units before it and its own.

use crate::lang::{check, parse, Diagnostic, Dialect};
use crate::source::SourceUnit;

use super::loader::{Loader, Program};
use super::Backend;

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn compile(&self, units: &[SourceUnit]) -> Result<Program, Diagnostic> {
        let mut loader = Loader::new();
        for source in units {
            let unit = parse(source, Dialect::Full)?;
            loader.admit(source, &unit)?;
            check::check(&unit, source, &loader.scope(&unit))?;
            loader.load(source, unit)?;
        }
        Ok(loader.finish())
    }
}
