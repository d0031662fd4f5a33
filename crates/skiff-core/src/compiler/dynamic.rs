//! Fast, lenient backend
//!
//! Parses with the lenient dialect and loads classes as they are. Names and
//! types are resolved when the interpreter first reaches them.

use crate::lang::{parse, Diagnostic, Dialect};
use crate::source::SourceUnit;

use super::loader::{Loader, Program};
use super::Backend;

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicBackend;

impl Backend for DynamicBackend {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    fn compile(&self, units: &[SourceUnit]) -> Result<Program, Diagnostic> {
        let mut loader = Loader::new();
        for source in units {
            let unit = parse(source, Dialect::Lenient)?;
            loader.load(source, unit)?;
        }
        Ok(loader.finish())
    }
}
