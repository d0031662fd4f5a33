//! Per-request class table shared by all units of a request

use std::collections::HashMap;

use crate::lang::ast::{ClassDecl, CompilationUnit};
use crate::lang::check::ClassScope;
use crate::lang::{library, Diagnostic};
use crate::source::SourceUnit;

/// A class together with the unit it was declared in
#[derive(Debug, Clone)]
pub struct LoadedClass {
    pub decl: ClassDecl,
    pub unit: String,
}

/// The loaded program an artifact executes
#[derive(Debug, Default)]
pub struct Program {
    classes: Vec<LoadedClass>,
    index: HashMap<String, usize>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&LoadedClass> {
        self.index.get(name).map(|&i| &self.classes[i])
    }

    pub fn classes(&self) -> impl Iterator<Item = &LoadedClass> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Builds a [`Program`] unit by unit, in request order
#[derive(Debug, Default)]
pub struct Loader {
    program: Program,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes of every unit loaded so far plus `pending`
    pub fn scope<'a>(&'a self, pending: &'a CompilationUnit) -> ClassScope<'a> {
        self.program
            .classes
            .iter()
            .map(|c| &c.decl)
            .chain(&pending.classes)
            .map(|decl| (decl.name.as_str(), decl))
            .collect()
    }

    /// Reject class names already taken by a loaded unit, a sibling or a built-in
    pub fn admit(&self, source: &SourceUnit, unit: &CompilationUnit) -> Result<(), Diagnostic> {
        for (i, class) in unit.classes.iter().enumerate() {
            let sibling = unit.classes[..i].iter().any(|c| c.name == class.name);
            if sibling || self.program.index.contains_key(&class.name) {
                return Err(Diagnostic::new(
                    source,
                    class.line,
                    class.column,
                    format!("duplicate class: {}", class.name),
                ));
            }
            if library::is_builtin_class(&class.name) {
                return Err(Diagnostic::new(
                    source,
                    class.line,
                    class.column,
                    format!("class {} clashes with a built-in class", class.name),
                ));
            }
        }
        Ok(())
    }

    pub fn load(&mut self, source: &SourceUnit, unit: CompilationUnit) -> Result<(), Diagnostic> {
        self.admit(source, &unit)?;
        for decl in unit.classes {
            tracing::trace!(class = %decl.name, unit = source.name(), "loading class");
            self.program
                .index
                .insert(decl.name.clone(), self.program.classes.len());
            self.program.classes.push(LoadedClass {
                decl,
                unit: source.name().to_string(),
            });
        }
        Ok(())
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{parse, Dialect};

    fn unit(name: &str, text: &str) -> (SourceUnit, CompilationUnit) {
        let source = SourceUnit::new(name, text);
        let parsed = parse(&source, Dialect::Full).unwrap();
        (source, parsed)
    }

    #[test]
    fn loads_units_in_order() {
        let mut loader = Loader::new();
        let (s1, u1) = unit("A.java", "class A {}");
        let (s2, u2) = unit("B.java", "class B {} class C {}");
        loader.load(&s1, u1).unwrap();
        loader.load(&s2, u2).unwrap();
        let program = loader.finish();
        assert_eq!(program.len(), 3);
        assert_eq!(program.class("C").unwrap().unit, "B.java");
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let mut loader = Loader::new();
        let (s1, u1) = unit("A.java", "class A {}");
        loader.load(&s1, u1).unwrap();
        let (s2, u2) = unit("A2.java", "class A {}");
        let err = loader.load(&s2, u2).unwrap_err();
        assert_eq!(err.message, "duplicate class: A");
        assert_eq!(err.unit, "A2.java");

        let (s3, u3) = unit("S.java", "class String {}");
        assert!(loader.load(&s3, u3).unwrap_err().message.contains("built-in"));
    }
}
