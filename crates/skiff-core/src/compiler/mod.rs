//! Compilation orchestrator
//!
//! Turns the ordered units of a request into a [`CompiledArtifact`] using
//! the backend the configuration selects, then resolves the entry point.

mod dynamic;
mod entry;
mod loader;
mod native;

use std::sync::Arc;

pub use self::dynamic::DynamicBackend;
pub use self::entry::{resolve, EntryPoint};
pub use self::loader::{LoadedClass, Loader, Program};
pub use self::native::NativeBackend;

use crate::config::{BackendSelector, RunConfig};
use crate::lang::Diagnostic;
use crate::result::ResultRecord;
use crate::source::SourceUnit;
use crate::{Result, SkiffError};

/// A compiler for the submitted language
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Compile every unit, in order, into one program
    fn compile(&self, units: &[SourceUnit]) -> std::result::Result<Program, Diagnostic>;
}

/// A loaded program with its resolved entry point
///
/// Owned by exactly one request and moved into the worker that runs it.
#[derive(Debug)]
pub struct CompiledArtifact {
    program: Arc<Program>,
    entry: EntryPoint,
    backend: &'static str,
}

impl CompiledArtifact {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub const fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// Name of the backend that produced the program
    pub const fn backend(&self) -> &'static str {
        self.backend
    }

    pub(crate) fn into_parts(self) -> (Arc<Program>, EntryPoint) {
        (self.program, self.entry)
    }
}

/// Runs the configured backend(s) over a request's units
#[derive(Debug, Default, Clone, Copy)]
pub struct Compiler;

impl Compiler {
    /// Compile `units`, recording the outcome in `record`
    ///
    /// Returns the artifact only when compilation and entry-point resolution
    /// both succeeded.
    pub fn compile(
        units: &[SourceUnit],
        config: &RunConfig,
        record: &mut ResultRecord,
    ) -> Option<CompiledArtifact> {
        record.start_compile();
        match Self::build(units, config) {
            Ok(artifact) => {
                tracing::debug!(
                    backend = artifact.backend,
                    classes = artifact.program.len(),
                    "compiled"
                );
                record.finish_compile(Ok(artifact.backend));
                Some(artifact)
            }
            Err(err) => {
                tracing::debug!(error = %err, "compilation failed");
                record.finish_compile(Err(&err));
                None
            }
        }
    }

    fn build(units: &[SourceUnit], config: &RunConfig) -> Result<CompiledArtifact> {
        let (program, backend) = match config.backend {
            BackendSelector::Dynamic => (run_backend(&DynamicBackend, units)?, DynamicBackend.name()),
            BackendSelector::Native => (run_backend(&NativeBackend, units)?, NativeBackend.name()),
            BackendSelector::Auto => match run_backend(&DynamicBackend, units) {
                Ok(program) => (program, DynamicBackend.name()),
                Err(discarded) => {
                    tracing::debug!(error = %discarded, "dynamic backend failed, trying native");
                    (run_backend(&NativeBackend, units)?, NativeBackend.name())
                }
            },
        };

        let entry = resolve(&program, config)?;
        Ok(CompiledArtifact {
            program: Arc::new(program),
            entry,
            backend,
        })
    }
}

fn run_backend(backend: &dyn Backend, units: &[SourceUnit]) -> Result<Program> {
    backend
        .compile(units)
        .map_err(|diagnostic| SkiffError::Compile(diagnostic.with_backend(backend.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn units(texts: &[(&str, &str)]) -> Vec<SourceUnit> {
        texts.iter().map(|(n, t)| SourceUnit::new(*n, *t)).collect()
    }

    const HELLO: &str = r#"public class Question {
    public static void main(String[] unused) {
        System.out.println("Hello, world!");
    }
}"#;

    #[test]
    fn auto_prefers_dynamic() {
        let mut record = ResultRecord::received();
        let artifact = Compiler::compile(&units(&[("Question.java", HELLO)]), &RunConfig::default(), &mut record)
            .expect("compiles");
        assert_eq!(artifact.backend(), "dynamic");
        assert_eq!(artifact.entry().class, "Question");
        assert!(artifact.entry().is_public);
        assert!(record.compiled);
        assert_eq!(record.compiler.as_deref(), Some("dynamic"));
        assert!(record.compile_started.is_some() && record.compile_finished.is_some());
    }

    #[test]
    fn auto_falls_back_to_native() {
        let text = "class Question { public static void main(String[] a) { var xs = new int[] {1, 2}; for (int x : xs) { System.out.println(x); } } }";
        let mut record = ResultRecord::received();
        let artifact = Compiler::compile(&units(&[("Question.java", text)]), &RunConfig::default(), &mut record)
            .expect("native accepts the full dialect");
        assert_eq!(artifact.backend(), "native");
    }

    #[test]
    fn auto_reports_only_the_native_error() {
        let text = "class Question { public static void main(String[] a) { var x = missing; } }";
        let mut record = ResultRecord::received();
        assert!(Compiler::compile(&units(&[("Question.java", text)]), &RunConfig::default(), &mut record).is_none());
        let message = record.compilation_error_message.unwrap();
        assert!(message.contains("cannot find symbol: variable missing"), "{message}");
        assert!(record.compilation_error_stack_trace.unwrap().contains("native backend"));
    }

    #[test]
    fn pinned_backend_does_not_fall_back() {
        let text = "class Question { public static void main(String[] a) { var x = 1; } }";
        let config = RunConfig::builder().backend(BackendSelector::Dynamic).build();
        let mut record = ResultRecord::received();
        assert!(Compiler::compile(&units(&[("Question.java", text)]), &config, &mut record).is_none());
        assert!(record.compilation_error_message.unwrap().contains("not supported by this backend"));
        assert!(record.compiler.is_none());
    }

    #[test]
    fn later_units_see_earlier_classes() {
        let helper = "class Helper { static int answer() { return 42; } }";
        let main = "class Question { public static void main(String[] a) { System.out.println(Helper.answer()); } }";
        let program = run_backend(&NativeBackend, &units(&[("Helper.java", helper), ("Question.java", main)]));
        assert!(program.is_ok());

        let reversed = run_backend(&NativeBackend, &units(&[("Question.java", main), ("Helper.java", helper)]));
        assert_matches!(reversed, Err(SkiffError::Compile(d)) if d.message.contains("Helper"));
    }

    #[test]
    fn entry_point_problems() {
        let config = RunConfig::default();
        let program = DynamicBackend.compile(&units(&[("Question.java", "class Question { void main(String[] a) {} }")])).unwrap();
        assert_matches!(resolve(&program, &config), Err(SkiffError::NotStaticEntryPoint { .. }));

        let program = DynamicBackend.compile(&units(&[("Question.java", "class Question { static void main() {} }")])).unwrap();
        assert_matches!(resolve(&program, &config), Err(SkiffError::MissingEntryPoint { .. }));

        let program = DynamicBackend.compile(&units(&[("Main.java", "class Main { static void main(String[] a) {} }")])).unwrap();
        assert_matches!(resolve(&program, &config), Err(SkiffError::MissingEntryPoint { class, .. }) if class == "Question");
    }

    #[test]
    fn missing_entry_point_does_not_trigger_fallback() {
        let mut record = ResultRecord::received();
        let text = "class Other { public static void main(String[] a) {} }";
        assert!(Compiler::compile(&units(&[("Other.java", text)]), &RunConfig::default(), &mut record).is_none());
        assert!(record.compilation_error_message.unwrap().contains("class `Question`"));
    }
}
