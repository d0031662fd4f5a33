//! Execute phase

use std::sync::Arc;
use std::time::Instant;

use crate::capture::{CaptureBuffer, ConsoleRedirect, OUTPUT_LOCK};
use crate::compiler::{CompiledArtifact, EntryPoint, Program};
use crate::config::RunConfig;
use crate::permission::PermissionSet;
use crate::result::ResultRecord;
use crate::vm::Completion;
use crate::worker::Worker;
use crate::{Result, SkiffError};

/// Runs compiled artifacts under a deadline with captured output
#[derive(Debug, Default, Clone, Copy)]
pub struct Engine;

impl Engine {
    /// Run the artifact's entry point, recording the outcome in `record`
    ///
    /// A record that did not compile, or a missing artifact, makes this a
    /// no-op. Executions are serialised process-wide by [`OUTPUT_LOCK`].
    pub fn execute(
        record: &mut ResultRecord,
        artifact: Option<CompiledArtifact>,
        permissions: &PermissionSet,
        config: &RunConfig,
    ) {
        let Some(artifact) = artifact.filter(|_| record.compiled) else {
            tracing::debug!(compiled = record.compiled, "nothing to execute");
            return;
        };
        let (program, entry) = artifact.into_parts();
        let timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX);

        let _serial = OUTPUT_LOCK.lock();
        let buffer = Arc::new(CaptureBuffer::new(config.output_limit));
        let redirect = ConsoleRedirect::install(Arc::clone(&buffer));
        record.start_execution(timeout_ms);
        let started = Instant::now();

        let outcome = Self::run(program, entry, permissions, config)
            .map(|()| (buffer.contents(), buffer.is_truncated()));
        // A timed-out worker is already killed, so it can no longer write
        drop(redirect);

        let elapsed_ms = started.elapsed().as_millis();
        match &outcome {
            Ok((output, truncated)) => {
                tracing::info!(elapsed_ms, output_len = output.len(), truncated, "execution succeeded");
            }
            Err(SkiffError::ExecutionTimeout(_)) => tracing::info!(elapsed_ms, timeout_ms, "execution timed out"),
            Err(e) => tracing::info!(elapsed_ms, error = %e, "execution crashed"),
        }
        record.finish_execution(outcome);
    }

    fn run(program: Arc<Program>, entry: EntryPoint, permissions: &PermissionSet, config: &RunConfig) -> Result<()> {
        let mut worker = Worker::spawn(program, entry, permissions.clone(), config)?;
        match worker.wait(config.timeout)? {
            Completion::Returned | Completion::Exited(_) => Ok(()),
            Completion::Threw(throwable) => Err(SkiffError::ExecutionCrash(throwable.unwrap_invocation())),
            Completion::Killed => Err(SkiffError::ExecutionTimeout(config.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::source::SourceUnit;
    use std::time::Duration;

    fn compiled(text: &str, config: &RunConfig) -> (ResultRecord, Option<CompiledArtifact>) {
        let mut record = ResultRecord::received();
        let artifact = Compiler::compile(&[SourceUnit::new("Question.java", text)], config, &mut record);
        (record, artifact)
    }

    #[test]
    fn uncompiled_records_are_left_alone() {
        let config = RunConfig::default();
        let (mut record, artifact) = compiled("public class Question {", &config);
        assert!(artifact.is_none());
        Engine::execute(&mut record, artifact, &PermissionSet::minimal(), &config);
        assert!(record.execution_started.is_none());
        assert!(!record.executed && !record.crashed && !record.timed_out);
    }

    #[test]
    fn output_is_captured_on_success() {
        let config = RunConfig::builder().timeout(Duration::from_secs(2)).build();
        let (mut record, artifact) = compiled(
            "public class Question { public static void main(String[] a) { System.out.print(\"hi\"); } }",
            &config,
        );
        Engine::execute(&mut record, artifact, &PermissionSet::minimal(), &config);
        assert!(record.executed);
        assert_eq!(record.output.as_deref(), Some("hi"));
        assert_eq!(record.timeout_length, Some(2000));
        assert!(!record.output_truncated);
    }

    #[test]
    fn output_limit_truncates() {
        let config = RunConfig::builder()
            .timeout(Duration::from_secs(2))
            .output_limit(4)
            .build();
        let (mut record, artifact) = compiled(
            "public class Question { public static void main(String[] a) { System.out.print(\"abcdefgh\"); } }",
            &config,
        );
        Engine::execute(&mut record, artifact, &PermissionSet::minimal(), &config);
        assert!(record.executed);
        assert_eq!(record.output.as_deref(), Some("abcd"));
        assert!(record.output_truncated);
    }
}
