//! Request lifecycle

use std::fmt;

use crate::compiler::{CompiledArtifact, Compiler};
use crate::config::RunConfig;
use crate::engine::Engine;
use crate::permission::PermissionSet;
use crate::result::ResultRecord;
use crate::source::SourceUnit;
use crate::{Result, SkiffError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Units accepted, nothing run yet
    Received,
    CompileInProgress,
    /// Terminal: the record carries the diagnostic
    CompileFailed,
    Compiled,
    ExecuteInProgress,
    /// Terminal: deadline reached, output discarded
    TimedOut,
    /// Terminal: an exception or worker failure ended the run
    Crashed,
    /// Terminal: the entry point returned or exited normally
    Succeeded,
}

impl RequestState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::CompileInProgress)
                | (Self::CompileInProgress, Self::CompileFailed | Self::Compiled)
                | (Self::Compiled, Self::ExecuteInProgress)
                | (Self::ExecuteInProgress, Self::TimedOut | Self::Crashed | Self::Succeeded)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompileFailed | Self::TimedOut | Self::Crashed | Self::Succeeded
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::CompileInProgress => "compile-in-progress",
            Self::CompileFailed => "compile-failed",
            Self::Compiled => "compiled",
            Self::ExecuteInProgress => "execute-in-progress",
            Self::TimedOut => "timed-out",
            Self::Crashed => "crashed",
            Self::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

/// One request moving through compile and execute, in that order
///
/// Each phase runs at most once. Out-of-order calls are refused with
/// [`SkiffError::IllegalTransition`] and leave the request untouched.
#[derive(Debug)]
pub struct Request {
    units: Vec<SourceUnit>,
    config: RunConfig,
    record: ResultRecord,
    artifact: Option<CompiledArtifact>,
    state: RequestState,
}

impl Request {
    pub fn received(units: Vec<SourceUnit>, config: RunConfig) -> Self {
        Self {
            units,
            config,
            record: ResultRecord::received(),
            artifact: None,
            state: RequestState::Received,
        }
    }

    pub const fn state(&self) -> RequestState {
        self.state
    }

    pub const fn record(&self) -> &ResultRecord {
        &self.record
    }

    pub fn compile(&mut self) -> Result<RequestState> {
        self.advance(RequestState::CompileInProgress)?;
        self.artifact = Compiler::compile(&self.units, &self.config, &mut self.record);
        self.advance(self.record.state())?;
        Ok(self.state)
    }

    pub fn execute(&mut self, permissions: &PermissionSet) -> Result<RequestState> {
        self.advance(RequestState::ExecuteInProgress)?;
        Engine::execute(&mut self.record, self.artifact.take(), permissions, &self.config);
        self.advance(self.record.state())?;
        Ok(self.state)
    }

    /// Stamp `returned` and hand back the record, whatever state was reached
    pub fn finish(mut self) -> ResultRecord {
        tracing::debug!(state = %self.state, "request finished");
        self.record.mark_returned();
        self.record
    }

    fn advance(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "refusing illegal transition");
            return Err(SkiffError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self.state, to = %next, "request transition");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tracing_test::traced_test;

    const HELLO: &str =
        "public class Question { public static void main(String[] a) { System.out.println(\"hello\"); } }";

    fn request(text: &str) -> Request {
        let config = RunConfig::builder().timeout(Duration::from_secs(2)).build();
        Request::received(vec![SourceUnit::new("Question.java", text)], config)
    }

    #[test]
    fn happy_path_reaches_succeeded() {
        let mut request = request(HELLO);
        assert_eq!(request.compile().unwrap(), RequestState::Compiled);
        assert_eq!(request.execute(&PermissionSet::minimal()).unwrap(), RequestState::Succeeded);
        assert!(request.state().is_terminal());
        let record = request.finish();
        assert_eq!(record.output.as_deref(), Some("hello\n"));
        assert!(record.returned.is_some());
    }

    #[test]
    #[traced_test]
    fn execute_before_compile_is_refused() {
        let mut request = request(HELLO);
        assert_matches!(
            request.execute(&PermissionSet::minimal()),
            Err(SkiffError::IllegalTransition { .. })
        );
        assert_eq!(request.state(), RequestState::Received);
        assert!(logs_contain("refusing illegal transition"));
    }

    #[test]
    fn failed_compile_is_terminal() {
        let mut request = request("public class Question { void broken( }");
        assert_eq!(request.compile().unwrap(), RequestState::CompileFailed);
        assert_matches!(request.compile(), Err(SkiffError::IllegalTransition { .. }));
        assert_matches!(
            request.execute(&PermissionSet::minimal()),
            Err(SkiffError::IllegalTransition { .. })
        );
        let record = request.finish();
        assert!(!record.compiled);
        assert!(record.compilation_error_message.is_some());
    }

    #[test]
    fn transitions_follow_the_phase_order() {
        use RequestState::{Compiled, CompileInProgress, ExecuteInProgress, Received, Succeeded};
        assert!(Received.can_transition_to(CompileInProgress));
        assert!(!Received.can_transition_to(ExecuteInProgress));
        assert!(!Compiled.can_transition_to(Compiled));
        assert!(!Succeeded.can_transition_to(Received));
        assert!(!Compiled.is_terminal());
    }
}
