//! The result record returned for every request

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::RequestState;
use crate::{Result, SkiffError};

/// Current time at millisecond resolution
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn seconds_between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<f64> {
    let (start, end) = (start?, end?);
    #[allow(clippy::cast_precision_loss)]
    let millis = (end - start).num_milliseconds() as f64;
    Some(millis / 1000.0)
}

/// Outcome of one request through compile and execute
///
/// At most one of `crashed` and `timed_out` is set, and either one implies
/// `executed == false`. `output` is only present when `executed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub received: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compile_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compile_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub execution_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub execution_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub returned: Option<DateTime<Utc>>,

    pub compiled: bool,
    pub executed: bool,
    pub crashed: bool,
    pub timed_out: bool,
    #[serde(default)]
    pub output_truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compilation_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compilation_error_stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub execution_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub execution_error_stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,

    /// Backend that produced the artifact
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compiler: Option<String>,
    /// Compile phase duration in seconds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compile_length: Option<f64>,
    /// Execute phase duration in seconds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub execution_length: Option<f64>,
    /// Deadline that applied to the execute phase, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_length: Option<u64>,
    pub version: String,
}

impl ResultRecord {
    /// Fresh record stamped with the time of receipt
    pub fn received() -> Self {
        Self {
            received: now(),
            compile_started: None,
            compile_finished: None,
            execution_started: None,
            execution_finished: None,
            returned: None,
            compiled: false,
            executed: false,
            crashed: false,
            timed_out: false,
            output_truncated: false,
            compilation_error_message: None,
            compilation_error_stack_trace: None,
            execution_error_message: None,
            execution_error_stack_trace: None,
            output: None,
            compiler: None,
            compile_length: None,
            execution_length: None,
            timeout_length: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Stamp `returned` and serialise the record
    pub fn completed(&mut self) -> Result<String> {
        self.mark_returned();
        Ok(serde_json::to_string(self)?)
    }

    pub fn mark_returned(&mut self) {
        self.returned = Some(now());
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Lifecycle state implied by the record's flags
    pub const fn state(&self) -> RequestState {
        if self.timed_out {
            RequestState::TimedOut
        } else if self.crashed {
            RequestState::Crashed
        } else if self.executed {
            RequestState::Succeeded
        } else if self.execution_started.is_some() {
            RequestState::ExecuteInProgress
        } else if self.compiled {
            RequestState::Compiled
        } else if self.compile_finished.is_some() {
            RequestState::CompileFailed
        } else if self.compile_started.is_some() {
            RequestState::CompileInProgress
        } else {
            RequestState::Received
        }
    }

    pub(crate) fn start_compile(&mut self) {
        self.compile_started = Some(now());
    }

    pub(crate) fn finish_compile(&mut self, outcome: std::result::Result<&'static str, &SkiffError>) {
        self.compile_finished = Some(now());
        self.compile_length = seconds_between(self.compile_started, self.compile_finished);
        match outcome {
            Ok(backend) => {
                self.compiled = true;
                self.compiler = Some(backend.to_string());
            }
            Err(err) => {
                self.compiled = false;
                self.compilation_error_message = Some(err.to_string());
                self.compilation_error_stack_trace = Some(err.trace());
            }
        }
    }

    pub(crate) fn start_execution(&mut self, timeout_ms: u64) {
        self.execution_started = Some(now());
        self.timeout_length = Some(timeout_ms);
    }

    /// Record the outcome of the execute phase
    ///
    /// `Ok` carries the captured output and whether it was truncated.
    pub(crate) fn finish_execution(&mut self, outcome: std::result::Result<(String, bool), SkiffError>) {
        self.execution_finished = Some(now());
        self.execution_length = seconds_between(self.execution_started, self.execution_finished);
        match outcome {
            Ok((output, truncated)) => {
                self.executed = true;
                self.output = Some(output);
                self.output_truncated = truncated;
            }
            Err(SkiffError::ExecutionTimeout(_)) => {
                self.timed_out = true;
                self.executed = false;
            }
            Err(err) => {
                self.crashed = true;
                self.executed = false;
                self.execution_error_message = Some(err.to_string());
                self.execution_error_stack_trace = Some(err.trace());
            }
        }
    }
}

impl Default for ResultRecord {
    fn default() -> Self {
        Self::received()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_record_is_received() {
        let record = ResultRecord::received();
        assert_eq!(record.state(), RequestState::Received);
        assert_eq!(record.received.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(!record.compiled && !record.executed);
    }

    #[test]
    fn json_uses_camel_case_and_omits_unset_fields() {
        let mut record = ResultRecord::received();
        record.start_compile();
        record.finish_compile(Ok("native"));
        let json: serde_json::Value = serde_json::from_str(&record.completed().unwrap()).unwrap();

        assert_eq!(json["compiled"], true);
        assert_eq!(json["timedOut"], false);
        assert_eq!(json["compiler"], "native");
        assert!(json.get("compileStarted").is_some());
        assert!(json.get("returned").is_some());
        assert!(json.get("output").is_none());
        assert!(json.get("executionStarted").is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let mut record = ResultRecord::received();
        record.start_compile();
        record.finish_compile(Ok("dynamic"));
        record.start_execution(100);
        record.finish_execution(Ok(("hi\n".into(), false)));
        let json = record.completed().unwrap();
        assert_eq!(ResultRecord::from_json(&json).unwrap(), record);
    }

    #[test]
    fn timeout_and_crash_are_exclusive() {
        let mut timed_out = ResultRecord::received();
        timed_out.start_execution(100);
        timed_out.finish_execution(Err(SkiffError::ExecutionTimeout(Duration::from_millis(100))));
        assert!(timed_out.timed_out && !timed_out.crashed && !timed_out.executed);
        assert!(timed_out.output.is_none());
        assert_eq!(timed_out.state(), RequestState::TimedOut);

        let mut crashed = ResultRecord::received();
        crashed.start_execution(100);
        crashed.finish_execution(Err(SkiffError::Worker("gone".into())));
        assert!(crashed.crashed && !crashed.timed_out && !crashed.executed);
        assert_eq!(crashed.execution_error_message.as_deref(), Some("worker error: gone"));
    }

    #[test]
    fn compile_failure_keeps_message_and_trace() {
        let mut record = ResultRecord::received();
        record.start_compile();
        let err = SkiffError::MissingEntryPoint {
            class: "Question".into(),
            method: "main".into(),
        };
        record.finish_compile(Err(&err));
        assert!(!record.compiled);
        assert_eq!(record.state(), RequestState::CompileFailed);
        assert!(record.compilation_error_message.unwrap().contains("main(String[])"));
        assert!(record.compilation_error_stack_trace.is_some());
    }
}
