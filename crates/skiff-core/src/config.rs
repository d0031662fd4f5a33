//! Per-request run configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::SkiffError;

/// Default execution timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Which compiler backend a request is pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelector {
    /// Fast, lenient backend only
    Dynamic,
    /// Slower, authoritative backend only
    Native,
    /// Dynamic first; on failure its error is dropped and native is tried
    #[default]
    Auto,
}

impl FromStr for BackendSelector {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" => Ok(Self::Dynamic),
            "native" => Ok(Self::Native),
            "auto" => Ok(Self::Auto),
            other => Err(SkiffError::Config(format!("unknown backend `{other}`"))),
        }
    }
}

/// How the worker thread is restricted before user code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    /// No OS-level restriction
    Off,
    /// Apply what the kernel supports, log what it does not
    #[default]
    BestEffort,
    /// Any layer that cannot be applied fails the execution
    Enforce,
}

/// Configuration for a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Class holding the entry point
    pub entry_class: String,

    /// Entry method, must take a single `String[]`
    pub entry_method: String,

    /// Backend selection policy
    pub backend: BackendSelector,

    /// Hard deadline for the execute phase
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,

    /// Maximum captured output in bytes, later writes are dropped
    pub output_limit: usize,

    /// Maximum depth of the interpreter call stack
    pub max_call_depth: usize,

    /// Maximum length of a single array
    pub max_array_length: usize,

    /// Stack size of the worker thread in bytes
    pub worker_stack_size: usize,

    /// OS-level restriction of the worker thread
    pub sandbox: SandboxMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            entry_class: "Question".into(),
            entry_method: "main".into(),
            backend: BackendSelector::Auto,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            output_limit: 1024 * 1024,          // 1MB
            max_call_depth: 1024,
            max_array_length: 16 * 1024 * 1024,
            worker_stack_size: 256 * 1024 * 1024, // 256MB
            sandbox: SandboxMode::BestEffort,
        }
    }
}

impl RunConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }
}

/// Builder for `RunConfig`
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    #[must_use]
    pub fn entry_class(mut self, name: impl Into<String>) -> Self {
        self.config.entry_class = name.into();
        self
    }

    #[must_use]
    pub fn entry_method(mut self, name: impl Into<String>) -> Self {
        self.config.entry_method = name.into();
        self
    }

    #[must_use]
    pub const fn backend(mut self, backend: BackendSelector) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    #[must_use]
    pub const fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    #[must_use]
    pub const fn output_limit(mut self, bytes: usize) -> Self {
        self.config.output_limit = bytes;
        self
    }

    #[must_use]
    pub const fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    #[must_use]
    pub const fn max_array_length(mut self, len: usize) -> Self {
        self.config.max_array_length = len;
        self
    }

    #[must_use]
    pub const fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.worker_stack_size = bytes;
        self
    }

    #[must_use]
    pub const fn sandbox(mut self, mode: SandboxMode) -> Self {
        self.config.sandbox = mode;
        self
    }

    #[must_use]
    pub fn build(self) -> RunConfig {
        self.config
    }
}

/// Get the default timeout from `SKIFF_TIMEOUT_MS` or the built-in default
///
/// Unparseable values fall back to [`DEFAULT_TIMEOUT_MS`].
pub fn default_timeout() -> Duration {
    let millis = std::env::var("SKIFF_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    Duration::from_millis(millis)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_service() {
        let config = RunConfig::default();
        assert_eq!(config.entry_class, "Question");
        assert_eq!(config.entry_method, "main");
        assert_eq!(config.backend, BackendSelector::Auto);
        assert_eq!(config.timeout, Duration::from_millis(100));
    }

    #[test]
    fn builder_overrides_fields() {
        let config = RunConfig::builder()
            .entry_class("Main")
            .backend(BackendSelector::Native)
            .timeout_ms(250)
            .sandbox(SandboxMode::Off)
            .build();
        assert_eq!(config.entry_class, "Main");
        assert_eq!(config.backend, BackendSelector::Native);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.sandbox, SandboxMode::Off);
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Native".parse::<BackendSelector>().unwrap(), BackendSelector::Native);
        assert_eq!("AUTO".parse::<BackendSelector>().unwrap(), BackendSelector::Auto);
        assert!("janino".parse::<BackendSelector>().is_err());
    }

    #[test]
    fn json_uses_millisecond_timeout() {
        let json = serde_json::to_value(RunConfig::builder().timeout_ms(42).build()).unwrap();
        assert_eq!(json["timeout_ms"], 42);

        let parsed: RunConfig =
            serde_json::from_str(r#"{"entry_class":"Main","timeout_ms":5}"#).unwrap();
        assert_eq!(parsed.entry_class, "Main");
        assert_eq!(parsed.timeout, Duration::from_millis(5));
        assert_eq!(parsed.entry_method, "main");
    }
}
