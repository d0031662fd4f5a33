//! skiff CLI - compile and run submissions from the command line

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use skiff_core::config::default_timeout;
use skiff_core::{BackendSelector, Capability, PermissionSet, ResultRecord, RunConfig, SandboxMode, SourceUnit};
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about = "Compile and run untrusted submissions under a deadline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run the given units, print the result record
    Run {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Compile only
    Check {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Run the same submission many times, printing one record per line
    Batch {
        #[command(flatten)]
        request: RequestArgs,

        /// Number of runs
        #[arg(long, default_value = "10")]
        repeat: usize,

        /// Requests in flight at once
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },

    /// Show the capability grant and the extras that can be added
    Policy,
}

#[derive(Args, Clone)]
struct RequestArgs {
    /// Source units, in submission order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Entry class (defaults to the first file's stem)
    #[arg(long)]
    class: Option<String>,

    /// Entry method
    #[arg(long, default_value = "main")]
    method: String,

    /// dynamic, native or auto
    #[arg(long, default_value = "auto")]
    backend: BackendSelector,

    /// Execution deadline (defaults to SKIFF_TIMEOUT_MS or 100)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Capability to grant beyond the minimal set, repeatable
    #[arg(long = "grant", value_name = "CAPABILITY")]
    grants: Vec<Capability>,

    /// Skip OS-level confinement of workers
    #[arg(long)]
    no_sandbox: bool,
}

impl RequestArgs {
    fn config(&self) -> RunConfig {
        let class = self.class.clone().unwrap_or_else(|| {
            self.files
                .first()
                .and_then(|path| path.file_stem())
                .map_or_else(|| "Question".into(), |stem| stem.to_string_lossy().into_owned())
        });
        let timeout = self.timeout_ms.map_or_else(default_timeout, Duration::from_millis);
        RunConfig::builder()
            .entry_class(class)
            .entry_method(self.method.clone())
            .backend(self.backend)
            .timeout(timeout)
            .sandbox(if self.no_sandbox {
                SandboxMode::Off
            } else {
                SandboxMode::BestEffort
            })
            .build()
    }

    fn permissions(&self) -> PermissionSet {
        self.grants
            .iter()
            .fold(PermissionSet::builder(), |builder, capability| builder.grant(*capability))
            .build()
    }
}

/// Read each file into a unit named after the file
fn load_units(files: &[PathBuf]) -> anyhow::Result<Vec<SourceUnit>> {
    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(SourceUnit::new(unit_name(path), text))
        })
        .collect()
}

fn unit_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn print_record(record: &mut ResultRecord) -> anyhow::Result<()> {
    println!("{}", record.completed()?);
    Ok(())
}

async fn batch(request: &RequestArgs, repeat: usize, concurrency: usize) -> anyhow::Result<ExitCode> {
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }
    let units = Arc::new(load_units(&request.files)?);
    let config = Arc::new(request.config());
    let permissions = Arc::new(request.permissions());
    let limit = Arc::new(Semaphore::new(concurrency));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(repeat);
    for _ in 0..repeat {
        let permit = Arc::clone(&limit).acquire_owned().await?;
        let (units, config, permissions) = (Arc::clone(&units), Arc::clone(&config), Arc::clone(&permissions));
        handles.push(tokio::task::spawn_blocking(move || {
            let record = skiff_core::run(&units, &config, &permissions);
            drop(permit);
            record
        }));
    }

    let mut succeeded = 0usize;
    for handle in handles {
        let mut record = handle.await?;
        succeeded += usize::from(record.executed);
        print_record(&mut record)?;
    }
    tracing::info!(
        repeat,
        concurrency,
        succeeded,
        elapsed_ms = started.elapsed().as_millis(),
        "batch finished"
    );
    Ok(if succeeded == repeat {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn policy() {
    let minimal = PermissionSet::minimal();
    for capability in Capability::ALL {
        let status = if minimal.has(capability) { "granted" } else { "extra" };
        println!("{:<26} {status}", capability.name());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skiff=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { request } => {
            let units = load_units(&request.files)?;
            let config = request.config();
            let permissions = request.permissions();
            let mut record = tokio::task::spawn_blocking(move || skiff_core::run(&units, &config, &permissions)).await?;
            print_record(&mut record)?;
            Ok(if record.executed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Check { request } => {
            let units = load_units(&request.files)?;
            let (mut record, _artifact) = skiff_core::compile(&units, &request.config());
            print_record(&mut record)?;
            Ok(if record.compiled {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Batch {
            request,
            repeat,
            concurrency,
        } => batch(&request, repeat, concurrency).await,

        Commands::Policy => {
            policy();
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn units_are_named_after_their_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Question.java");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "public class Question {{}}").unwrap();

        let units = load_units(&[path]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name(), "Question.java");
        assert!(units[0].text().starts_with("public class Question"));
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_units(&[dir.path().join("Absent.java")]).unwrap_err();
        assert!(err.to_string().contains("Absent.java"));
    }

    #[test]
    fn entry_class_defaults_to_first_stem() {
        let cli = Cli::parse_from(["skiff", "run", "Main.java", "Helper.java", "--grant", "network"]);
        let Commands::Run { request } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(request.config().entry_class, "Main");
        assert!(request.permissions().has(Capability::Network));
        assert!(request.permissions().has(Capability::InspectOrigin));
    }
}
