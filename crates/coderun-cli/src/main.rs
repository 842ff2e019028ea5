//! coderun CLI
//!
//! Usage:
//!   coderun script -c "print('hi')"       Run an inline script
//!   coderun script lesson.js              Run a script file
//!   coderun script                        Read a script from stdin
//!   coderun command "ls -la"              Run a shell command
//!   coderun --identity amal history       Show an identity's history
//!   coderun serve                         JSON-lines requests on stdio

mod serve;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use coderun::history::{HistoryStore, InMemoryHistoryStore, JsonlHistoryStore, OpenDirectory};
use coderun::{Caller, ExecutionResult, HistoryRecorder, Identity, Runner, RunnerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Address used as the quota key for local invocations.
pub(crate) const LOCAL_ADDRESS: &str = "local";

/// coderun - run learner scripts and shell commands with captured output
#[derive(Parser, Debug)]
#[command(name = "coderun")]
#[command(about = "Run sandboxed scripts and shell commands with per-identity history")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep history in this JSON-lines file instead of memory
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,

    /// Account to run as; scripts are recorded under it
    #[arg(long, global = true)]
    identity: Option<String>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Run a script in the sandbox
    Script {
        /// Inline script source
        #[arg(short = 'c', long = "code", conflicts_with = "file")]
        code: Option<String>,
        /// Script file (stdin when neither this nor -c is given)
        file: Option<PathBuf>,
    },
    /// Run a shell command
    Command {
        /// Command line, interpreted by the configured shell
        command: String,
    },
    /// Print the script history of --identity
    History {
        /// Skip this many records
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Show at most this many records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Serve JSON-lines requests on stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so they never mix with program output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let runner = build_runner(&args)?;

    match args.action {
        Action::Script { code, file } => {
            let code = read_script(code, file)?;
            let caller = Caller {
                address: LOCAL_ADDRESS.to_string(),
                identity: args.identity.map(Identity::from),
            };
            let result = runner.execute_script(&caller, &code).await?;
            Ok(emit(&result)?)
        }
        Action::Command { command } => {
            let result = runner
                .execute_command(&Caller::anonymous(LOCAL_ADDRESS), &command)
                .await?;
            Ok(emit(&result)?)
        }
        Action::History { offset, limit } => {
            let identity = args
                .identity
                .map(Identity::from)
                .context("history needs --identity")?;
            let records = runner
                .history_page(&identity, offset, limit.unwrap_or(usize::MAX))
                .await?;
            let mut stdout = io::stdout().lock();
            for record in records {
                writeln!(stdout, "{}", serde_json::to_string(&record)?)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Action::Serve => {
            tracing::info!("coderun serving JSON lines on stdio");
            serve::run(runner).await?;
            tracing::info!("coderun stdin closed, shutting down");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_runner(args: &Args) -> anyhow::Result<Runner> {
    let config = match &args.config {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };

    let store: Arc<dyn HistoryStore> = match &args.history_file {
        Some(path) => Arc::new(JsonlHistoryStore::new(path)),
        None => Arc::new(InMemoryHistoryStore::new()),
    };

    Ok(Runner::new(config).with_history(HistoryRecorder::new(store, Arc::new(OpenDirectory))))
}

fn read_script(code: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut script = String::new();
    io::stdin()
        .read_to_string(&mut script)
        .context("failed to read stdin")?;
    Ok(script)
}

fn emit(result: &ExecutionResult) -> io::Result<ExitCode> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(result.output.as_bytes())?;
    stdout.flush()?;

    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
