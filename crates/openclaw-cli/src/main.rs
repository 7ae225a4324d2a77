//! openclaw CLI: run infrastructure tools through a policy gate.
//!
//! One-shot runs via `exec`, a concurrent NDJSON loop via `serve`, and
//! policy inspection via `policy show` / `policy check`.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use openclaw::audit::{AuditSink, JsonlAuditLog};
use openclaw::config::{check_policy_file, resolve_policy};
use openclaw::model::{GatewayPolicy, Mode, RunRequest, RunResult, RunStatus};
use openclaw::policy::{explain_policy_for_request, PolicyExplanation};
use openclaw::runner::{ErrorCode, RunnerError};
use openclaw::Gateway;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod serve;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "OPENCLAW_LOG";
const SERVICE_NAME: &str = "openclaw";

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "openclaw",
    version,
    about = "Policy-gated execution gateway for infrastructure tools"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log debug detail to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one tool through the policy gate
    Exec {
        #[arg(long, help = "Print the run result as JSON")]
        json: bool,
        #[arg(long, help = "Policy file (JSON or YAML)")]
        policy: Option<PathBuf>,
        #[arg(long, help = "Target environment label (default: policy default_context)")]
        context: Option<String>,
        #[arg(long, value_enum, default_value = "plan")]
        mode: ModeArg,
        #[arg(long, help = "Working directory for the tool")]
        cwd: Option<String>,
        #[arg(
            long = "env",
            value_name = "KEY=VALUE",
            value_parser = parse_env_pair,
            help = "Environment override (repeatable)"
        )]
        env: Vec<(String, String)>,
        #[arg(long, help = "Lower the policy timeout for this run")]
        timeout_ms: Option<u64>,
        #[arg(long, help = "Append the run result to this JSONL file")]
        audit_log: Option<PathBuf>,
        #[arg(long, help = "Explain the policy decision without running")]
        explain_policy: bool,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Execute NDJSON run requests from stdin
    Serve {
        #[arg(long)]
        stdio: bool,
        #[arg(long, help = "Policy file (JSON or YAML)")]
        policy: Option<PathBuf>,
        #[arg(long, default_value_t = 4, help = "Runs executing at once")]
        max_concurrency: usize,
        #[arg(long, help = "Append every run result to this JSONL file")]
        audit_log: Option<PathBuf>,
    },
    /// Inspect or validate gateway policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Report service liveness
    Health {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyCommands {
    /// Print the effective policy as JSON
    Show {
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Validate a policy file
    Check {
        #[arg(long)]
        policy: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Explain,
    Plan,
    Apply,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Explain => Self::Explain,
            ModeArg::Plan => Self::Plan,
            ModeArg::Apply => Self::Apply,
        }
    }
}

/// Configure color output based on CLI flag and environment
fn use_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Check if stderr supports color (where we output diagnostics)
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    }
}

fn configure_colors(use_color: bool) {
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

/// Install the stderr log subscriber. `--verbose` wins over `OPENCLAW_LOG`.
fn init_tracing(verbose: bool, use_color: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(use_color)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let color = use_color(cli.color);
    configure_colors(color);
    init_tracing(cli.verbose, color);
    match cli.command {
        Commands::Exec {
            json,
            policy,
            context,
            mode,
            cwd,
            env,
            timeout_ms,
            audit_log,
            explain_policy,
            command,
        } => {
            let request = match build_request(command, context, mode.into(), cwd, env) {
                Ok(request) => request,
                Err(err) => return emit_result(json, Err(err)),
            };
            cmd_exec(
                json,
                policy.as_deref(),
                &request,
                timeout_ms,
                audit_log.as_deref(),
                explain_policy,
            )
        }
        Commands::Serve {
            stdio,
            policy,
            max_concurrency,
            audit_log,
        } => cmd_serve(stdio, policy.as_deref(), max_concurrency, audit_log.as_deref()),
        Commands::Policy { command } => match command {
            PolicyCommands::Show { policy } => cmd_policy_show(policy.as_deref()),
            PolicyCommands::Check { policy, json } => cmd_policy_check(&policy, json),
        },
        Commands::Health { json } => cmd_health(json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_exec(
    json: bool,
    policy_path: Option<&Path>,
    request: &RunRequest,
    timeout_ms: Option<u64>,
    audit_log: Option<&Path>,
    explain_policy: bool,
) -> Result<()> {
    let mut policy = match resolve_policy(policy_path) {
        Ok(policy) => policy,
        Err(err) => return emit_result(json, Err(err)),
    };
    if let Some(ms) = timeout_ms {
        if ms == 0 {
            return emit_cli_error(json, "--timeout-ms must be greater than zero");
        }
        policy.budgets.max_runtime_ms = policy.budgets.max_runtime_ms.min(ms);
    }
    if explain_policy {
        let explanation = explain_policy_for_request(&policy, request);
        return emit_explanation(json, &explanation);
    }
    let gateway = match build_gateway(policy, audit_log) {
        Ok(gateway) => gateway,
        Err(err) => return emit_result(json, Err(err)),
    };
    let result = gateway.execute(request);
    emit_result(json, Ok(result))
}

fn cmd_serve(
    stdio: bool,
    policy_path: Option<&Path>,
    max_concurrency: usize,
    audit_log: Option<&Path>,
) -> Result<()> {
    if !stdio {
        return emit_cli_error(true, "serve requires --stdio");
    }
    if max_concurrency == 0 {
        return emit_cli_error(true, "--max-concurrency must be at least 1");
    }
    let gateway = resolve_policy(policy_path).and_then(|policy| build_gateway(policy, audit_log));
    let gateway = match gateway {
        Ok(gateway) => gateway,
        Err(err) => return emit_result(true, Err(err)),
    };
    tracing::info!(max_concurrency, "serving NDJSON requests on stdio");
    let stdin = io::stdin();
    serve::run_serve(
        Arc::new(gateway),
        max_concurrency,
        stdin.lock(),
        io::stdout(),
    )
}

fn cmd_policy_show(policy_path: Option<&Path>) -> Result<()> {
    let policy = match resolve_policy(policy_path) {
        Ok(policy) => policy,
        Err(err) => return emit_result(false, Err(err)),
    };
    let payload = serde_json::to_string_pretty(&policy).into_diagnostic()?;
    println!("{payload}");
    Ok(())
}

fn cmd_policy_check(path: &Path, json: bool) -> Result<()> {
    match check_policy_file(path) {
        Ok(policy) => {
            if json {
                let payload = serde_json::json!({
                    "valid": true,
                    "policy_version": policy.policy_version,
                    "allowed_tools": policy.allowed_tools,
                });
                println!("{payload}");
            } else {
                println!("policy: valid ({} tools allowed)", policy.allowed_tools.len());
            }
            Ok(())
        }
        Err(err) => emit_result(json, Err(err)),
    }
}

fn cmd_health(json: bool) -> Result<()> {
    if json {
        let payload = serde_json::json!({ "ok": true, "service": SERVICE_NAME });
        println!("{payload}");
    } else {
        println!("{SERVICE_NAME}: ok");
    }
    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn build_request(
    command: Vec<String>,
    context: Option<String>,
    mode: Mode,
    cwd: Option<String>,
    env: Vec<(String, String)>,
) -> Result<RunRequest, RunnerError> {
    let (tool, args) = split_command(command)?;
    let mut request = RunRequest::new(tool).args(args).mode(mode);
    request.context = context;
    request.cwd = cwd;
    if !env.is_empty() {
        request.env = Some(env.into_iter().collect::<BTreeMap<_, _>>());
    }
    Ok(request)
}

fn build_gateway(
    policy: GatewayPolicy,
    audit_log: Option<&Path>,
) -> Result<Gateway, RunnerError> {
    let gateway = Gateway::new(policy)?;
    match audit_log {
        Some(path) => {
            let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open(path)?);
            Ok(gateway.with_audit(sink))
        }
        None => Ok(gateway),
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err("environment variable name must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn split_command(mut command: Vec<String>) -> Result<(String, Vec<String>), RunnerError> {
    if command.is_empty() {
        return Err(RunnerError::cli_invalid_arg("missing command"));
    }
    let tool = command.remove(0);
    Ok((tool, command))
}

fn emit_result(json: bool, result: Result<RunResult, RunnerError>) -> Result<()> {
    match result {
        Ok(run_result) => {
            if json {
                let payload = serde_json::to_string(&run_result).into_diagnostic()?;
                println!("{payload}");
            } else {
                print_run_summary(&run_result)?;
            }
            match run_result.status {
                RunStatus::Succeeded => Ok(()),
                RunStatus::Denied => std::process::exit(ErrorCode::PolicyDenied.exit_code()),
                RunStatus::Failed | RunStatus::Queued | RunStatus::Running => {
                    let code = run_result
                        .error_code()
                        .map_or(1, exit_code_for_error_code);
                    std::process::exit(code);
                }
            }
        }
        Err(err) => {
            if json {
                let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
                println!("{payload}");
            } else {
                eprintln!("error: {err}");
            }
            std::process::exit(exit_code_for_error(&err));
        }
    }
}

/// Human-readable output: the tool's streams pass through, the summary goes
/// to stderr.
fn print_run_summary(result: &RunResult) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(result.stdout.as_bytes()).into_diagnostic()?;
    stdout.flush().into_diagnostic()?;
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
        if !result.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    let exit = result
        .exit_code
        .map_or_else(|| "none".to_string(), |code| code.to_string());
    eprintln!(
        "run {} {} (exit {exit}, {} ms)",
        result.run_id.short(),
        result.status.as_str(),
        result.duration().num_milliseconds()
    );
    Ok(())
}

fn emit_explanation(json: bool, explanation: &PolicyExplanation) -> Result<()> {
    if json {
        let payload = serde_json::to_string(explanation).into_diagnostic()?;
        println!("{payload}");
    } else if explanation.allowed {
        println!("policy: allowed");
    } else {
        println!("policy: denied");
        for err in &explanation.errors {
            println!(" - {}: {}", err.code, err.message);
        }
    }
    Ok(())
}

fn emit_cli_error(json: bool, message: &str) -> Result<()> {
    emit_result(json, Err(RunnerError::cli_invalid_arg(message)))
}

fn exit_code_for_error_code(code: &str) -> i32 {
    ErrorCode::parse(code).map_or(1, |c| c.exit_code())
}

fn exit_code_for_error(err: &RunnerError) -> i32 {
    err.exit_code()
}
