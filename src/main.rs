//! agent-guard - command line front-end
//!
//! Shell integrations call `agent-guard check -- <command>` before running a
//! command; the exit code carries the decision.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use agent_guard_core::constants;
use agent_guard_core::logic::arbiter::LlmClient;
use agent_guard_core::logic::command::{CommandEvent, ExecutionContext};
use agent_guard_core::logic::config::{GuardConfig, TierThresholds};
use agent_guard_core::logic::escalation::fail_safe;
use agent_guard_core::logic::features::FeatureVector;
use agent_guard_core::logic::policy::{derive_session_id, PolicyState};
use agent_guard_core::logic::telemetry::{
    default_export_name, export_audit, generate_analytics, AuditLog, AuditRecord, Diagnostics, ExportFilter,
    ExportFormat,
};
use agent_guard_core::{CommandRequest, FaultKind, InterceptOutcome, Interceptor, Outcome};

const EXIT_ALLOW: u8 = 0;
const EXIT_DENY: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[clap(name = "agent-guard", about = "Risk-tiered gatekeeper for agent-issued shell commands", version)]
struct Cli {
    /// Config file (defaults to $AGENT_GUARD_CONFIG, then the user config dir)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Session id (defaults to $AGENT_GUARD_SESSION, then the parent shell)
    #[clap(long, global = true)]
    session: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide one command: exit 0 to run it, 1 to block it
    Check {
        /// Working directory the command runs in
        #[clap(long)]
        cwd: Option<PathBuf>,

        /// The command, as one string or as separate words after `--`
        #[clap(required = true, last = true)]
        command: Vec<String>,
    },

    /// Start or end the current session
    Session {
        #[clap(subcommand)]
        action: SessionAction,
    },

    /// Turn interception on for the session
    Enable,

    /// Turn interception off for the session
    Disable,

    /// Show the session state
    Status,

    /// Set (or reset) per-session tier thresholds
    Thresholds {
        #[clap(long, requires = "high_min")]
        low_max: Option<f32>,

        #[clap(long, requires = "low_max")]
        high_min: Option<f32>,

        /// Restore the configured thresholds
        #[clap(long, conflicts_with_all = ["low_max", "high_min"])]
        reset: bool,
    },

    /// Export decision records
    Export {
        /// Destination file (default: audit-export-<timestamp>.<ext>)
        dest: Option<PathBuf>,

        #[clap(long, default_value = "jsonl")]
        format: ExportFormat,

        /// Only records with this outcome (allow, deny)
        #[clap(long)]
        outcome: Option<String>,

        /// Only records from this session
        #[clap(long = "only-session")]
        only_session: Option<String>,

        /// Only records written at or after this time (RFC 3339)
        #[clap(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Print decision analytics as JSON
    Summary,
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    Start,
    End,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    log::debug!("{} v{}", constants::APP_NAME, constants::APP_VERSION);
    let session_id = cli
        .session
        .clone()
        .or_else(constants::session_id_from_env)
        .unwrap_or_else(derive_session_id);

    let config = match GuardConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("agent-guard: configuration error: {}", e);
            return match &cli.command {
                Command::Check { command, cwd } => deny_unconfigured(&session_id, &join_command(command), cwd, &e),
                _ => ExitCode::from(EXIT_ERROR),
            };
        }
    };

    let result = match cli.command {
        Command::Check { cwd, command } => return check(config, session_id, cwd, &command),
        Command::Session { action } => session(config, &session_id, action),
        Command::Enable => with_policy(config, |p| p.enable(&session_id).map(|_| "interceptor enabled".to_string())),
        Command::Disable => with_policy(config, |p| p.disable(&session_id).map(|_| "interceptor disabled".to_string())),
        Command::Status => status(config, &session_id),
        Command::Thresholds {
            low_max,
            high_min,
            reset,
        } => thresholds(config, &session_id, low_max, high_min, reset),
        Command::Export {
            dest,
            format,
            outcome,
            only_session,
            since,
        } => export(config, dest, format, outcome, only_session, since),
        Command::Summary => summary(config),
    };

    match result {
        Ok(message) => {
            println!("{}", message);
            ExitCode::from(EXIT_ALLOW)
        }
        Err(e) => {
            eprintln!("agent-guard: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

// ============================================================================
// CHECK
// ============================================================================

fn check(config: GuardConfig, session_id: String, cwd: Option<PathBuf>, words: &[String]) -> ExitCode {
    let raw = join_command(words);
    let interceptor = match Interceptor::from_config(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("agent-guard: configuration error: {}", e);
            return deny_unconfigured(&session_id, &raw, &cwd, &e);
        }
    };

    let request = CommandRequest::new(raw, working_directory(cwd))
        .with_session(session_id)
        .with_process_env();

    match interceptor.evaluate(request) {
        InterceptOutcome::PassThrough { .. } => ExitCode::from(EXIT_ALLOW),
        InterceptOutcome::Decided { decision, .. } => {
            if decision.outcome.is_allow() {
                ExitCode::from(EXIT_ALLOW)
            } else {
                eprintln!("agent-guard: blocked ({}): {}", decision.source, decision.reasoning);
                ExitCode::from(EXIT_DENY)
            }
        }
    }
}

/// No usable configuration: deny, and audit the denial with defaults
fn deny_unconfigured(session_id: &str, raw: &str, cwd: &Option<PathBuf>, error: &dyn std::fmt::Display) -> ExitCode {
    let started = Instant::now();
    let context = ExecutionContext {
        working_directory: working_directory(cwd.clone()),
        session_id: session_id.to_string(),
        ..Default::default()
    };
    let event = CommandEvent::new(raw, Vec::new(), &context);
    let decision = fail_safe(
        event.id,
        format!("configuration error: {}", error),
        FaultKind::InternalFault,
        started,
    );

    let audit = AuditLog::new(constants::default_audit_dir(), constants::DEFAULT_AUDIT_MAX_FILE_BYTES);
    if let Err(e) = audit.append(&AuditRecord::new(&event, &FeatureVector::new(), &decision)) {
        Diagnostics::new(&constants::default_state_dir()).report(&format!("decision {}", event.id), &e);
    }
    ExitCode::from(EXIT_DENY)
}

fn join_command(words: &[String]) -> String {
    match words {
        [single] => single.clone(),
        _ => shell_words::join(words),
    }
}

fn working_directory(cwd: Option<PathBuf>) -> PathBuf {
    cwd.or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

// ============================================================================
// OPERATOR COMMANDS
// ============================================================================

type CliResult = Result<String, Box<dyn std::error::Error>>;

fn policy(config: GuardConfig) -> Result<PolicyState, Box<dyn std::error::Error>> {
    let state_dir = config.state_dir();
    let audit = std::sync::Arc::new(AuditLog::from_config(&config));
    Ok(PolicyState::new(config, audit, Diagnostics::new(&state_dir))?)
}

fn with_policy<E>(config: GuardConfig, action: impl FnOnce(&PolicyState) -> Result<String, E>) -> CliResult
where
    E: std::error::Error + 'static,
{
    let policy = policy(config)?;
    Ok(action(&policy)?)
}

fn session(config: GuardConfig, session_id: &str, action: SessionAction) -> CliResult {
    let policy = policy(config)?;
    match action {
        SessionAction::Start => {
            let state = policy.start_session(session_id)?;
            Ok(format!(
                "session {} started (interceptor {})",
                state.session_id,
                if state.interceptor_enabled { "on" } else { "off" }
            ))
        }
        SessionAction::End => match policy.end_session(session_id)? {
            Some(state) => Ok(format!("session {} ended", state.session_id)),
            None => Ok(format!("no active session {}", session_id)),
        },
    }
}

fn status(config: GuardConfig, session_id: &str) -> CliResult {
    let llm = if !config.llm.enabled {
        "disabled".to_string()
    } else {
        match LlmClient::new(&config.llm) {
            Ok(client) if client.is_available(config.llm.timeout()) => format!("reachable at {}", client.endpoint()),
            Ok(client) => format!("unreachable at {}", client.endpoint()),
            Err(e) => format!("unusable: {}", e),
        }
    };

    let policy = policy(config)?;
    let session = match policy.status(session_id)? {
        Some(state) => serde_json::to_string_pretty(&state)?,
        None => format!("no state for session {} (starts on first command)", session_id),
    };
    Ok(format!("{}\nllm arbiter: {}", session, llm))
}

fn thresholds(
    config: GuardConfig,
    session_id: &str,
    low_max: Option<f32>,
    high_min: Option<f32>,
    reset: bool,
) -> CliResult {
    let update = match (low_max, high_min, reset) {
        (_, _, true) => None,
        (Some(low_max), Some(high_min), false) => Some(TierThresholds { low_max, high_min }),
        _ => return Err("pass --low-max and --high-min, or --reset".into()),
    };
    let policy = policy(config)?;
    let state = policy.set_thresholds(session_id, update)?;
    let current = state.thresholds(&policy.config().thresholds);
    Ok(format!("thresholds: low_max={:.2} high_min={:.2}", current.low_max, current.high_min))
}

fn export(
    config: GuardConfig,
    dest: Option<PathBuf>,
    format: ExportFormat,
    outcome: Option<String>,
    only_session: Option<String>,
    since: Option<DateTime<Utc>>,
) -> CliResult {
    let outcome = match outcome.as_deref() {
        None => None,
        Some("allow") => Some(Outcome::Allow),
        Some("deny") => Some(Outcome::Deny),
        Some(other) => return Err(format!("unknown outcome `{}` (allow, deny)", other).into()),
    };
    let filter = ExportFilter {
        session_id: only_session,
        outcome,
        since,
    };
    let dest = dest.unwrap_or_else(|| default_export_name(format));
    let report = export_audit(&config.audit_dir(), &dest, format, &filter)?;
    Ok(format!(
        "exported {} record(s) to {} ({} malformed line(s) skipped)",
        report.exported,
        dest.display(),
        report.malformed
    ))
}

fn summary(config: GuardConfig) -> CliResult {
    let summary = generate_analytics(&config.audit_dir(), &ExportFilter::default())?;
    Ok(serde_json::to_string_pretty(&summary)?)
}
