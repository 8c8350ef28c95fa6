//! Medic CLI
//!
//! Thin front end over the investigation engine: builds the request
//! document from flags, runs the engine, and prints the output document.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use medic::engine::MedicResponse;
use medic::{
    AnthropicClient, ClusterInspector, ExecutionMode, FileSessionStore, Investigator,
    IssueContext, KubectlExecutor, KubectlRunner, MedicConfig, MedicEngine, MedicRequest,
    RemediationEngine, RiskLevel, SessionStore,
};

/// AI-assisted Kubernetes incident investigation and remediation
#[derive(Parser)]
#[command(name = "medic")]
#[command(about = "AI-assisted Kubernetes incident investigation and remediation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to medic-config.json
    #[arg(long, default_value = "medic-config.json", global = true)]
    config: PathBuf,

    /// Output format (json or text)
    #[arg(long, default_value = "json", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate an issue (new session, or resume with --session-id)
    Investigate {
        /// Issue description (1-2000 chars; optional when resuming)
        #[arg(long)]
        issue: Option<String>,

        /// Path to a JSON file with structured context hints
        /// (event, logs, metrics, podSpec, relatedEvents)
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Execution mode (manual or automatic)
        #[arg(long)]
        mode: Option<String>,

        /// Resume an existing session
        #[arg(long)]
        session_id: Option<String>,

        /// Free-form policy identifier, passed through
        #[arg(long)]
        policy: Option<String>,

        /// Maximum risk level for automatic execution
        #[arg(long)]
        max_risk: Option<String>,

        /// Confidence threshold for automatic execution (0-1)
        #[arg(long)]
        confidence_threshold: Option<f64>,
    },
    /// Execute the remediation for a finalized session
    Execute {
        /// Session to execute
        #[arg(long)]
        session_id: String,

        /// 1 = engine executes the planned action, 2 = already executed
        /// externally (report with --executed-command)
        #[arg(long)]
        choice: u8,

        /// Command that was executed externally (repeatable)
        #[arg(long = "executed-command")]
        executed_commands: Vec<String>,
    },
    /// Print the stored record of a session
    Status {
        /// Session to inspect
        #[arg(long)]
        session_id: String,
    },
}

fn build_engine(config: MedicConfig) -> Result<(MedicEngine, Arc<FileSessionStore>)> {
    let store = Arc::new(FileSessionStore::new(&config.session_dir));
    let reasoning = Arc::new(
        AnthropicClient::from_env(config.reasoning.clone())
            .context("Failed to create reasoning client")?,
    );
    let inspector = ClusterInspector::new(Arc::new(KubectlRunner::new(config.kubectl.clone())));
    let investigator = Investigator::new(reasoning.clone(), inspector, store.clone());
    let remediation = RemediationEngine::new(
        reasoning,
        Arc::new(KubectlExecutor::new(
            config.kubectl.clone(),
            Duration::from_secs(config.exec_timeout_secs),
        )),
    );
    let engine = MedicEngine::new(config, store.clone(), investigator, remediation);
    Ok((engine, store))
}

fn parse_mode(value: Option<&str>) -> Result<Option<ExecutionMode>> {
    value
        .map(|v| {
            ExecutionMode::from_str_ci(v)
                .ok_or_else(|| anyhow::anyhow!("invalid mode: {v} (expected manual or automatic)"))
        })
        .transpose()
}

fn parse_risk(value: Option<&str>) -> Result<Option<RiskLevel>> {
    value
        .map(|v| {
            RiskLevel::from_str_ci(v)
                .ok_or_else(|| anyhow::anyhow!("invalid risk level: {v} (expected low, medium or high)"))
        })
        .transpose()
}

fn load_context(path: Option<&PathBuf>) -> Result<Option<IssueContext>> {
    match path {
        None => Ok(None),
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file: {}", path.display()))?;
            let context: IssueContext = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse context file: {}", path.display()))?;
            Ok(Some(context))
        }
    }
}

fn print_response(response: &MedicResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {}",
                "Session:".bold(),
                response.session_id.as_str().cyan()
            );
            println!("{} {}", "Status:".bold(), response.status);
            println!(
                "{} {} iterations",
                "Investigation:".bold(),
                response.investigation.iterations
            );
            println!(
                "{} {} (confidence {:.2})",
                "Root cause:".bold(),
                response.analysis.root_cause,
                response.analysis.confidence
            );
            if !response.remediation.summary.is_empty() {
                println!("{} {}", "Remediation:".bold(), response.remediation.summary);
            }
            for action in &response.remediation.actions {
                let risk = match action.risk {
                    RiskLevel::Low => "low".green(),
                    RiskLevel::Medium => "medium".yellow(),
                    RiskLevel::High => "high".red(),
                };
                match &action.command {
                    Some(command) => println!("  [{risk}] {} -> {command}", action.description),
                    None => println!("  [{risk}] {}", action.description),
                }
            }
            if response.executed {
                println!("{}", "Executed: yes".green());
            } else {
                println!("Executed: no");
            }
            if let Some(reason) = &response.gate_reason {
                println!("{} {reason}", "Withheld:".yellow());
            }
            if let Some(new_root_cause) = &response.new_root_cause {
                println!(
                    "{} {new_root_cause}",
                    "New issue found (manual approval required):".red().bold()
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("medic=debug")
            .init();
    }

    let config = MedicConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    match cli.command {
        Commands::Investigate {
            issue,
            context_file,
            mode,
            session_id,
            policy,
            max_risk,
            confidence_threshold,
        } => {
            let (engine, _store) = build_engine(config)?;
            let request = MedicRequest {
                issue,
                context: load_context(context_file.as_ref())?,
                mode: parse_mode(mode.as_deref())?,
                policy,
                session_id,
                execute_choice: None,
                executed_commands: Vec::new(),
                max_risk_level: parse_risk(max_risk.as_deref())?,
                confidence_threshold,
            };
            let response = engine.handle(request).await?;
            print_response(&response, cli.format)?;
        }
        Commands::Execute {
            session_id,
            choice,
            executed_commands,
        } => {
            let (engine, _store) = build_engine(config)?;
            let request = MedicRequest {
                session_id: Some(session_id),
                execute_choice: Some(choice),
                executed_commands,
                ..MedicRequest::default()
            };
            let response = engine.handle(request).await?;
            print_response(&response, cli.format)?;
        }
        Commands::Status { session_id } => {
            let store = FileSessionStore::new(&config.session_dir);
            let session = store
                .load(&session_id)
                .await?
                .with_context(|| format!("unknown session: {session_id}"))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
    }

    Ok(())
}
