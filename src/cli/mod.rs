//! Command-line interface for steptrace.
//!
//! Provides commands for running an automation while tracing it, attaching to
//! a run already in progress, replaying captured agent output offline, and
//! inspecting the classifier and configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::poll::agent_message;
use crate::adapters::{
    AgentClient, AgentRunOptions, PollTransport, SourceAdapter, StreamTransport,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{classify_line, merge, RunSnapshot, TraceSession};
use crate::domain::{EventOrigin, RawEvent, RunOutcome, RunStatus, Step, StepStatus};

/// steptrace - Live execution trace reconstructor for browser automation agents
#[derive(Parser, Debug)]
#[command(name = "steptrace")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Agent server base URL (overrides config and STEPTRACE_SERVER)
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a task to the agent and trace it live
    Run {
        /// Natural-language task for the agent
        task: String,

        /// Skip the progress stream and poll only
        #[arg(long)]
        poll_only: bool,

        /// Abort when the server rejects the task
        #[arg(long)]
        strict: bool,

        /// Maximum agent steps
        #[arg(long)]
        max_steps: Option<u32>,

        /// Agent timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,

        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Attach to a run already in progress
    Watch {
        /// Skip the progress stream and poll only
        #[arg(long)]
        poll_only: bool,

        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild a trace from a file of captured agent output
    Replay {
        /// File with one agent log line per line
        file: PathBuf,

        /// Print the reconstructed snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a single line is classified
    Classify {
        /// Agent output line
        line: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                task,
                poll_only,
                strict,
                max_steps,
                timeout,
                headless,
                json,
            } => {
                let cfg = resolved(self.server)?;
                let mut options = cfg.agent.clone();
                if let Some(max_steps) = max_steps {
                    options.max_steps = max_steps;
                }
                if let Some(timeout) = timeout {
                    options.timeout_seconds = timeout;
                }
                options.headless |= headless;

                run_task(&cfg, &task, &options, poll_only, strict, json).await
            }
            Commands::Watch { poll_only, json } => {
                let cfg = resolved(self.server)?;
                watch_run(&cfg, poll_only, json).await
            }
            Commands::Replay { file, json } => replay_file(&file, json),
            Commands::Classify { line } => {
                show_classification(&line);
                Ok(())
            }
            Commands::Config => show_config(self.server),
        }
    }
}

/// Resolved config with the `--server` override applied
fn resolved(server: Option<String>) -> Result<ResolvedConfig> {
    let mut cfg = config::config()?.clone();
    if let Some(server) = server {
        cfg.server.base_url = server;
    }
    Ok(cfg)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

fn build_adapter(cfg: &ResolvedConfig, client: &reqwest::Client, poll_only: bool) -> SourceAdapter {
    let poll = PollTransport::new(
        cfg.server.progress_url(),
        client.clone(),
        cfg.polling.interval(),
    );

    if poll_only {
        SourceAdapter::fallback_only(Box::new(poll))
    } else {
        let stream = StreamTransport::new(cfg.server.stream_url(), client.clone());
        SourceAdapter::new(Box::new(stream), Box::new(poll))
    }
}

/// Submit a task and trace it until the agent returns
async fn run_task(
    cfg: &ResolvedConfig,
    task: &str,
    options: &AgentRunOptions,
    poll_only: bool,
    strict: bool,
    json: bool,
) -> Result<()> {
    let client = http_client()?;
    let agent = AgentClient::new(cfg.server.validate_url(), cfg.server.run_url(), client.clone());

    match agent.validate(task).await {
        Ok(validation) if validation.valid => {}
        Ok(validation) => {
            let reason = validation
                .reason
                .unwrap_or_else(|| "no reason given".to_string());
            if strict {
                anyhow::bail!("Task rejected by agent server: {}", reason);
            }
            warn!(%reason, "Agent server considers the task invalid, continuing");
        }
        Err(e) if strict => return Err(e),
        Err(e) => warn!(error = %e, "Task validation unavailable, continuing"),
    }

    let mut session = TraceSession::start(build_adapter(cfg, &client, poll_only), cfg.polling.queue_capacity);
    let mut printer = TracePrinter::new(json);
    let mut updates = session.subscribe();
    let mut updates_open = true;

    eprintln!("▶ Run {} started: {}", session.run_id(), task);

    let run = agent.run(task, options);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            result = &mut run => {
                break match result {
                    Ok(result) => result.outcome(),
                    Err(e) => RunOutcome::Error { message: format!("{:#}", e) },
                };
            }
            changed = updates.changed(), if updates_open => match changed {
                Ok(()) => {
                    let snapshot = updates.borrow_and_update().clone();
                    printer.show(&snapshot);
                }
                Err(_) => updates_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[Interrupted; the agent may still be running]");
                let snapshot = session.cancel().await;
                printer.show(&snapshot);
                report(&snapshot, json)?;
                std::process::exit(130);
            }
        }
    };

    let snapshot = session.finish(outcome).await;
    printer.show(&snapshot);
    report(&snapshot, json)?;
    exit_on_failure(&snapshot);
    Ok(())
}

/// Trace a run started elsewhere until it ends or Ctrl-C
async fn watch_run(cfg: &ResolvedConfig, poll_only: bool, json: bool) -> Result<()> {
    let client = http_client()?;
    let mut session = TraceSession::start(build_adapter(cfg, &client, poll_only), cfg.polling.queue_capacity);
    let mut printer = TracePrinter::new(json);
    let mut updates = session.subscribe();

    eprintln!("▶ Watching {}", cfg.server.base_url);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                printer.show(&snapshot);
                if snapshot.is_settled() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[Interrupted]");
                break;
            }
        }
    }

    let snapshot = session.cancel().await;
    printer.show(&snapshot);
    report(&snapshot, json)?;
    exit_on_failure(&snapshot);
    Ok(())
}

/// Rebuild a trace from captured agent output
fn replay_file(path: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;

    let events = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let message = agent_message(line).unwrap_or(line);
            RawEvent::text(EventOrigin::Poll, None, message)
        });

    let state = merge::replay(events);
    let snapshot = RunSnapshot::capture(&state, false);

    let mut printer = TracePrinter::new(json);
    printer.show(&snapshot);
    report(&snapshot, json)
}

fn show_classification(line: &str) {
    let kind = classify_line(line);
    println!("{}", kind.name());
    println!("{:#?}", kind);
}

fn show_config(server: Option<String>) -> Result<()> {
    let cfg = resolved(server)?;

    println!("steptrace configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Agent server:");
    println!("  Base URL:  {}", cfg.server.base_url);
    println!("  Stream:    {}", cfg.server.stream_url());
    println!("  Progress:  {}", cfg.server.progress_url());
    println!("  Validate:  {}", cfg.server.validate_url());
    println!("  Run:       {}", cfg.server.run_url());
    println!();
    println!("Polling:");
    println!("  Interval:        {} ms", cfg.polling.interval_ms);
    println!("  Queue capacity:  {}", cfg.polling.queue_capacity);
    println!();
    println!("Agent run defaults:");
    println!("  Max steps:  {}", cfg.agent.max_steps);
    println!("  Timeout:    {}s", cfg.agent.timeout_seconds);
    println!("  Headless:   {}", cfg.agent.headless);

    Ok(())
}

/// Prints step changes as snapshots arrive
struct TracePrinter {
    quiet: bool,
    seen: HashMap<String, (StepStatus, String)>,
    progress: String,
}

impl TracePrinter {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            seen: HashMap::new(),
            progress: String::new(),
        }
    }

    fn show(&mut self, snapshot: &RunSnapshot) {
        if self.quiet {
            return;
        }

        for step in &snapshot.state.steps {
            let line = (step.status, step.headline().to_string());
            if self.seen.get(&step.id) != Some(&line) {
                println!("{}", step_line(step));
                self.seen.insert(step.id.clone(), line);
            }
        }

        if snapshot.state.steps.is_empty() && snapshot.progress.progress_text != self.progress {
            eprintln!("  … {}", snapshot.progress.progress_text);
        }
        self.progress = snapshot.progress.progress_text.clone();
    }
}

fn step_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Running => "…",
        StepStatus::Success => "✓",
        StepStatus::Warning => "!",
        StepStatus::Error => "✗",
    }
}

fn step_line(step: &Step) -> String {
    format!("  {} [{:>3}] {}", step_marker(step.status), step.id, step.headline())
}

/// Print the final result: a summary, or the snapshot as JSON
fn report(snapshot: &RunSnapshot, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        println!("{}", out);
        return Ok(());
    }

    let state = &snapshot.state;
    println!();
    println!("Run ID:   {}", state.run_id);
    println!("Status:   {}", snapshot.progress.progress_text);
    println!("Steps:    {}", state.steps.len());
    for step in &state.steps {
        println!("{}", step_line(step));
        if let Some(evaluation) = &step.evaluation {
            println!("          eval: {}", evaluation);
        }
    }
    println!("Log:      {} entries", state.log.len());
    Ok(())
}

fn exit_on_failure(snapshot: &RunSnapshot) {
    if matches!(
        snapshot.state.status,
        RunStatus::Failed { .. } | RunStatus::Error { .. }
    ) {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "steptrace",
            "--server",
            "http://agent:9000",
            "run",
            "find the cheapest flight",
            "--poll-only",
            "--max-steps",
            "12",
            "--json",
        ]);

        assert_eq!(cli.server.as_deref(), Some("http://agent:9000"));
        match cli.command {
            Commands::Run {
                task,
                poll_only,
                strict,
                max_steps,
                json,
                ..
            } => {
                assert_eq!(task, "find the cheapest flight");
                assert!(poll_only);
                assert!(!strict);
                assert_eq!(max_steps, Some(12));
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_step_line() {
        let mut step = Step::new("4", Utc::now());
        step.goal = Some("Open the cart".to_string());
        step.status = StepStatus::Success;

        assert_eq!(step_line(&step), "  ✓ [  4] Open the cart");
    }
}
