//! `gamepilot-cli` – command line front end.
//!
//! | Command | Effect |
//! |---|---|
//! | `check [content]` | load and validate a content file, print a summary |
//! | `plan <content> <from> <to>` | print the cheapest route and its cost |
//! | `schema` | print the JSON Schema of the content format |
//! | `config [--init]` | show the effective configuration, optionally writing defaults |
//! | `demo [--popup]` | run the Home → Shop scenario against a simulated client |
//!
//! Ctrl-C during `demo` cancels the navigation through its
//! `CancellationToken`; the current transition is finished before the run
//! returns.

mod config;
mod content;
mod demo;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use gamepilot_kernel::plan;
use gamepilot_middleware::Topic;
use gamepilot_types::{NavError, PilotError, StateId, TrailEntry};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "gamepilot", version, about = "Screen-driven navigation for mirrored mobile games")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a content file.
    Check {
        /// Defaults to `content_path` from the config.
        content: Option<PathBuf>,
    },
    /// Print the cheapest route between two states.
    Plan {
        content: PathBuf,
        from: String,
        to: String,
    },
    /// Print the JSON Schema of the content file format.
    Schema,
    /// Show the effective configuration.
    Config {
        /// Write the defaults to ~/.gamepilot/config.toml.
        #[arg(long)]
        init: bool,
    },
    /// Navigate Home → Shop on a simulated client.
    Demo {
        /// Open the shop under a popup that recovery has to dismiss.
        #[arg(long)]
        popup: bool,
    },
}

fn main() -> ExitCode {
    let _guard = gamepilot_runtime::init_tracing("gamepilot");
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

fn run(command: Command) -> Result<ExitCode, PilotError> {
    match command {
        Command::Schema => {
            println!("{}", content::schema()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { init } => show_config(init),
        Command::Check { content } => {
            let cfg = config::load()?;
            let path = content.or(cfg.content_path).ok_or_else(|| {
                PilotError::Config("no content file given and no content_path configured".into())
            })?;
            check(&path)
        }
        Command::Plan { content, from, to } => print_plan(&content, from.into(), to.into()),
        Command::Demo { popup } => run_demo(popup),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn show_config(init: bool) -> Result<ExitCode, PilotError> {
    if init {
        let path = config::save(&config::Config::default())?;
        println!("  {} wrote {}", "✓".green().bold(), path.display().to_string().bold());
    }
    let cfg = config::load()?;
    let raw = toml::to_string_pretty(&cfg)
        .map_err(|e| PilotError::Config(format!("cannot render config: {e}")))?;
    println!("  {} {}", "config".dimmed(), config::config_path().display());
    println!("{raw}");
    Ok(ExitCode::SUCCESS)
}

fn check(path: &std::path::Path) -> Result<ExitCode, PilotError> {
    let content = content::load(path)?;
    let graph = &content.graph;
    println!("  {} {}", "✓".green().bold(), path.display().to_string().bold());
    println!("    templates    {}", content.registry.len());
    println!("    states       {}", graph.state_count());
    println!("    transitions  {}", graph.transitions().len());
    println!("    root         {}", graph.root());
    println!("    anchor       {}", graph.anchor());
    for state in graph.states() {
        let indent = "  ".repeat(graph.depth(&state.id).unwrap_or(0));
        println!(
            "      {indent}{} {}",
            state.id.as_str().cyan(),
            format!("[{} signature(s)]", state.signatures.len()).dimmed()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_plan(path: &std::path::Path, from: StateId, to: StateId) -> Result<ExitCode, PilotError> {
    let content = content::load(path)?;
    let graph = &content.graph;
    for state in [&from, &to] {
        if !graph.contains(state) {
            return Err(PilotError::Model(format!("unknown state '{state}'")));
        }
    }
    let Some(route) = plan(graph, &from, &to) else {
        println!("  {} no route from {from} to {to}", "✗".red().bold());
        return Ok(ExitCode::FAILURE);
    };
    println!("  {} → {}  cost {}", from.as_str().cyan(), to.as_str().cyan(), route.cost);
    for id in &route.steps {
        if let Some(t) = graph.transition(*id) {
            println!("    {}  {}", t.label(), t.recipe.name.dimmed());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_demo(popup: bool) -> Result<ExitCode, PilotError> {
    let cfg = config::load()?;
    let mut demo = demo::build(popup, &cfg)?;

    let cancel = CancellationToken::new();
    let on_ctrlc = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\n{}", "  Ctrl-C received, finishing the current step …".yellow().bold());
        on_ctrlc.cancel();
    }) {
        warn!(error = %e, "Ctrl-C handler not installed; the demo cannot be interrupted");
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PilotError::Config(format!("cannot start async runtime: {e}")))?;
    let goal = StateId::from("shop");
    println!("  navigating {} → {}", "home".cyan(), goal.as_str().cyan());

    let result = runtime.block_on(async {
        let mut events = demo.bus.subscribe_to(Topic::Recovery);
        let printer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !matches!(
                    event.payload,
                    TrailEntry::Anomaly {
                        kind: gamepilot_types::AnomalyKind::RecognitionAmbiguous,
                        ..
                    }
                ) {
                    println!("    {} {}", "!".yellow().bold(), describe(&event.payload));
                }
            }
        });
        let result = demo.navigator.navigate_to(&goal, &cancel).await;
        printer.abort();
        result
    });

    match result {
        Ok(report) => {
            print_trail(report.trail.entries());
            println!(
                "  {} reached {} after {} action(s), recipes sent: {}",
                "✓".green().bold(),
                report.final_belief,
                report.trail.actions_executed(),
                demo.client.executed().join(", ")
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if let Some(trail) = e.trail() {
                print_trail(trail.entries());
            }
            let mark = match e {
                NavError::Cancelled { .. } => "■".yellow().bold(),
                _ => "✗".red().bold(),
            };
            println!("  {mark} {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_trail(entries: &[TrailEntry]) {
    println!("  {}", "trail".bold());
    for entry in entries {
        println!("    {}", describe(entry));
    }
}

fn describe(entry: &TrailEntry) -> String {
    let opt = |s: &Option<StateId>| s.as_ref().map_or("unknown".to_string(), StateId::to_string);
    match entry {
        TrailEntry::Observed { state, confidence, .. } => {
            format!("observe   {} ({confidence:.2})", opt(state))
        }
        TrailEntry::Planned { transitions, cost, replan, .. } => format!(
            "{}   {} (cost {cost})",
            if *replan { "replan" } else { "plan  " },
            transitions.join(", ")
        ),
        TrailEntry::TransitionAttempted { from, to, recipe, attempt } => {
            format!("act       {from} -> {to} via {recipe} (attempt {attempt})")
        }
        TrailEntry::Arrived { state, elapsed_ms, .. } => {
            format!("arrive    {state} after {elapsed_ms} ms")
        }
        TrailEntry::Anomaly { kind, expected, observed, .. } => format!(
            "anomaly   {kind}: expected {}, saw {}",
            opt(expected),
            opt(observed)
        ),
        TrailEntry::Recovery { tier, outcome, state, .. } => {
            format!("recover   {tier} -> {outcome:?} ({})", opt(state))
        }
        TrailEntry::Recognition { template, confidence, accepted } => {
            format!("match     {template} {confidence:.2} {}", if *accepted { "✓" } else { "✗" })
        }
    }
}
