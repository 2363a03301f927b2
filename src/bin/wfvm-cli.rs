//! wfvm CLI - run, resume and inspect persisted workflows
//!
//! Ships one demo workflow: a setup breakpoint seeds a person, a loop ages
//! them with short delays, and a review breakpoint waits for approval
//! before the workflow finishes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use wfvm::vm::activities::{Breakpoint, Code, Delay, If, Log, Loop, Sequence, Workflow};
use wfvm::vm::storage::{load_state, save_state};
use wfvm::vm::{ActivityRef, InvokerStatus, Scope};
use wfvm::{ActivityRegistry, Invoker, VmConfig};

const DEMO_TYPE: &str = "demo";
const SETUP: &str = "SETUP";

#[derive(Parser)]
#[command(name = "wfvm")]
#[command(about = "Durable workflow virtual machine", long_about = None)]
struct Cli {
    /// Log every tick
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Machine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the demo workflow
    Run {
        /// Where to save the workflow when it pauses
        #[arg(long)]
        state: Option<PathBuf>,

        /// Resume every breakpoint after setup automatically
        #[arg(long)]
        auto_resume: bool,

        /// Person name seeded at the setup breakpoint
        #[arg(long, default_value = "Maks")]
        name: String,

        /// Starting age seeded at the setup breakpoint
        #[arg(long, default_value = "40")]
        age: i64,
    },

    /// Resume a saved workflow from the breakpoint it paused at
    Resume {
        /// Saved workflow document
        #[arg(long)]
        state: PathBuf,

        /// Resume later breakpoints automatically
        #[arg(long)]
        auto_resume: bool,
    },

    /// Pretty-print a saved workflow document
    Inspect {
        /// Saved workflow document
        file: PathBuf,
    },
}

fn demo_tree(options: &serde_json::Value) -> Result<ActivityRef> {
    let limit = options.get("ageLimit").and_then(|v| v.as_i64()).unwrap_or(45);

    let render = Code::new("render-person", |ctx| {
        let variables = ctx.variables();
        tracing::info!(
            "The {} is {} years old.",
            variables.get_string("name")?,
            variables.get_int("age")?
        );
        Ok(())
    });
    let grow = Code::new("increment-age", move |ctx| {
        let age = ctx.variables().get_int("age")?;
        if age >= limit {
            Loop::break_loop(ctx)?;
        } else {
            ctx.variables().set("age", age + 1)?;
        }
        Ok(())
    });
    let is_adult = Code::new("is-adult", |ctx| {
        if ctx.variables().get_int("age")? >= 18 {
            If::mark_true(ctx)?;
        } else {
            If::mark_false(ctx)?;
        }
        Ok(())
    });

    let body = Sequence::new(vec![
        Log::new("Workflow started"),
        If::new(
            is_adult,
            Loop::new(Sequence::new(vec![render, Delay::millis(100), grow])),
            Some(Log::new("Too young to age")),
        ),
        Breakpoint::new("REVIEW", "Waiting for approval to finish"),
        Log::new("Workflow is finished"),
    ]);

    Ok(Workflow::new(
        DEMO_TYPE,
        options.clone(),
        Breakpoint::wrap(SETUP, "Seed person data", body),
    ))
}

fn registry() -> Result<ActivityRegistry> {
    let mut registry = ActivityRegistry::new();
    registry.register(DEMO_TYPE, demo_tree)?;
    Ok(registry)
}

fn load_config(path: Option<&Path>) -> Result<VmConfig> {
    let Some(path) = path else {
        return Ok(VmConfig::default());
    };
    let data = std::fs::read(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    serde_json::from_slice(&data).context("Failed to deserialize config")
}

struct Seed {
    name: String,
    age: i64,
}

async fn drive(
    invoker: &mut Invoker,
    seed: Option<Seed>,
    auto_resume: bool,
    state: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut seed = seed;

    loop {
        if invoker.step(cancel).await? == InvokerStatus::Completed {
            println!("Workflow {} completed", invoker.id());
            return Ok(());
        }

        match invoker.vm().paused_at() {
            Some(name) if name == SETUP && seed.is_some() => {
                if let Some(Seed { name, age }) = seed.take() {
                    let mut variables = invoker.execution_context()?;
                    variables.define("name", name, Scope::Inherit)?;
                    variables.define("age", age, Scope::Inherit)?;
                }
                invoker.resume_breakpoint(SETUP)?;
            }
            Some(name) if auto_resume => {
                println!("Auto-resuming breakpoint {name}");
                invoker.resume_breakpoint(&name)?;
            }
            Some(name) => {
                match state {
                    Some(path) => {
                        save_state(path, &invoker.preserve())?;
                        println!("Paused at {name}; state saved to {:?}", path);
                    }
                    None => println!("Paused at {name}; pass --state to keep progress"),
                }
                return Ok(());
            }
            None => tokio::time::sleep(invoker.tick_countdown()).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            state,
            auto_resume,
            name,
            age,
        } => {
            let registry = registry()?;
            let root = registry.construct(DEMO_TYPE, &serde_json::json!({ "ageLimit": 45 }))?;
            let mut invoker = Invoker::with_config(root, config)?;
            println!("Started workflow {}", invoker.id());
            drive(
                &mut invoker,
                Some(Seed { name, age }),
                auto_resume,
                state.as_deref(),
                &cancel,
            )
            .await?;
        }

        Commands::Resume { state, auto_resume } => {
            let saved = load_state(&state)?;
            let mut invoker = Invoker::restore(&saved, &registry()?, config)?;
            let paused = invoker
                .vm()
                .paused_at()
                .context("Saved workflow is not paused at a breakpoint")?;
            println!("Resuming workflow {} at {paused}", invoker.id());
            invoker.resume_breakpoint(&paused)?;
            drive(&mut invoker, None, auto_resume, Some(&state), &cancel).await?;
        }

        Commands::Inspect { file } => {
            let saved = load_state(&file)?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
    }

    Ok(())
}
