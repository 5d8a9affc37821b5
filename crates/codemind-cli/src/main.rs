use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use codemind_agent::{tool_registry, ReasoningLoop, ReasoningLoopConfig, ToolExecutor};
use codemind_core::{CancellationHandle, Session, Symbol};
use codemind_index::SymbolIndex;
use codemind_llm::factory::{LocalModelManager, ProviderFactory};
use codemind_llm::role_resolver::RoleResolverConfig;
use colored::Colorize;
use uuid::Uuid;

/// Smoke-test entry point: parse a query, wire a `SymbolIndex` loaded from
/// an optional pre-extracted symbol file, and drive one `ReasoningLoop`
/// turn to completion. CLI surface and exit codes are otherwise
/// out of scope; this exists to have something runnable end to end.
#[derive(Parser)]
#[command(name = "codemind")]
#[command(about = "CodeMind agent runtime - single-turn smoke entry point", long_about = None)]
#[command(version)]
struct Cli {
    /// The user's question.
    query: String,

    /// Path to a JSON file containing a pre-extracted `Symbol` array.
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Fallback model used when a role defaults to the local runtime.
    #[arg(long, env = "CODEMIND_FALLBACK_MODEL", default_value = "llama3")]
    fallback_model: String,

    /// Step bound for the reasoning loop.
    #[arg(long, default_value_t = codemind_agent::DEFAULT_MAX_STEPS)]
    max_steps: u32,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "pretty")]
    output: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

fn load_index(path: Option<&PathBuf>) -> Result<SymbolIndex> {
    let index = SymbolIndex::new(250_000);
    let Some(path) = path else {
        return Ok(index);
    };
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let symbols: Vec<Symbol> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    index.add_batch(symbols).context("loading symbols into the index")?;
    Ok(index)
}

#[tokio::main]
async fn main() -> Result<()> {
    codemind_core::init_tracing();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(value) => {
            print_output(&cli.output, &value)?;
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<serde_json::Value> {
    let index = load_index(cli.symbols.as_ref())?;
    let index = Arc::new(index);

    let roles = RoleResolverConfig::load(&cli.fallback_model).context("loading role configuration")?;
    let local_manager = Arc::new(LocalModelManager::new(codemind_core::config::ollama_base_url()));

    let main_bundle = ProviderFactory::create(
        &roles.provider_config_for(&roles.main),
        Some(local_manager.clone()),
    )
    .context("constructing MAIN provider")?;
    let router_bundle = ProviderFactory::create(
        &roles.provider_config_for(&roles.router),
        Some(local_manager),
    )
    .context("constructing ROUTER provider")?;

    let tool_executor = Arc::new(ToolExecutor::new(index));
    let tool_definitions = tool_registry();

    let mut loop_config = ReasoningLoopConfig::default();
    loop_config.max_steps = cli.max_steps;

    let reasoning_loop = ReasoningLoop::new(
        router_bundle.agent,
        main_bundle.agent,
        tool_executor,
        tool_definitions,
        loop_config,
    );

    let mut session = Session::new(Uuid::new_v4().to_string());
    let cancel = CancellationHandle::new();
    let outcome = reasoning_loop.run(&mut session, &cli.query, &cancel).await?;

    Ok(outcome_to_json(&outcome, &session))
}

fn outcome_to_json(outcome: &codemind_agent::LoopOutcome, session: &Session) -> serde_json::Value {
    let (state, answer, cause) = match outcome {
        codemind_agent::LoopOutcome::Complete { answer } => ("complete", Some(answer.clone()), None),
        codemind_agent::LoopOutcome::Surrendered { answer } => ("surrendered", Some(answer.clone()), None),
        codemind_agent::LoopOutcome::Failed { cause } => ("failed", None, Some(cause.clone())),
    };
    serde_json::json!({
        "session_id": session.id,
        "state": state,
        "answer": answer,
        "cause": cause,
        "steps_traced": session.trace.len(),
    })
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Pretty => print_pretty(value),
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        for (key, val) in map {
            let key_colored = key.cyan().bold();
            match val {
                serde_json::Value::String(s) => println!("{}: {}", key_colored, s.green()),
                serde_json::Value::Number(n) => println!("{}: {}", key_colored, n.to_string().yellow()),
                serde_json::Value::Null => println!("{}: {}", key_colored, "null".dimmed()),
                other => println!("{}: {}", key_colored, other),
            }
        }
    } else {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}
