use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sift_core::args::{parse_queries, ResearchRequest};
use sift_core::pool::{SummaryPool, DEFAULT_CONTEXT_PERCENT};
use sift_core::research::{validate, Researcher, DEFAULT_RELEVANCE_PERCENT};
use serde_json::{Map, Value};
use sift_local::{Backends, LocalConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(about = "Web research for chat agents: search, scrape, rank, summarize", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research one or more queries and print a budgeted digest.
    Research(ResearchCmd),
    /// Diagnose configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// Search query (repeatable).
    #[arg(long = "query", short = 'q')]
    queries: Vec<String>,
    /// Queries in tool-call form: a JSON list, a JSON string holding one, or `['a', 'b']`.
    #[arg(long)]
    queries_json: Option<String>,
    /// The user prompt the research serves (defaults to the queries).
    #[arg(long, default_value = "")]
    prompt: String,
    /// Why the research is being done; carried into the digest.
    #[arg(long, default_value = "")]
    reason: String,
    /// What summaries should focus on (replaces the default extraction instructions).
    #[arg(long)]
    instructions: Option<String>,
    /// Result pages to walk per query.
    #[arg(long, env = "SIFT_PAGES", default_value_t = 1)]
    pages: u32,
    /// Minimum relevance, in percent, for a page to be kept.
    #[arg(long, env = "SIFT_RELEVANCE", default_value_t = DEFAULT_RELEVANCE_PERCENT)]
    relevance: f64,
    /// Share of a summary model's context window each page summary may use.
    #[arg(long, default_value_t = DEFAULT_CONTEXT_PERCENT)]
    page_budget_percent: f64,
    /// Share of the context window the final digest may use.
    #[arg(long, env = "SIFT_BUDGET_PERCENT", default_value_t = 75.0)]
    budget_percent: f64,
    /// Output format: markdown|json
    #[arg(long = "output", alias = "format", default_value = "markdown")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Logs go to stderr so stdout carries only the digest.
fn init_tracing() {
    let filter = std::env::var("SIFT_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_request(args: &ResearchCmd) -> Result<ResearchRequest> {
    let mut queries: Vec<String> = args
        .queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if let Some(raw) = &args.queries_json {
        queries.extend(parse_queries(&Value::String(raw.clone())).context("--queries-json")?);
    }
    let prompt = if args.prompt.trim().is_empty() {
        queries.join("; ")
    } else {
        args.prompt.clone()
    };
    // Same argument shape a model's search tool call carries.
    let mut call = Map::new();
    call.insert(
        "queries".to_string(),
        Value::Array(queries.into_iter().map(Value::String).collect()),
    );
    call.insert("reason".to_string(), Value::String(args.reason.clone()));
    call.insert("page".to_string(), Value::from(args.pages));
    let req = ResearchRequest::from_tool_arguments(&prompt, &call)?;
    validate(&req)?;
    Ok(req)
}

async fn research(args: ResearchCmd) -> Result<()> {
    let req = build_request(&args)?;
    let cfg = LocalConfig::from_env().context("load configuration")?;
    let backends = Backends::from_config(&cfg).context("build backends")?;
    let pool = SummaryPool::new(backends.summary_agents)?
        .with_context_percent(args.page_budget_percent);
    let mut researcher = Researcher::new(
        backends.search,
        backends.scraper,
        backends.embedder,
        pool,
    )
    .with_relevance_percent(args.relevance);
    if let Some(instructions) = args.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        researcher = researcher.with_instructions(instructions);
    }

    let mut trace = researcher.research(&req).await;
    if trace.is_empty() {
        tracing::info!("no results found for any query");
    }
    let budget = researcher.digest_budget(args.budget_percent);
    let digest = researcher.digest(&mut trace, budget).await;
    tracing::info!(
        duration = %trace.format_duration(),
        results = trace.result_count(),
        tokens = trace.total_tokens(),
        budget,
        "research finished"
    );

    match args.output.to_ascii_lowercase().as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&trace)?),
        _ => println!("{digest}"),
    }
    Ok(())
}

fn doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let (ok, config, error) = match LocalConfig::from_env() {
        Ok(cfg) => (true, cfg.report(), None),
        Err(e) => (false, serde_json::Value::Null, Some(e.to_string())),
    };
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "sift",
        "version": env!("CARGO_PKG_VERSION"),
        "config": config,
        "error": error,
        "elapsed_ms": t0.elapsed().as_millis() as u64,
    });
    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("sift {} ok={ok}", env!("CARGO_PKG_VERSION"));
            if let Some(e) = error {
                println!("error: {e}");
            }
        }
        _ => println!("{payload}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Research(args) => research(args).await?,
        Commands::Doctor(args) => doctor(args)?,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "sift",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("sift {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
