//! Uploadmeta CLI: resolve and check upload metadata.
//!
//! Usage:
//!   uploadmeta resolve --input md.json --start <id> [--user u] [--concurrency n] [--output path]
//!   uploadmeta validate --input md.json [--node <id>]
//!   uploadmeta ingest-check --input md.json [--user u]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uploadmeta::resolve::reachable;
use uploadmeta::{
    is_valid, is_valid_from, unresolved, unresolved_from, wire, HttpLookupClient, NodeId, NodeOutcome, NodeRegistry,
    PolicyConfig, Resolver,
};

#[derive(Parser)]
#[command(
    name = "uploadmeta",
    version,
    about = "Resolve and validate upload metadata against the policy service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up every unresolved node a start node depends on
    Resolve {
        /// Metadata JSON file
        #[arg(long)]
        input: PathBuf,
        /// Node to resolve
        #[arg(long)]
        start: String,
        /// User id or network id to query as
        #[arg(long)]
        user: Option<String>,
        /// Maximum lookups in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
        /// Write the updated metadata here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Report unresolved nodes without contacting the service
    Validate {
        /// Metadata JSON file
        #[arg(long)]
        input: PathBuf,
        /// Only check this node and what it depends on
        #[arg(long)]
        node: Option<String>,
    },
    /// Ask the policy service's ingest endpoint whether the metadata is acceptable
    IngestCheck {
        /// Metadata JSON file
        #[arg(long)]
        input: PathBuf,
        /// User id or network id to query as
        #[arg(long)]
        user: Option<String>,
    },
}

fn read_registry(path: &Path) -> Result<NodeRegistry, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    wire::decode(&text).map_err(|e| format!("cannot decode '{}': {}", path.display(), e))
}

async fn connect(config_path: Option<&Path>, user: Option<&str>) -> Result<HttpLookupClient, String> {
    let config = PolicyConfig::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    let mut client = HttpLookupClient::new(&config).map_err(|e| e.to_string())?;
    if let Some(user) = user {
        client.resolve_user(user).await.map_err(|e| e.to_string())?;
    }
    Ok(client)
}

async fn cmd_resolve(
    config: Option<&Path>,
    input: &Path,
    start: &str,
    user: Option<&str>,
    concurrency: usize,
    output: Option<&Path>,
) -> Result<i32, String> {
    let mut registry = read_registry(input)?;
    let client = connect(config, user).await?;
    let resolver = Resolver::new(Arc::new(client)).with_concurrency(concurrency);

    let cancel = resolver.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let start = NodeId::from(start);
    let report = resolver
        .resolve(&mut registry, &start)
        .await
        .map_err(|e| e.to_string())?;

    let json = wire::encode_pretty(&registry).map_err(|e| e.to_string())?;
    match output {
        Some(path) => std::fs::write(path, json).map_err(|e| format!("cannot write '{}': {}", path.display(), e))?,
        None => println!("{}", json),
    }

    eprintln!(
        "{} nodes visited, {} lookups, {} resolved, {} ambiguous, {} without match{}",
        report.visited(),
        report.lookups,
        report.with_outcome(NodeOutcome::Resolved).len(),
        report.with_outcome(NodeOutcome::Ambiguous).len(),
        report.with_outcome(NodeOutcome::NoMatch).len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );

    let valid = is_valid_from(&registry, &start).map_err(|e| e.to_string())?;
    Ok(if valid { 0 } else { 2 })
}

fn cmd_validate(input: &Path, node: Option<&str>) -> Result<i32, String> {
    let registry = read_registry(input)?;
    let (valid, rows, dangling) = match node {
        Some(id) => {
            let id = NodeId::from(id);
            let valid = is_valid_from(&registry, &id).map_err(|e| e.to_string())?;
            let rows = unresolved_from(&registry, &id).map_err(|e| e.to_string())?;
            let dangling = reachable(&registry, &id).map_err(|e| e.to_string())?.dangling;
            (valid, rows, dangling)
        }
        None => (is_valid(&registry), unresolved(&registry), Vec::new()),
    };

    if valid {
        println!("Metadata is valid.");
        return Ok(0);
    }
    println!("{:<32}  {}", "NODE", "STATE");
    println!("{}", "-".repeat(56));
    for (id, state) in rows {
        println!("{:<32}  {}", id, state);
    }
    for (missing, referenced_by) in dangling {
        println!("{:<32}  unknown dependency of '{}'", missing, referenced_by);
    }
    Ok(2)
}

async fn cmd_ingest_check(config: Option<&Path>, input: &Path, user: Option<&str>) -> Result<i32, String> {
    let registry = read_registry(input)?;
    let client = connect(config, user).await?;
    let verdict = client.validate_ingest(&registry).await.map_err(|e| e.to_string())?;
    let text = serde_json::to_string_pretty(&verdict).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(0)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Resolve { input, start, user, concurrency, output } => {
            cmd_resolve(config, input, start, user.as_deref(), *concurrency, output.as_deref()).await
        }
        Commands::Validate { input, node } => cmd_validate(input, node.as_deref()),
        Commands::IngestCheck { input, user } => cmd_ingest_check(config, input, user.as_deref()).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
