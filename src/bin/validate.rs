//! Strainer CLI
//!
//! Compiles a schema file once and validates JSON documents against it,
//! printing the sanitized value.

use std::path::PathBuf;

use clap::Parser;
use strainer::RawSchema;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strainer-validate")]
#[command(about = "Validate and sanitize JSON documents against a schema")]
struct Cli {
    /// Path to the schema file (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    /// Path to the data file (JSON); reads stdin when omitted
    data: Option<PathBuf>,

    /// Pretty-print the sanitized output
    #[arg(long)]
    pretty: bool,

    /// Drive the run through a task queue instead of the call stack
    #[arg(long)]
    deferred: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let schema_text = std::fs::read_to_string(&cli.schema)?;
    let schema_json: serde_json::Value = serde_json::from_str(&schema_text)?;
    let validator = strainer::compile(RawSchema::from_value(&schema_json)?)?;

    let data_text = match &cli.data {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let data: serde_json::Value = serde_json::from_str(&data_text)?;

    let sanitized = if cli.deferred {
        validator.validate_queued(&data)?
    } else {
        validator.validate(&data)?
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&sanitized)?
    } else {
        serde_json::to_string(&sanitized)?
    };
    println!("{}", rendered);
    Ok(())
}
