//! strata CLI: replay session scripts and explain queries.

mod script;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_core::config::EngineConfig;
use strata_engine::Engine;
use strata_processor::Parser as QueryParser;
use strata_query::QueryModel;
use strata_schema::Requirements;

use crate::script::parse_script;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = strata_core::VERSION)]
#[command(about = "strata: schema lattice and query lifecycle for continuous queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a YAML session script, printing step results as JSON lines
    Run {
        /// Path to the session YAML file
        #[arg(short, long)]
        script: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Parse a session script without running it
    Validate {
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Show the targets and fields a query reads
    Explain {
        /// Query text
        #[arg(short, long)]
        query: String,
    },
}

/// Flags that override both the environment and a script's `config:` block.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Auto-field flag for implicitly opened targets
    #[arg(long)]
    default_auto_field: Option<bool>,

    /// Loopback rounds per send
    #[arg(long)]
    max_loopback_rounds: Option<usize>,

    /// Per-query output buffer cap
    #[arg(long)]
    output_pool_limit: Option<usize>,

    /// Hex digits of the digest in generated type names
    #[arg(long)]
    type_name_digest_len: Option<usize>,
}

impl Overrides {
    fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.default_auto_field {
            cfg.default_auto_field = v;
        }
        if let Some(v) = self.max_loopback_rounds {
            cfg.max_loopback_rounds = v;
        }
        if let Some(v) = self.output_pool_limit {
            cfg.output_pool_limit = Some(v);
        }
        if let Some(v) = self.type_name_digest_len {
            cfg.type_name_digest_len = v;
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { script, overrides } => run_script(&script, &overrides),
        Commands::Validate { script } => validate_script(&script).map(|n| {
            println!("✓ Script is valid ({n} steps)");
        }),
        Commands::Explain { query } => explain_query(&query),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn resolve_config(script: &script::ScriptConfig, overrides: &Overrides) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    script.apply(&mut config);
    overrides.apply(&mut config);
    config.normalized()
}

fn run_script(path: &Path, overrides: &Overrides) -> Result<(), Box<dyn std::error::Error>> {
    let src = fs::read_to_string(path)?;
    let script = parse_script(&src)?;
    let engine = Engine::in_memory(resolve_config(&script.config, overrides));

    for (i, entry) in script.steps.iter().enumerate() {
        let op = entry.step.op();
        match (entry.step.execute(&engine), entry.expect_error) {
            (Ok(result), false) => {
                println!("{}", json!({ "step": i, "op": op, "result": result }));
            }
            (Err(e), true) if e.is_client_error() => {
                println!("{}", json!({ "step": i, "op": op, "error": e.to_string() }));
            }
            (Err(e), _) => return Err(format!("step {i} ({op}) failed: {e}").into()),
            (Ok(_), true) => return Err(format!("step {i} ({op}) was expected to fail").into()),
        }
    }

    // Output nobody popped.
    for query in engine.queries() {
        for out in engine.output().pop(&query.name) {
            println!("{}", json!({ "query": query.name, "output": out }));
        }
    }
    engine.stats().emit("session");
    Ok(())
}

fn validate_script(path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let src = fs::read_to_string(path)?;
    Ok(parse_script(&src)?.steps.len())
}

fn explain_query(text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let model = QueryModel::parse(text, &QueryParser)?;
    let fields = model.fields()?;

    println!("Query Model");
    println!("===========");
    println!("Targets: {}", model.targets().join(", "));
    println!("Sub-queries: {}", model.sub_queries().len());
    println!();
    println!("Fields by target:");
    for (bucket, names) in fields.to_map() {
        let label = match bucket.as_str() {
            "" => "(unqualified)",
            "?" => "(unknown qualifier)",
            other => other,
        };
        println!("  {label}: {}", names.join(", "));
    }

    // Requirements need a named query; the name is irrelevant here.
    let query = strata_query::Query::new("explain", None, text, &QueryParser)?;
    match Requirements::of(&query) {
        Ok(req) => {
            println!();
            println!("Requirements (field: nullable):");
            for (target, needs) in &req.per_target {
                let list: Vec<String> = needs.iter().map(|(f, n)| format!("{f}:{n}")).collect();
                println!("  {target}: {}", list.join(", "));
            }
        }
        Err(e) => println!("Not registrable: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptConfig;

    #[test]
    fn flags_beat_script_config() {
        let script = ScriptConfig {
            max_loopback_rounds: Some(3),
            output_pool_limit: Some(7),
            ..Default::default()
        };
        let flags = Overrides {
            max_loopback_rounds: Some(9),
            ..Default::default()
        };
        let cfg = resolve_config(&script, &flags);
        assert_eq!(cfg.max_loopback_rounds, 9);
        assert_eq!(cfg.output_pool_limit, Some(7));
    }

    #[test]
    fn explain_accepts_sub_queries() {
        explain_query("select * from t1 where x in (select y from t2)").unwrap();
    }

    #[test]
    fn explain_rejects_bad_syntax() {
        assert!(explain_query("selec a").is_err());
    }
}
