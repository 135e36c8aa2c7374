use std::path::PathBuf;
use std::sync::Arc;

use biblink::config::{CacheOverrides, KnowledgeBaseOverrides, QueueOverrides};
use biblink::kb::{DryRunWriter, WikibaseReader};
use biblink::{BiblinkConfig, ConfigOverrides, InMemoryKnowledgeBase, JsonFeed, Pipeline};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_all(flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            if let Some(value) = args.next() {
                values.push(value);
            }
        }
    }
    values
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"biblink - reconcile catalog records against a knowledge base

USAGE:
    biblink --input <FILE> [--input <FILE> ...] [OPTIONS]

OPTIONS:
    -i, --input <FILE>      Catalog JSON file, one batch per file (repeatable)
    -c, --config <FILE>     Path to config file (TOML)
        --snapshot <FILE>   Use a local knowledge base snapshot (read and written back)
        --vocabulary <F>    Vocabulary overlay (JSON)
        --workers <N>       Write queue workers [default: 6]
        --cache <DIR>       Persistent extraction cache directory
    -h, --help              Print help

Without --snapshot, the knowledge base is read over its public endpoints
and writes are logged, not performed.

ENVIRONMENT:
    BIBLINK_CONFIG          Path to config file
    BIBLINK_<SECTION>__<KEY> Override any config key
    RUST_LOG                Log filter [default: info]
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(path) = parse_arg("--vocabulary") {
        overrides.vocabulary = Some(path.into());
    }
    if let Some(workers) = parse_arg("--workers") {
        overrides.queue = Some(QueueOverrides {
            workers: Some(workers.parse()?),
        });
    }
    if let Some(path) = parse_arg("--cache") {
        overrides.cache = Some(CacheOverrides {
            path: Some(path.into()),
        });
    }
    if let Some(path) = parse_arg("--snapshot") {
        overrides.knowledge_base = Some(KnowledgeBaseOverrides {
            snapshot: Some(path.into()),
        });
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("BIBLINK_CONFIG").ok());
    let config = BiblinkConfig::load(config_path.as_deref(), overrides)?;

    let mut inputs: Vec<PathBuf> = parse_all("--input").into_iter().map(PathBuf::from).collect();
    inputs.extend(parse_all("-i").into_iter().map(PathBuf::from));
    if inputs.is_empty() {
        print_help();
        anyhow::bail!("at least one --input is required");
    }
    let mut feed = JsonFeed::new(inputs);

    let snapshot = config.knowledge_base.snapshot.clone();
    let local = match &snapshot {
        Some(path) => Some(Arc::new(InMemoryKnowledgeBase::load_snapshot(path)?)),
        None => None,
    };

    let pipeline = match &local {
        Some(kb) => Pipeline::from_config(config.clone(), kb.clone(), kb.clone())?,
        None => {
            let reader = WikibaseReader::new(
                &config.knowledge_base,
                &config.lookup.user_agent,
                config.lookup.timeout(),
                &config.provenance.title_language,
            )?;
            Pipeline::from_config(config.clone(), Arc::new(reader), Arc::new(DryRunWriter::new()))?
        }
    };

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, draining queued writes");
            stop.stop();
        }
    });

    let report = pipeline.run(&mut feed).await?;

    if let (Some(kb), Some(path)) = (&local, &snapshot) {
        kb.save_snapshot(path)?;
        info!(
            path = %path.display(),
            entities = kb.entity_count(),
            statements = kb.statement_count(),
            "Snapshot saved"
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
