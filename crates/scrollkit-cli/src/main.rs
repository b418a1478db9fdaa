//! 🚀 scrollkit-cli: the front door, the bouncer, the maitre d' of scrollkit.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging,
//! runs one job, and prints what came back. Records go to stdout as NDJSON; logs go to
//! stderr so you can pipe one without drowning in the other. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use scrollkit::{CompositeBucket, Job, JobReport};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 📜 Page through a search backend without leaking scroll contexts.
#[derive(Debug, Parser)]
#[command(name = "scrollkit-cli", version)]
struct Cli {
    /// 🔧 TOML config file. Defaults to `scrollkit.toml` when it exists, env vars only otherwise.
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🚰 Every record of the [query] section, up to a limit.
    Drain {
        /// Overrides `scroll.limit` from the config.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 📬 One page of the [query] section. Pass the printed token back to continue.
    Page {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        token: Option<String>,
    },
    /// 🪣 Every composite bucket of the [aggregation] section, as a table.
    Buckets,
}

impl From<Command> for Job {
    fn from(command: Command) -> Self {
        match command {
            Command::Drain { limit } => Job::Drain { limit },
            Command::Page { limit, token } => Job::Page { limit, token },
            Command::Buckets => Job::Buckets,
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "scrollkit.toml";

/// 🔒 An explicit path must exist. The default path is optional, like dessert.
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!("💀 Couldn't check whether the config file exists: '{}'", path.display())
            })?;
            if !exists {
                anyhow::bail!(
                    "💀 Configuration file '{}' does not exist. Maybe a pwd/cwd thing with relative paths? \
                     Use an absolute path to be absolutely certain.",
                    path.display()
                );
            }
            Ok(Some(path))
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            Ok(default.is_file().then(|| default.to_path_buf()))
        }
    }
}

fn print_records(records: &[serde_json::Value]) -> Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record).context("💀 A record refused to become JSON again.")?);
    }
    Ok(())
}

fn bucket_table(buckets: &[CompositeBucket]) -> Result<Table> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["key", "doc_count", "sub_aggregations"]);
    for bucket in buckets {
        let sub_aggregations = if bucket.sub_aggregations.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&bucket.sub_aggregations)?
        };
        table.add_row(vec![
            Cell::new(serde_json::to_string(&bucket.key)?),
            Cell::new(bucket.doc_count).set_alignment(CellAlignment::Right),
            Cell::new(sub_aggregations),
        ]);
    }
    Ok(table)
}

fn render(report: JobReport) -> Result<()> {
    match report {
        JobReport::Records(records) => print_records(&records),
        JobReport::Page { records, next_token } => {
            print_records(&records)?;
            // 🎟️ Its own line, so `tail -n1` finds it. No token, no line.
            if let Some(token) = next_token {
                println!("next_token={token}");
            }
            Ok(())
        }
        JobReport::Buckets(buckets) => {
            println!("{}", bucket_table(&buckets)?);
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config)?;
    let app_config = scrollkit::load_config(config_path.as_deref())
        .context("💀 In scrollkit-cli we couldn't load the config. Check the file and the SCROLLKIT_* env vars.")?;
    let report = scrollkit::run(app_config, cli.command.into()).await?;
    render(report)
}

/// 🚀 main(): init tracing, parse args, run the job, explain the failure if there is one.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 stderr, so stdout stays clean NDJSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the search backend isn't reachable. \
                Double-check that Elasticsearch (or OpenSearch) is running and that [backend] points at it. \
                If you're using Docker, `docker ps` shows what's up. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
