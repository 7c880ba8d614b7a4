//! # sift: command-line shell for log queries
//!
//! - `sift query <TEXT>` runs a query over the configured sources and prints
//!   the resulting table or events.
//! - `sift check <TEXT>` parses a query and shows its canonical form, errors,
//!   highlights and completions.
//! - `sift sources` lists plugins, instances and search profiles.
//! - `sift params <INSTANCE>` prints an instance's filterable labels.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sift_core::{Record, TableView, SOURCE_FIELD, TIME_FIELD};
use sift_hub::engine::export::export_table;
use sift_hub::query::ast::TimeSpan;
use sift_hub::query::suggest::{complete, CompletionCatalog};
use sift_hub::{
    build_registry, parse, Config, ExportFormat, QueryCache, QueryEngine, QueryOptions,
    TaskStatus, TaskUpdate,
};

/// Search local logs and events with a piped query language.
#[derive(Parser)]
#[command(name = "sift", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = sift_hub::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print its results.
    Query {
        text: String,

        /// Search profile naming the instances to query.
        #[arg(long, default_value = "default")]
        profile: String,

        /// Look-back window such as 15m or 2h.
        #[arg(long, conflicts_with_all = ["from", "to"])]
        since: Option<String>,

        /// Range start (RFC 3339).
        #[arg(long)]
        from: Option<String>,

        /// Range end (RFC 3339); defaults to now.
        #[arg(long)]
        to: Option<String>,

        /// Rows requested per source.
        #[arg(long)]
        limit: Option<usize>,

        /// Ignore cached results and fetch again.
        #[arg(long)]
        forced: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Rows printed in table format.
        #[arg(long, default_value_t = 50)]
        rows: usize,
    },

    /// Parse a query and report errors, highlights and completions.
    Check {
        text: String,

        /// Byte offset to complete at; defaults to the end of the text.
        #[arg(long)]
        cursor: Option<usize>,
    },

    /// List plugins, instances and search profiles.
    Sources,

    /// Print an instance's filterable labels and their values.
    Params { instance: String },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sift_hub=info,sift=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Query {
            text,
            profile,
            since,
            from,
            to,
            limit,
            forced,
            format,
            rows,
        } => {
            let options = QueryOptions {
                from: match (&since, &from) {
                    (Some(since), _) => {
                        let span: TimeSpan = since.parse().map_err(anyhow::Error::msg)?;
                        Some(now_millis() - span.as_millis())
                    }
                    (None, Some(from)) => Some(parse_time(from)?),
                    (None, None) => None,
                },
                to: to.as_deref().map(parse_time).transpose()?,
                limit,
                is_forced: forced,
            };
            run_query(&config, &profile, &text, options, format, rows).await
        }
        Commands::Check { text, cursor } => check(&config, &text, cursor).await,
        Commands::Sources => sources(&config).await,
        Commands::Params { instance } => {
            let engine = engine(&config).await?;
            let params = engine.get_controller_params(&instance).await?;
            println!("{}", serde_json::to_string_pretty(&params)?);
            Ok(())
        }
    }
}

async fn engine(config: &Config) -> anyhow::Result<QueryEngine> {
    let registry = build_registry(config).await?;
    Ok(QueryEngine::new(
        Arc::new(registry),
        Arc::new(QueryCache::new()),
        config.engine.clone(),
    ))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_time(text: &str) -> anyhow::Result<i64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("invalid RFC 3339 time '{}'", text))?;
    Ok(parsed.timestamp_millis())
}

// =============================================================================
// query
// =============================================================================

async fn run_query(
    config: &Config,
    profile: &str,
    text: &str,
    options: QueryOptions,
    format: OutputFormat,
    rows: usize,
) -> anyhow::Result<()> {
    let engine = engine(config).await?;
    let mut updates = engine.subscribe();
    let handle = engine.run_query(profile, text, options).await?;
    eprintln!("sift: querying {}", handle.instances.join(", "));

    let status = loop {
        match updates.recv().await {
            Ok(update) if update.task_id() != handle.task_id => {}
            Ok(TaskUpdate::BatchDone {
                events, table_rows, ..
            }) => match table_rows {
                Some(n) => eprintln!("   {} events, {} rows", events, n),
                None => eprintln!("   {} events", events),
            },
            Ok(TaskUpdate::StageFailed { error, .. }) => eprintln!("   stage failed: {}", error),
            Ok(TaskUpdate::StatusChanged { status, .. }) => break status,
            Err(RecvError::Lagged(n)) => tracing::debug!("skipped {} progress updates", n),
            Err(RecvError::Closed) => break engine.wait_for_completion(&handle.task_id).await?,
        }
    };

    let info = engine.get_task_status(&handle.task_id).await?;
    if status == TaskStatus::Failed {
        bail!(
            "query failed: {}",
            info.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    if let Some(error) = &info.error {
        eprintln!("sift: warning: {}", error);
    }

    let table = match engine
        .get_table_data_paginated(&handle.task_id, 0, usize::MAX)
        .await
    {
        Ok(page) => TableView {
            columns: page.columns,
            rows: page.page.data,
        },
        Err(_) => {
            let events = engine
                .get_logs_paginated(&handle.task_id, 0, usize::MAX)
                .await?;
            events_table(&events.data)
        }
    };

    match format {
        OutputFormat::Table => print_table(&table, rows),
        OutputFormat::Json => print!("{}", export_table(&table, ExportFormat::Json)),
        OutputFormat::Csv => print!("{}", export_table(&table, ExportFormat::Csv)),
    }
    engine.release_task_resources(&handle.task_id).await?;
    Ok(())
}

/// Events as a `_time`, `_source`, `message` table.
fn events_table(events: &[Arc<Record>]) -> TableView {
    TableView {
        columns: vec![TIME_FIELD.into(), SOURCE_FIELD.into(), "message".into()],
        rows: events
            .iter()
            .map(|e| {
                let message = e.message.clone();
                Arc::new(Record::clone(e).with_field("message", message))
            })
            .collect(),
    }
}

fn print_table(table: &TableView, limit: usize) {
    let mut builder = Builder::default();
    builder.push_record(table.columns.iter().cloned());
    for row in table.rows.iter().take(limit) {
        builder.push_record(table.columns.iter().map(|c| row.display(c)));
    }
    let mut rendered = builder.build();
    rendered.with(Style::rounded());
    println!("{}", rendered);
    if table.rows.len() > limit {
        eprintln!("sift: {} of {} rows shown", limit, table.rows.len());
    }
}

// =============================================================================
// check / sources
// =============================================================================

async fn check(config: &Config, text: &str, cursor: Option<usize>) -> anyhow::Result<()> {
    let outcome = parse(text);
    println!("query:  {}", outcome.query);

    if outcome.errors.is_empty() {
        println!("errors: none");
    } else {
        println!("errors:");
        for error in &outcome.errors {
            println!("  {}", error);
        }
    }

    println!("highlights:");
    for h in &outcome.highlights {
        let span = text.get(h.start..h.end).unwrap_or_default();
        println!("  {:>3}..{:<3} {:<10} {}", h.start, h.end, format!("{:?}", h.kind), span);
    }

    // Pre-filter values come from every instance that answers.
    let mut catalog = CompletionCatalog::default();
    if let Ok(engine) = engine(config).await {
        for instance in engine.get_initialized_plugins().await {
            match engine.get_controller_params(&instance.name).await {
                Ok(params) => merge_params(&mut catalog.params, params),
                Err(e) => tracing::debug!(instance = %instance.name, error = %e, "no params"),
            }
        }
    }

    let cursor = cursor.unwrap_or(text.len()).min(text.len());
    let completions = complete(text, &outcome.suggestions, cursor, &catalog);
    println!("completions at {}:", cursor);
    for c in completions {
        println!("  {:<24} {:?}", c.text, c.kind);
    }
    Ok(())
}

fn merge_params(into: &mut BTreeMap<String, Vec<String>>, params: BTreeMap<String, Vec<String>>) {
    for (label, values) in params {
        let known = into.entry(label).or_default();
        for value in values {
            if !known.contains(&value) {
                known.push(value);
            }
        }
    }
}

async fn sources(config: &Config) -> anyhow::Result<()> {
    let engine = engine(config).await?;

    println!("plugins:");
    for plugin in engine.get_supported_plugins().await {
        println!("  {:<10} {}", plugin.name, plugin.description);
        for param in plugin.params {
            let note = match (&param.default, param.required) {
                (_, true) => "required".to_string(),
                (Some(default), false) if !default.is_empty() => format!("default {}", default),
                _ => "optional".to_string(),
            };
            println!("    {:<14} {} ({})", param.name, param.description, note);
        }
    }

    println!("instances:");
    for instance in engine.get_initialized_plugins().await {
        println!(
            "  {:<16} {:<8} {}",
            instance.name, instance.plugin, instance.description
        );
    }

    println!("profiles:");
    for (name, members) in engine.get_search_profiles().await {
        println!("  {:<16} {}", name, members.join(", "));
    }
    Ok(())
}
