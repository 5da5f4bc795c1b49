use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use platform_migrate::backend::postgres::PgTableStore;
use platform_migrate::backend::rest::RestBackend;
use platform_migrate::backend::TableStore;
use platform_migrate::config::{BackendConfig, MigrationConfig, LOGGED_ENV, REQUIRED_ENV};
use platform_migrate::jobs::{self, JOB_NAMES};
use platform_migrate::orchestrator::{Backends, Orchestrator, RunSummary};
use platform_migrate::pipeline::job::JobSpec;
use platform_migrate::pipeline::retry::RetryExecutor;
use platform_migrate::tracing::init_tracing;
use platform_migrate::util::db::Db;
use platform_migrate::util::env;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "migrate", version, about = "Copy records and storage objects between two projects")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Print the job catalog in run order
    List,
    /// Run the named jobs, in the order given
    Run {
        #[arg(required = true)]
        jobs: Vec<String>,
    },
    /// Run every job in catalog order
    All,
}

async fn table_store(label: &str, cfg: &BackendConfig, rest: &Arc<RestBackend>) -> Result<Arc<dyn TableStore>> {
    match &cfg.db_url {
        Some(url) => {
            let max_connections = env::env_parse("DB_MAX_CONNECTIONS", 4u32);
            let db = Db::connect(url, max_connections)
                .await
                .with_context(|| format!("{label}: connecting to Postgres"))?;
            Ok(Arc::new(PgTableStore::new(label, db)))
        }
        None => Ok(rest.clone()),
    }
}

async fn build_backends(config: &MigrationConfig) -> Result<Backends> {
    let source = Arc::new(RestBackend::new(
        "source",
        &config.source.project_url,
        &config.source.api_key,
        config.http_timeout,
    )?);
    let destination = Arc::new(RestBackend::new(
        "destination",
        &config.destination.project_url,
        &config.destination.api_key,
        config.http_timeout,
    )?);
    Ok(Backends {
        source_tables: table_store("source", &config.source, &source).await?,
        destination_tables: table_store("destination", &config.destination, &destination).await?,
        source_objects: source,
        destination_objects: destination,
    })
}

fn select_jobs(names: &[String], country: &str) -> Result<Vec<JobSpec>> {
    names
        .iter()
        .map(|name| match jobs::find(name, country) {
            Some(job) => Ok(job),
            None => bail!("unknown job `{name}`; known jobs: {}", JOB_NAMES.join(", ")),
        })
        .collect()
}

fn report(summary: &RunSummary) {
    let skipped = summary.skipped_keys();
    if !skipped.is_empty() {
        warn!(
            job = %summary.job,
            count = skipped.len(),
            keys = %skipped.join(","),
            "migrate: rows with skipped fields (re-drive manually)"
        );
        for skip in &summary.field_skips {
            warn!(
                job = %summary.job,
                key = %skip.key,
                field = %skip.field,
                bucket = skip.bucket.as_deref().unwrap_or("-"),
                path = skip.path.as_deref().unwrap_or("-"),
                kind = skip.kind,
                "migrate: skipped field"
            );
        }
    }
    match serde_json::to_string(summary) {
        Ok(json) => info!(job = %summary.job, summary = %json, "migrate: summary"),
        Err(e) => warn!(error = %e, "migrate: summary not serializable"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info")?;
    env::bootstrap_cli("migrate");

    let cli = Cli::parse();
    let names: Vec<String> = match cli.command {
        Commands::List => {
            for job in jobs::catalog(&env::env_opt("COUNTRY_FILTER").unwrap_or_else(|| "LK".into())) {
                println!("{:<24} {}", job.name, job.description);
            }
            return Ok(());
        }
        Commands::Run { jobs: requested } => requested,
        Commands::All => JOB_NAMES.iter().map(|s| s.to_string()).collect(),
    };

    env::preflight_check("migrate", REQUIRED_ENV, LOGGED_ENV)?;
    let config = MigrationConfig::from_env()?;
    let selected = select_jobs(&names, &config.country_filter)?;

    let backends = build_backends(&config).await?;
    let retry = RetryExecutor::new(config.retry.clone());
    let orchestrator = Orchestrator::new(config, backends, retry);

    let mut total_written = 0;
    let mut total_skips = 0;
    for job in &selected {
        let summary = orchestrator
            .run(job)
            .await
            .with_context(|| format!("job `{}` aborted", job.name))?;
        total_written += summary.written;
        total_skips += summary.field_skips.len();
        report(&summary);
    }
    info!(
        jobs = selected.len(),
        written = total_written,
        field_skips = total_skips,
        "migrate: all requested jobs completed"
    );
    Ok(())
}
