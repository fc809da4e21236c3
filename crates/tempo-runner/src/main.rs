//! `tempo-runner` — foreground daemon that schedules shell-command
//! jobs declared in a TOML file.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tempo_core::config::{default_config_path, TempoConfig};
use tempo_scheduler::{JobId, JobSpec, SchedulerEngine};
use tracing::info;

mod jobs;

use jobs::CommandTask;

#[derive(Parser, Debug)]
#[command(
    name = "tempo-runner",
    version,
    about = "Run scheduled shell-command jobs from a TOML declaration"
)]
struct Args {
    /// Config file path (overrides TEMPO_CONFIG and ~/.tempo/tempo.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo=info,tempo_runner=info".into()),
        )
        .init();

    // config path: explicit flag > TEMPO_CONFIG env > ~/.tempo/tempo.toml
    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var("TEMPO_CONFIG").ok())
        .unwrap_or_else(default_config_path);

    let config = TempoConfig::load(Some(&config_path)).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TempoConfig::default()
    });
    let jobs_file = jobs::JobsFile::load(&config_path)?;

    let engine = SchedulerEngine::new(&config);
    let handle = engine.handle();

    // Submit in declaration order so `depends_on` names resolve to ids
    // of earlier jobs.
    let mut ids: HashMap<String, JobId> = HashMap::new();
    for decl in &jobs_file.jobs {
        let mut depends_on = Vec::with_capacity(decl.depends_on.len());
        for dep_name in &decl.depends_on {
            match ids.get(dep_name) {
                Some(id) => depends_on.push(*id),
                None => anyhow::bail!(
                    "job {:?} depends on {:?}, which is not declared above it",
                    decl.name,
                    dep_name
                ),
            }
        }
        let spec = JobSpec::new(
            &decl.name,
            decl.schedule.clone(),
            Arc::new(CommandTask::new(&decl.command)),
        )
        .with_priority(decl.priority)
        .with_max_retries(decl.max_retries)
        .with_dependencies(depends_on);
        let id = handle.submit(spec)?;
        ids.insert(decl.name.clone(), id);
    }
    info!(count = ids.len(), config = %config_path, "jobs submitted");

    // spawn the engine loop in the background, then wait for ctrl-c
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    Ok(())
}
