use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::{Cli, Commands, EngineKind};
use config::Config;

use genserve::domain::JobRequest;
use genserve::engine::{CommandEngineFactory, EngineFactory, ScriptedEngineFactory, program_exists};
use genserve::id::generate_warmup_id;
use genserve::publish::{ArtifactPublisher, GcsConfig, GcsPublisher, NoopPublisher, TokenSource};
use genserve::readiness::ReadinessGate;
use genserve::runner::{RunLoop, RunLoopConfig};
use genserve::server::{self, AppState, app_router};
use genserve::snapshot::SnapshotCopier;
use genserve::warmup::{ProcessLauncher, WARMUP_JOB_ENV, WarmupSupervisor};

fn setup_logging(level: &str) {
    // Container platforms collect stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_serve_command(EngineKind::default(), cli, config).await,
        Some(Commands::Serve { engine }) => handle_serve_command(*engine, cli, config).await,
        Some(Commands::Run { job, engine }) => handle_run_command(job, *engine, config).await,
        Some(Commands::Warmup { engine }) => handle_warmup_command(*engine, config).await,
    }
}

fn build_factory(kind: EngineKind, config: &Config) -> Arc<dyn EngineFactory> {
    match kind {
        EngineKind::Command => {
            if !program_exists(&config.engine.command) {
                warn!("Engine program {} not found; runs will fail", config.engine.command);
            }
            Arc::new(
                CommandEngineFactory::new(&config.engine.command).model_artifacts(&config.engine.model_artifacts),
            )
        }
        EngineKind::Scripted => Arc::new(ScriptedEngineFactory::new()),
    }
}

fn build_publisher(config: &Config) -> Result<Arc<dyn ArtifactPublisher>> {
    let bucket = config.storage.export_bucket.trim();
    if bucket.is_empty() {
        info!("No export bucket configured; publishing disabled");
        return Ok(Arc::new(NoopPublisher));
    }

    let publisher =
        GcsPublisher::new(GcsConfig::new(bucket, TokenSource::from_env())).context("Failed to create GCS publisher")?;
    info!("Publishing snapshots to gs://{}", publisher.bucket());
    Ok(Arc::new(publisher))
}

fn build_runner(factory: Arc<dyn EngineFactory>, publisher: Arc<dyn ArtifactPublisher>, config: &Config) -> RunLoop {
    RunLoop::with_config(
        factory,
        SnapshotCopier::new(config.storage.snapshots_dir()),
        publisher,
        RunLoopConfig {
            jobs_dir: config.storage.jobs_dir(),
            publish_every_iteration: config.storage.publish_every_iteration,
            max_steps: config.engine.max_steps,
            keep_intermediate_snapshots: config.storage.keep_intermediate_snapshots,
        },
    )
}

/// Arguments that make the child process run the warm-up with our config.
fn warmup_args(engine: EngineKind, cli: &Cli) -> Vec<String> {
    let mut args = vec!["warmup".to_string(), "--engine".to_string(), engine.as_str().to_string()];
    if let Some(path) = &cli.config {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    args
}

async fn handle_serve_command(engine: EngineKind, cli: &Cli, config: &Config) -> Result<()> {
    let runner = Arc::new(build_runner(build_factory(engine, config), build_publisher(config)?, config));
    let gate = ReadinessGate::new();
    let state = AppState::new(
        gate.clone(),
        runner,
        config.server.workers,
        config.server.response_mode,
    );
    let router = app_router(state, &config.server.routes());

    // Bind before warm-up so health checks get an answer while it runs
    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    let server = tokio::spawn(server::serve(listener, router, shutdown_signal()));

    let launcher = ProcessLauncher::current_exe()?.args(warmup_args(engine, cli));
    let supervisor = WarmupSupervisor::new(Arc::new(launcher), gate, config.warmup.supervisor());
    if config.warmup.enabled {
        // Dropped with the runtime on shutdown, which kills the child
        tokio::spawn(async move {
            let report = supervisor.warm_up_default().await;
            info!(
                "Warm-up finished in {:.1}s: {:?} (ready: {})",
                report.elapsed.as_secs_f64(),
                report.outcome,
                report.ready
            );
        });
    } else {
        supervisor.skip();
    }

    server
        .await
        .context("Server task panicked")?
        .context("Server failed")?;
    Ok(())
}

async fn handle_run_command(job: &str, engine: EngineKind, config: &Config) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(job).context("Job must be valid JSON")?;
    let job = JobRequest::from_value(value)?;
    let runner = build_runner(build_factory(engine, config), build_publisher(config)?, config);

    println!("{} {}", "Running:".cyan(), job.prompt());
    let outcome = runner.run(job).await.context("Run failed")?;

    println!(
        "{} {} ({} iterations)",
        "Snapshot:".green(),
        outcome.snapshot.path.display(),
        outcome.iterations
    );
    for key in &outcome.published {
        println!("{} {}", "Published:".green(), key);
    }
    Ok(())
}

async fn handle_warmup_command(engine: EngineKind, config: &Config) -> Result<()> {
    let job = match std::env::var(WARMUP_JOB_ENV) {
        Ok(raw) => {
            let value: serde_json::Value = serde_json::from_str(&raw).context("Invalid warm-up job")?;
            JobRequest::from_value(value)?
        }
        Err(_) => JobRequest::canned_warmup(),
    };

    let runner = build_runner(build_factory(engine, config), Arc::new(NoopPublisher), config);
    let outcome = runner
        .run_as(generate_warmup_id(), job, CancellationToken::new())
        .await
        .context("Warm-up run failed")?;
    info!(
        "Warm-up produced {} after {} iterations",
        outcome.snapshot.path.display(),
        outcome.iterations
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration, then overlay the deployment environment
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment configuration")?;

    let level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    setup_logging(level);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
