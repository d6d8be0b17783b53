//! Entry point for the Hetzner bare-metal host controller. Parses flags,
//! wires the store/transport/secret-resolver stack together, and runs the
//! reconcile scheduler alongside the ambient health/metrics HTTP server
//! until a termination signal arrives.

mod wiring;

use std::process::ExitCode;
use std::sync::Arc;

use caph_config::{Flags, SecretResolver};
use caph_reconciler::{LiveTransport, LivenessTracker};
use caph_scheduler::{Concurrency, Scheduler};
use caph_store::{RedbStore, StateStore};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wiring::{
    reconcile_host_key, reconcile_machine_key, reconcile_remediation_key, spawn_sync_sweep, ManagerContext,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let flags = Flags::parse();
    if let Err(e) = flags.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    run(flags).await
}

async fn run(flags: Flags) -> ExitCode {
    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to install metrics recorder");
            return ExitCode::FAILURE;
        }
    };

    let store: Arc<dyn StateStore> = match RedbStore::open(&flags.store_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %flags.store_path.display(), "failed to open state store");
            return ExitCode::FAILURE;
        }
    };

    let ctx = ManagerContext {
        store: Arc::clone(&store),
        secrets: Arc::new(SecretResolver::new(flags.secrets_dir.clone())),
        transport: Arc::new(LiveTransport::new()),
        liveness: Arc::new(LivenessTracker::new()),
        flags: Arc::new(flags.clone()),
    };

    let scheduler = Arc::new(Scheduler::new(Concurrency {
        host: flags.host_concurrency,
        machine: flags.machine_concurrency,
        remediation: 1,
    }));

    let api_app = caph_api::build_app(Arc::clone(&store), metrics_handle);
    let listener = match tokio::net::TcpListener::bind(&flags.metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %flags.metrics_addr, "failed to bind health/metrics listener");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %flags.metrics_addr, "health/metrics server listening");
    let api_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api_app).await {
            error!(error = %e, "health/metrics server exited");
        }
    });

    let sync_sweep = spawn_sync_sweep(Arc::clone(&scheduler), Arc::clone(&store), flags.sync_period);

    let host_ctx = ctx.clone();
    let machine_ctx = ctx.clone();
    let remediation_ctx = ctx;
    let scheduler_run = scheduler.run(
        move |key| {
            let ctx = host_ctx.clone();
            async move { reconcile_host_key(ctx, key).await }
        },
        move |key| {
            let ctx = machine_ctx.clone();
            async move { reconcile_machine_key(ctx, key).await }
        },
        move |key| {
            let ctx = remediation_ctx.clone();
            async move { reconcile_remediation_key(ctx, key).await }
        },
    );

    tokio::select! {
        _ = scheduler_run => {
            info!("scheduler stopped on its own");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining in-flight reconciles");
            scheduler.shutdown();
        }
    }

    sync_sweep.abort();
    api_server.abort();
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
