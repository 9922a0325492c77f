//! Entry point for the `vmctl-gateway` HTTP server.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vmctl_executor::VmOrchestrator;
use vmctl_gateway::{config::GatewayArgs, monitor::{join_health_monitor, spawn_health_monitor}, routes::create_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = GatewayArgs::parse();

    if let Err(e) = tokio::fs::create_dir_all(&args.state_root).await {
        tracing::error!(state_root = %args.state_root.display(), error = %e, "cannot create state root");
        std::process::exit(1);
    }

    let orchestrator = match VmOrchestrator::new(args.backend(), args.orchestrator_config()) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Still serve: the operator may fix the host while the API is up.
    if let Err(e) = orchestrator.health_check().await {
        tracing::warn!(error = %e, "hypervisor backend not ready");
    }

    let shutdown = CancellationToken::new();
    let monitor = args
        .health_interval()
        .map(|interval| spawn_health_monitor(Arc::clone(&orchestrator), interval, shutdown.clone()));

    let app = create_router(Arc::clone(&orchestrator), args.request_timeout());

    let listener = match tokio::net::TcpListener::bind(args.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %args.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %args.listen_addr, state_root = %args.state_root.display(), "vmctl-gateway listening");

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown.clone())).await;

    shutdown.cancel();
    if let Some(monitor) = monitor {
        join_health_monitor(monitor).await;
    }

    let report = orchestrator.destroy_all().await;
    for failure in &report.failed {
        tracing::error!(vm = %failure.name, error = %failure.error, "VM teardown failed at shutdown");
    }

    if let Err(e) = served {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("vmctl-gateway stopped");
}

/// Resolve on SIGINT or SIGTERM, then cancel `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown requested, draining requests");
    shutdown.cancel();
}
