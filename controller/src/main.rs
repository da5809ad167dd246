#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher::Config as WatcherConfig;
use std::net::SocketAddr;
use swarm_controller::{endpoints, informer, registry, registry::Registry, worker, Ctx};
use tokio::{sync::mpsc, time};
use tracing::Instrument;

#[derive(Parser)]
#[clap(version)]
struct Args {
    #[clap(long, env = "SWARM_LOG_LEVEL", default_value = "swarm=info,warn")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Selects the services that feed the endpoint registry
    #[clap(long, short = 'l', default_value = "app=swarm")]
    label_selector: String,

    /// Run the informer role: derive service endpoints and serve them
    #[clap(long)]
    enable_informer: bool,

    /// Run the worker role: serve identity data and generate traffic
    #[clap(long)]
    enable_worker: bool,

    #[clap(long, default_value = "0.0.0.0:9090")]
    informer_bind_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:8081")]
    worker_bind_addr: SocketAddr,

    /// Base URL the worker polls for the service registry
    #[clap(long, env = "SWARM_INFORMER_URL", default_value = "http://informer:9090")]
    informer_url: String,

    #[clap(long, default_value = "10")]
    informer_poll_interval_secs: u64,

    #[clap(long, default_value = "500")]
    worker_request_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        label_selector,
        enable_informer,
        enable_worker,
        informer_bind_addr,
        worker_bind_addr,
        informer_url,
        informer_poll_interval_secs,
        worker_request_interval_ms,
    } = Args::parse();

    if !enable_informer && !enable_worker {
        bail!("at least one of --enable-informer and --enable-worker is required");
    }

    let mut runtime = kubert::Runtime::builder()
        .with_log(log_level, log_format)
        .with_admin(admin)
        .with_client(client)
        .build()
        .await?;

    if enable_informer {
        let (services, services_events) =
            runtime.cache_all(WatcherConfig::default().labels(&label_selector));

        // Reconcile-to-registry handoff. Capacity 1: an unconsumed snapshot
        // stalls the event loop instead of being dropped.
        let (snapshots_tx, snapshots_rx) = mpsc::channel(1);
        tokio::spawn(
            endpoints::process(
                services_events,
                Ctx {
                    services,
                    snapshots: snapshots_tx,
                },
            )
            .instrument(tracing::info_span!("reconcile")),
        );

        let registry = Registry::default();
        tokio::spawn(
            runtime
                .cancel_on_shutdown(registry::consume(registry.clone(), snapshots_rx))
                .instrument(tracing::info_span!("registry")),
        );

        // Bound up front: an unusable address is fatal at startup.
        let server = axum::Server::try_bind(&informer_bind_addr)?
            .serve(informer::router(registry).into_make_service());
        tracing::info!(addr = %informer_bind_addr, "serving informer");
        tokio::spawn(
            runtime
                .cancel_on_shutdown(async move {
                    if let Err(error) = server.await {
                        tracing::error!(%error, "informer server failed");
                    }
                })
                .instrument(tracing::info_span!("informer")),
        );
    }

    if enable_worker {
        let server = axum::Server::try_bind(&worker_bind_addr)?
            .serve(worker::router(worker::Identity::from_env()).into_make_service());
        tracing::info!(addr = %worker_bind_addr, "serving worker");
        tokio::spawn(
            runtime
                .cancel_on_shutdown(async move {
                    if let Err(error) = server.await {
                        tracing::error!(%error, "worker server failed");
                    }
                })
                .instrument(tracing::info_span!("worker")),
        );

        let http = reqwest::Client::new();
        let view = Registry::default();
        tokio::spawn(
            runtime
                .cancel_on_shutdown(worker::poll(
                    http.clone(),
                    informer_url,
                    time::Duration::from_secs(informer_poll_interval_secs),
                    view.clone(),
                ))
                .instrument(tracing::info_span!("poll")),
        );
        tokio::spawn(
            runtime
                .cancel_on_shutdown(worker::send_requests(
                    http,
                    time::Duration::from_millis(worker_request_interval_ms),
                    view,
                ))
                .instrument(tracing::info_span!("requests")),
        );
    }

    // Block the main thread on the shutdown signal. Once it fires, wait for
    // the background tasks to complete before exiting.
    if runtime.run().await.is_err() {
        bail!("aborted");
    }

    Ok(())
}
