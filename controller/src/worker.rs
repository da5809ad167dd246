use std::{env, time::Duration};

use anyhow::{bail, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::time;

use crate::{informer::ServiceList, registry::Registry};

/// Static identity of a worker instance, read from the downward API at
/// startup. Unset variables come through as empty strings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub cluster_name: String,
    pub pod_name: String,
    pub pod_namespace: String,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    pub node_name: String,
}

impl Identity {
    pub fn from_env() -> Self {
        Self {
            cluster_name: env::var("CLUSTER_NAME").unwrap_or_default(),
            pod_name: env::var("POD_NAME").unwrap_or_default(),
            pod_namespace: env::var("POD_NAMESPACE").unwrap_or_default(),
            pod_ip: env::var("POD_IP").unwrap_or_default(),
            node_name: env::var("NODE_NAME").unwrap_or_default(),
        }
    }
}

/// Routes served by the worker.
pub fn router(identity: Identity) -> Router {
    Router::new()
        .route("/data", get(get_data))
        .with_state(identity)
}

async fn get_data(State(identity): State<Identity>) -> Json<Identity> {
    Json(identity)
}

/// Periodically refreshes the local registry view from the informer. A
/// failed fetch leaves the previous view in place.
pub async fn poll(
    client: reqwest::Client,
    informer_url: String,
    interval: Duration,
    view: Registry,
) {
    let url = format!("{}/services", informer_url);
    let mut ticker = time::interval(interval);
    loop {
        ticker.tick().await;
        poll_once(&client, &url, &view).await;
    }
}

async fn poll_once(client: &reqwest::Client, url: &str, view: &Registry) {
    tracing::debug!(%url, "polling service list");
    match fetch_services(client, url).await {
        Ok(services) => view.store(services),
        Err(error) => tracing::warn!(%url, %error, "failed to fetch services"),
    }
}

async fn fetch_services(client: &reqwest::Client, url: &str) -> Result<Vec<String>> {
    let rsp = client.get(url).send().await?;
    let status = rsp.status();
    if !status.is_success() {
        bail!("informer returned {}", status);
    }
    let body = rsp.bytes().await?;
    let ServiceList { services } = serde_json::from_slice(&body)?;
    // Filter out any entries with an empty host.
    Ok(services.into_iter().filter(|svc| !svc.is_empty()).collect())
}

/// Issues a request to every service in the current view, one at a time and
/// `interval` apart. Per-peer failures are logged and the pass continues.
/// A replaced view is picked up at the next pass.
pub async fn send_requests(client: reqwest::Client, interval: Duration, view: Registry) {
    loop {
        let services = view.snapshot();
        if services.is_empty() {
            time::sleep(interval).await;
            continue;
        }
        fan_out(&client, interval, &services).await;
    }
}

async fn fan_out(client: &reqwest::Client, interval: Duration, services: &[String]) {
    for service in services {
        time::sleep(interval).await;
        tracing::debug!(%service, "sending a request");
        if let Err(error) = request(client, service).await {
            tracing::warn!(%service, %error, "request failed");
        }
    }
}

async fn request(client: &reqwest::Client, service: &str) -> Result<()> {
    let rsp = client.get(format!("http://{}/data", service)).send().await?;
    let status = rsp.status();
    if !status.is_success() {
        bail!("worker returned {}", status);
    }
    Ok(())
}
