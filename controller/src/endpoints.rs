use futures::prelude::*;
use k8s_openapi::api::core::v1::Service;
use kube::{runtime::watcher::Event, ResourceExt};

use crate::Ctx;

/// Consumes service watch events, rederiving and republishing the endpoint
/// snapshot after each one.
pub async fn process<S>(events: S, ctx: Ctx)
where
    S: Stream<Item = Event<Service>>,
{
    tokio::pin!(events);
    while let Some(ev) = events.next().await {
        handle(ev, &ctx).await;
    }
    tracing::debug!("event stream ended");
}

pub(super) async fn handle(ev: Event<Service>, ctx: &Ctx) {
    match ev {
        Event::Applied(svc) | Event::Deleted(svc) => {
            tracing::debug!(
                namespace = %svc.namespace().unwrap_or_default(),
                service = %svc.name_any(),
                "reconciling endpoints"
            );
            publish(ctx).await;
        }
        Event::Restarted(_) => {
            tracing::debug!("reconciling endpoints after watch restart");
            publish(ctx).await;
        }
    }
}

async fn publish(ctx: &Ctx) {
    let state = ctx.services.state();
    let endpoints = extract(state.iter().map(|svc| svc.as_ref()));
    // The send blocks until the registry consumer takes the snapshot; a slow
    // consumer stalls reconciliation rather than losing an update.
    if ctx.snapshots.send(endpoints).await.is_err() {
        tracing::error!("dropping snapshot because the channel is closed");
    }
}

/// Derives a `name.namespace:port` record for every service port named
/// `http`. The output is sorted: the cache iterates in unspecified order,
/// and consumers visit endpoints in snapshot order.
pub fn extract<'a, I>(services: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Service>,
{
    let mut endpoints = Vec::new();
    for svc in services {
        let name = svc.name_any();
        let namespace = match svc.namespace() {
            Some(namespace) => namespace,
            None => continue,
        };
        let ports = svc.spec.as_ref().and_then(|spec| spec.ports.as_ref());
        for port in ports.into_iter().flatten() {
            if port.name.as_deref() == Some("http") {
                endpoints.push(format!("{}.{}:{}", name, namespace, port.port));
            }
        }
    }
    endpoints.sort();
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::reflector;
    use tokio::sync::mpsc;

    fn mk_service(name: &str, namespace: &str, ports: &[(&str, i32)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|(name, port)| ServicePort {
                            name: Some((*name).to_string()),
                            port: *port,
                            ..ServicePort::default()
                        })
                        .collect(),
                ),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    #[test]
    fn extracts_one_record_per_http_port() {
        let services = vec![
            mk_service("svc-a", "ns1", &[("http", 8080)]),
            mk_service("svc-b", "ns1", &[("grpc", 9000)]),
            mk_service("svc-c", "ns2", &[("metrics", 9090), ("http", 8081)]),
        ];
        assert_eq!(
            extract(&services),
            vec!["svc-a.ns1:8080".to_string(), "svc-c.ns2:8081".to_string()]
        );
    }

    #[test]
    fn portless_services_contribute_nothing() {
        let services = vec![
            mk_service("svc-a", "ns1", &[]),
            mk_service("svc-b", "ns1", &[("grpc", 9000)]),
        ];
        assert_eq!(extract(&services), Vec::<String>::new());
    }

    #[test]
    fn output_is_sorted() {
        let services = vec![
            mk_service("svc-b", "ns1", &[("http", 8080)]),
            mk_service("svc-a", "ns1", &[("http", 8080)]),
        ];
        assert_eq!(
            extract(&services),
            vec!["svc-a.ns1:8080".to_string(), "svc-b.ns1:8080".to_string()]
        );
    }

    #[tokio::test]
    async fn publishes_a_snapshot_per_event() {
        let (store, mut writer) = reflector::store();
        let svc = mk_service("svc-a", "ns1", &[("http", 8080)]);
        writer.apply_watcher_event(&Event::Applied(svc.clone()));

        let (tx, mut rx) = mpsc::channel(1);
        let ctx = Ctx {
            services: store,
            snapshots: tx,
        };

        handle(Event::Applied(svc.clone()), &ctx).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            vec!["svc-a.ns1:8080".to_string()]
        );

        writer.apply_watcher_event(&Event::Deleted(svc.clone()));
        handle(Event::Deleted(svc), &ctx).await;
        assert_eq!(rx.recv().await.unwrap(), Vec::<String>::new());
    }
}
