#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoints;
pub mod informer;
pub mod registry;
pub mod worker;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::store::Store;
use tokio::sync::mpsc;

/// Handles shared by the reconcile loop.
#[derive(Clone)]
pub struct Ctx {
    /// Cache of the services matching the label selector.
    pub services: Store<Service>,
    /// Handoff toward the informer's registry consumer.
    pub snapshots: mpsc::Sender<Vec<String>>,
}
