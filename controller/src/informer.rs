use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::registry::Registry;

/// Wire format of the informer's `/services` resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ServiceList {
    pub services: Vec<String>,
}

/// Routes served by the informer.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/services", get(get_services))
        .with_state(registry)
}

async fn get_services(State(registry): State<Registry>) -> Json<ServiceList> {
    let services = registry.snapshot().to_vec();
    Json(ServiceList { services })
}
