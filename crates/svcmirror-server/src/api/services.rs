//! Service Endpoints
//!
//! - GET /services - every known service with its instance count
//! - GET /services/{service} - instances of one service in canonical order
//! - GET /services/{service}/select - one weighted random instance

use super::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use svcmirror_core::InstanceConfig;

/// Response for GET /services
#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceSummary>,
}

#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub instance_count: usize,
}

/// Response for GET /services/{service}
#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub service: String,
    pub instances: Vec<InstanceEntry>,
}

/// One instance of a service
#[derive(Debug, Serialize)]
pub struct InstanceEntry {
    pub node: String,
    #[serde(flatten)]
    pub config: InstanceConfig,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(service: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("unknown service: {service}"),
        }),
    )
        .into_response()
}

/// GET /services
#[tracing::instrument(skip(state))]
pub async fn list_services(State(state): State<AppState>) -> Json<ServicesResponse> {
    let services = state
        .directory
        .list_all()
        .into_iter()
        .map(|(name, instances)| ServiceSummary {
            name,
            instance_count: instances.len(),
        })
        .collect();

    Json(ServicesResponse { services })
}

/// GET /services/{service}
///
/// Unknown services are 404; a known service with no instances is an empty
/// list.
#[tracing::instrument(skip(state))]
pub async fn get_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    let Some(instances) = state.directory.registry().get(&service) else {
        return not_found(&service);
    };

    let instances = instances
        .iter()
        .map(|(node, config)| InstanceEntry {
            node: node.clone(),
            config: config.clone(),
        })
        .collect();

    Json(ServiceResponse { service, instances }).into_response()
}

/// GET /services/{service}/select
///
/// 404 for unknown services, 503 when the service has no instances.
#[tracing::instrument(skip(state))]
pub async fn select_instance(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    if !state.directory.registry().contains_service(&service) {
        return not_found(&service);
    }

    match state.directory.select_one(&service) {
        Some(selected) => Json(selected).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: format!("no instances available for {service}"),
            }),
        )
            .into_response(),
    }
}
