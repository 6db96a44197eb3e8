//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::ResourceExt;
use tracing::{error, instrument};

use crate::controller::store::{from_dynamic, ListSelector, ObjectKey, ResourceKind};
use crate::crd::ComponentConfig;

use super::dto::{
    ConfigDetailResponse, ConfigListResponse, ConfigSummary, ErrorResponse, HealthResponse,
};
use super::server::ApiState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(error: &str, e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(error, &e.to_string())),
    )
}

fn summary(config: &ComponentConfig) -> ConfigSummary {
    let status = config.status.clone().unwrap_or_default().status;
    ConfigSummary {
        name: config.name_any(),
        namespace: config.spec.namespace.clone(),
        phase: status
            .phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        observed_version: status.observed_version,
        target_version: status.target_version,
    }
}

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint handler
pub async fn metrics() -> Result<String, ApiError> {
    crate::controller::metrics::encode().map_err(|e| internal("encode_failed", e))
}

/// List all ComponentConfigs
#[instrument(skip(state))]
pub async fn list_configs(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ConfigListResponse>, ApiError> {
    let kind = ResourceKind::of::<ComponentConfig>();
    let objects = state
        .store
        .list(&kind, &ListSelector::all())
        .await
        .map_err(|e| {
            error!("Failed to list configs: {:?}", e);
            internal("list_failed", e)
        })?;

    let mut items = Vec::with_capacity(objects.len());
    for obj in &objects {
        let config: ComponentConfig = from_dynamic(obj).map_err(|e| internal("list_failed", e))?;
        items.push(summary(&config));
    }
    let total = items.len();
    Ok(Json(ConfigListResponse { items, total }))
}

/// Get a specific ComponentConfig
#[instrument(skip(state))]
pub async fn get_config(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<ConfigDetailResponse>, ApiError> {
    let key = ObjectKey::new(ResourceKind::of::<ComponentConfig>(), None, name.as_str());

    let obj = match state.store.get(&key).await {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    "not_found",
                    &format!("ComponentConfig {} not found", name),
                )),
            ))
        }
        Err(e) => {
            error!("Failed to get config {}: {:?}", name, e);
            return Err(internal("get_failed", e));
        }
    };
    let config: ComponentConfig = from_dynamic(&obj).map_err(|e| internal("get_failed", e))?;

    Ok(Json(ConfigDetailResponse {
        name: config.name_any(),
        namespace: config.spec.namespace.clone(),
        image: config.spec.image.clone(),
        replicas: config.spec.replicas,
        status: config.status.clone().unwrap_or_default().status,
        created_at: config
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339()),
    }))
}
