//! Response bodies for the REST API

use serde::{Deserialize, Serialize};

use crate::crd::Status;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub name: String,
    /// Namespace the owned resources live in
    pub namespace: String,
    pub phase: String,
    pub observed_version: String,
    pub target_version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfigListResponse {
    pub items: Vec<ConfigSummary>,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDetailResponse {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
