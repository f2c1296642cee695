use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A running workspace instance with its associated resources. Used both as
/// the `POST /v1/instances` request body (only `path` required) and as the
/// response shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub yolo: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

/// Wire summary of the agent's selected model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub context_window: i64,
    pub default_max_tokens: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub can_reason: bool,
}

/// `POST /v1/control` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerControl {
    pub command: String,
}

/// Error envelope for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
