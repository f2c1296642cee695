use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata a tool exposes to the provider: name, human description, and a
/// JSON-Schema object describing its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResponseKind {
    #[default]
    Text,
    Image,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "type")]
    pub kind: ToolResponseKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ToolResponseKind::Text,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: ToolResponseKind::Text,
            content: content.into(),
            is_error: true,
            ..Default::default()
        }
    }

    /// Attaches serialized metadata; a metadata value that fails to encode is
    /// dropped rather than failing the whole response.
    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Self {
        if let Ok(encoded) = serde_json::to_string(metadata) {
            self.metadata = encoded;
        }
        self
    }
}
