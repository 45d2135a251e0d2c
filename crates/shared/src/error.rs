use serde::{Deserialize, Serialize};

/// Error body returned by the backend on any non-2xx response.
///
/// FastAPI reports failures as `{"detail": ...}`; `message` and `error` are
/// accepted as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, alias = "message", alias = "error")]
    pub detail: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            detail: Some(serde_json::Value::String(message.into())),
        }
    }

    /// Human-readable message, if the payload carried one.
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            serde_json::Value::String(_) | serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
