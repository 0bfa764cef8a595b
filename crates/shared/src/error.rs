use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Validation,
    NotFound,
    Conflict,
    RemoteApi,
    Internal,
}

/// JSON body of every failed HTTP response: `{"code": ..., "error": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    #[serde(rename = "error")]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_message_under_error_key() {
        let body = serde_json::to_value(ApiError::new(ErrorCode::Validation, "Missing required fields"))
            .expect("json");
        assert_eq!(
            body,
            serde_json::json!({ "code": "validation", "error": "Missing required fields" })
        );
    }
}
