use serde::{Deserialize, Serialize};

use crate::domain::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCheckResponse {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl AuthCheckResponse {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            username: None,
            avatar_url: None,
        }
    }

    pub fn signed_in(session: Session) -> Self {
        Self {
            authenticated: true,
            username: Some(session.login),
            avatar_url: Some(session.avatar_url),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub pr_url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlugAvailabilityResponse {
    pub available: bool,
}
