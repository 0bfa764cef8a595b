use server_api::{AuthSession, SubmissionOrchestrator};

use crate::session_cookie::SessionCookies;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) auth: AuthSession,
    pub(crate) submissions: SubmissionOrchestrator,
    pub(crate) cookies: SessionCookies,
}
