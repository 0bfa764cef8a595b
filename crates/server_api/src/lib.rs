//! Submission workflow: validation, payload rendering, the orchestrator that
//! drives the repository gateway, and the OAuth session service.

pub mod auth;
pub mod naming;
pub mod orchestrator;
pub mod payload;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{AuthError, AuthSession, CompletedLogin, LoginRedirect};
pub use orchestrator::{
    SubmissionConfig, SubmissionError, SubmissionOrchestrator, SubmissionStage, SubmissionStep,
};
pub use validation::{validate, ValidationError};
