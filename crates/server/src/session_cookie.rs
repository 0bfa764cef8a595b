use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::SessionId;
use thiserror::Error;

pub const COOKIE_NAME: &str = "session";

#[derive(Debug, Clone)]
pub struct SessionCookieConfig {
    pub secret: String,
    pub secure: bool,
}

#[derive(Debug, Error)]
pub enum SessionCookieError {
    #[error("failed to sign session cookie: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("session cookie rejected: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("session cookie is not a valid header value")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sid: String,
    iat: i64,
    exp: i64,
}

/// Signs session ids into the `session` cookie and reads them back.
#[derive(Clone)]
pub struct SessionCookies {
    encoding: EncodingKey,
    decoding: DecodingKey,
    secure: bool,
}

impl SessionCookies {
    pub fn new(config: &SessionCookieConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            secure: config.secure,
        }
    }

    pub fn sign(&self, id: &SessionId, ttl: Duration) -> Result<String, SessionCookieError> {
        let now = Utc::now();
        let claims = Claims {
            sid: id.0.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(SessionCookieError::Sign)
    }

    pub fn verify(&self, token: &str) -> Result<SessionId, SessionCookieError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(SessionCookieError::Invalid)?;
        Ok(SessionId(data.claims.sid))
    }

    /// Session id from the request cookies. Missing, tampered and expired
    /// cookies all read as `None`.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<SessionId> {
        let jar = CookieJar::from_headers(headers);
        let token = jar.get(COOKIE_NAME)?.value_trimmed();
        self.verify(token).ok()
    }

    pub fn set_cookie(
        &self,
        id: &SessionId,
        ttl: Duration,
    ) -> Result<HeaderValue, SessionCookieError> {
        let token = self.sign(id, ttl)?;
        let cookie = self.cookie(token, time::Duration::seconds(ttl.num_seconds()));
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }

    pub fn clear_cookie(&self) -> Result<HeaderValue, SessionCookieError> {
        let cookie = self.cookie(String::new(), time::Duration::ZERO);
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }

    fn cookie(&self, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((COOKIE_NAME, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(max_age)
            .build()
    }
}

#[cfg(test)]
#[path = "tests/session_cookie_tests.rs"]
mod tests;
