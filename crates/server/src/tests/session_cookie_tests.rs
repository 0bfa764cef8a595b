use axum::http::header;

use super::*;

fn cookies(secure: bool) -> SessionCookies {
    SessionCookies::new(&SessionCookieConfig {
        secret: "app-secret".into(),
        secure,
    })
}

fn headers_with_cookie(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_str(value).expect("header"));
    headers
}

#[test]
fn signed_id_round_trips() {
    let cookies = cookies(false);
    let id = SessionId("abc123".into());
    let token = cookies.sign(&id, Duration::hours(1)).expect("sign");
    assert_eq!(cookies.verify(&token).expect("verify"), id);
}

#[test]
fn other_secret_is_rejected() {
    let token = cookies(false)
        .sign(&SessionId("abc123".into()), Duration::hours(1))
        .expect("sign");
    let other = SessionCookies::new(&SessionCookieConfig {
        secret: "different".into(),
        secure: false,
    });
    assert!(matches!(
        other.verify(&token),
        Err(SessionCookieError::Invalid(_))
    ));
}

#[test]
fn expired_cookie_is_rejected() {
    let cookies = cookies(false);
    let token = cookies
        .sign(&SessionId("abc123".into()), Duration::hours(-1))
        .expect("sign");
    assert!(cookies.verify(&token).is_err());
}

#[test]
fn session_id_is_read_from_cookie_header() {
    let cookies = cookies(false);
    let id = SessionId("abc123".into());
    let token = cookies.sign(&id, Duration::hours(1)).expect("sign");

    let headers = headers_with_cookie(&format!("theme=dark; session={token}; other=1"));
    assert_eq!(cookies.session_id(&headers), Some(id));

    let tampered = headers_with_cookie(&format!("session={token}x"));
    assert_eq!(cookies.session_id(&tampered), None);
    assert_eq!(cookies.session_id(&HeaderMap::new()), None);
}

#[test]
fn session_cookie_is_found_among_similar_names() {
    let cookies = cookies(false);
    let id = SessionId("abc123".into());
    let token = cookies.sign(&id, Duration::hours(1)).expect("sign");

    let headers = headers_with_cookie(&format!("session_old=1; session={token}"));
    assert_eq!(cookies.session_id(&headers), Some(id.clone()));

    let quoted = headers_with_cookie(&format!("session=\"{token}\""));
    assert_eq!(cookies.session_id(&quoted), Some(id));
}

#[test]
fn set_cookie_carries_attributes() {
    let value = cookies(true)
        .set_cookie(&SessionId("abc".into()), Duration::hours(24))
        .expect("cookie");
    let value = value.to_str().expect("ascii");
    assert!(value.starts_with("session="));
    assert!(value.contains("Max-Age=86400"));
    assert!(value.contains("HttpOnly"));
    assert!(value.contains("SameSite=Lax"));
    assert!(value.contains("Path=/"));
    assert!(value.contains("Secure"));

    let plain = cookies(false)
        .set_cookie(&SessionId("abc".into()), Duration::hours(1))
        .expect("cookie");
    assert!(!plain.to_str().expect("ascii").contains("Secure"));
}

#[test]
fn clear_cookie_expires_immediately() {
    let value = cookies(false).clear_cookie().expect("cookie");
    let value = value.to_str().expect("ascii");
    assert!(value.starts_with("session=;"));
    assert!(value.contains("Max-Age=0"));
    assert!(value.contains("Path=/"));
}
