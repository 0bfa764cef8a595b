use super::*;
use axum::{body, body::Body, http::Request};
use server_api::{
    testing::{FakeOAuth, GatewayCall, RecordingGateway},
    SubmissionConfig,
};
use shared::domain::{AccessToken, RepoSlug, SessionId};
use storage::SessionRecord;
use tower::ServiceExt;

use crate::session_cookie::SessionCookieConfig;

const BOUNDARY: &str = "device-form-boundary";

struct TestApp {
    router: Router,
    gateway: RecordingGateway,
    oauth: FakeOAuth,
    store: Arc<InMemorySessionStore>,
    cookies: SessionCookies,
}

fn test_app_with(gateway: RecordingGateway) -> TestApp {
    let oauth = FakeOAuth::default();
    let store = Arc::new(InMemorySessionStore::new());
    let cookies = SessionCookies::new(&SessionCookieConfig {
        secret: "test-secret".into(),
        secure: false,
    });
    let state = AppState {
        auth: AuthSession::new(Arc::new(oauth.clone()), store.clone(), None),
        submissions: SubmissionOrchestrator::new(
            Arc::new(gateway.clone()),
            SubmissionConfig {
                upstream: RepoSlug::new("acme", "devices"),
                base_branch: "dev".into(),
            },
        ),
        cookies: cookies.clone(),
    };
    TestApp {
        router: build_router(Arc::new(state), &[]),
        gateway,
        oauth,
        store,
        cookies,
    }
}

fn test_app() -> TestApp {
    test_app_with(RecordingGateway::new().with_existing_fork())
}

/// Seeds an authenticated session and returns the matching `Cookie` header.
async fn signed_in(app: &TestApp, token: &str) -> String {
    let id = SessionId(format!("sid-{token}"));
    let session = Session {
        token: AccessToken::new(token),
        login: "octocat".into(),
        avatar_url: "https://avatars.example/octocat.png".into(),
    };
    app.store
        .set(&id, SessionRecord::authenticated(&session))
        .await
        .expect("seed session");
    let signed = app.cookies.sign(&id, Duration::hours(1)).expect("sign");
    format!("session={signed}")
}

fn cookie_pair(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .expect("set-cookie")
        .to_string()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location")
        .to_string()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request")
}

fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields {
        out.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, bytes) in files {
        out.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    out
}

fn submit_request(cookie: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::post("/submit").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).expect("request")
}

fn scenario_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        ("slug", "esp32-devkit"),
        ("boardName", "ESP32 DevKit"),
        ("description", "A dev board"),
        ("chipType", "ESP32"),
        ("gpioPins", r#"{"GPIO2":"LED","GPIO4":"Relay"}"#),
        ("tags", "esp32,relay"),
        ("yamlConfig", "foo: bar"),
    ]
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = test_app();
    let response = app.router.oneshot(get("/healthz", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn oauth_login_round_trip_sets_session() {
    let app = test_app();

    let response = app
        .router
        .clone()
        .oneshot(get("/auth/github?returnTo=/boards", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let authorize = location(&response);
    assert!(authorize.starts_with("https://github.example/login/oauth/authorize"));
    let state = authorize
        .split("state=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .expect("state")
        .to_string();
    let pending = cookie_pair(&response);

    let response = app
        .router
        .clone()
        .oneshot(get(
            &format!("/auth/github/callback?code=good-code&state={state}"),
            Some(&pending),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/boards");
    let session = cookie_pair(&response);
    assert_ne!(session, pending);

    let response = app
        .router
        .oneshot(get("/auth/check", Some(&session)))
        .await
        .expect("response");
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "authenticated": true,
            "username": "octocat",
            "avatar_url": "https://avatars.example/octocat.png"
        })
    );
}

#[tokio::test]
async fn callback_reports_provider_error() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/auth/github/callback?error=access_denied", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "access_denied");
}

#[tokio::test]
async fn callback_requires_code() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/auth/github/callback", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No code provided");
}

#[tokio::test]
async fn callback_rejects_bad_code() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/auth/github/callback?code=stale", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response_has_no_cookie_set = response.headers().get(header::SET_COOKIE).is_none();
    assert_eq!(json_body(response).await["error"], "Failed to get access token");
    assert!(response_has_no_cookie_set);
}

#[tokio::test]
async fn auth_check_without_cookie_is_anonymous() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/auth/check", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "authenticated": false })
    );
    assert_eq!(app.oauth.remote_calls(), 0);
}

#[tokio::test]
async fn auth_check_discards_rejected_token() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_revoked").await;

    let response = app
        .router
        .clone()
        .oneshot(get("/auth/check", Some(&cookie)))
        .await
        .expect("response");
    assert_eq!(json_body(response).await["authenticated"], false);
    assert!(app
        .store
        .get(&SessionId("sid-gho_revoked".into()))
        .await
        .expect("store")
        .is_none());
}

#[tokio::test]
async fn auth_check_survives_provider_outage() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    app.oauth.set_outage(Some(502));

    let response = app
        .router
        .clone()
        .oneshot(get("/auth/check", Some(&cookie)))
        .await
        .expect("response");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "authenticated": true,
            "username": "octocat",
            "avatar_url": "https://avatars.example/octocat.png",
        })
    );
    assert!(app
        .store
        .get(&SessionId("sid-gho_fake".into()))
        .await
        .expect("store")
        .is_some());
}

#[tokio::test]
async fn quoted_session_cookie_is_accepted() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    let quoted = cookie.replacen("session=", "session=\"", 1) + "\"";

    let response = app
        .router
        .clone()
        .oneshot(get("/auth/check", Some(&quoted)))
        .await
        .expect("response");
    assert_eq!(json_body(response).await["authenticated"], true);
}

#[tokio::test]
async fn logout_clears_session_for_get_and_post() {
    let app = test_app();
    for method in [Method::GET, Method::POST] {
        let cookie = signed_in(&app, "gho_fake").await;
        let request = Request::builder()
            .method(method)
            .uri("/auth/logout")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .expect("request");
        let response = app.router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("set-cookie")
            .to_string();
        assert!(set_cookie.contains("Max-Age=0"));
        assert_eq!(json_body(response).await, serde_json::json!({ "success": true }));
        assert!(app
            .store
            .get(&SessionId("sid-gho_fake".into()))
            .await
            .expect("store")
            .is_none());
    }
}

#[tokio::test]
async fn submit_without_session_is_unauthorized_and_makes_no_calls() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(submit_request(None, multipart_body(&scenario_fields(), &[])))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Authentication required");

    let forged = "session=not-a-jwt";
    let response = app
        .router
        .oneshot(submit_request(Some(forged), b"not multipart".to_vec()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.gateway.calls().is_empty());
    assert_eq!(app.oauth.remote_calls(), 0);
}

#[tokio::test]
async fn submit_with_missing_fields_is_rejected_before_remote_calls() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    let fields: Vec<_> = scenario_fields()
        .into_iter()
        .filter(|(name, _)| *name != "chipType")
        .collect();

    let response = app
        .router
        .oneshot(submit_request(Some(&cookie), multipart_body(&fields, &[])))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "validation");
    assert_eq!(body["error"], "Missing required fields: chipType");
    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn submit_rejects_malformed_pin_mapping() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    let mut fields = scenario_fields();
    fields.retain(|(name, _)| *name != "gpioPins");
    fields.push(("gpioPins", "{not json"));

    let response = app
        .router
        .oneshot(submit_request(Some(&cookie), multipart_body(&fields, &[])))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn submit_creates_pull_request() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    let files: [(&str, &str, &[u8]); 2] = [
        ("image0", "front.png", b"front"),
        ("image1", "back.png", b"back"),
    ];

    let response = app
        .router
        .oneshot(submit_request(
            Some(&cookie),
            multipart_body(&scenario_fields(), &files),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({
            "success": true,
            "pr_url": "https://github.com/acme/devices/pull/7",
            "message": "Pull request created successfully!"
        })
    );

    assert_eq!(
        app.gateway.committed_paths(),
        [
            "esp32-devkit/images/front.png",
            "esp32-devkit/images/back.png",
            "esp32-devkit/device.yaml",
            "esp32-devkit/config.yaml",
        ]
    );
    let requests = app.gateway.pull_requests();
    assert_eq!(requests[0].title, "Add device: ESP32 DevKit");
    assert!(requests[0].head.starts_with("octocat:device/esp32-devkit-"));
    // The identity comes from the stored session.
    assert_eq!(app.oauth.remote_calls(), 0);
}

#[tokio::test]
async fn submit_reports_remote_failure_as_server_error() {
    let app = test_app_with(
        RecordingGateway::new()
            .with_existing_fork()
            .without_base_branch(),
    );
    let cookie = signed_in(&app, "gho_fake").await;

    let response = app
        .router
        .oneshot(submit_request(
            Some(&cookie),
            multipart_body(&scenario_fields(), &[]),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "not_found");
    assert!(body["error"]
        .as_str()
        .expect("message")
        .starts_with("Failed to create pull request: "));
    assert!(!app
        .gateway
        .calls()
        .iter()
        .any(|call| matches!(call, GatewayCall::CreateBranch { .. })));
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = test_app();
    let cookie = signed_in(&app, "gho_fake").await;
    let request = Request::post("/submit")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, MAX_BODY_BYTES + 1)
        .header(header::COOKIE, cookie)
        .body(Body::from(vec![0u8; MAX_BODY_BYTES + 1]))
        .expect("request");

    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn check_slug_reports_availability() {
    let app = test_app_with(RecordingGateway::new().with_upstream_path("esp32-devkit"));
    let cookie = signed_in(&app, "gho_fake").await;

    let response = app
        .router
        .clone()
        .oneshot(get("/checkSlug?slug=esp32-devkit", Some(&cookie)))
        .await
        .expect("response");
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "available": false })
    );

    let response = app
        .router
        .clone()
        .oneshot(get("/checkSlug?slug=new-board", Some(&cookie)))
        .await
        .expect("response");
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "available": true })
    );

    let response = app
        .router
        .clone()
        .oneshot(get("/checkSlug", Some(&cookie)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No slug provided");

    let response = app
        .router
        .oneshot(get("/checkSlug?slug=esp32-devkit", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cors_reflects_origin_with_credentials() {
    let app = test_app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/submit")
        .header(header::ORIGIN, "https://devices.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok()),
        Some("https://devices.example")
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|value| value.to_str().ok()),
        Some("true")
    );
}
