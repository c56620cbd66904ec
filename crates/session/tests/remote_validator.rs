//! Black-box tests: the real `RemoteValidator`, `AuthClient` and guard against
//! an in-process HTTP backend bound to an ephemeral port.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation as JwtValidation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cvai_session::store::{TOKEN_KEY, USER_KEY, read_token, read_user};
use cvai_session::{
    AuthClient, ClientError, GuardOptions, GuardState, MemoryStore, Navigator, Redirect,
    Rejection, RemoteValidator, SessionConfig, SessionGuard, SessionStore, TokenValidator,
    UnauthorizedReason, Validation,
};

const SECRET: &str = "test-secret";

#[derive(Debug, Serialize, Deserialize)]
struct TestClaims {
    sub: String,
    exp: i64,
}

fn mint_jwt(sub: &str, exp_offset: ChronoDuration) -> String {
    let claims = TestClaims {
        sub: sub.to_string(),
        exp: (Utc::now() + exp_offset).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api/cvai", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn config(&self) -> SessionConfig {
        SessionConfig::for_api(self.base_url.clone())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Every request seen by the backend, as (path, Authorization header).
#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<(String, Option<String>)>>>);

impl Seen {
    fn record(&self, path: &str, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.0.lock().unwrap().push((path.to_string(), auth));
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn last_auth(&self) -> Option<String> {
        self.0.lock().unwrap().last().and_then(|(_, a)| a.clone())
    }
}

/// Backend that verifies HS256 bearer tokens the way the profile endpoint does:
/// missing header → 401, unparsable header → 422, bad/expired token → 401.
fn backend(seen: Seen) -> Router {
    async fn profile(State(seen): State<Seen>, headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        seen.record("/profile", &headers);
        match bearer_subject(&headers) {
            Ok(sub) => (StatusCode::OK, Json(json!({ "profile": { "user_id": sub } }))),
            Err(status) => (status, Json(json!({ "msg": "rejected" }))),
        }
    }

    async fn me(State(seen): State<Seen>, headers: HeaderMap) -> (StatusCode, Json<serde_json::Value>) {
        seen.record("/auth/me", &headers);
        match bearer_subject(&headers) {
            Ok(sub) => (
                StatusCode::OK,
                Json(json!({ "user": { "id": sub.parse::<i64>().unwrap_or(0), "email": "alice@example.com" } })),
            ),
            Err(status) => (status, Json(json!({ "msg": "rejected" }))),
        }
    }

    #[derive(Deserialize)]
    struct Login {
        email: String,
        password: String,
    }

    async fn login(Json(body): Json<Login>) -> (StatusCode, Json<serde_json::Value>) {
        if body.password != "hunter2" {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "Invalid credentials" })),
            );
        }
        let token = mint_jwt("42", ChronoDuration::hours(1));
        (
            StatusCode::OK,
            Json(json!({
                "access_token": token,
                "user": { "id": 42, "email": body.email, "plan": "trial", "timezone": "UTC" }
            })),
        )
    }

    async fn register(Json(body): Json<Login>) -> (StatusCode, Json<serde_json::Value>) {
        if body.email == "taken@example.com" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Email already registered" })),
            );
        }
        let token = mint_jwt("43", ChronoDuration::hours(1));
        (
            StatusCode::CREATED,
            Json(json!({
                "message": "User registered successfully",
                "access_token": token,
                "user": { "id": 43, "email": body.email }
            })),
        )
    }

    Router::new()
        .route("/api/cvai/profile", get(profile))
        .route("/api/cvai/auth/me", get(me))
        .route("/api/cvai/auth/login", post(login))
        .route("/api/cvai/auth/register", post(register))
        .with_state(seen)
}

fn bearer_subject(headers: &HeaderMap) -> Result<String, StatusCode> {
    let header = headers
        .get("authorization")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    if token.split('.').count() != 3 {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let data = jsonwebtoken::decode::<TestClaims>(
        token,
        &DecodingKey::from_secret(SECRET.as_bytes()),
        &JwtValidation::new(Algorithm::HS256),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok(data.claims.sub)
}

/// Backend that answers the profile endpoint with a fixed status.
fn fixed_status(status: StatusCode) -> Router {
    Router::new().route(
        "/api/cvai/profile",
        get(move || async move { (status, Json(json!({ "error": "fixed" }))) }),
    )
}

#[derive(Default)]
struct RecordingNavigator(Mutex<Vec<Redirect>>);

impl Navigator for RecordingNavigator {
    fn redirect(&self, redirect: Redirect) {
        self.0.lock().unwrap().push(redirect);
    }
}

fn guard_for(
    config: &SessionConfig,
    store: Arc<MemoryStore>,
) -> (Arc<SessionGuard>, Arc<RecordingNavigator>) {
    let validator = RemoteValidator::new(config)
        .unwrap()
        .with_store(store.clone());
    let navigator = Arc::new(RecordingNavigator::default());
    let guard = SessionGuard::new(
        store,
        Arc::new(validator),
        navigator.clone(),
        GuardOptions::from(config),
    );
    (Arc::new(guard), navigator)
}

async fn seeded_store(token: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_token(token));
    store
        .set(USER_KEY, r#"{"id":42,"email":"alice@example.com"}"#)
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn validator_sends_bearer_token_and_accepts_2xx() {
    let seen = Seen::default();
    let server = TestServer::spawn(backend(seen.clone())).await;
    let token = mint_jwt("42", ChronoDuration::minutes(10));

    let validator = RemoteValidator::new(&server.config()).unwrap();
    assert_eq!(validator.validate(&token).await, Validation::Valid);

    assert_eq!(seen.count(), 1);
    assert_eq!(seen.last_auth(), Some(format!("Bearer {token}")));
}

#[tokio::test]
async fn validator_purges_only_on_401() {
    let seen = Seen::default();
    let server = TestServer::spawn(backend(seen)).await;
    // Signed with a different secret: structurally fine, rejected by the server.
    let forged = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &TestClaims {
            sub: "42".into(),
            exp: (Utc::now() + ChronoDuration::minutes(10)).timestamp(),
        },
        &EncodingKey::from_secret(b"someone-else"),
    )
    .unwrap();

    let store = seeded_store(&forged).await;
    let validator = RemoteValidator::new(&server.config())
        .unwrap()
        .with_store(store.clone());

    assert_eq!(
        validator.validate(&forged).await,
        Validation::Rejected(Rejection::Unauthenticated)
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn validator_keeps_token_on_422_and_5xx() {
    for (status, expected) in [
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Validation::Rejected(Rejection::MalformedRequest),
        ),
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Validation::Rejected(Rejection::UnexpectedStatus(500)),
        ),
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Validation::Rejected(Rejection::UnexpectedStatus(503)),
        ),
    ] {
        let server = TestServer::spawn(fixed_status(status)).await;
        let store = seeded_store("a.b.c").await;
        let validator = RemoteValidator::new(&server.config())
            .unwrap()
            .with_store(store.clone());

        assert_eq!(validator.validate("a.b.c").await, expected);
        assert_eq!(store.removals(), 0, "status {status} must not purge");
    }
}

#[tokio::test]
async fn validator_reports_unreachable_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SessionConfig::for_api(format!("http://{addr}/api/cvai"));
    let validator = RemoteValidator::new(&config).unwrap();
    assert!(matches!(
        validator.validate("a.b.c").await,
        Validation::Unreachable(_)
    ));
}

#[tokio::test]
async fn validator_times_out_as_unreachable() {
    let slow = Router::new().route(
        "/api/cvai/profile",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }),
    );
    let server = TestServer::spawn(slow).await;
    let mut config = server.config();
    config.request_timeout = Duration::from_millis(200);

    let validator = RemoteValidator::new(&config).unwrap();
    assert!(matches!(
        validator.validate("a.b.c").await,
        Validation::Unreachable(_)
    ));
}

#[tokio::test]
async fn guard_authorizes_live_token_and_leaves_storage_alone() {
    let seen = Seen::default();
    let server = TestServer::spawn(backend(seen.clone())).await;
    let token = mint_jwt("42", ChronoDuration::minutes(10));
    let store = seeded_store(&token).await;
    let (guard, navigator) = guard_for(&server.config(), store.clone());

    assert_eq!(guard.check().await, GuardState::Authorized);
    assert_eq!(seen.count(), 1);
    assert_eq!(store.removals(), 0);
    assert_eq!(read_token(store.as_ref()).await.unwrap(), Some(token));
    assert!(navigator.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn guard_skips_network_for_expired_token() {
    let seen = Seen::default();
    let server = TestServer::spawn(backend(seen.clone())).await;
    let token = mint_jwt("42", ChronoDuration::minutes(-10));
    let store = seeded_store(&token).await;
    let (guard, navigator) = guard_for(&server.config(), store.clone());

    assert_eq!(
        guard.check().await,
        GuardState::Unauthorized(UnauthorizedReason::Expired)
    );
    assert_eq!(seen.count(), 0);
    assert!(store.is_empty().await);
    assert_eq!(navigator.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn guard_purges_on_server_401() {
    let server = TestServer::spawn(fixed_status(StatusCode::UNAUTHORIZED)).await;
    let token = mint_jwt("42", ChronoDuration::minutes(10));
    let store = seeded_store(&token).await;
    let (guard, _navigator) = guard_for(&server.config(), store.clone());

    assert_eq!(
        guard.check().await,
        GuardState::Unauthorized(UnauthorizedReason::Rejected)
    );
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn guard_keeps_token_when_server_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SessionConfig::for_api(format!("http://{addr}/api/cvai"));
    let token = mint_jwt("42", ChronoDuration::minutes(10));
    let store = seeded_store(&token).await;
    let (guard, _navigator) = guard_for(&config, store.clone());

    assert_eq!(
        guard.check().await,
        GuardState::Unauthorized(UnauthorizedReason::Unreachable)
    );
    assert_eq!(store.removals(), 0);
    assert!(store.get(TOKEN_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn login_me_logout_round_trip() {
    let seen = Seen::default();
    let server = TestServer::spawn(backend(seen)).await;
    let store = Arc::new(MemoryStore::new());
    let client = AuthClient::new(server.config(), store.clone()).unwrap();

    let resp = client.login("alice@example.com", "hunter2").await.unwrap();
    assert!(resp.access_token.is_some());

    let stored = read_user(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.id.as_str(), "42");
    assert_eq!(stored.plan.as_deref(), Some("trial"));

    let me = client.current_user().await.unwrap();
    assert_eq!(me.email, "alice@example.com");

    let (guard, _navigator) = guard_for(&server.config(), store.clone());
    assert_eq!(guard.check().await, GuardState::Authorized);

    client.logout().await.unwrap();
    assert!(store.is_empty().await);
    assert!(matches!(
        client.current_user().await,
        Err(ClientError::NoToken)
    ));
}

#[tokio::test]
async fn failed_login_surfaces_server_message_and_stores_nothing() {
    let server = TestServer::spawn(backend(Seen::default())).await;
    let store = Arc::new(MemoryStore::new());
    let client = AuthClient::new(server.config(), store.clone()).unwrap();

    match client.login("alice@example.com", "wrong").await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("expected API error, got {other:?}"),
    }
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn register_stores_issued_session() {
    let server = TestServer::spawn(backend(Seen::default())).await;
    let store = Arc::new(MemoryStore::new());
    let client = AuthClient::new(server.config(), store.clone()).unwrap();

    let request = cvai_session::RegisterRequest::new("bob@example.com", "pw");
    let resp = client.register(&request).await.unwrap();
    assert_eq!(resp.message.as_deref(), Some("User registered successfully"));
    assert!(read_token(store.as_ref()).await.unwrap().is_some());

    let taken = cvai_session::RegisterRequest::new("taken@example.com", "pw");
    assert!(matches!(
        client.register(&taken).await,
        Err(ClientError::Api { status: 400, .. })
    ));
}
