// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! HTTP API — setup, login, shutdown and the /sysinfo snapshot

use actix_web::{error::InternalError, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::audit::AccessLog;
use crate::auth::{AuthError, CredentialStore, LoginThrottle};
use crate::monitoring::{self, SystemMonitor};
use crate::monitoring::counters::ProcCounterSource;

pub const CLIENT_PAGE: &str = "client.html";

/// Shared application state
pub struct AppState {
    pub monitor: Mutex<SystemMonitor>,
    pub credentials: CredentialStore,
    pub throttle: LoginThrottle,
    pub access_log: AccessLog,
    pub web_dir: PathBuf,
    /// Notified once a valid shutdown request has been answered
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Fails if the stored credentials don't pass the integrity check
    pub fn new(data_dir: &Path, web_dir: PathBuf, shutdown: Arc<Notify>) -> Result<Self, AuthError> {
        let credentials = CredentialStore::open(data_dir)?;
        Ok(Self {
            monitor: Mutex::new(SystemMonitor::new()),
            credentials,
            throttle: LoginThrottle::new(),
            access_log: AccessLog::new(data_dir),
            web_dir,
            shutdown,
        })
    }
}

fn failure(message: &str) -> serde_json::Value {
    serde_json::json!({ "success": false, "message": message })
}

fn success() -> serde_json::Value {
    serde_json::json!({ "success": true })
}

/// Malformed bodies get a JSON 400 instead of actix's plain-text default
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        warn!("Rejected request body: {}", err);
        let response = HttpResponse::BadRequest().json(failure(&format!("Invalid request body: {}", err)));
        InternalError::from_response(err, response).into()
    })
}

// ─── Client page ───

/// GET / — the browser client
pub async fn index(state: web::Data<AppState>) -> HttpResponse {
    let path = state.web_dir.join(CLIENT_PAGE);
    match std::fs::read_to_string(&path) {
        Ok(content) => HttpResponse::Ok().content_type("text/html").body(content),
        Err(e) => {
            error!("Cannot load {}: {}", path.display(), e);
            HttpResponse::InternalServerError().body("Error loading client")
        }
    }
}

// ─── Setup & auth ───

/// GET /initial-setup — whether a password has been set
pub async fn initial_setup(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "initialSetupComplete": state.credentials.is_configured()
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub new_password: String,
}

/// POST /setup-password — store the first password
pub async fn setup_password(state: web::Data<AppState>, body: web::Json<SetupRequest>) -> HttpResponse {
    match state.credentials.set_password(&body.new_password) {
        Ok(()) => {
            state.access_log.record("Initial password setup completed.");
            HttpResponse::Ok().json(success())
        }
        Err(AuthError::AlreadyConfigured) => {
            HttpResponse::Forbidden().json(failure("Password has already been set."))
        }
        Err(AuthError::EmptyPassword) => {
            HttpResponse::BadRequest().json(failure("Password must not be empty."))
        }
        Err(e) => {
            error!("Password setup failed: {}", e);
            HttpResponse::InternalServerError().json(failure("Could not store password."))
        }
    }
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Shared gate for login and shutdown: setup done, not throttled, password
/// correct. Failures are counted; resetting the count is up to the caller.
/// The throttle slot is taken before the password is checked, so the cap
/// holds under concurrent requests.
fn check_password(state: &AppState, password: &str, action: &str) -> Result<(), HttpResponse> {
    if !state.credentials.is_configured() {
        return Err(HttpResponse::Forbidden().json(failure("Password needs to be set first.")));
    }
    let Some(failures) = state.throttle.begin_attempt() else {
        state.access_log.record(&format!("Too many {} attempts.", action));
        return Err(HttpResponse::TooManyRequests().json(failure(&format!(
            "Too many {} attempts. Please try again later.", action
        ))));
    };
    if !state.credentials.validate(password) {
        state.access_log.record(&format!("Failed {} attempt ({} consecutive).", action, failures));
        return Err(HttpResponse::Unauthorized().json(failure("Invalid password")));
    }
    state.throttle.cancel_attempt();
    Ok(())
}

/// POST /login
pub async fn login(state: web::Data<AppState>, body: web::Json<PasswordRequest>) -> HttpResponse {
    if let Err(resp) = check_password(&state, &body.password, "login") { return resp; }
    state.throttle.reset();
    state.access_log.record("Successful login.");
    HttpResponse::Ok().json(success())
}

/// POST /shutdown — answers first, then asks the server to stop
pub async fn shutdown(state: web::Data<AppState>, body: web::Json<PasswordRequest>) -> HttpResponse {
    if let Err(resp) = check_password(&state, &body.password, "shutdown") { return resp; }
    state.access_log.record("Shutdown requested.");
    state.shutdown.notify_one();
    HttpResponse::Ok().json(success())
}

// ─── Monitoring ───

/// GET /sysinfo — host facts plus a fresh one-second load sample
pub async fn sysinfo(state: web::Data<AppState>) -> HttpResponse {
    let facts = state.monitor.lock().unwrap_or_else(|p| p.into_inner()).host_facts();
    let mut source = ProcCounterSource::new();
    let snapshot = monitoring::collect_snapshot(facts, &mut source).await;
    HttpResponse::Ok().json(snapshot)
}

/// Configure all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .app_data(json_config())
        .route("/", web::get().to(index))
        .route("/initial-setup", web::get().to(initial_setup))
        .route("/setup-password", web::post().to(setup_password))
        .route("/login", web::post().to(login))
        .route("/shutdown", web::post().to(shutdown))
        .route("/sysinfo", web::get().to(sysinfo));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::time::Duration;
    use crate::monitoring::sampler::RUN_DURATION;

    fn state(dir: &Path) -> web::Data<AppState> {
        web::Data::new(AppState::new(dir, dir.to_path_buf(), Arc::new(Notify::new())).unwrap())
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(configure)).await
        };
    }

    fn post(uri: &str, body: Value) -> test::TestRequest {
        test::TestRequest::post().uri(uri).set_json(body)
    }

    #[actix_web::test]
    async fn setup_flow() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/initial-setup").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["initialSetupComplete"], false);

        let resp = test::call_service(&app, post("/setup-password", json!({"newPassword": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/initial-setup").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["initialSetupComplete"], true);

        let resp = test::call_service(&app, post("/setup-password", json!({"newPassword": "other"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(state.credentials.validate("pw"));

        let log = std::fs::read_to_string(dir.path().join(crate::audit::ACCESS_LOG_FILE)).unwrap();
        assert!(log.contains("Initial password setup completed."));
    }

    #[actix_web::test]
    async fn malformed_body_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/setup-password")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);

        let resp = test::call_service(&app, post("/setup-password", json!({"password": "wrong field"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!state.credentials.is_configured());

        let resp = test::call_service(&app, post("/setup-password", json!({"newPassword": ""})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn login_requires_setup() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);

        let resp = test::call_service(&app, post("/login", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = test::call_service(&app, post("/shutdown", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.throttle.failures(), 0);
    }

    #[actix_web::test]
    async fn login_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.credentials.set_password("pw").unwrap();
        let app = app!(state);

        let resp = test::call_service(&app, post("/login", json!({"password": "nope"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"success": false, "message": "Invalid password"}));

        let resp = test::call_service(&app, post("/login", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.throttle.failures(), 0);
    }

    #[actix_web::test]
    async fn sixth_attempt_is_throttled_even_with_correct_password() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.credentials.set_password("pw").unwrap();
        let app = app!(state);

        for _ in 0..5 {
            let resp = test::call_service(&app, post("/login", json!({"password": "nope"})).to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
        let resp = test::call_service(&app, post("/login", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let resp = test::call_service(&app, post("/shutdown", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn successful_login_resets_failure_count() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.credentials.set_password("pw").unwrap();
        let app = app!(state);

        for _ in 0..4 {
            test::call_service(&app, post("/login", json!({"password": "nope"})).to_request()).await;
        }
        let resp = test::call_service(&app, post("/login", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, post("/login", json!({"password": "nope"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.throttle.failures(), 1);

        for _ in 0..3 {
            test::call_service(&app, post("/login", json!({"password": "nope"})).to_request()).await;
        }
        let resp = test::call_service(&app, post("/login", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn shutdown_notifies_and_keeps_failure_count() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.credentials.set_password("pw").unwrap();
        let app = app!(state);

        let resp = test::call_service(&app, post("/shutdown", json!({"password": "nope"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        test::call_service(&app, post("/shutdown", json!({"password": "nope"})).to_request()).await;

        let resp = test::call_service(&app, post("/shutdown", json!({"password": "pw"})).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.throttle.failures(), 2);

        let notified = tokio::time::timeout(Duration::from_millis(100), state.shutdown.notified()).await;
        assert!(notified.is_ok());
    }

    #[actix_web::test]
    async fn client_page_served_or_500() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        std::fs::write(dir.path().join(CLIENT_PAGE), "<html>pulse</html>").unwrap();
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/html");
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"<html>pulse</html>");
    }

    #[actix_web::test]
    async fn unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(target_os = "linux")]
    #[actix_web::test]
    async fn sysinfo_returns_snapshot_within_bound() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let app = app!(state);

        let started = std::time::Instant::now();
        let resp = test::call_service(&app, test::TestRequest::get().uri("/sysinfo").to_request()).await;
        assert!(started.elapsed() < RUN_DURATION + Duration::from_millis(250), "took {:?}", started.elapsed());
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        for key in ["cpuModel", "hostname", "uptime", "cpuUsage", "totalMem", "usedMem"] {
            assert!(body.get(key).is_some(), "missing {}", key);
        }
        assert!(body["totalMem"].as_str().unwrap().ends_with(" GiB"));
    }
}
