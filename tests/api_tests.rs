mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use voice_detect_rs::api::{self, AppState};
use voice_detect_rs::auth::AuthService;
use voice_detect_rs::storage::{Database, MemoryStore};

const MASTER_KEY: &str = "master-key-for-tests";
const JWT_SECRET: &str = "integration-test-jwt-secret";

fn auth() -> AuthService {
    AuthService::new(JWT_SECRET, 60, MASTER_KEY)
}

fn app_with(db: Database) -> Router {
    api::router(AppState::new(Arc::new(common::classifier()), auth(), db))
}

fn app() -> Router {
    app_with(Database::new(Arc::new(MemoryStore::new())))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn clip(secs: f32) -> Value {
    json!({ "audio_base64": common::wav_base64(&common::tone(220.0, secs, 16000), 16000) })
}

async fn register(app: &Router, email: &str) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/auth/register",
            &json!({"email": email, "password": "correct horse"}),
            &[],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

fn assert_error(status: StatusCode, body: &Value, expected: StatusCode, code: &str) {
    assert_eq!(status, expected, "{}", body);
    assert_eq!(body["error"], code, "{}", body);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_health_check() {
    let (status, body) = send(&app(), get("/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["service"], "AI Voice Detection API");
    assert!(body["version"].is_string());
}

#[test_log::test(tokio::test)]
async fn test_detect_with_master_key() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/detect-voice", &clip(2.0), &[("api-key", MASTER_KEY)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let label = body["prediction"].as_str().unwrap();
    assert!(label == "AI_GENERATED" || label == "HUMAN");
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!((confidence * 100.0).round() / 100.0, confidence);

    // A steady tone has almost no pitch movement
    assert_eq!(body["explanation"]["pitch_variance"], "low");
    assert!(body["explanation"]["spectral_smoothness"].is_string());
    assert!(body["explanation"]["micro_variations"].is_string());

    // The same secret also works as a bearer token
    let (status, _) = send(
        &app,
        post_json(
            "/detect-voice",
            &clip(1.5),
            &[("authorization", format!("Bearer {}", MASTER_KEY).as_str())],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_detect_mp3_upload() {
    let body = json!({ "audio_base64": common::mp3_base64() });
    let (status, body) = send(
        &app(),
        post_json("/detect-voice", &body, &[("api-key", MASTER_KEY)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let label = body["prediction"].as_str().unwrap();
    assert!(label == "AI_GENERATED" || label == "HUMAN");
    assert!((0.0..=1.0).contains(&body["confidence"].as_f64().unwrap()));
    assert!(body["explanation"]["pitch_variance"].is_string());
}

#[tokio::test]
async fn test_detect_requires_authentication() {
    let app = app();
    let (status, body) = send(&app, post_json("/detect-voice", &clip(1.5), &[])).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "AUTHENTICATION_REQUIRED");

    let (status, body) = send(
        &app,
        post_json("/detect-voice", &clip(1.5), &[("api-key", "wrong")]),
    )
    .await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "INVALID_API_KEY");

    let (status, body) = send(
        &app,
        post_json(
            "/detect-voice",
            &clip(1.5),
            &[("authorization", "Bearer not-a-token")],
        ),
    )
    .await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "INVALID_TOKEN");
}

#[tokio::test]
async fn test_detect_rejects_bad_clips() {
    let app = app();
    let key = [("api-key", MASTER_KEY)];

    let (status, body) = send(&app, post_json("/detect-voice", &clip(0.5), &key)).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "AUDIO_TOO_SHORT");
    assert!(body["message"].as_str().unwrap().contains("0.5s"));

    let long = json!({ "audio_base64": common::wav_base64(&vec![0.0; 4000 * 301], 4000) });
    let (status, body) = send(&app, post_json("/detect-voice", &long, &key)).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "AUDIO_TOO_LONG");

    let (status, body) = send(
        &app,
        post_json("/detect-voice", &json!({"audio_base64": ""}), &key),
    )
    .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "MISSING_AUDIO");

    let (status, body) = send(
        &app,
        post_json("/detect-voice", &json!({"audio_base64": "%%%"}), &key),
    )
    .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "INVALID_FORMAT");
    assert!(body["details"].is_string());

    let malformed = Request::builder()
        .method("POST")
        .uri("/detect-voice")
        .header("content-type", "application/json")
        .header("api-key", MASTER_KEY)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, malformed).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "INVALID_REQUEST");
}

#[tokio::test]
async fn test_register_twice_is_rejected() {
    let app = app();
    let body = register(&app, "ada@example.com").await;
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["user_email"], "ada@example.com");
    assert_eq!(body["api_key"].as_str().unwrap().len(), 43);

    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            &json!({"email": "ada@example.com", "password": "another password"}),
            &[],
        ),
    )
    .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "USER_EXISTS");
}

#[tokio::test]
async fn test_register_validation() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            &json!({"email": "not-an-email", "password": "long enough"}),
            &[],
        ),
    )
    .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "INVALID_EMAIL");

    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            &json!({"email": "ok@example.com", "password": "short"}),
            &[],
        ),
    )
    .await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, "WEAK_PASSWORD");
}

#[tokio::test]
async fn test_login_failures_do_not_leak_accounts() {
    let app = app();
    register(&app, "grace@example.com").await;

    let (wrong_status, wrong_body) = send(
        &app,
        post_json(
            "/auth/login",
            &json!({"email": "grace@example.com", "password": "wrong password"}),
            &[],
        ),
    )
    .await;
    assert_error(
        wrong_status,
        &wrong_body,
        StatusCode::UNAUTHORIZED,
        "INVALID_CREDENTIALS",
    );

    let (unknown_status, unknown_body) = send(
        &app,
        post_json(
            "/auth/login",
            &json!({"email": "nobody@example.com", "password": "correct horse"}),
            &[],
        ),
    )
    .await;
    assert_eq!(unknown_status, wrong_status);
    assert_eq!(unknown_body, wrong_body);

    let (status, body) = send(
        &app,
        post_json(
            "/auth/login",
            &json!({"email": "grace@example.com", "password": "correct horse"}),
            &[],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
}

#[test_log::test(tokio::test)]
async fn test_account_flow() {
    let app = app();
    let registered = register(&app, "lin@example.com").await;
    let token = registered["access_token"].as_str().unwrap().to_string();
    let api_key = registered["api_key"].as_str().unwrap().to_string();

    let (status, me) = send(&app, get("/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "lin@example.com");
    assert_eq!(me["api_key"], api_key.as_str());
    assert_eq!(me["total_requests"], 0);
    assert_eq!(me["created_at"].as_str().unwrap().len(), "2024-01-01 00:00:00".len());

    // One call with the access token, one with the personal API key
    let (status, _) = send(
        &app,
        post_json(
            "/detect-voice",
            &clip(1.5),
            &[("authorization", format!("Bearer {}", token).as_str())],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        post_json("/detect-voice", &clip(1.5), &[("api-key", api_key.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Logging happens off the request path
    let mut history = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(&app, get("/dashboard/history?limit=10", Some(&token))).await;
        if body["total"] == 2 {
            history = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(history["total"], 2, "history never filled");
    let entry = &history["predictions"][0];
    assert_eq!(entry["user_email"], "lin@example.com");
    assert!(entry["timestamp_formatted"].is_string());
    assert!(entry["features"]["pitch_variance"].is_number());
    assert!(entry["metadata"]["audio_duration"].is_number());

    let mut stats = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(&app, get("/dashboard/stats", Some(&token))).await;
        if body["total_requests"] == 2 {
            stats = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats["total_requests"], 2, "usage never logged");
    assert_eq!(stats["requests_today"], 2);
    assert_eq!(stats["total_tests"], 2);
    assert_eq!(stats["trend"], "Stable");
    assert_eq!(stats["api_key"], api_key.as_str());
    assert!(stats["last_prediction"]["prediction"].is_string());
}

#[tokio::test]
async fn test_jwt_routes() {
    let app = app();
    let (status, body) = send(&app, get("/auth/me", None)).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "UNAUTHORIZED");

    let (status, body) = send(&app, get("/dashboard/stats", Some("garbage"))).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "INVALID_TOKEN");

    let orphan = auth().create_access_token("ghost@example.com").unwrap();
    let (status, body) = send(&app, get("/auth/me", Some(&orphan))).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, "USER_NOT_FOUND");

    let (status, body) = send(
        &app,
        post_json(
            "/detect-voice",
            &clip(1.5),
            &[("authorization", format!("Bearer {}", orphan).as_str())],
        ),
    )
    .await;
    assert_error(status, &body, StatusCode::NOT_FOUND, "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_operator_routes() {
    let app = app();
    let (status, body) = send(&app, get("/stats", None)).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "UNAUTHORIZED");

    let (status, body) = send(&app, get("/stats", Some("not-the-key"))).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, "INVALID_API_KEY");

    let (status, body) = send(&app, get("/stats", Some(MASTER_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_predictions"], 0);
    assert_eq!(body["average_confidence"], 0.0);

    let (status, body) = send(&app, get("/stats/recent?limit=5", Some(MASTER_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert!(body["predictions"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, get("/model/info", Some(MASTER_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["n_trees"], 2);
    assert_eq!(body["feature_names"].as_array().unwrap().len(), 22);
    let importances = body["feature_importances"].as_array().unwrap();
    assert_eq!(importances[0]["name"], "pitch_variance");
    assert_eq!(importances[1]["name"], "energy_variation");
}

#[tokio::test]
async fn test_without_database() {
    let app = app_with(Database::disabled());

    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            &json!({"email": "ada@example.com", "password": "correct horse"}),
            &[],
        ),
    )
    .await;
    assert_error(
        status,
        &body,
        StatusCode::SERVICE_UNAVAILABLE,
        "DATABASE_UNAVAILABLE",
    );

    // Detection and read-only aggregates keep working
    let (status, _) = send(
        &app,
        post_json("/detect-voice", &clip(1.5), &[("api-key", MASTER_KEY)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/stats", Some(MASTER_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_predictions"], 0);

    // A signed token cannot be tied to an account without the store
    let token = auth().create_access_token("ada@example.com").unwrap();
    let (status, body) = send(
        &app,
        post_json(
            "/detect-voice",
            &clip(1.5),
            &[("authorization", format!("Bearer {}", token).as_str())],
        ),
    )
    .await;
    assert_error(
        status,
        &body,
        StatusCode::SERVICE_UNAVAILABLE,
        "DATABASE_UNAVAILABLE",
    );
}
