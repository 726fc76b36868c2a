//! Router-level smoke test. Uses a lazily-connected pool (no live Postgres
//! required to build the pool itself) so this can run without any external
//! service; the `/health` endpoint is expected to report its DB check as
//! unhealthy in that case, not panic or fail to route.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use course_architect::config::{AppConfig, CorsSettings, Environment, PostgresSettings, ProviderCredentials, S3Settings};
use course_architect::providers::ProviderRegistry;
use course_architect::registry::ModelRegistry;
use course_architect::server::{build_router, AppState};

fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Testing,
        log_level: "info".to_string(),
        postgres: PostgresSettings {
            host: "localhost".to_string(),
            port: 5432,
            user: "test".to_string(),
            password: "test".to_string(),
            db: "test".to_string(),
        },
        s3: S3Settings {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "test".to_string(),
            secret_key: "test".to_string(),
            bucket: "test".to_string(),
        },
        providers: ProviderCredentials::default(),
        cors: CorsSettings::default(),
        model_registry_path: "config/models.yaml".to_string(),
        prompt_pack_path: "prompts/architect/v1.yaml".to_string(),
        http_host: "127.0.0.1".to_string(),
        http_port: 0,
    }
}

fn minimal_registry() -> ModelRegistry {
    ModelRegistry::load_from_str(
        r#"
models:
  m:
    provider: gemini
    capabilities: []
    max_context: 1000
    cost_per_1k: { input: 0.0, output: 0.0 }
actions:
  course_structuring:
    description: ""
    requires: []
routing:
  course_structuring:
    default: [m]
"#,
    )
    .unwrap()
}

async fn test_state() -> AppState {
    let config = test_config();
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.postgres.connection_string())
        .expect("lazy pool construction never touches the network");

    AppState {
        config: std::sync::Arc::new(config),
        pool: pool.clone(),
        registry: std::sync::Arc::new(minimal_registry()),
        providers: std::sync::Arc::new(ProviderRegistry::default()),
        auth_gate: std::sync::Arc::new(course_architect::auth::AuthGate::new(pool.clone())),
        rate_limiter: std::sync::Arc::new(course_architect::ratelimit::RateLimiter::new()),
    }
}

#[tokio::test]
async fn health_check_reports_db_unhealthy_without_a_live_database() {
    let app = build_router(test_state().await).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["checks"]["db"], "unhealthy");
}

#[tokio::test]
async fn course_endpoints_require_an_api_key() {
    let app = build_router(test_state().await).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/courses")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"title":"Rust Basics"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
