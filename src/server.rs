//! HTTP server (§6) — the only layer that knows about axum. Every
//! tenant-scoped handler goes through one of the scope extractors below,
//! which run the full auth/scope/rate-limit pipeline (§4.8) before the
//! handler body ever runs.

use axum::extract::{FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::architect::{ArchitectAgent, CourseStructure};
use crate::auth::{AuthGate, Scope, ScopeGuard, TenantContext};
use crate::config::AppConfig;
use crate::error::{CoreError, Result};
use crate::ingestion::{
    CompositeVideoProcessor, PresentationProcessor, RawSource, SourceProcessor, SourceType, TextProcessor,
    WebProcessor,
};
use crate::ledger::PgLedgerSink;
use crate::merge::{CourseContext, MergeStep, SlideVideoMapEntry};
use crate::persistence::courses::{Course, CourseDetail};
use crate::persistence::{connect_pool, CostReportRepository, CourseRepository, MaterialRepository};
use crate::providers::ProviderFactory;
use crate::ratelimit::RateLimiter;
use crate::registry::ModelRegistry;
use crate::router::ModelRouter;
use sqlx::PgPool;

/// Shared application state. Per-request repositories and the per-request
/// router (which needs a tenant-scoped ledger sink) are built from this on
/// demand rather than stored here — see [`AppState::router_for`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub registry: Arc<ModelRegistry>,
    pub providers: Arc<crate::providers::ProviderRegistry>,
    pub auth_gate: Arc<AuthGate>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::load(std::path::Path::new(&config.model_registry_path))?);
        let providers = Arc::new(ProviderFactory::build(&config.providers));
        let pool = connect_pool(&config.postgres).await?;
        let auth_gate = Arc::new(AuthGate::new(pool.clone()));
        let rate_limiter = Arc::new(RateLimiter::new());

        Ok(Self { config: Arc::new(config), pool, registry, providers, auth_gate, rate_limiter })
    }

    /// A `ModelRouter` bound to this request's tenant via its ledger sink.
    /// Cheap: everything but the ledger sink is an `Arc` clone.
    fn router_for(&self, tenant_id: Option<Uuid>) -> ModelRouter {
        let ledger = Arc::new(PgLedgerSink::new(self.pool.clone(), tenant_id));
        ModelRouter::new(self.registry.clone(), self.providers.clone()).with_ledger(ledger)
    }
}

async fn authenticate(parts: &mut Parts, state: &AppState) -> Result<TenantContext> {
    let key = parts
        .headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or(CoreError::MissingApiKey)?;
    state.auth_gate.authenticate(key).await
}

/// Extractor for `prep`-scope endpoints (course creation, ingestion, mapping
/// submission, structure generation).
pub struct PrepAuth(pub TenantContext);

impl FromRequestParts<AppState> for PrepAuth {
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        let tenant = authenticate(parts, state).await?;
        ScopeGuard::new(vec![Scope::Prep]).admit(&tenant, &state.rate_limiter).await?;
        Ok(PrepAuth(tenant))
    }
}

/// Extractor for endpoints readable by either scope (course/lesson reads,
/// cost reports). `check` is tried first since these are read paths.
pub struct SharedAuth(pub TenantContext);

impl FromRequestParts<AppState> for SharedAuth {
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        let tenant = authenticate(parts, state).await?;
        ScopeGuard::new(vec![Scope::Check, Scope::Prep]).admit(&tenant, &state.rate_limiter).await?;
        Ok(SharedAuth(tenant))
    }
}

pub async fn build_router(state: AppState) -> Router {
    let allowed_origins = &state.config.cors.allowed_origins;
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/courses", post(create_course))
        .route("/api/v1/courses/:id", get(get_course))
        .route("/api/v1/courses/:id/materials", post(upload_material))
        .route("/api/v1/courses/:id/slide-mapping", post(submit_slide_mapping))
        .route("/api/v1/courses/:id/structure/generate", post(generate_structure))
        .route("/api/v1/courses/:id/lessons/:lesson_id", get(get_lesson))
        .route("/api/v1/reports/cost", get(cost_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(RequestBodyLimitLayer::new(200 * 1024 * 1024))
        .layer(cors)
}

// ---------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------

#[derive(Serialize)]
struct HealthChecks {
    db: &'static str,
    s3: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    checks: HealthChecks,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    // Object-storage client wrapping is out of scope for this core; there is
    // no S3 client wired in to actually probe.
    Json(HealthResponse { status: "ok", checks: HealthChecks { db, s3: "not_configured" } })
}

// ---------------------------------------------------------------------
// Courses
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateCourseRequest {
    title: String,
    #[serde(default)]
    description: String,
}

async fn create_course(
    PrepAuth(tenant): PrepAuth,
    State(state): State<AppState>,
    Json(body): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>)> {
    let repo = CourseRepository::new(state.pool.clone(), tenant.tenant_id);
    let course = repo.create_course(&body.title, &body.description).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    SharedAuth(tenant): SharedAuth,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetail>> {
    let repo = CourseRepository::new(state.pool.clone(), tenant.tenant_id);
    let detail = repo
        .get_course(course_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("course {course_id} not found")))?;
    Ok(Json(detail))
}

async fn get_lesson(
    SharedAuth(tenant): SharedAuth,
    State(state): State<AppState>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<crate::architect::CourseLesson>> {
    let repo = CourseRepository::new(state.pool.clone(), tenant.tenant_id);
    let lesson = repo
        .get_lesson(course_id, lesson_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("lesson {lesson_id} not found")))?;
    Ok(Json(lesson))
}

// ---------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------

fn source_type_for_extension(extension: &str) -> Result<SourceType> {
    match extension {
        "md" | "markdown" | "docx" | "html" | "htm" | "txt" => Ok(SourceType::Text),
        "pdf" | "pptx" => Ok(SourceType::Presentation),
        "mp4" | "mov" | "webm" | "mkv" => Ok(SourceType::Video),
        other => Err(CoreError::UnsupportedFormat(format!("no ingestion processor for '.{other}'"))),
    }
}

/// Stages uploaded bytes to a scratch file on disk so file-based processors
/// (docx, PDF, PPTX, video) can open them by path; callers remove the file
/// once ingestion finishes.
fn stage_temp_file(bytes: &[u8], extension: &str) -> Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("course-architect-{}.{extension}", Uuid::new_v4()));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

async fn upload_material(
    PrepAuth(tenant): PrepAuth,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<StatusCode> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut url: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| CoreError::InvalidRequest(e.to_string()))? {
        match field.name() {
            Some("url") => {
                url = Some(field.text().await.map_err(|e| CoreError::InvalidRequest(e.to_string()))?);
            }
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                file_bytes = Some(field.bytes().await.map_err(|e| CoreError::InvalidRequest(e.to_string()))?.to_vec());
            }
            _ => {}
        }
    }

    let document = if let Some(url) = url {
        let source = RawSource {
            source_type: SourceType::Web,
            source_url: Some(url),
            file_path: None,
            bytes: None,
            extension: None,
        };
        WebProcessor::default().process(&source, None).await?
    } else {
        let bytes = file_bytes.ok_or_else(|| {
            CoreError::InvalidRequest("expected a multipart 'file' field or a 'url' field".to_string())
        })?;
        let name = file_name.unwrap_or_default();
        let extension = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        let source_type = source_type_for_extension(&extension)?;

        let path = stage_temp_file(&bytes, &extension)?;
        let source = RawSource {
            source_type,
            source_url: None,
            file_path: Some(path.clone()),
            bytes: Some(bytes),
            extension: Some(extension),
        };

        let router = state.router_for(Some(tenant.tenant_id));
        let result = match source_type {
            SourceType::Text => TextProcessor::default().process(&source, None).await,
            SourceType::Presentation => PresentationProcessor.process(&source, Some(&router)).await,
            SourceType::Video => CompositeVideoProcessor::new(true).process(&source, Some(&router)).await,
            SourceType::Web => unreachable!("web materials arrive via the url field"),
        };

        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to clean up staged upload");
        }
        result?
    };

    let materials = MaterialRepository::new(state.pool.clone(), tenant.tenant_id);
    materials.add_document(course_id, &document).await?;

    Ok(StatusCode::ACCEPTED)
}

async fn submit_slide_mapping(
    PrepAuth(tenant): PrepAuth,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Json(mappings): Json<Vec<SlideVideoMapEntry>>,
) -> Result<StatusCode> {
    let materials = MaterialRepository::new(state.pool.clone(), tenant.tenant_id);
    materials.set_slide_mappings(course_id, &mappings).await?;
    Ok(StatusCode::CREATED)
}

// ---------------------------------------------------------------------
// Structure generation
// ---------------------------------------------------------------------

async fn generate_structure(
    PrepAuth(tenant): PrepAuth,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseStructure>> {
    let materials = MaterialRepository::new(state.pool.clone(), tenant.tenant_id);
    let documents = materials.list_documents(course_id).await?;
    if documents.is_empty() {
        return Err(CoreError::InvalidRequest(
            "course has no ingested material ready for structuring".to_string(),
        ));
    }
    let mappings = materials.get_slide_mappings(course_id).await?;

    let course_context: CourseContext = MergeStep::merge(documents, mappings)?;

    let router = Arc::new(state.router_for(Some(tenant.tenant_id)));
    let agent = ArchitectAgent::new(router).with_prompt_path(&state.config.prompt_pack_path);
    let (structure, _response) = agent.run(&course_context).await?;

    let courses = CourseRepository::new(state.pool.clone(), tenant.tenant_id);
    courses.save_structure(course_id, &structure).await?;

    Ok(Json(structure))
}

// ---------------------------------------------------------------------
// Cost report
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct CostReportQuery {
    since: Option<DateTime<Utc>>,
}

async fn cost_report(
    SharedAuth(tenant): SharedAuth,
    State(state): State<AppState>,
    Query(query): Query<CostReportQuery>,
) -> Result<Json<crate::persistence::cost::CostReport>> {
    let since = query.since.unwrap_or_else(|| Utc::now() - ChronoDuration::days(30));
    let repo = CostReportRepository::new(state.pool.clone(), tenant.tenant_id);
    let report = repo.summary_since(since).await?;
    Ok(Json(report))
}
