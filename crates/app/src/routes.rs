//! HTTP routes. Handlers only translate between the wire and
//! `ProgressService`; every rule lives below this layer.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use practice_core::model::{Difficulty, ProblemMeta, ProgressSnapshot, UserId};
use practice_core::{ProblemFilter, ProgressReport, ToggleIntent};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

type AppStateArc = Arc<AppState>;

pub fn progress_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/progress", get(get_progress).post(replace_progress))
        .route("/api/progress/update", post(update_progress))
        .route("/api/progress/reset", post(reset_progress))
        .route("/api/progress/stats", get(progress_stats))
}

pub fn catalog_routes() -> Router<AppStateArc> {
    Router::new().route("/api/problems", get(list_problems))
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

/// The user bound to the request's bearer token.
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl FromRequestParts<AppStateArc> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppStateArc,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized)?;
        let identity = state
            .auth
            .current_user(token)
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self(identity.id))
    }
}

async fn get_progress(
    State(state): State<AppStateArc>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    Ok(Json(state.progress.get(&user).await?))
}

async fn replace_progress(
    State(state): State<AppStateArc>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ProgressSnapshot>, JsonRejection>,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    let Json(snapshot) = payload.inspect_err(|rejection| {
        tracing::warn!(user = %user, %rejection, "malformed progress payload");
    })?;
    Ok(Json(state.progress.replace(&user, &snapshot).await?))
}

async fn update_progress(
    State(state): State<AppStateArc>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ToggleIntent>, JsonRejection>,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    let Json(intent) = payload.inspect_err(|rejection| {
        tracing::warn!(user = %user, %rejection, "malformed toggle payload");
    })?;
    Ok(Json(state.progress.update(&user, &intent).await?))
}

async fn reset_progress(
    State(state): State<AppStateArc>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    Ok(Json(state.progress.reset(&user).await?))
}

async fn progress_stats(
    State(state): State<AppStateArc>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProgressReport>, ApiError> {
    Ok(Json(state.progress.report(&user).await?))
}

#[derive(Debug, Default, Deserialize)]
struct ProblemsQuery {
    difficulty: Option<Difficulty>,
    tag: Option<String>,
    q: Option<String>,
}

async fn list_problems(
    State(state): State<AppStateArc>,
    query: Result<Query<ProblemsQuery>, QueryRejection>,
) -> Result<Json<Vec<ProblemMeta>>, ApiError> {
    let Query(query) = query?;
    let filter = ProblemFilter {
        difficulty: query.difficulty,
        tag: query.tag,
        query: query.q,
        ..ProblemFilter::default()
    };
    let problems = state
        .catalog
        .filter(&filter, None)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(problems))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    problems: usize,
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        problems: state.catalog.len(),
    })
}
