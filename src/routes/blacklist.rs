//! Blacklist administration endpoints.

use crate::error::ApiError;
use crate::graph::blacklist::{BlacklistCategory, BlacklistEngine, BlacklistEntry};
use crate::models::{DataResponse, MessageResponse};
use crate::routes::helpers::validate_domain;
use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rocket_okapi::openapi;
use serde::Deserialize;
use sqlx::PgPool;

/// Request body for adding a domain to the blacklist.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistAddRequest {
    pub domain: String,
    /// One of `spam`, `personal`, `transactional`, `manual`.
    pub category: String,
    pub source: Option<String>,
}

fn parse_category(raw: &str) -> Result<BlacklistCategory, ApiError> {
    raw.parse::<BlacklistCategory>().map_err(ApiError::BadRequest)
}

/// List blacklisted domains, optionally filtered by category.
#[openapi(tag = "Blacklist")]
#[get("/blacklist?<category>")]
pub async fn list_blacklist(
    pool: &State<PgPool>,
    category: Option<String>,
) -> Result<Json<DataResponse<Vec<BlacklistEntry>>>, ApiError> {
    let category = category.as_deref().map(parse_category).transpose()?;

    let engine = BlacklistEngine::new(pool.inner().clone());
    let entries = engine.list(category).await?;

    Ok(Json(DataResponse::new(entries)))
}

/// Add a domain to the blacklist (or re-categorize an existing entry).
#[openapi(tag = "Blacklist")]
#[post("/blacklist", data = "<request>")]
pub async fn add_blacklist_domain(
    pool: &State<PgPool>,
    request: Json<BlacklistAddRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let domain = validate_domain(&request.domain)?;
    let category = parse_category(&request.category)?;

    let engine = BlacklistEngine::new(pool.inner().clone());
    engine
        .add(&domain, category, request.source.as_deref())
        .await?;

    Ok(Json(MessageResponse {
        message: format!("Blacklisted '{domain}' as {category}"),
    }))
}

/// Remove a domain from the blacklist.
#[openapi(tag = "Blacklist")]
#[delete("/blacklist/<domain>")]
pub async fn remove_blacklist_domain(
    pool: &State<PgPool>,
    domain: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let domain = validate_domain(domain)?;

    let engine = BlacklistEngine::new(pool.inner().clone());
    if !engine.remove(&domain).await? {
        return Err(ApiError::NotFound(format!(
            "Domain '{domain}' is not blacklisted"
        )));
    }

    Ok(Json(MessageResponse {
        message: format!("Removed '{domain}' from blacklist"),
    }))
}

/// Seed the static free-mail domain list with category `personal`.
#[openapi(tag = "Blacklist")]
#[post("/blacklist/seed-personal")]
pub async fn seed_personal_domains(
    pool: &State<PgPool>,
) -> Result<Json<MessageResponse>, ApiError> {
    let engine = BlacklistEngine::new(pool.inner().clone());
    let inserted = engine.seed_personal_domains().await?;

    Ok(Json(MessageResponse {
        message: format!("Seeded {inserted} personal domain(s)"),
    }))
}
