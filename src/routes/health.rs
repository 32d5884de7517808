//! Lightweight service health endpoints used for readiness checks and tests.

use rocket::serde::json::Json;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::db::MailGraphDb;
use crate::error::ApiError;
use crate::models::DataResponse;

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// Static status string reporting application readiness.
    pub status: String,
}

#[openapi(tag = "Health")]
#[get("/health/live")]
pub fn live_health() -> Json<DataResponse<HealthResponse>> {
    Json(DataResponse::new(HealthResponse {
        status: "ok".to_string(),
    }))
}

#[openapi(tag = "Health")]
#[get("/health/ready")]
pub async fn ready_health(
    mut db: Connection<MailGraphDb>,
) -> Result<Json<DataResponse<HealthResponse>>, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&mut **db)
        .await
        .map_err(|err| ApiError::InternalError(format!("readiness check failed: {err}")))?;

    Ok(Json(DataResponse::new(HealthResponse {
        status: "ok".to_string(),
    })))
}
