//! Aggregate statistics endpoint.

use crate::db::MailGraphDb;
use crate::error::ApiError;
use crate::models::{DataResponse, StatsSummary};
use rocket::serde::json::Json;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;

/// Entity totals and the overall observation range.
#[openapi(tag = "Stats")]
#[get("/stats")]
pub async fn get_stats(
    mut db: Connection<MailGraphDb>,
) -> Result<Json<DataResponse<StatsSummary>>, ApiError> {
    let summary: StatsSummary = sqlx::query_as(
        r#"SELECT
               (SELECT COUNT(*) FROM companies) AS total_companies,
               (SELECT COUNT(*) FROM domains) AS total_domains,
               (SELECT COUNT(*) FROM contacts) AS total_contacts,
               (SELECT COUNT(*) FROM email_addresses) AS total_email_addresses,
               (SELECT COUNT(*) FROM processed_messages) AS total_processed_messages,
               (SELECT MIN(first_seen) FROM companies) AS first_seen,
               (SELECT MAX(last_seen) FROM companies) AS last_seen"#,
    )
    .fetch_one(&mut **db)
    .await?;

    Ok(Json(DataResponse::new(summary)))
}
