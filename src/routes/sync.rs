//! Sync status readout and manual trigger.

use crate::config::IngestConfig;
use crate::db::MailGraphDb;
use crate::error::ApiError;
use crate::graph::store::SyncStateRow;
use crate::models::{DataResponse, MessageResponse, SyncStatus};
use chrono::Utc;
use rocket::serde::json::Json;
use rocket::State;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;
use std::sync::Arc;
use tokio::sync::Notify;

fn status_from_row(row: &SyncStateRow) -> SyncStatus {
    let today = Utc::now().date_naive();
    let mode = match row.batch_day {
        None => "pending",
        Some(day) if day > today => "hot-incremental",
        Some(_) => "cold-batch",
    };

    SyncStatus {
        account: row.account.clone(),
        mode: mode.to_string(),
        batch_day: row.batch_day,
        page_number: row.page_number,
        has_provider_cursor: row.provider_cursor.is_some(),
        last_synced_at: row.last_synced_at,
    }
}

/// Per-account sync cursor readout. Configured accounts with no persisted
/// state yet are reported as `pending`.
#[openapi(tag = "Sync")]
#[get("/sync/status")]
pub async fn sync_status(
    mut db: Connection<MailGraphDb>,
    config: &State<IngestConfig>,
) -> Result<Json<DataResponse<Vec<SyncStatus>>>, ApiError> {
    let rows: Vec<SyncStateRow> = sqlx::query_as(
        r#"SELECT account, provider_cursor, last_synced_at, batch_day, page_token, page_number
           FROM sync_states ORDER BY account"#,
    )
    .fetch_all(&mut **db)
    .await?;

    let mut statuses: Vec<SyncStatus> = rows.iter().map(status_from_row).collect();

    for account in &config.accounts {
        if !statuses.iter().any(|s| s.account == account.label) {
            statuses.push(SyncStatus {
                account: account.label.clone(),
                mode: "pending".to_string(),
                batch_day: None,
                page_number: 0,
                has_provider_cursor: false,
                last_synced_at: None,
            });
        }
    }

    Ok(Json(DataResponse::new(statuses)))
}

/// Nudge the ingest worker to run now instead of waiting for its timer.
#[openapi(tag = "Sync")]
#[post("/sync/run")]
pub async fn trigger_sync(
    trigger: &State<Arc<Notify>>,
) -> Result<Json<MessageResponse>, ApiError> {
    trigger.notify_one();

    Ok(Json(MessageResponse {
        message: "Sync triggered".to_string(),
    }))
}
