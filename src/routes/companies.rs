//! Company endpoints: listing, detail, and administrative delete.

use crate::db::MailGraphDb;
use crate::error::ApiError;
use crate::graph::blacklist::{BlacklistCategory, BlacklistEngine};
use crate::models::{Company, CompanyDetail, DataResponse, Domain, MessageResponse, PaginatedResponse};
use crate::routes::helpers::{like_pattern, parse_entity_id, ContactRow};
use crate::routes::params::{CompanySortField, PaginationParams, SortOrder};
use rocket::serde::json::Json;
use rocket::State;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;
use sqlx::PgPool;

/// List companies with pagination, optional name/domain search, and
/// sorting.
#[openapi(tag = "Companies")]
#[get("/companies?<q>&<sort>&<order>&<params..>")]
pub async fn list_companies(
    mut db: Connection<MailGraphDb>,
    q: Option<String>,
    sort: Option<CompanySortField>,
    order: Option<SortOrder>,
    params: PaginationParams,
) -> Result<Json<PaginatedResponse<Company>>, ApiError> {
    let pattern = q.as_deref().map(like_pattern);
    let sort_column = sort.unwrap_or(CompanySortField::LastSeen).column();
    let direction = order.unwrap_or(SortOrder::Desc).sql();

    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM companies c
           WHERE $1::text IS NULL
              OR c.name ILIKE $1
              OR EXISTS (SELECT 1 FROM domains d WHERE d.company_id = c.id AND d.domain ILIKE $1)"#,
    )
    .bind(&pattern)
    .fetch_one(&mut **db)
    .await?;

    // sort column and direction come from closed enums
    let list_sql = format!(
        r#"SELECT * FROM companies c
           WHERE $1::text IS NULL
              OR c.name ILIKE $1
              OR EXISTS (SELECT 1 FROM domains d WHERE d.company_id = c.id AND d.domain ILIKE $1)
           ORDER BY {sort_column} {direction} NULLS LAST
           LIMIT $2 OFFSET $3"#
    );

    let companies: Vec<Company> = sqlx::query_as(&list_sql)
        .bind(&pattern)
        .bind(params.size())
        .bind(params.offset())
        .fetch_all(&mut **db)
        .await?;

    Ok(Json(PaginatedResponse::new(
        companies,
        params.page(),
        params.size(),
        total,
    )))
}

/// Company detail with its domains and contacts.
#[openapi(tag = "Companies")]
#[get("/companies/<id>")]
pub async fn get_company(
    mut db: Connection<MailGraphDb>,
    id: &str,
) -> Result<Json<DataResponse<CompanyDetail>>, ApiError> {
    let id = parse_entity_id(id)?;

    let company: Company = sqlx::query_as("SELECT * FROM companies WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Company '{id}' not found")))?;

    let domains: Vec<Domain> =
        sqlx::query_as("SELECT * FROM domains WHERE company_id = $1 ORDER BY domain")
            .bind(id)
            .fetch_all(&mut **db)
            .await?;

    let contact_rows: Vec<ContactRow> = sqlx::query_as(
        "SELECT * FROM contacts WHERE company_id = $1 ORDER BY last_seen DESC NULLS LAST",
    )
    .bind(id)
    .fetch_all(&mut **db)
    .await?;

    Ok(Json(DataResponse::new(CompanyDetail {
        company,
        domains,
        contacts: contact_rows.into_iter().map(ContactRow::into_contact).collect(),
    })))
}

/// Delete a company: its domains are blacklisted (category `manual`) so
/// ingestion never re-creates it, then the row cascades through domains,
/// contacts, and addresses.
#[openapi(tag = "Companies")]
#[delete("/companies/<id>")]
pub async fn delete_company(
    mut db: Connection<MailGraphDb>,
    pool: &State<PgPool>,
    id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_entity_id(id)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM companies WHERE id = $1)")
        .bind(id)
        .fetch_one(&mut **db)
        .await?;
    if !exists {
        return Err(ApiError::NotFound(format!("Company '{id}' not found")));
    }

    let domains: Vec<(String,)> = sqlx::query_as("SELECT domain FROM domains WHERE company_id = $1")
        .bind(id)
        .fetch_all(&mut **db)
        .await?;

    let engine = BlacklistEngine::new(pool.inner().clone());
    for (domain,) in &domains {
        engine
            .add(domain, BlacklistCategory::Manual, Some("company-delete"))
            .await?;
    }

    sqlx::query("DELETE FROM companies WHERE id = $1")
        .bind(id)
        .execute(&mut **db)
        .await?;

    log::info!(
        "deleted company {} and blacklisted {} domain(s)",
        id,
        domains.len()
    );

    Ok(Json(MessageResponse {
        message: format!(
            "Deleted company and blacklisted {} domain(s)",
            domains.len()
        ),
    }))
}
