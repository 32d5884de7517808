//! Contact endpoints: listing and detail with addresses.

use crate::db::MailGraphDb;
use crate::error::ApiError;
use crate::models::{Contact, ContactDetail, DataResponse, PaginatedResponse};
use crate::routes::helpers::{like_pattern, parse_entity_id, ContactRow, EmailAddressRow};
use crate::routes::params::{ContactSortField, PaginationParams, SortOrder};
use rocket::serde::json::Json;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;

/// List contacts with pagination, optional name/address search, and
/// sorting.
#[openapi(tag = "Contacts")]
#[get("/contacts?<q>&<sort>&<order>&<params..>")]
pub async fn list_contacts(
    mut db: Connection<MailGraphDb>,
    q: Option<String>,
    sort: Option<ContactSortField>,
    order: Option<SortOrder>,
    params: PaginationParams,
) -> Result<Json<PaginatedResponse<Contact>>, ApiError> {
    let pattern = q.as_deref().map(like_pattern);
    let sort_column = sort.unwrap_or(ContactSortField::LastSeen).column();
    let direction = order.unwrap_or(SortOrder::Desc).sql();

    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM contacts c
           WHERE $1::text IS NULL
              OR c.name ILIKE $1
              OR EXISTS
                  (SELECT 1 FROM email_addresses ea
                   WHERE ea.contact_id = c.id AND ea.address ILIKE $1)"#,
    )
    .bind(&pattern)
    .fetch_one(&mut **db)
    .await?;

    let list_sql = format!(
        r#"SELECT * FROM contacts c
           WHERE $1::text IS NULL
              OR c.name ILIKE $1
              OR EXISTS
                  (SELECT 1 FROM email_addresses ea
                   WHERE ea.contact_id = c.id AND ea.address ILIKE $1)
           ORDER BY {sort_column} {direction} NULLS LAST
           LIMIT $2 OFFSET $3"#
    );

    let rows: Vec<ContactRow> = sqlx::query_as(&list_sql)
        .bind(&pattern)
        .bind(params.size())
        .bind(params.offset())
        .fetch_all(&mut **db)
        .await?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(ContactRow::into_contact).collect(),
        params.page(),
        params.size(),
        total,
    )))
}

/// Contact detail with every address bound to it.
#[openapi(tag = "Contacts")]
#[get("/contacts/<id>")]
pub async fn get_contact(
    mut db: Connection<MailGraphDb>,
    id: &str,
) -> Result<Json<DataResponse<ContactDetail>>, ApiError> {
    let id = parse_entity_id(id)?;

    let contact: ContactRow = sqlx::query_as("SELECT * FROM contacts WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Contact '{id}' not found")))?;

    let address_rows: Vec<EmailAddressRow> =
        sqlx::query_as("SELECT * FROM email_addresses WHERE contact_id = $1 ORDER BY address")
            .bind(id)
            .fetch_all(&mut **db)
            .await?;

    Ok(Json(DataResponse::new(ContactDetail {
        contact: contact.into_contact(),
        addresses: address_rows
            .into_iter()
            .map(EmailAddressRow::into_email_address)
            .collect(),
    })))
}
