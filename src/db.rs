use rocket_db_pools::{sqlx, Database};

#[derive(Database)]
#[database("mailgraph_db")]
pub struct MailGraphDb(sqlx::PgPool);
