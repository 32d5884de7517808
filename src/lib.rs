#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod provider;
pub mod routes;
pub mod test_support;

use crate::config::IngestConfig;
use crate::db::MailGraphDb;
use crate::graph::worker::IngestWorker;
use crate::provider::MailProvider;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{make_rapidoc, GeneralConfig, HideShowConfig, RapiDocConfig},
    settings::UrlObject,
    swagger_ui::{make_swagger_ui, SwaggerUIConfig},
};
use std::sync::{Arc, Once};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Run database migrations. Idempotent; already-applied migrations are
/// skipped.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    log::info!("database migrations completed");
    Ok(())
}

/// Assemble the Rocket instance.
///
/// The ingest worker only starts when a mail provider adapter is supplied;
/// without one the daemon serves the query surface and logs that ingestion
/// is disabled.
pub fn rocket(mail_provider: Option<Arc<dyn MailProvider>>) -> Rocket<Build> {
    init_logger();

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(MailGraphDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match MailGraphDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match run_migrations(&pool).await {
                        Ok(_) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        // Clone and manage the pool for background tasks, plus the ingest
        // configuration and the manual sync trigger
        .attach(AdHoc::try_on_ignite(
            "Manage DB Pool and Ingest Config",
            |rocket| async move {
                match MailGraphDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        let ingest_config: IngestConfig = rocket
                            .figment()
                            .extract_inner("ingest")
                            .unwrap_or_default();
                        let trigger = Arc::new(Notify::new());

                        Ok(rocket.manage(pool).manage(ingest_config).manage(trigger))
                    }
                    None => Err(rocket),
                }
            },
        ))
        // Spawn the ingest worker in the background
        .attach(AdHoc::on_liftoff("Spawn Ingest Worker", move |rocket| {
            Box::pin(async move {
                let Some(provider) = mail_provider else {
                    log::info!("no mail provider adapter configured; ingestion disabled");
                    return;
                };

                let (Some(pool), Some(config), Some(trigger)) = (
                    rocket.state::<rocket_db_pools::sqlx::PgPool>().cloned(),
                    rocket.state::<IngestConfig>().cloned(),
                    rocket.state::<Arc<Notify>>().cloned(),
                ) else {
                    log::error!("failed to spawn ingest worker: managed state missing");
                    return;
                };

                let token = CancellationToken::new();
                let worker_token = token.clone();
                let shutdown = rocket.shutdown();
                tokio::spawn(async move {
                    shutdown.await;
                    worker_token.cancel();
                });

                let worker = IngestWorker::new(pool, provider, config, trigger, token);
                tokio::spawn(worker.run());
            })
        }))
        .mount(
            "/api",
            openapi_get_routes![
                // Health routes
                routes::health::live_health,
                routes::health::ready_health,
                // Company routes
                routes::companies::list_companies,
                routes::companies::get_company,
                routes::companies::delete_company,
                // Contact routes
                routes::contacts::list_contacts,
                routes::contacts::get_contact,
                // Blacklist routes
                routes::blacklist::list_blacklist,
                routes::blacklist::add_blacklist_domain,
                routes::blacklist::remove_blacklist_domain,
                routes::blacklist::seed_personal_domains,
                // Sync routes
                routes::sync::sync_status,
                routes::sync::trigger_sync,
                // Stats routes
                routes::stats::get_stats,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Mailgraph API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}
