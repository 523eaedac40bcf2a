extern crate dotenvy;

use actix_web::{middleware, web, App, HttpResponse, HttpServer, Responder};
use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use dotenvy::dotenv;
use std::env;
use tracing_subscriber::EnvFilter;

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod schema;

use errors::ApiError;

// Database connection pool type
pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let auth_config = auth::AuthConfig::from_env();

    // create db connection pool
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .build(manager)
        .expect("Failed to create pool.");

    tracing::info!(%bind_addr, "starting healthcare API server");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(auth_config.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                ApiError::Validation(format!("invalid request body: {err}")).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _req| {
                ApiError::Validation(format!("invalid path parameter: {err}")).into()
            }))
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .service(
                web::scope("/api/auth")
                    .route("/register", web::post().to(handlers::register))
                    .route("/login", web::post().to(handlers::login))
                    .route("/refresh", web::post().to(handlers::refresh)),
            )
            .service(
                web::scope("/api/doctors")
                    .route("", web::get().to(handlers::list_doctors))
                    .route("", web::post().to(handlers::create_doctor))
                    .route("/{doctor_id}", web::get().to(handlers::get_doctor))
                    .route("/{doctor_id}", web::put().to(handlers::replace_doctor))
                    .route("/{doctor_id}", web::patch().to(handlers::update_doctor))
                    .route("/{doctor_id}", web::delete().to(handlers::delete_doctor)),
            )
            .service(
                // Mapping routes come first so "mappings" is never matched
                // as a patient id.
                web::scope("/api/patients")
                    .route("/mappings", web::get().to(handlers::list_mappings))
                    .route("/mappings", web::post().to(handlers::create_mapping))
                    .route(
                        "/mappings/delete/{mapping_id}",
                        web::delete().to(handlers::delete_mapping),
                    )
                    .route(
                        "/mappings/{patient_id}",
                        web::get().to(handlers::list_mappings_for_patient),
                    )
                    .route("", web::get().to(handlers::list_patients))
                    .route("", web::post().to(handlers::create_patient))
                    .route("/{patient_id}", web::get().to(handlers::get_patient))
                    .route("/{patient_id}", web::put().to(handlers::replace_patient))
                    .route("/{patient_id}", web::patch().to(handlers::update_patient))
                    .route("/{patient_id}", web::delete().to(handlers::delete_patient)),
            )
            .route("/", web::get().to(home))
    })
    .bind(bind_addr)?
    .run()
    .await
}

async fn home() -> impl Responder {
    HttpResponse::Ok().body("Welcome to the Healthcare API")
}
