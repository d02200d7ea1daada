use std::env;

use actix_cors::Cors;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    cookie::Key,
    middleware,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use log::info;
use serde_json::json;

use ecommerce_api::{db, routes, AppState};

fn get_session_key() -> Key {
    let key_str = env::var("SESSION_KEY").unwrap_or_else(|_| {
        log::error!("FATAL: SESSION_KEY environment variable not set");
        std::process::exit(1);
    });
    if key_str.len() < 64 {
        log::error!("FATAL: SESSION_KEY must be at least 64 bytes");
        std::process::exit(1);
    }
    Key::from(key_str.as_bytes())
}

async fn default_handler() -> impl Responder {
    HttpResponse::NotFound().json(json!({ "message": "Not found" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://ecommerce.db".to_string());

    let db_pool = db::connect(&database_url).await?;
    info!("Database migrated successfully");

    let state = AppState {
        db_pool: db_pool.clone(),
    };
    if let (Ok(username), Ok(password)) = (env::var("SEED_USERNAME"), env::var("SEED_PASSWORD")) {
        db::ensure_seed_user(&state, &username, &password).await?;
    }

    info!("Starting HTTP server on http://localhost:8080/");

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(IdentityMiddleware::default())
            .wrap(SessionMiddleware::new(
                CookieSessionStore::default(),
                get_session_key(),
            ))
            .wrap(Cors::permissive())
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .configure(routes::config)
            .app_data(Data::new(AppState {
                db_pool: db_pool.clone(),
            }))
            .default_service(web::to(default_handler))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}
