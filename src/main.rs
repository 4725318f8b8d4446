// src/main.rs
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use footrate_api::config::Config;
use footrate_api::vision::VisionClient;
use footrate_api::{api, docs, sweeper, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("FootRate API ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let vision = VisionClient::from_config(&config).expect("Failed to build vision client");

    if let Some(interval) = config.sweep_interval {
        sweeper::start_grace_sweeper(pool.clone(), interval);
    }

    if config.dodo_test_mode {
        log::warn!("payments running in TEST mode, checkout is simulated");
    }
    if config.dodo_webhook_secret.is_none() {
        log::warn!("DODO_WEBHOOK_SECRET not set, payment webhooks will be refused");
    }

    let bind = (config.bind_addr.clone(), config.port);
    log::info!("listening on {}:{}", bind.0, bind.1);

    let state = web::Data::new(AppState {
        pool,
        config: Arc::new(config),
        vision,
        http: reqwest::Client::new(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // Public routes; registered before the /api scope so the scope does not shadow them
            .service(api::auth::register)
            .service(api::auth::login)
            .service(api::webhooks::dodo_webhook)
            .service(api::webhooks::dodo_webhook_alias)
            .service(api::debug::payment_debug)
            // Protected routes
            .service(
                web::scope("/api")
                    .wrap(api::auth::JwtMiddleware)
                    .service(api::subscriptions::get_subscription)
                    .service(api::subscriptions::cancel_subscription)
                    .service(api::subscriptions::reactivate_subscription)
                    .service(api::subscriptions::subscription_history)
                    .service(api::payments::create_payment_session)
                    .service(api::payments::confirm_payment)
                    .service(api::analyses::analyze)
                    .service(api::analyses::list_analyses)
                    .service(api::profile::get_profile)
                    .service(api::profile::update_profile),
            )
    })
    .bind(bind)?
    .run()
    .await
}
