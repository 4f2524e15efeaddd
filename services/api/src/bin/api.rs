//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiReasoningAdapter, PgRetrievalAdapter},
    config::Config,
    error::ApiError,
    web::{router, AppState, ApiDoc},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_core::TutorService;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let reasoning = Arc::new(OpenAiReasoningAdapter::new(&config.reasoning));
    if reasoning.credential_count() == 0 {
        warn!("No OPENAI_API_KEYS configured; every reasoning step will use its fallback.");
    } else {
        info!(
            credentials = reasoning.credential_count(),
            model = %config.reasoning.model,
            "Reasoning adapter ready."
        );
    }
    let retrieval = Arc::new(PgRetrievalAdapter::new(db_pool));

    // --- 4. Build the Shared AppState ---
    let tutor = TutorService::new(
        db_adapter.clone(),
        reasoning,
        retrieval,
        db_adapter,
        config.tutor.clone(),
    );
    let app_state = Arc::new(AppState::new(tutor));

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
