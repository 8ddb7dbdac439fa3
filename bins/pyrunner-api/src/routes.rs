// HTTP routing, CORS and body limits for the pyrunner API

use crate::handlers;
use crate::AppState;
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use pyrunner_common::config::RunnerConfig;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

fn cors_layer(config: &RunnerConfig) -> Result<CorsLayer> {
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true))
}

pub fn routes(config: &RunnerConfig) -> Result<Router<Arc<AppState>>> {
    Ok(Router::new()
        .route("/health", get(handlers::health_check))
        .route("/formats", get(handlers::formats))
        .route("/execute", post(handlers::execute_multipart))
        .route("/execute/json", post(handlers::execute_json))
        .layer(DefaultBodyLimit::max(config.max_request_bytes))
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http()))
}
