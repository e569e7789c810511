//! tunebridge-transfer library interface
//!
//! Exposes the transfer engine and HTTP surface for the binary and for
//! integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod providers;
pub mod services;

pub use crate::error::{ApiError, ApiResult, ProviderError};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tunebridge_common::config::TransferConfig;

use api::services::PendingAuthorization;
use providers::ProviderRegistry;
use services::credentials::CredentialManager;
use services::http_client::{ResilientClient, RetryPolicy};
use services::rate_limiter::RateLimiter;
use services::transfer_orchestrator::TransferOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<TransferConfig>,
    /// Shared rate-limited client; owns the limiter and request metrics
    pub client: Arc<ResilientClient>,
    pub registry: ProviderRegistry,
    pub credentials: Arc<CredentialManager>,
    pub orchestrator: TransferOrchestrator,
    /// OAuth `state` values issued by `/services/connect`
    pub oauth_states: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the engine from a finalized configuration
    pub fn new(db: SqlitePool, config: TransferConfig) -> Result<Self, ProviderError> {
        let limiter = Arc::new(RateLimiter::from_config(
            &config.providers,
            config.retry.admission_timeout(),
        ));
        let client = Arc::new(ResilientClient::new(limiter, RetryPolicy::from(&config.retry))?);
        let registry = ProviderRegistry::from_config(&config.providers, client.clone());
        let credentials = Arc::new(CredentialManager::new(
            db.clone(),
            client.clone(),
            config.providers.clone(),
            registry.clone(),
        ));
        let orchestrator = TransferOrchestrator::new(db.clone(), registry.clone(), credentials.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            client,
            registry,
            credentials,
            orchestrator,
            oauth_states: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::transfer_routes())
        .merge(api::service_routes())
        .merge(api::debug_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
