//! Application startup and lifecycle management.
//!
//! Clients for the model, object storage and Secret Manager are built once
//! here and shared read-only by every request through [`AppState`].

use crate::config::{ChatConfig, StorageCredentials};
use crate::handlers;
use crate::services::google_auth::AccessTokenSource;
use crate::services::providers::gemini::{GeminiClient, GeminiConfig, GeminiEndpoint};
use crate::services::secrets::SecretManagerClient;
use crate::services::storage::{MemoryStorage, SupabaseStorage};
use crate::services::{ModelClient, ObjectStorage, RequestNormalizer, SecretAccessor};
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ChatConfig,
    pub model: Arc<dyn ModelClient>,
    pub storage: Arc<dyn ObjectStorage>,
    pub secrets: Arc<dyn SecretAccessor>,
    pub normalizer: RequestNormalizer,
}

impl AppState {
    pub fn new(
        config: ChatConfig,
        model: Arc<dyn ModelClient>,
        storage: Arc<dyn ObjectStorage>,
        secrets: Arc<dyn SecretAccessor>,
    ) -> Self {
        let normalizer =
            RequestNormalizer::new(storage.clone(), config.storage.default_bucket.clone());
        Self {
            config,
            model,
            storage,
            secrets,
            normalizer,
        }
    }

    /// Build the production clients described by `config`.
    pub async fn from_config(config: ChatConfig) -> Result<Self, AppError> {
        let upstream = config.upstream;

        let token_source = Arc::new(match &config.google.access_token {
            Some(token) => AccessTokenSource::Static(token.clone()),
            None => AccessTokenSource::metadata_server(upstream.connect_timeout)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        });

        let secrets: Arc<dyn SecretAccessor> = Arc::new(
            SecretManagerClient::new(
                token_source.clone(),
                config.google.project_id.clone(),
                upstream.connect_timeout,
                upstream.request_timeout,
            )
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        );

        let storage = build_storage(&config, secrets.as_ref()).await?;

        // Initialize Gemini model client
        let endpoint = match (&config.google.api_key, &config.google.project_id) {
            (Some(api_key), _) => GeminiEndpoint::GenerativeLanguage {
                api_key: api_key.clone(),
            },
            (None, Some(project_id)) => GeminiEndpoint::VertexAi {
                project_id: project_id.clone(),
                location: config.google.location.clone(),
            },
            (None, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Either GOOGLE_API_KEY or PROJECT_ID must be set"
                )))
            }
        };
        let model: Arc<dyn ModelClient> = Arc::new(
            GeminiClient::new(
                GeminiConfig {
                    endpoint,
                    base_url: config.google.base_url.clone(),
                    connect_timeout: upstream.connect_timeout,
                    request_timeout: upstream.request_timeout,
                },
                token_source,
            )
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        );

        tracing::info!(
            text_model = %config.models.text_model,
            image_model = %config.models.image_model,
            location = %config.google.location,
            "Initialized Gemini model client"
        );

        Ok(Self::new(config, model, storage, secrets))
    }
}

async fn build_storage(
    config: &ChatConfig,
    secrets: &dyn SecretAccessor,
) -> Result<Arc<dyn ObjectStorage>, AppError> {
    let (url, key) = match &config.storage.credentials {
        StorageCredentials::Direct { url, key } => (url.clone(), key.clone()),
        StorageCredentials::SecretManager {
            url_secret_id,
            key_secret_id,
        } => {
            let url = secrets.access_secret(url_secret_id).await.map_err(|e| {
                tracing::error!("Failed to resolve storage URL secret: {}", e);
                AppError::ConfigError(anyhow::anyhow!(e))
            })?;
            let key = secrets.access_secret(key_secret_id).await.map_err(|e| {
                tracing::error!("Failed to resolve storage key secret: {}", e);
                AppError::ConfigError(anyhow::anyhow!(e))
            })?;
            (url.expose_secret().clone(), key)
        }
        StorageCredentials::InMemory => {
            tracing::warn!("No storage credentials configured, using in-memory storage");
            return Ok(Arc::new(MemoryStorage::new()));
        }
    };

    let storage = SupabaseStorage::new(
        &url,
        key,
        config.upstream.connect_timeout,
        config.upstream.request_timeout,
    )
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

    tracing::info!(endpoint = %url, "Initialized storage client");
    Ok(Arc::new(storage))
}

fn cors_layer(config: &ChatConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Routes, CORS, request ids and HTTP tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(handlers::health_check))
        .route("/secretcheck", get(handlers::secret_check))
        .route("/chat/blurb", post(handlers::chat_blurb))
        .route("/chat/image", post(handlers::chat_image))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with production clients.
    pub async fn build(config: ChatConfig) -> Result<Self, AppError> {
        let state = AppState::from_config(config).await?;
        Self::build_with_state(state).await
    }

    /// Build the application around pre-built clients (port 0 = random port).
    pub async fn build_with_state(state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Chat service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}
