//! Process wiring for the orchestrator and its webhook endpoint.

use crate::models::{Config, ProviderKind, ProviderSettings};
use crate::orchestrator::{JobOrchestrator, DEFAULT_JOB_RETENTION};
use crate::polling::PollConfig;
use crate::provider::{
    GeminiImageAdapter, LeonardoImageAdapter, ProviderAdapter, RunwareImageAdapter,
};
use crate::store::{JobStore, MemoryJobStore};
use crate::webhook::{self, WebhookReceiver};
use crate::Result;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Orchestrator plus the HTTP surface that feeds it provider callbacks.
pub struct App {
    orchestrator: JobOrchestrator,
    receiver: WebhookReceiver,
    listen_addr: SocketAddr,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub store: Arc<dyn JobStore>,
    pub webhook_secrets: HashMap<ProviderKind, String>,
    pub job_retention: Duration,
}

impl AppServices {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, store: Arc<dyn JobStore>) -> Self {
        Self {
            adapters,
            store,
            webhook_secrets: HashMap::new(),
            job_retention: DEFAULT_JOB_RETENTION,
        }
    }
}

impl App {
    /// Build an app from concrete service dependencies.
    pub fn with_services(
        services: AppServices,
        poll: PollConfig,
        listen_addr: SocketAddr,
    ) -> Result<Self> {
        let orchestrator = JobOrchestrator::new(services.adapters, services.store, poll)?
            .with_job_retention(services.job_retention);
        let receiver = services
            .webhook_secrets
            .into_iter()
            .fold(WebhookReceiver::new(orchestrator.clone()), |receiver, (provider, secret)| {
                receiver.with_secret(provider, secret)
            });

        Ok(Self {
            orchestrator,
            receiver,
            listen_addr,
        })
    }

    /// One adapter per provider with an API key in `config`.
    pub fn build_adapters(config: &Config, http_client: reqwest::Client) -> Vec<Arc<dyn ProviderAdapter>> {
        fn with_base<A>(adapter: A, settings: &ProviderSettings, apply: fn(A, String) -> A) -> A {
            match &settings.base_url {
                Some(base_url) => apply(adapter, base_url.clone()),
                None => adapter,
            }
        }

        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

        if let Some(settings) = &config.gemini {
            let adapter = GeminiImageAdapter::new_with_client(
                settings.api_key.clone(),
                settings.model.clone(),
                http_client.clone(),
            );
            adapters.push(Arc::new(with_base(adapter, settings, GeminiImageAdapter::with_base_url)));
        }
        if let Some(settings) = &config.runware {
            let adapter = RunwareImageAdapter::new_with_client(
                settings.api_key.clone(),
                settings.model.clone(),
                http_client.clone(),
            );
            adapters.push(Arc::new(with_base(adapter, settings, RunwareImageAdapter::with_base_url)));
        }
        if let Some(settings) = &config.leonardo {
            let adapter = LeonardoImageAdapter::new_with_client(
                settings.api_key.clone(),
                settings.model.clone(),
                http_client.clone(),
            );
            adapters.push(Arc::new(with_base(adapter, settings, LeonardoImageAdapter::with_base_url)));
        }

        for adapter in &adapters {
            info!("Image provider enabled: {}", adapter.kind());
        }
        adapters
    }

    /// Construct an app from a loaded configuration, with an in-memory store.
    pub fn from_config(config: Config) -> Result<Self> {
        // Reuse one HTTP connection pool across provider clients.
        let adapters = Self::build_adapters(&config, reqwest::Client::new());

        let mut webhook_secrets = HashMap::new();
        if let Some(secret) = config.leonardo_webhook_secret.clone() {
            webhook_secrets.insert(ProviderKind::Leonardo, secret);
        }

        Self::with_services(
            AppServices {
                adapters,
                store: Arc::new(MemoryJobStore::new()),
                webhook_secrets,
                job_retention: config.job_retention,
            },
            config.poll,
            config.listen_addr,
        )
    }

    /// Construct an app from environment configuration (`Config::from_env`).
    pub fn new() -> Result<Self> {
        Self::from_config(Config::from_env()?)
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn with_listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }

    pub fn router(&self) -> Router {
        webhook::router(self.receiver.clone())
    }

    /// Serve webhooks until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        info!("Listening for provider webhooks on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}
