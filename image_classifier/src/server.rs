use crate::{
    config::{Config, ServerConfig},
    fetcher::ImageFetcher,
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::OrtModelService,
    preprocessing::PreprocessingPipeline,
    routes::api_routes,
    state::ClassLabelTable,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub inference_service: InferenceService<M>,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        inference_service: InferenceService<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            inference_service,
            metrics,
        };

        let router = api_routes::<M>()
            .with_state(app_state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        tracing::info!("Inference service listening on {}", self.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Inference service stopped");
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let ort_model_service = OrtModelService::new(&config.model)?;
    let class_labels = ClassLabelTable::from_config(&config.labels)?;
    let fetcher = ImageFetcher::new(&config.fetch)?;

    let inference_service = InferenceService::new(
        ort_model_service,
        PreprocessingPipeline::default(),
        class_labels,
        fetcher,
    );

    let server = HttpServer::new(inference_service, &config.server).await?;

    let shutdown = async {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown")
    };

    server.run(shutdown).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
