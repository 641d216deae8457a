use crate::domain::IngestionGateway;
use crate::http::{run_http_server, HttpServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// HTTP ingestion module, runnable as one runner process
pub struct IngestApi {
    gateway: Arc<IngestionGateway>,
    config: HttpServerConfig,
}

impl IngestApi {
    pub fn new(gateway: Arc<IngestionGateway>, config: HttpServerConfig) -> Self {
        debug!(port = config.port, "initializing ingest API module");
        Self { gateway, config }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { run_http_server(self.config, self.gateway, ctx).await })
    }
}
