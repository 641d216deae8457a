mod config;

use common::domain::ProcessedLogRepository;
use common::memory::InMemoryProcessedLogRepository;
use common::nats::NatsClient;
use common::postgres::{PostgresClient, PostgresProcessedLogRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use crate::config::{ServiceConfig, StoreBackend};
use goose::MigrationRunner;
use ingest_api::domain::IngestionGateway;
use ingest_api::ingest_api::IngestApi;
use ingest_api::nats::NatsEnvelopeProducer;
use ingest_runner::Runner;
use processor_worker::domain::{
    FaultInjectingStep, IdempotentProcessor, ProcessingStep, SimulatedWorkload,
};
use processor_worker::nats::NatsDeadLetterProducer;
use processor_worker::processor_worker::{
    ack_wait_covers, ProcessorWorker, ProcessorWorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        store_backend = ?config.store_backend,
        otel_enabled = config.otel_enabled,
        "Starting ingest-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (repository, nats_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    // Ingest side: HTTP -> normalizer -> envelope stream
    let envelope_producer = Arc::new(NatsEnvelopeProducer::new(
        nats_client.create_publisher_client(),
        config.nats_envelope_stream.clone(),
    ));
    let gateway = Arc::new(IngestionGateway::new(envelope_producer));
    let ingest_api = IngestApi::new(gateway, config.http_config());

    // Processing side: envelope stream -> idempotent processor -> tenant store
    let worst_case = SimulatedWorkload::new(config.processing_delay_per_char())
        .latency_for(config.max_text_chars());
    if !ack_wait_covers(config.ack_wait(), worst_case) {
        warn!(
            ack_wait_secs = config.ack_wait_secs,
            worst_case_processing_ms = worst_case.as_millis() as u64,
            "ack_wait does not cover worst-case processing of a max-size body; slow envelopes will be redelivered while in flight"
        );
    }

    let dead_letter_producer = Arc::new(NatsDeadLetterProducer::new(
        nats_client.create_publisher_client(),
        config.nats_dead_letter_stream.clone(),
    ));
    let processor = Arc::new(IdempotentProcessor::new(
        repository,
        build_processing_step(&config),
        dead_letter_producer,
    ));

    let processor_worker = match ProcessorWorker::new(
        processor,
        nats_client.create_consumer_client(),
        ProcessorWorkerConfig {
            envelope_stream: config.nats_envelope_stream.clone(),
            envelope_subject: config.nats_envelope_subject.clone(),
            consumer_name: config.nats_consumer_name.clone(),
            batch_size: config.nats_batch_size,
            batch_wait_secs: config.nats_batch_wait_secs,
            concurrency: config.processor_concurrency,
            ack_wait: config.ack_wait(),
            max_deliver: config.max_deliver,
            nak_delay: config.nak_delay(),
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize processor worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_app_process("ingest_api", ingest_api.into_runner_process())
        .with_app_process("processor_worker", processor_worker.into_runner_process())
        .with_closer("nats", move || async move {
            nats_client.close().await;
            anyhow::Ok(())
        })
        .with_closer("telemetry", move || async move {
            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            anyhow::Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

fn build_processing_step(config: &ServiceConfig) -> Arc<dyn ProcessingStep> {
    let workload: Arc<dyn ProcessingStep> =
        Arc::new(SimulatedWorkload::new(config.processing_delay_per_char()));

    if config.fault_injection_every_n > 0 {
        warn!(
            every_n = config.fault_injection_every_n,
            "fault injection enabled for the processing step"
        );
        return Arc::new(FaultInjectingStep::new(
            workload,
            config.fault_injection_every_n,
        ));
    }

    workload
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<dyn ProcessedLogRepository>, NatsClient)> {
    let repository: Arc<dyn ProcessedLogRepository> = match config.store_backend {
        StoreBackend::Postgres => {
            info!("Initializing PostgreSQL...");
            run_postgres_migrations(config).await?;
            let client = PostgresClient::new(&config.postgres_config())?;
            client.ping().await?;
            Arc::new(PostgresProcessedLogRepository::new(client))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; deduplication does not span processes");
            Arc::new(InMemoryProcessedLogRepository::new())
        }
    };

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    nats_client
        .ensure_stream(&config.nats_envelope_stream, "Normalized log envelopes")
        .await?;
    nats_client
        .ensure_stream(
            &config.nats_dead_letter_stream,
            "Envelopes that can never be processed",
        )
        .await?;

    Ok((repository, nats_client))
}

async fn run_postgres_migrations(config: &ServiceConfig) -> anyhow::Result<()> {
    let postgres = config.postgres_config();
    let runner = MigrationRunner::new(
        postgres.goose_binary_path.clone(),
        postgres.migrations_dir.clone(),
        "postgres",
        postgres.goose_dsn(),
    );
    runner.run_migrations().await
}
