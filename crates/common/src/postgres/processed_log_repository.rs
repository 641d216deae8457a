use crate::domain::{
    DomainError, DomainResult, ProcessedLogKey, ProcessedLogRepository, ProcessingRecord,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, instrument};

const SELECT_COLUMNS: &str = "tenant_id, log_id, text, source, received_at, modified_text, char_count, processed_at, status";

/// PostgreSQL unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE class 22 (data exception): the row itself can never be stored.
fn is_data_exception(code: &str) -> bool {
    code.starts_with("22")
}

fn record_from_row(row: &tokio_postgres::Row) -> DomainResult<ProcessingRecord> {
    let source: String = row.get(3);
    let status: String = row.get(8);

    Ok(ProcessingRecord {
        tenant_id: row.get(0),
        log_id: row.get(1),
        text: row.get(2),
        source: source.parse()?,
        received_at: row.get(4),
        modified_text: row.get(5),
        char_count: row.get(6),
        processed_at: row.get(7),
        status: status.parse()?,
    })
}

/// Tenant store backed by the `processed_logs` table.
///
/// `(tenant_id, log_id)` is the primary key, so a plain INSERT is the
/// atomic create-if-absent the processor relies on across instances.
#[derive(Clone)]
pub struct PostgresProcessedLogRepository {
    client: PostgresClient,
}

impl PostgresProcessedLogRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProcessedLogRepository for PostgresProcessedLogRepository {
    #[instrument(skip(self), fields(tenant_id = %key.tenant_id, log_id = %key.log_id))]
    async fn get_processed_log(
        &self,
        key: &ProcessedLogKey,
    ) -> DomainResult<Option<ProcessingRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM processed_logs WHERE tenant_id = $1 AND log_id = $2",
                    SELECT_COLUMNS
                ),
                &[&key.tenant_id, &key.log_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(tenant_id = %record.tenant_id, log_id = %record.log_id))]
    async fn create_processed_log(&self, record: &ProcessingRecord) -> DomainResult<()> {
        let document_path = record.key().document_path();
        debug!(document_path = %document_path, "inserting processed log");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let result = conn
            .execute(
                "INSERT INTO processed_logs (tenant_id, log_id, document_path, text, source, received_at, modified_text, char_count, processed_at, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &record.tenant_id,
                    &record.log_id,
                    &document_path,
                    &record.text,
                    &record.source.as_str(),
                    &record.received_at,
                    &record.modified_text,
                    &record.char_count,
                    &record.processed_at,
                    &record.status.as_str(),
                ],
            )
            .await;

        if let Err(e) = result {
            if let Some(db_err) = e.as_db_error() {
                let code = db_err.code().code();
                if code == UNIQUE_VIOLATION {
                    return Err(DomainError::ProcessedLogAlreadyExists(document_path));
                }
                if is_data_exception(code) {
                    return Err(DomainError::PermanentProcessingDefect(format!(
                        "{} rejected by store ({}): {}",
                        document_path,
                        code,
                        db_err.message()
                    )));
                }
            }
            return Err(DomainError::RepositoryError(e.into()));
        }

        debug!(document_path = %document_path, "processed log committed");
        Ok(())
    }
}
