//! Category retrieval with retry and chunked streaming.

use crate::config::ExportConfig;
use clinexport_core::{
    AccessLevel, CategoryData, DataCategory, ExportError, Omission, OmissionReason, TimeRange,
    UserId,
};
use clinexport_storage::{ClinicalDataSource, StorageError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy from the export configuration.
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: config.retry_backoff(),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `op`, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry + 1 < self.attempts => {
                    let delay = self.delay(retry);
                    warn!("Transient failure reading {} ({}), retrying in {:?}", what, e, delay);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read one category. The estimate is checked against the memory ceiling
/// before any records are loaded; categories above the streaming threshold
/// are then read once and accumulated chunk by chunk.
pub async fn retrieve_category(
    source: &dyn ClinicalDataSource,
    user_id: &UserId,
    category: DataCategory,
    range: &TimeRange,
    access_level: AccessLevel,
    config: &ExportConfig,
) -> Result<CategoryData, StorageError> {
    let retry = RetryPolicy::from_config(config);
    let what = category.as_str();
    let ceiling = config.memory_ceiling_bytes;

    let estimate = retry
        .run(what, move || source.estimate_category(user_id, category, range, access_level))
        .await?;
    if estimate.bytes > ceiling {
        warn!("{} estimated at {} bytes, above the memory ceiling", what, estimate.bytes);
        return Err(ceiling_error(category, ceiling));
    }

    if estimate.records <= config.streaming_threshold {
        let data = retry
            .run(what, move || source.fetch_category(user_id, category, range, access_level))
            .await?;
        check_ceiling(&data, ceiling, category)?;
        return Ok(data);
    }

    let chunk_size = config.chunk_size.max(1);
    debug!(
        "Streaming {} (~{} records) in chunks of {}",
        what, estimate.records, chunk_size
    );
    retry
        .run(what, move || async move {
            let mut data = CategoryData::empty(category);
            let mut held = 0usize;
            let mut sink = |chunk: CategoryData| -> Result<(), StorageError> {
                held += serialized_size(&chunk)?;
                if held > ceiling {
                    return Err(ceiling_error(category, ceiling));
                }
                data.extend(chunk).map_err(|_| {
                    StorageError::Other(format!(
                        "adapter returned a chunk of the wrong category while reading {}",
                        what
                    ))
                })
            };
            source
                .stream_category(user_id, category, range, access_level, chunk_size, &mut sink)
                .await?;
            Ok(data)
        })
        .await
}

fn serialized_size(data: &CategoryData) -> Result<usize, StorageError> {
    Ok(serde_json::to_vec(data)?.len())
}

fn check_ceiling(
    data: &CategoryData,
    ceiling: usize,
    category: DataCategory,
) -> Result<(), StorageError> {
    if serialized_size(data)? > ceiling {
        return Err(ceiling_error(category, ceiling));
    }
    Ok(())
}

fn ceiling_error(category: DataCategory, ceiling: usize) -> StorageError {
    StorageError::Other(format!(
        "{} exceeds the {} byte memory ceiling; narrow the time range",
        category, ceiling
    ))
}

/// Collected per-category reads.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Payloads read
    pub datasets: Vec<CategoryData>,
    /// Categories the access gate refused
    pub omissions: Vec<Omission>,
}

impl RetrievalOutcome {
    /// Record the result of one category read. An access-gate refusal on
    /// crisis history becomes an omission; any other failure aborts.
    pub fn record(
        &mut self,
        category: DataCategory,
        result: Result<CategoryData, StorageError>,
    ) -> Result<(), ExportError> {
        match result {
            Ok(data) => {
                self.datasets.push(data);
                Ok(())
            }
            Err(StorageError::AccessDenied { .. }) if category == DataCategory::CrisisSafety => {
                warn!("Crisis history omitted: access denied");
                self.omissions.push(Omission {
                    category,
                    reason: OmissionReason::AccessDenied,
                });
                Ok(())
            }
            Err(e) => Err(ExportError::Storage {
                category,
                message: e.to_string(),
            }),
        }
    }
}
