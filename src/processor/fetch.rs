//! Bulk-data retrieval with capped exponential backoff.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::annotation::{BulkDataReference, PayloadSource};
use crate::config::RetryConfig;
use crate::error::FetchError;

/// Client for retrieving out-of-line binary payloads from the archive.
///
/// Implementations classify their failures through [`FetchError`]; only
/// transient variants (connection, timeout, server 5xx) are retried.
#[async_trait]
pub trait BulkDataClient: Send + Sync {
    /// Retrieve the payload addressed by a bulk data reference.
    async fn retrieve_bulk_data(&self, reference: &BulkDataReference) -> Result<Bytes, FetchError>;
}

/// Retrieve a payload, retrying transient failures with capped exponential
/// backoff.
pub async fn fetch_with_retry(
    client: &dyn BulkDataClient,
    reference: &BulkDataReference,
    retry: &RetryConfig,
) -> Result<Bytes, FetchError> {
    let attempts = retry.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = retry.delay_for_retry(attempt - 1);
            debug!(uri = %reference.uri, attempt, ?delay, "backing off before retry");
            tokio::time::sleep(delay).await;
        }

        match client.retrieve_bulk_data(reference).await {
            Ok(bytes) => {
                debug!(uri = %reference.uri, size = bytes.len(), "bulk data retrieved");
                return Ok(bytes);
            }
            Err(error) if error.is_transient() && attempt + 1 < attempts => {
                warn!(uri = %reference.uri, attempt, %error, "transient fetch failure");
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    // Loop always returns before exhausting `attempts` unless every attempt
    // failed transiently.
    Err(last_error.unwrap_or_else(|| FetchError::Connection("no fetch attempts made".into())))
}

/// Materialize a payload source: inline bytes directly, bulk references
/// through the client with retry.
pub async fn resolve_payload(
    client: &dyn BulkDataClient,
    source: &PayloadSource,
    retry: &RetryConfig,
) -> Result<Bytes, FetchError> {
    match source {
        PayloadSource::Inline(bytes) => Ok(bytes.clone()),
        PayloadSource::Bulk(reference) => fetch_with_retry(client, reference, retry).await,
    }
}
