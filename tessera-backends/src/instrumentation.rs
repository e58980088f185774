use std::time::Instant;

use tessera_common::metrics::METRICS;
use tracing::{debug, warn};

use crate::{BackendError, BackendKind};

pub fn instrument_operation<F, T>(backend: BackendKind, operation: &str, f: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError>,
{
    let start = Instant::now();
    METRICS
        .backend_operations_total
        .with_label_values(&[backend.as_str(), operation])
        .inc();

    let result = f();
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => debug!(%backend, operation, ?elapsed, "Backend operation done"),
        Err(BackendError::Cancelled) => debug!(%backend, operation, "Backend operation cancelled"),
        Err(e) => warn!(%backend, operation, ?elapsed, "Backend operation failed: {e}"),
    }

    result
}
