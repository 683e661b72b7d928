//! Worker pool sizing and the semaphores that enforce it

use kiln_errors::Error;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Resolve `[build].jobs`; zero means three quarters of the CPUs
#[must_use]
pub fn calculate_build_jobs(configured: usize) -> usize {
    match configured {
        0 => (num_cpus::get() * 3 / 4).max(1),
        n => n,
    }
}

/// Pool semaphore; a request for zero permits still yields one
#[must_use]
pub fn create_semaphore(permits: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(permits.max(1)))
}

/// Wait for a slot in the pool
///
/// # Errors
///
/// Returns an internal error naming `purpose` if the pool was closed.
pub async fn acquire_semaphore_permit(
    semaphore: Arc<Semaphore>,
    purpose: &str,
) -> Result<OwnedSemaphorePermit, Error> {
    semaphore
        .acquire_owned()
        .await
        .map_err(|_| Error::internal(format!("worker pool closed while waiting for {purpose}")))
}
