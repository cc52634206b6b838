//! Generator trait.

use async_trait::async_trait;
use tally_core::{GeneratedResult, GenerationError, PeriodicPayload, UserId};

/// Something that can produce a user's result for the current period.
///
/// Implementations perform no retries; every failure is reported once and
/// the caller decides what to do with it.
#[async_trait]
pub trait ResultGenerator<T: PeriodicPayload>: Send + Sync {
    /// Fetch the user's current result, computing it if the service has none.
    ///
    /// With `force_refresh` the service recomputes unconditionally.
    async fn fetch_or_generate(
        &self,
        user_id: &UserId,
        force_refresh: bool,
    ) -> Result<GeneratedResult<T>, GenerationError>;
}
