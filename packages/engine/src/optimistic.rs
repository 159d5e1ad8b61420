//! Optimistic concurrency: load, compute, conditional write, retry on conflict.

use std::future::Future;

use crate::{EngineError, EngineResult};

/// Run `attempt` until it reports a winning write.
///
/// Each attempt reloads the record, recomputes and performs a conditional
/// write on `lock_version`, returning `Ok(None)` when another writer got there
/// first. After `retries` reloads the entity is considered stale.
pub async fn retry_on_conflict<T, F, Fut>(
    entity: &str,
    retries: u32,
    mut attempt: F,
) -> EngineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<Option<T>>>,
{
    let attempts = retries.saturating_add(1);
    for n in 1..=attempts {
        if let Some(value) = attempt(n).await? {
            return Ok(value);
        }
        tracing::debug!("Conflicting write on {} (attempt {}/{})", entity, n, attempts);
    }

    Err(EngineError::StaleObject {
        entity: entity.to_string(),
        attempts,
    })
}
