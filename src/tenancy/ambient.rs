//! Task-local slot holding the current request's guard.
//!
//! The slot travels with the task across `.await` points and is invisible to every other
//! task, so concurrent requests never see each other's guard. Interceptors fire deep in
//! the persistence layer and reach the guard through [`current`].

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tenancy::error::GuardError;
use crate::tenancy::guard::RequestGuard;

tokio::task_local! {
    static CURRENT_GUARD: Arc<dyn RequestGuard>;
}

/// Run `fut` with `guard` installed. The previous guard (if any) is current again once
/// `fut` completes or is dropped.
pub async fn scope<F>(guard: Arc<dyn RequestGuard>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_GUARD.scope(guard, fut).await
}

/// Synchronous counterpart of [`scope`]
pub fn sync_scope<R>(guard: Arc<dyn RequestGuard>, f: impl FnOnce() -> R) -> R {
    CURRENT_GUARD.sync_scope(guard, f)
}

/// The installed guard. Proceeding without one would skip tenant enforcement, so its
/// absence is an error.
pub fn current() -> Result<Arc<dyn RequestGuard>, GuardError> {
    CURRENT_GUARD
        .try_with(Arc::clone)
        .map_err(|_| GuardError::NoAmbientGuard)
}

pub fn is_available() -> bool {
    CURRENT_GUARD.try_with(|_| ()).is_ok()
}

/// Run `fut` after making sure the current guard holds a read transaction
pub async fn guarded_read<F, T, E>(cancel: &CancellationToken, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<GuardError>,
{
    current()?.ensure_read(cancel).await?;
    fut.await
}

/// Run `fut` after making sure the current guard holds a write transaction
pub async fn guarded_write<F, T, E>(cancel: &CancellationToken, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<GuardError>,
{
    current()?.ensure_write(cancel).await?;
    fut.await
}
