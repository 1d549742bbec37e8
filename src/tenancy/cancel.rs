use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::database::manager::DatabaseError;
use crate::tenancy::error::GuardError;

/// Run a database call, giving up as soon as the token is cancelled
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GuardError::Cancelled),
        result = fut => result.map_err(GuardError::from),
    }
}
