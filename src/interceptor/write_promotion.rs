use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::database::session::DbSession;
use crate::interceptor::traits::{Interceptor, SaveChangesInterceptor};
use crate::tenancy::{ambient, GuardError};

/// Promotes the current request's guard to a write transaction before a flush
pub struct WritePromotionInterceptor;

impl Interceptor for WritePromotionInterceptor {
    fn name(&self) -> &'static str {
        "write_promotion"
    }

    fn priority(&self) -> u8 {
        10
    }
}

#[async_trait]
impl SaveChangesInterceptor for WritePromotionInterceptor {
    async fn saving_changes(&self, _session: &dyn DbSession, cancel: &CancellationToken) -> Result<(), GuardError> {
        ambient::current()?.ensure_write(cancel).await
    }
}
