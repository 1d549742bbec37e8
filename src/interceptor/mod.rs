// Persistence hooks that keep tenant enforcement in step with the session

pub mod pipeline;
pub mod traits;
pub mod transaction_usage;
pub mod write_promotion;

pub use pipeline::InterceptorPipeline;
pub use traits::{Interceptor, InterceptorBox, SaveChangesInterceptor, TransactionInterceptor};
pub use transaction_usage::TransactionUsageInterceptor;
pub use write_promotion::WritePromotionInterceptor;
