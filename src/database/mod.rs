pub mod backend;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod provider;
pub mod session;

pub use backend::SessionBackend;
pub use manager::{DatabaseError, DatabaseManager};
pub use memory::{FaultPoint, JournalEntry, MemoryDatabase, MemorySession};
pub use postgres::PgSession;
pub use provider::{DatabaseCapability, DatabaseProvider};
pub use session::{DbSession, SqlValue, Statement, TransactionId};
