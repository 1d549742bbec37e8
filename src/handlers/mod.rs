pub mod health;
pub mod session;

pub use health::health;
pub use session::session_info;
