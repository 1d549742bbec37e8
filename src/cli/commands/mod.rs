pub mod config;
pub mod rls;
pub mod token;
