pub mod context;

pub use context::DataContext;
