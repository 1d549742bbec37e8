pub mod policy;

pub use policy::{PolicyScope, PolicyTable, RlsPolicy};
