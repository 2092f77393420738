//! Sample records and the append-only logs they are persisted to.

mod models;
mod store;

pub use models::*;
pub use store::*;
