pub mod sqlite_store;
pub mod store;

pub use sqlite_store::*;
pub use store::*;
