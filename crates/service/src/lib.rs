pub mod payload;
pub mod submission;

pub use payload::*;
pub use submission::*;
