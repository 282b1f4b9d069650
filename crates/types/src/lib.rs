pub mod clock;
pub mod email;
pub mod record;
pub mod status;
pub mod submission;

pub use clock::*;
pub use email::*;
pub use record::*;
pub use status::*;
pub use submission::*;
