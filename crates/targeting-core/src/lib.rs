pub mod error;
pub mod types;

pub use error::TargetingError;
pub use types::*;
