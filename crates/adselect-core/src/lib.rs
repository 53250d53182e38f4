pub mod config;
pub mod error;
pub mod types;

pub use config::AdSelectConfig;
pub use error::{AdSelectError, Result};
pub use types::*;
