pub mod cost;
pub mod evolution;
pub mod migrate;
pub mod transaction;

mod error;

pub use error::{Error, Result};
