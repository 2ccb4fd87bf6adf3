pub mod config;
pub mod error;
pub mod recipe;

pub use config::*;
pub use error::*;
pub use recipe::*;
