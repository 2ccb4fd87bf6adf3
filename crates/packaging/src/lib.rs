pub mod cache;
pub mod context;
pub mod dockerfile;
pub mod image_builder;
pub mod provision;
pub mod service;

pub use cache::*;
pub use context::*;
pub use dockerfile::*;
pub use image_builder::*;
pub use provision::*;
pub use service::*;
