pub mod docker;
pub mod readiness;

pub use docker::*;
pub use readiness::*;
