pub mod context;
pub mod error;
pub mod reconciler;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{error_policy, reconcile};
