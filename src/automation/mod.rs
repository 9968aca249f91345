//! Serialized execution of desktop actions

pub mod error;
pub mod queue;

pub use error::{AutomationError, AutomationResult};
pub use queue::{AutomationQueue, STOP_ALL_MESSAGE};
