//! Configuration and dependency wiring.

mod dependencies;
mod settings;

pub use dependencies::{Dependencies, ExitFailureHook};
pub use settings::{Settings, ShardBackend};
