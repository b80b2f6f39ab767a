//! reportd-hooks: Event-driven hook system.
//!
//! Hooks observe scheduler lifecycle events (start/stop, job changes,
//! finished runs) and can execute custom logic such as audit logging.

pub mod events;
pub mod registry;

pub use events::HookEvent;
pub use registry::{HookHandler, HookRegistry};
