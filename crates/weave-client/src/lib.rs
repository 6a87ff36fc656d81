//! Minimal W&B Weave trace-server client for weaverun.

mod client;
mod project;

pub use client::{CallRecord, WeaveClient, WeaveError};
pub use project::resolve_project;
