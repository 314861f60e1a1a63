//! Shared types for the billing services
//!
//! Error system, billing domain enums and small time/ID utilities used by
//! every service crate in the workspace.

pub mod billing;
pub mod error;
pub mod util;

// Re-exports
pub use http;
pub use serde::{Deserialize, Serialize};
