//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init, sync, import, clear) and shared engine setup
//! - `ask` - Natural-language question command
//! - `reports` - Summary, insights, and report commands
//! - `serve` - API server command
//! - `status` - Database and engine status command

pub mod ask;
pub mod core;
pub mod reports;
pub mod serve;
pub mod status;

// Re-export command functions for main.rs
pub use ask::*;
pub use core::*;
pub use reports::*;
pub use serve::*;
pub use status::*;
