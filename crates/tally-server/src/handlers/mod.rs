//! HTTP request handlers organized by domain

pub mod ask;
pub mod insights;
pub mod report;
pub mod status;
pub mod sync;

pub use ask::*;
pub use insights::*;
pub use report::*;
pub use status::*;
pub use sync::*;
