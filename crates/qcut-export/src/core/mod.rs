//! QCut Export Core
//!
//! Timeline export engine: source resolution, filter graph compilation,
//! encoder orchestration and per-frame effect processing.

pub mod effects;
pub mod ffmpeg;
pub mod filters;
pub mod fs;
pub mod process;
pub mod render;
pub mod session;
pub mod settings;
pub mod sources;
pub mod text;
pub mod timeline;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_scenarios;
