//! Timeline Module
//!
//! Read-only timeline and media catalog consumed by the export pipeline.

mod models;

pub use models::*;
