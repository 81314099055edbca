//! Effects System Module
//!
//! Visual effects attached to timeline elements and their FFmpeg filter mapping.

mod filter_builder;
mod models;

pub use filter_builder::{build_frame_chain, build_static_chain, needs_frame_processing};
pub use models::{Easing, Effect, EffectType, Keyframe, ParamValue};
