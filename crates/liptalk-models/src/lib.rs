//! Shared data models for the LipTalk renderer.
//!
//! This crate provides Serde-serializable types for:
//! - Pixel-space rectangles (the animated mouth/chin region)
//! - Video/audio encoding configuration
//! - The render report describing which pipeline paths actually ran

pub mod encoding;
pub mod rect;
pub mod report;

// Re-export common types
pub use encoding::EncodingConfig;
pub use rect::PixelRect;
pub use report::{EnvelopeOrigin, RegionOrigin, RenderReport};
