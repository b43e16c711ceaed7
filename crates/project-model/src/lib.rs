//! Montage Project Model
//!
//! Defines the core data contracts for Montage exports:
//! - **Clips:** Trimmed source segments with speed and blur effects
//! - **Settings:** Output resolution, frame rate, format, and quality
//! - **Geometry:** Letterbox fitting and blur-region resolution
//! - **Project:** The JSON export manifest tying clips and settings together
//!
//! Blur regions are expressed in percentages of the displayed (letterboxed)
//! video area so they stay put when the output aspect ratio changes.

pub mod clip;
pub mod geometry;
pub mod project;
pub mod settings;

pub use clip::*;
pub use geometry::*;
pub use project::*;
pub use settings::*;
