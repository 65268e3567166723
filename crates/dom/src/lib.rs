//! Typed CDP payloads for frame resolution
//!
//! Pure data, no I/O. The connection layer hands us `serde_json::Value`
//! results and gets back plain structs with explicit optional fields.
//!
//! ## Core Design
//!
//! ```text
//! CDP JSON → typed result (NodeDescription, TargetInfo, ...)
//! Page.getFrameTree → FrameArena (flat Vec) → index-based queries
//!                          ↓
//!                    FrameIndex (u32)
//! ```

pub mod arena;
pub mod error;
pub mod types;

pub use arena::{FrameArena, FrameEntry, FrameIndex};
pub use error::{DomError, Result};
pub use types::*;
