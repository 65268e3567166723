//! Iframe resolution
//!
//! Turns an iframe element handle into a [`FrameContext`]: the frame id, the
//! connection and session that reach it, and an isolated world to run in.

pub mod context;
pub mod resolver;

pub use context::{FrameContext, FrameRouting};
pub use resolver::FrameContextResolver;
