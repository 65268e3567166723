//! DevTools protocol client
//!
//! Talks the browser remote-debugging protocol over one duplex transport per
//! endpoint, and works out where an iframe's document lives, including frames
//! rendered in another process and reachable only through an attached target.
//!
//! # Layers
//!
//! 1. **cdp**: transport, request/response correlation, ordered event dispatch
//! 2. **session / router**: which connection and session id carry an element's commands
//! 3. **frames**: resolving an iframe element into a cached [`FrameContext`]
//!
//! ```no_run
//! # async fn demo() -> devtools::Result<()> {
//! use devtools::{BrowserSession, SessionConfig};
//!
//! let session = BrowserSession::new(
//!     SessionConfig::new("ws://localhost:9222/devtools/page/ABC")
//!         .with_browser_url("ws://localhost:9222/devtools/browser/XYZ"),
//! )?;
//! let iframe = session.element("remote-object-id", "IFRAME");
//! let context = iframe.resolve_frame_context().await?;
//! println!("frame {} via session {:?}", context.frame_id, context.session_id);
//! # Ok(())
//! # }
//! ```

pub mod cdp;
pub mod element;
pub mod error;
pub mod events;
pub mod frames;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cdp::{CDPClient, CDPSession, ClientOptions, Connector, WebSocketConnector};
pub use element::ElementHandle;
pub use error::{CDPError, Result};
pub use events::{ConnectionEvent, EventBus};
pub use frames::{FrameContext, FrameContextResolver, FrameRouting};
pub use router::{Route, RouteSource, SessionRouter};
pub use session::{BrowserSession, SessionConfig};
