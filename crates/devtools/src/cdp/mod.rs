//! CDP (Chrome DevTools Protocol) Client Implementation
//!
//! Core principle: one transport per client, multiplexed sessions on top.
//! The receive loop only classifies and hands off - callbacks never block reads.

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{CDPClient, ClientOptions};
pub use commands::{CommandManager, PendingCommand};
pub use dispatcher::{CallbackId, CallbackResult, EventCallback, EventDispatcher};
pub use protocol::{CDPEvent, CDPMessage, CDPRequest, CDPResponse, ProtocolError};
pub use session::CDPSession;
pub use transport::{Connector, Transport, WebSocketConnector};
