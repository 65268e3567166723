//! Session Router
//!
//! Decides which (connection, session id) pair carries an element's commands:
//! the element's resolved frame context first, then routing inherited from an
//! enclosing frame, then the tab's root connection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cdp::protocol::{CDPRequest, SessionId};
use crate::cdp::CDPClient;
use crate::element::ElementHandle;
use crate::error::Result;

/// Where a route came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// The element's cached FrameContext
    FrameContext,
    /// Routing handed down from the frame the element was found in
    Inherited,
    /// Top-level document
    Root,
}

/// Connection and optional session id for one command
#[derive(Debug, Clone)]
pub struct Route {
    pub connection: Arc<CDPClient>,
    pub session_id: Option<SessionId>,
    pub source: RouteSource,
}

impl Route {
    pub fn root(connection: Arc<CDPClient>) -> Self {
        Self {
            connection,
            session_id: None,
            source: RouteSource::Root,
        }
    }

    /// Put this route's session id on the command, if there is one
    pub fn stamp(&self, command: CDPRequest) -> CDPRequest {
        match &self.session_id {
            Some(session_id) => command.with_session(Some(session_id.clone())),
            None => command,
        }
    }

    pub async fn send(&self, command: CDPRequest, timeout: Duration) -> Result<Value> {
        self.connection
            .execute_command(self.stamp(command), timeout)
            .await
    }
}

/// Routes element-scoped commands
#[derive(Debug, Clone)]
pub struct SessionRouter {
    timeout: Duration,
}

impl SessionRouter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn resolve_routing(&self, handle: &ElementHandle) -> Route {
        match handle.frame_context() {
            Some(context) => Route {
                connection: context
                    .session_handler
                    .clone()
                    .unwrap_or_else(|| handle.session().client().clone()),
                session_id: context.session_id.clone(),
                source: RouteSource::FrameContext,
            },
            None => handle.base_route(),
        }
    }

    /// Run a command where the element lives
    ///
    /// A failure through an iframe's cached frame context drops that context,
    /// so the next use re-resolves instead of reusing a dead session. Elements
    /// inside a frame keep their context and stay on the frame's session.
    pub async fn execute_scoped_command(&self, handle: &ElementHandle, command: CDPRequest) -> Result<Value> {
        let route = self.resolve_routing(handle);
        let method = command.method.clone();

        match route.send(command, self.timeout).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if route.source == RouteSource::FrameContext && handle.invalidate_frame_context() {
                    tracing::warn!(%method, error = %e, "Scoped command failed, frame context invalidated");
                }
                Err(e)
            }
        }
    }
}
