//! Element Handle - a remote DOM object plus where it lives
//!
//! Each handle owns its frame context slot. An iframe fills the slot on first
//! resolution; an element found inside a resolved frame starts with the frame's
//! context; a nested iframe found there starts with routing only.

use std::fmt;
use std::sync::Arc;

use devtools_dom::types::is_frame_owner_tag;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cdp::protocol::{CDPRequest, RemoteObjectId};
use crate::error::{CDPError, Result};
use crate::frames::{FrameContext, FrameContextResolver, FrameRouting};
use crate::router::{Route, RouteSource};
use crate::session::BrowserSession;

pub struct ElementHandle {
    session: Arc<BrowserSession>,
    object_id: RemoteObjectId,
    node_name: String,

    /// Inherited from the enclosing frame, consulted until this handle resolves
    routing: Option<FrameRouting>,

    frame_context: RwLock<Option<Arc<FrameContext>>>,

    /// Serializes resolution so concurrent callers share one pipeline run
    resolving: Mutex<()>,
}

impl ElementHandle {
    pub(crate) fn new(session: Arc<BrowserSession>, object_id: RemoteObjectId, node_name: String) -> Self {
        Self {
            session,
            object_id,
            node_name,
            routing: None,
            frame_context: RwLock::new(None),
            resolving: Mutex::new(()),
        }
    }

    /// Nested iframe found inside a resolved frame
    pub fn with_routing(
        session: Arc<BrowserSession>,
        object_id: RemoteObjectId,
        node_name: String,
        routing: FrameRouting,
    ) -> Self {
        Self {
            routing: Some(routing),
            ..Self::new(session, object_id, node_name)
        }
    }

    /// Plain element found inside a resolved frame
    ///
    /// Also keeps the frame's routing, so the element never falls back to the
    /// top-level connection.
    pub fn with_context(
        session: Arc<BrowserSession>,
        object_id: RemoteObjectId,
        node_name: String,
        context: Arc<FrameContext>,
    ) -> Self {
        let handle = Self::with_routing(session, object_id, node_name, context.routing_for_children());
        handle.cache_frame_context(context);
        handle
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    pub fn routing(&self) -> Option<&FrameRouting> {
        self.routing.as_ref()
    }

    pub fn is_iframe(&self) -> bool {
        is_frame_owner_tag(&self.node_name)
    }

    /// Cached context, without resolving
    pub fn frame_context(&self) -> Option<Arc<FrameContext>> {
        self.frame_context.read().clone()
    }

    /// Drop the cached context so the next use re-resolves
    ///
    /// Only iframes can re-resolve; other elements keep the context they were
    /// created with. Returns whether a context was dropped.
    pub fn invalidate_frame_context(&self) -> bool {
        if !self.is_iframe() {
            return false;
        }
        self.frame_context.write().take().is_some()
    }

    pub(crate) fn cache_frame_context(&self, context: Arc<FrameContext>) {
        *self.frame_context.write() = Some(context);
    }

    /// Route of the document this element sits in, ignoring its own context
    pub(crate) fn base_route(&self) -> Route {
        let root = self.session.client().clone();
        match &self.routing {
            Some(routing) => Route {
                connection: routing.session_handler.clone().unwrap_or(root),
                session_id: routing.session_id.clone(),
                source: RouteSource::Inherited,
            },
            None => Route::root(root),
        }
    }

    /// Resolve (or read) this iframe's frame context
    ///
    /// A successful result is cached; later calls issue no commands. Failures
    /// are not cached.
    pub async fn resolve_frame_context(&self) -> Result<Arc<FrameContext>> {
        if let Some(context) = self.frame_context() {
            return Ok(context);
        }

        let _guard = self.resolving.lock().await;
        if let Some(context) = self.frame_context() {
            return Ok(context);
        }
        if !self.is_iframe() {
            return Err(CDPError::invalid_frame(format!(
                "{} is not a frame owner",
                self.node_name
            )));
        }

        let context = Arc::new(FrameContextResolver::new(self).resolve().await?);
        self.cache_frame_context(context.clone());
        Ok(context)
    }

    /// Run a command routed to wherever this element lives
    pub async fn execute(&self, command: CDPRequest) -> Result<Value> {
        self.session
            .router()
            .execute_scoped_command(self, command)
            .await
    }

    /// Wrap an object found inside this element's scope
    ///
    /// When this element is an iframe its context is resolved first. A nested
    /// iframe child receives routing only and resolves on first use; any other
    /// child shares the frame context.
    pub async fn adopt_child(
        &self,
        object_id: impl Into<RemoteObjectId>,
        node_name: impl Into<String>,
    ) -> Result<ElementHandle> {
        let object_id = object_id.into();
        let node_name = node_name.into();

        let scope = if self.is_iframe() {
            Some(self.resolve_frame_context().await?)
        } else {
            self.frame_context()
        };

        let child = match scope {
            Some(context) if is_frame_owner_tag(&node_name) => Self::with_routing(
                self.session.clone(),
                object_id,
                node_name,
                context.routing_for_children(),
            ),
            Some(context) => Self::with_context(self.session.clone(), object_id, node_name, context),
            None => match &self.routing {
                Some(routing) => Self::with_routing(self.session.clone(), object_id, node_name, routing.clone()),
                None => Self::new(self.session.clone(), object_id, node_name),
            },
        };
        Ok(child)
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementHandle")
            .field("object_id", &self.object_id)
            .field("node_name", &self.node_name)
            .field("routing", &self.routing)
            .field("frame_context", &self.frame_context())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::testing::{FakeBrowser, Reply};
    use serde_json::json;

    fn session() -> (FakeBrowser, Arc<BrowserSession>) {
        let page = FakeBrowser::new(|_| Reply::Result(json!({})));
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = BrowserSession::with_connectors(SessionConfig::default(), page.connector(), browser.connector());
        (page, session)
    }

    fn context(frame_id: &str) -> Arc<FrameContext> {
        Arc::new(FrameContext {
            frame_id: frame_id.into(),
            document_url: None,
            execution_context_id: Some(11),
            document_object_id: Some("doc".into()),
            session_handler: None,
            session_id: Some("S1".into()),
            target_id: Some("T1".into()),
        })
    }

    #[test]
    fn test_is_iframe() {
        let (_, session) = session();
        assert!(session.element("o", "IFRAME").is_iframe());
        assert!(session.element("o", "frame").is_iframe());
        assert!(!session.element("o", "DIV").is_iframe());
    }

    #[tokio::test]
    async fn test_non_frame_without_context_is_invalid() {
        let (page, session) = session();
        let err = tokio_test::assert_err!(session.element("o", "DIV").resolve_frame_context().await);
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
        assert_eq!(page.total_commands(), 0);
    }

    #[tokio::test]
    async fn test_adopt_child_from_resolved_frame() {
        let (page, session) = session();
        let parent = ElementHandle::with_context(session.clone(), "o".into(), "DIV".into(), context("F1"));

        let plain = parent.adopt_child("c1", "SPAN").await.unwrap();
        assert_eq!(plain.frame_context().unwrap().frame_id, "F1");
        assert_eq!(plain.routing().unwrap().session_id.as_deref(), Some("S1"));

        let nested = parent.adopt_child("c2", "IFRAME").await.unwrap();
        assert!(nested.frame_context().is_none());
        let routing = nested.routing().unwrap();
        assert_eq!(routing.parent_frame_id.as_deref(), Some("F1"));
        assert_eq!(routing.session_id.as_deref(), Some("S1"));

        assert_eq!(page.total_commands(), 0);
    }

    #[tokio::test]
    async fn test_adopt_child_at_top_level() {
        let (_, session) = session();
        let parent = session.element("o", "BODY");
        let child = parent.adopt_child("c", "IFRAME").await.unwrap();
        assert!(child.routing().is_none());
        assert!(child.frame_context().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_only_drops_iframe_contexts() {
        let (_, session) = session();

        let button = ElementHandle::with_context(session.clone(), "o".into(), "BUTTON".into(), context("F1"));
        assert!(!button.invalidate_frame_context());
        assert_eq!(button.frame_context().unwrap().frame_id, "F1");

        let iframe = session.element("f", "IFRAME");
        iframe.cache_frame_context(context("F2"));
        assert!(iframe.invalidate_frame_context());
        assert!(!iframe.invalidate_frame_context());
        assert!(iframe.frame_context().is_none());
    }
}
