//! Frame Context Resolver
//!
//! Finds an iframe's frame id and the route that reaches its document, then
//! creates an isolated world there and pins `document.documentElement`.
//!
//! ```text
//! DOM.describeNode ── contentDocument.frameId ───────────────┐
//!      │ none                                                 │ same process
//! Page.getFrameTree + DOM.getFrameOwner ── owner matches ─────┤
//!      │ none                                                 │
//! browser connection: getTargets / attach / getFrameTree ─────┤ out of process
//!      │ none                                                 ▼
//!   InvalidFrame                      Page.createIsolatedWorld + Runtime.evaluate
//! ```
//!
//! Target records are re-read on every attempt, never cached. Nothing here is
//! revalidated after success: a navigated frame surfaces as a command failure,
//! which drops the cached context (see SessionRouter).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use devtools_dom::types::{
    execution_context_id, BackendNodeId, FrameOwner, NodeDescription, RemoteObject, TargetInfo,
};
use devtools_dom::FrameArena;
use futures_util::future::join_all;
use serde_json::json;

use super::context::FrameContext;
use crate::cdp::protocol::{CDPRequest, FrameId, RemoteObjectId, TargetId};
use crate::cdp::{CDPClient, CDPSession};
use crate::element::ElementHandle;
use crate::error::{CDPError, Result};
use crate::router::{Route, RouteSource};

const DOCUMENT_ELEMENT: &str = "document.documentElement";

/// Errors that rule out one candidate without ending the search
fn is_rejection(error: &CDPError) -> bool {
    matches!(
        error,
        CDPError::CommandFailed { .. } | CDPError::Dom(_) | CDPError::Json(_)
    )
}

/// Where the frame was found
struct FrameMatch {
    frame_id: FrameId,
    url: Option<String>,
    /// Target session, for frames in another process
    session: Option<CDPSession>,
}

/// A target attached on the browser connection, with its frame tree
struct TargetProbe {
    session: CDPSession,
    arena: FrameArena,
    root_checked: bool,
}

impl TargetProbe {
    fn target_id(&self) -> &TargetId {
        &self.session.target_id
    }
}

/// One resolution attempt for one iframe element
pub struct FrameContextResolver<'a> {
    handle: &'a ElementHandle,
    /// Route of the document holding the element
    route: Route,
    timeout: Duration,
}

impl<'a> FrameContextResolver<'a> {
    pub fn new(handle: &'a ElementHandle) -> Self {
        Self {
            route: handle.base_route(),
            timeout: handle.session().config.scoped_command_timeout(),
            handle,
        }
    }

    pub async fn resolve(&self) -> Result<FrameContext> {
        let node = self.describe_node().await?;
        let backend_node_id = node.backend_node_id;
        let parent_frame_id = node.frame_id.clone().or_else(|| {
            self.handle
                .routing()
                .and_then(|routing| routing.parent_frame_id.clone())
        });

        let found = match node.content_frame_id() {
            Some(frame_id) => {
                tracing::debug!(frame_id, "Frame id from node description");
                FrameMatch {
                    frame_id: frame_id.to_string(),
                    url: None,
                    session: None,
                }
            }
            None => match self.match_frame_owner(backend_node_id).await? {
                Some(found) => found,
                None => {
                    self.find_out_of_process(backend_node_id, parent_frame_id.as_deref())
                        .await?
                }
            },
        };

        let document_url = node.content_document_url().map(str::to_string).or(found.url);
        let (route, session_handler, target_id) = match found.session {
            Some(session) => {
                let connection = session.client().clone();
                let route = Route {
                    connection: connection.clone(),
                    session_id: Some(session.session_id.clone()),
                    source: RouteSource::FrameContext,
                };
                (route, Some(connection), Some(session.target_id))
            }
            None => {
                let session_handler = match self.route.source {
                    RouteSource::Root => None,
                    _ => Some(self.route.connection.clone()),
                };
                (self.route.clone(), session_handler, None)
            }
        };

        let prepared = async {
            let execution_context_id = self.create_isolated_world(&route, &found.frame_id).await?;
            let document_object_id = self.pin_document(&route, execution_context_id).await?;
            Ok::<_, CDPError>((execution_context_id, document_object_id))
        };
        let (execution_context_id, document_object_id) = match prepared.await {
            Ok(ids) => ids,
            Err(e) => {
                // An adopted target brought its own browser connection
                if target_id.is_some() {
                    self.release(&route.connection).await;
                }
                return Err(e);
            }
        };

        tracing::debug!(
            frame_id = %found.frame_id,
            session_id = ?route.session_id,
            execution_context_id,
            "Frame context resolved"
        );

        Ok(FrameContext {
            frame_id: found.frame_id,
            document_url,
            execution_context_id: Some(execution_context_id),
            document_object_id: Some(document_object_id),
            session_handler,
            session_id: route.session_id,
            target_id,
        })
    }

    async fn describe_node(&self) -> Result<NodeDescription> {
        let request = CDPRequest::new("DOM.describeNode")
            .with_params(json!({ "objectId": self.handle.object_id() }));
        let result = self.route.send(request, self.timeout).await?;
        Ok(NodeDescription::from_result(&result)?)
    }

    /// Does the frame's owner element in the holding document have this backend id
    async fn owned_by(&self, frame_id: &str, backend_node_id: BackendNodeId) -> Result<bool> {
        let request = CDPRequest::new("DOM.getFrameOwner").with_params(json!({ "frameId": frame_id }));
        match self.route.send(request, self.timeout).await {
            Ok(result) => Ok(FrameOwner::from_result(&result)
                .is_ok_and(|owner| owner.backend_node_id == backend_node_id)),
            Err(e) if is_rejection(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Frames of the holding document whose owner is this element
    async fn match_frame_owner(&self, backend_node_id: Option<BackendNodeId>) -> Result<Option<FrameMatch>> {
        let Some(backend_node_id) = backend_node_id else {
            return Ok(None);
        };

        let arena = match self
            .route
            .send(CDPRequest::new("Page.getFrameTree"), self.timeout)
            .await
            .and_then(|tree| Ok(FrameArena::from_result(&tree)?))
        {
            Ok(arena) => arena,
            Err(e) if is_rejection(&e) => {
                tracing::debug!(error = %e, "Frame tree unavailable, skipping owner match");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // The root frame is never owned by an element of its own document
        for frame in arena.descendants() {
            if self.owned_by(&frame.id, backend_node_id).await? {
                tracing::debug!(frame_id = %frame.id, "Frame matched by owner");
                return Ok(Some(FrameMatch {
                    frame_id: frame.id.clone(),
                    url: Some(frame.url.clone()),
                    session: None,
                }));
            }
        }
        Ok(None)
    }

    /// Search the browser's targets over a separate connection
    ///
    /// The connection is kept only when a target session is adopted; the
    /// returned session owns it from then on.
    async fn find_out_of_process(
        &self,
        backend_node_id: Option<BackendNodeId>,
        parent_frame_id: Option<&str>,
    ) -> Result<FrameMatch> {
        let browser = self.handle.session().open_browser_client();
        let outcome = self.scan_targets(&browser, backend_node_id, parent_frame_id).await;

        match outcome {
            Ok(Some(found)) => Ok(found),
            Ok(None) => {
                self.release(&browser).await;
                Err(CDPError::invalid_frame(format!(
                    "no frame found for element {} (backend node {:?}, parent frame {:?})",
                    self.handle.object_id(),
                    backend_node_id,
                    parent_frame_id
                )))
            }
            Err(e) => {
                self.release(&browser).await;
                Err(e)
            }
        }
    }

    async fn release(&self, browser: &Arc<CDPClient>) {
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "Error closing browser connection");
        }
    }

    async fn scan_targets(
        &self,
        browser: &Arc<CDPClient>,
        backend_node_id: Option<BackendNodeId>,
        parent_frame_id: Option<&str>,
    ) -> Result<Option<FrameMatch>> {
        let result = browser
            .execute_command(CDPRequest::new("Target.getTargets"), self.timeout)
            .await?;
        let targets = TargetInfo::list_from_result(&result)?;
        tracing::debug!(count = targets.len(), "Scanning targets for frame");

        let mut attempted: HashSet<TargetId> = HashSet::new();
        let mut probes: Vec<TargetProbe> = Vec::new();

        // Targets the browser reports as children of the element's frame
        if let Some(parent_frame_id) = parent_frame_id {
            let candidates: Vec<&TargetInfo> = targets
                .iter()
                .filter(|target| target.parent_frame_id.as_deref() == Some(parent_frame_id))
                .collect();

            if let ([only], None) = (candidates.as_slice(), backend_node_id) {
                attempted.insert(only.target_id.clone());
                if let Some(probe) = self.probe_target(browser, only).await? {
                    let frame_id = probe.arena.root()?.id.clone();
                    tracing::debug!(target_id = %only.target_id, %frame_id, "Single child target adopted");
                    return Ok(Some(self.adopt(probe, frame_id, probes).await));
                }
            } else {
                for target in candidates {
                    attempted.insert(target.target_id.clone());
                    let Some(mut probe) = self.probe_target(browser, target).await? else {
                        continue;
                    };
                    if let Some(backend_node_id) = backend_node_id {
                        let root = probe.arena.root()?.id.clone();
                        probe.root_checked = true;
                        if self.owned_by(&root, backend_node_id).await? {
                            tracing::debug!(target_id = %target.target_id, frame_id = %root, "Child target owned by element");
                            return Ok(Some(self.adopt(probe, root, probes).await));
                        }
                    }
                    probes.push(probe);
                }
            }
        }

        // Everything else that can host a document
        for target in targets.iter().filter(|target| target.hosts_document()) {
            if !attempted.insert(target.target_id.clone()) {
                continue;
            }
            if let Some(probe) = self.probe_target(browser, target).await? {
                probes.push(probe);
            }
        }

        // Root owned by the element wins over a child-of-parent match
        if let Some(backend_node_id) = backend_node_id {
            for index in 0..probes.len() {
                if probes[index].root_checked {
                    continue;
                }
                let root = probes[index].arena.root()?.id.clone();
                if self.owned_by(&root, backend_node_id).await? {
                    let probe = probes.swap_remove(index);
                    tracing::debug!(target_id = %probe.target_id(), frame_id = %root, "Target root owned by element");
                    return Ok(Some(self.adopt(probe, root, probes).await));
                }
            }
        }

        if let Some(parent_frame_id) = parent_frame_id {
            let child = probes.iter().enumerate().find_map(|(index, probe)| {
                probe
                    .arena
                    .frames_with_parent(parent_frame_id)
                    .next()
                    .map(|frame| (index, frame.id.clone()))
            });
            if let Some((index, frame_id)) = child {
                let probe = probes.swap_remove(index);
                tracing::debug!(target_id = %probe.target_id(), %frame_id, "Frame found under parent frame");
                return Ok(Some(self.adopt(probe, frame_id, probes).await));
            }
        }

        Ok(None)
    }

    /// Attach to a target and read its frame tree; `None` if the target refuses
    async fn probe_target(&self, browser: &Arc<CDPClient>, target: &TargetInfo) -> Result<Option<TargetProbe>> {
        let probe = async {
            let session = CDPSession::attach(browser.clone(), target.target_id.clone(), self.timeout).await?;
            let tree = session.send("Page.getFrameTree", None, self.timeout).await?;
            let arena = FrameArena::from_result(&tree)?;
            Ok::<_, CDPError>(TargetProbe {
                session,
                arena,
                root_checked: false,
            })
        };

        match probe.await {
            Ok(probe) => Ok(Some(probe)),
            Err(e) if is_rejection(&e) => {
                tracing::debug!(target_id = %target.target_id, error = %e, "Skipping target");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Keep `chosen`, detach every other probed session
    async fn adopt(&self, chosen: TargetProbe, frame_id: FrameId, rejected: Vec<TargetProbe>) -> FrameMatch {
        let detaches = rejected
            .into_iter()
            .map(|probe| probe.session.detach(self.timeout));
        for result in join_all(detaches).await {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Failed to detach probed target");
            }
        }

        let url = chosen.arena.get(&frame_id).ok().map(|frame| frame.url.clone());
        FrameMatch {
            frame_id,
            url,
            session: Some(chosen.session),
        }
    }

    async fn create_isolated_world(&self, route: &Route, frame_id: &str) -> Result<i64> {
        let request = CDPRequest::new("Page.createIsolatedWorld").with_params(json!({
            "frameId": frame_id,
            "worldName": self.handle.session().config.isolated_world_name,
            "grantUniveralAccess": true,
        }));
        let result = route.send(request, self.timeout).await.map_err(|e| {
            if is_rejection(&e) {
                CDPError::invalid_frame(format!("cannot create isolated world in {}: {}", frame_id, e))
            } else {
                e
            }
        })?;

        execution_context_id(&result)
            .map_err(|_| CDPError::invalid_frame(format!("no execution context for frame {}", frame_id)))
    }

    async fn pin_document(&self, route: &Route, context_id: i64) -> Result<RemoteObjectId> {
        let request = CDPRequest::new("Runtime.evaluate").with_params(json!({
            "expression": DOCUMENT_ELEMENT,
            "contextId": context_id,
        }));
        let result = route.send(request, self.timeout).await.map_err(|e| {
            if is_rejection(&e) {
                CDPError::invalid_frame(format!("cannot evaluate in context {}: {}", context_id, e))
            } else {
                e
            }
        })?;

        RemoteObject::from_result(&result)
            .ok()
            .and_then(|object| object.object_id)
            .ok_or_else(|| CDPError::invalid_frame(format!("no document element in context {}", context_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameRouting;
    use crate::session::{BrowserSession, SessionConfig};
    use crate::testing::{FakeBrowser, Reply};
    use serde_json::Value;

    fn param<'a>(request: &'a CDPRequest, key: &str) -> &'a Value {
        &request.params.as_ref().unwrap()[key]
    }

    fn tree(root: &str, children: &[(&str, &str)]) -> Value {
        let child_frames: Vec<Value> = children
            .iter()
            .map(|(id, parent)| {
                json!({"frame": {"id": id, "parentId": parent, "url": format!("https://{}.example/", id.to_lowercase())}})
            })
            .collect();
        json!({"frameTree": {
            "frame": {"id": root, "url": format!("https://{}.example/", root.to_lowercase())},
            "childFrames": child_frames
        }})
    }

    /// Answers the isolated-world and evaluate steps for any session
    fn world_reply(request: &CDPRequest) -> Option<Reply> {
        match request.method.as_str() {
            "Page.createIsolatedWorld" => Some(Reply::Result(json!({"executionContextId": 5}))),
            "Runtime.evaluate" => {
                let doc = format!("doc-{}", request.session_id.as_deref().unwrap_or("root"));
                Some(Reply::Result(json!({"result": {"type": "object", "subtype": "node", "objectId": doc}})))
            }
            "Target.detachFromTarget" => Some(Reply::Result(json!({}))),
            _ => None,
        }
    }

    fn attach_reply(request: &CDPRequest) -> Reply {
        let target = param(request, "targetId").as_str().unwrap();
        Reply::Result(json!({"sessionId": format!("S-{}", target)}))
    }

    fn session(page: &FakeBrowser, browser: &FakeBrowser) -> Arc<BrowserSession> {
        BrowserSession::with_connectors(SessionConfig::default(), page.connector(), browser.connector())
    }

    /// Element with backend id 42 whose holding frame is F0; the page tree has no children
    fn oopif_page(owners: &'static [(&'static str, u64)]) -> FakeBrowser {
        FakeBrowser::new(move |request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {
                "nodeId": 1, "backendNodeId": 42, "nodeType": 1, "nodeName": "IFRAME", "frameId": "F0"
            }})),
            "Page.getFrameTree" => Reply::Result(tree("F0", &[])),
            "DOM.getFrameOwner" => {
                let frame = param(request, "frameId").as_str().unwrap();
                match owners.iter().find(|(id, _)| *id == frame) {
                    Some((_, backend)) => Reply::Result(json!({"backendNodeId": backend, "nodeId": 3})),
                    None => Reply::Error(-32000, "Frame with the given id was not found."),
                }
            }
            _ => Reply::Error(-32601, "unexpected"),
        })
    }

    #[tokio::test]
    async fn test_selects_child_target_owned_by_element() {
        let page = oopif_page(&[("R1", 99), ("R2", 42)]);
        let browser = FakeBrowser::named("ws://fake/devtools/browser", |request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match (request.method.as_str(), request.session_id.as_deref()) {
                ("Target.getTargets", None) => Reply::Result(json!({"targetInfos": [
                    {"targetId": "T1", "type": "iframe", "parentFrameId": "F0"},
                    {"targetId": "T2", "type": "iframe", "parentFrameId": "F0"},
                    {"targetId": "T3", "type": "iframe", "parentFrameId": "OTHER"},
                ]})),
                ("Target.attachToTarget", None) => attach_reply(request),
                ("Page.getFrameTree", Some("S-T1")) => Reply::Result(tree("R1", &[])),
                ("Page.getFrameTree", Some("S-T2")) => Reply::Result(tree("R2", &[])),
                ("Page.getFrameTree", Some("S-T3")) => Reply::Result(tree("R3", &[])),
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let session = session(&page, &browser);
        let iframe = session.element("obj-iframe", "IFRAME");

        let context = iframe.resolve_frame_context().await.unwrap();
        assert_eq!(context.frame_id, "R2");
        assert_eq!(context.session_id.as_deref(), Some("S-T2"));
        assert_eq!(context.target_id.as_deref(), Some("T2"));
        assert_eq!(context.execution_context_id, Some(5));
        assert_eq!(context.document_object_id.as_deref(), Some("doc-S-T2"));
        assert_eq!(context.document_url.as_deref(), Some("https://r2.example/"));
        let handler = context.session_handler.as_ref().unwrap();
        assert!(!Arc::ptr_eq(handler, session.client()));

        let attached: Vec<String> = browser
            .received()
            .iter()
            .filter(|r| r.method == "Target.attachToTarget")
            .map(|r| param(r, "targetId").as_str().unwrap().to_string())
            .collect();
        assert_eq!(attached, vec!["T1", "T2"]);

        let world = browser
            .received()
            .into_iter()
            .find(|r| r.method == "Page.createIsolatedWorld")
            .unwrap();
        assert_eq!(world.session_id.as_deref(), Some("S-T2"));
        assert_eq!(param(&world, "frameId"), "R2");
        assert_eq!(param(&world, "grantUniveralAccess"), true);

        // Rejected T1 session is released, the adopted connection stays open
        let detach = browser
            .received()
            .into_iter()
            .find(|r| r.method == "Target.detachFromTarget")
            .unwrap();
        assert_eq!(param(&detach, "sessionId"), "S-T1");
        assert_eq!(browser.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_same_process_from_node_description() {
        let page = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match request.method.as_str() {
                "DOM.describeNode" => Reply::Result(json!({"node": {
                    "nodeId": 4, "backendNodeId": 12, "nodeName": "IFRAME", "frameId": "F0",
                    "contentDocument": {"frameId": "F1", "documentURL": "https://child.example/"}
                }})),
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let context = iframe.resolve_frame_context().await.unwrap();
        assert_eq!(context.frame_id, "F1");
        assert_eq!(context.document_url.as_deref(), Some("https://child.example/"));
        assert_eq!(context.document_object_id.as_deref(), Some("doc-root"));
        assert!(context.session_id.is_none());
        assert!(context.session_handler.is_none());
        assert!(!context.is_out_of_process());

        assert_eq!(
            page.methods(),
            vec!["DOM.describeNode", "Page.createIsolatedWorld", "Runtime.evaluate"]
        );
        assert_eq!(browser.connects(), 0);
    }

    #[tokio::test]
    async fn test_second_resolution_issues_no_commands() {
        let page = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            Reply::Result(json!({"node": {
                "nodeName": "IFRAME", "contentDocument": {"frameId": "F1"}
            }}))
        });
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let first = iframe.resolve_frame_context().await.unwrap();
        let sent = page.total_commands();
        let second = iframe.resolve_frame_context().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(page.total_commands(), sent);
    }

    #[tokio::test]
    async fn test_same_process_by_frame_owner() {
        let page = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match request.method.as_str() {
                "DOM.describeNode" => Reply::Result(json!({"node": {
                    "backendNodeId": 42, "nodeName": "IFRAME", "frameId": "F0"
                }})),
                "Page.getFrameTree" => Reply::Result(tree("F0", &[("F1", "F0"), ("F2", "F0")])),
                "DOM.getFrameOwner" => match param(request, "frameId").as_str() {
                    Some("F1") => Reply::Result(json!({"backendNodeId": 7})),
                    Some("F2") => Reply::Result(json!({"backendNodeId": 42})),
                    _ => Reply::Error(-32000, "Frame with the given id was not found."),
                },
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);

        let context = session
            .element("obj-1", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap();
        assert_eq!(context.frame_id, "F2");
        assert_eq!(context.document_url.as_deref(), Some("https://f2.example/"));
        assert!(context.session_id.is_none());
        assert_eq!(page.count("DOM.getFrameOwner"), 2);
        assert_eq!(browser.connects(), 0);
    }

    #[tokio::test]
    async fn test_single_child_target_without_backend_id() {
        let page = FakeBrowser::new(|request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {"nodeName": "IFRAME", "frameId": "F0"}})),
            _ => Reply::Error(-32601, "unexpected"),
        });
        let browser = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match request.method.as_str() {
                "Target.getTargets" => Reply::Result(json!({"targetInfos": [
                    {"targetId": "P", "type": "page"},
                    {"targetId": "T1", "type": "iframe", "parentFrameId": "F0"},
                ]})),
                "Target.attachToTarget" => attach_reply(request),
                "Page.getFrameTree" => Reply::Result(tree("R1", &[])),
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let session = session(&page, &browser);

        let context = session
            .element("obj-1", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap();
        assert_eq!(context.frame_id, "R1");
        assert_eq!(context.session_id.as_deref(), Some("S-T1"));
        assert_eq!(browser.count("Target.attachToTarget"), 1);
        assert_eq!(page.count("DOM.getFrameOwner"), 0);
        assert_eq!(page.count("Page.getFrameTree"), 0);
    }

    #[tokio::test]
    async fn test_fallback_finds_frame_under_parent() {
        let page = FakeBrowser::new(|request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {
                "backendNodeId": 42, "nodeName": "IFRAME", "frameId": "F5"
            }})),
            "Page.getFrameTree" => Reply::Result(tree("F0", &[])),
            _ => Reply::Error(-32000, "Frame with the given id was not found."),
        });
        let browser = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match (request.method.as_str(), request.session_id.as_deref()) {
                ("Target.getTargets", _) => Reply::Result(json!({"targetInfos": [
                    {"targetId": "W", "type": "service_worker"},
                    {"targetId": "T1", "type": "iframe", "parentFrameId": "OTHER"},
                    {"targetId": "P", "type": "page"},
                ]})),
                ("Target.attachToTarget", _) => attach_reply(request),
                ("Page.getFrameTree", Some("S-T1")) => Reply::Result(tree("R1", &[])),
                ("Page.getFrameTree", Some("S-P")) => {
                    Reply::Result(tree("P0", &[("F5", "P0"), ("F6", "F5")]))
                }
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let session = session(&page, &browser);

        let context = session
            .element("obj-1", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap();
        assert_eq!(context.frame_id, "F6");
        assert_eq!(context.session_id.as_deref(), Some("S-P"));

        let attached: Vec<String> = browser
            .received()
            .iter()
            .filter(|r| r.method == "Target.attachToTarget")
            .map(|r| param(r, "targetId").as_str().unwrap().to_string())
            .collect();
        assert_eq!(attached, vec!["T1", "P"]);
    }

    #[tokio::test]
    async fn test_root_owner_beats_child_of_parent() {
        let page = FakeBrowser::new(|request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {
                "backendNodeId": 42, "nodeName": "IFRAME", "frameId": "F0"
            }})),
            "Page.getFrameTree" => Reply::Result(tree("F0", &[])),
            "DOM.getFrameOwner" => match param(request, "frameId").as_str() {
                Some("RB") => Reply::Result(json!({"backendNodeId": 42})),
                _ => Reply::Result(json!({"backendNodeId": 1})),
            },
            _ => Reply::Error(-32601, "unexpected"),
        });
        let browser = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match (request.method.as_str(), request.session_id.as_deref()) {
                ("Target.getTargets", _) => Reply::Result(json!({"targetInfos": [
                    {"targetId": "A", "type": "iframe", "parentFrameId": "X"},
                    {"targetId": "B", "type": "iframe", "parentFrameId": "Y"},
                ]})),
                ("Target.attachToTarget", _) => attach_reply(request),
                ("Page.getFrameTree", Some("S-A")) => Reply::Result(tree("RA", &[("FA", "F0")])),
                ("Page.getFrameTree", Some("S-B")) => Reply::Result(tree("RB", &[])),
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let session = session(&page, &browser);

        let context = session
            .element("obj-1", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap();
        assert_eq!(context.frame_id, "RB");
        assert_eq!(context.session_id.as_deref(), Some("S-B"));
    }

    #[tokio::test]
    async fn test_unmatched_frame_is_invalid_and_releases_browser_connection() {
        let page = oopif_page(&[("R1", 99)]);
        let browser = FakeBrowser::new(|request| match request.method.as_str() {
            "Target.getTargets" => Reply::Result(json!({"targetInfos": [
                {"targetId": "T1", "type": "iframe", "parentFrameId": "F0"},
                {"targetId": "T2", "type": "iframe", "parentFrameId": "F0"},
            ]})),
            "Target.attachToTarget" => match param(request, "targetId").as_str() {
                Some("T1") => attach_reply(request),
                _ => Reply::Error(-32602, "No target with given id found"),
            },
            "Page.getFrameTree" => Reply::Result(tree("R1", &[])),
            _ => Reply::Error(-32601, "unexpected"),
        });
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let err = iframe.resolve_frame_context().await.unwrap_err();
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
        assert!(iframe.frame_context().is_none());
        assert!(browser.wait_for_disconnects(1).await);

        // Failures are not cached; the next call starts over
        let before = page.count("DOM.describeNode");
        tokio_test::assert_err!(iframe.resolve_frame_context().await);
        assert_eq!(page.count("DOM.describeNode"), before + 1);
        assert_eq!(browser.connects(), 2);
    }

    /// One child target T1 under F0 whose root R1 is owned by the element
    fn single_target_browser(world: Reply) -> FakeBrowser {
        FakeBrowser::new(move |request| match request.method.as_str() {
            "Target.getTargets" => Reply::Result(json!({"targetInfos": [
                {"targetId": "T1", "type": "iframe", "parentFrameId": "F0"},
            ]})),
            "Target.attachToTarget" => attach_reply(request),
            "Page.getFrameTree" => Reply::Result(tree("R1", &[])),
            "Page.createIsolatedWorld" => world.clone(),
            _ => world_reply(request).unwrap_or(Reply::Error(-32601, "unexpected")),
        })
    }

    #[tokio::test]
    async fn test_rejected_isolated_world_is_invalid() {
        let page = FakeBrowser::new(|request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {
                "nodeName": "IFRAME", "contentDocument": {"frameId": "F1"}
            }})),
            "Page.createIsolatedWorld" => Reply::Error(-32000, "No frame for given id found"),
            _ => Reply::Error(-32601, "unexpected"),
        });
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let err = iframe.resolve_frame_context().await.unwrap_err();
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
        assert!(iframe.frame_context().is_none());
        assert_eq!(page.count("Runtime.evaluate"), 0);
    }

    #[tokio::test]
    async fn test_rejected_isolated_world_releases_browser_connection() {
        let page = oopif_page(&[("R1", 42)]);
        let browser = single_target_browser(Reply::Error(-32000, "No frame for given id found"));
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let err = iframe.resolve_frame_context().await.unwrap_err();
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
        assert_eq!(browser.count("Page.createIsolatedWorld"), 1);
        assert_eq!(browser.count("Runtime.evaluate"), 0);
        assert!(browser.wait_for_disconnects(1).await);
    }

    #[tokio::test]
    async fn test_missing_execution_context_releases_browser_connection() {
        let page = oopif_page(&[("R1", 42)]);
        let browser = single_target_browser(Reply::Result(json!({})));
        let session = session(&page, &browser);
        let iframe = session.element("obj-1", "IFRAME");

        let err = iframe.resolve_frame_context().await.unwrap_err();
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
        assert!(iframe.frame_context().is_none());
        assert_eq!(browser.count("Runtime.evaluate"), 0);
        assert!(browser.wait_for_disconnects(1).await);
    }

    #[tokio::test]
    async fn test_missing_document_element_is_invalid() {
        let page = FakeBrowser::new(|request| match request.method.as_str() {
            "DOM.describeNode" => Reply::Result(json!({"node": {
                "nodeName": "IFRAME", "contentDocument": {"frameId": "F1"}
            }})),
            "Page.createIsolatedWorld" => Reply::Result(json!({"executionContextId": 9})),
            "Runtime.evaluate" => Reply::Result(json!({"result": {"type": "undefined"}})),
            _ => Reply::Error(-32601, "unexpected"),
        });
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);

        let err = session
            .element("obj-1", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap_err();
        assert!(matches!(err, CDPError::InvalidFrame { .. }));
    }

    #[tokio::test]
    async fn test_describe_rejection_is_reported_verbatim() {
        let page = FakeBrowser::new(|_| Reply::Error(-32000, "Could not find object with given id"));
        let browser = FakeBrowser::new(|_| Reply::Silent);
        let session = session(&page, &browser);

        let err = session
            .element("gone", "IFRAME")
            .resolve_frame_context()
            .await
            .unwrap_err();
        assert_eq!(err.protocol_code(), Some(-32000));
    }

    #[tokio::test]
    async fn test_nested_iframe_resolves_through_parent_session() {
        let page = FakeBrowser::new(|_| Reply::Error(-32601, "unexpected"));
        let browser = FakeBrowser::new(|request| {
            if let Some(reply) = world_reply(request) {
                return reply;
            }
            match (request.method.as_str(), request.session_id.as_deref()) {
                ("DOM.describeNode", Some("S-T1")) => Reply::Result(json!({"node": {
                    "nodeName": "IFRAME", "contentDocument": {"frameId": "N1"}
                }})),
                _ => Reply::Error(-32601, "unexpected"),
            }
        });
        let session = session(&page, &browser);
        let parent_connection = session.open_browser_client();

        let nested = ElementHandle::with_routing(
            session.clone(),
            "obj-nested".into(),
            "IFRAME".into(),
            FrameRouting {
                session_handler: Some(parent_connection.clone()),
                session_id: Some("S-T1".into()),
                parent_frame_id: Some("R1".into()),
            },
        );

        let context = nested.resolve_frame_context().await.unwrap();
        assert_eq!(context.frame_id, "N1");
        assert_eq!(context.session_id.as_deref(), Some("S-T1"));
        assert!(Arc::ptr_eq(context.session_handler.as_ref().unwrap(), &parent_connection));
        assert_eq!(page.total_commands(), 0);
        assert!(browser
            .received()
            .iter()
            .all(|r| r.session_id.as_deref() == Some("S-T1")));
    }
}
