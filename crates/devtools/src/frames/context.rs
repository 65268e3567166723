//! Resolved frame context
//!
//! Produced once per iframe element and never mutated afterwards. Anything
//! executed inside the frame reads its routing from here.

use std::sync::Arc;

use crate::cdp::protocol::{FrameId, RemoteObjectId, SessionId, TargetId};
use crate::cdp::CDPClient;

/// Everything needed to run commands inside an iframe's document
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_id: FrameId,
    pub document_url: Option<String>,
    /// Isolated world created for this frame
    pub execution_context_id: Option<i64>,
    /// Pinned `document.documentElement` inside the isolated world
    pub document_object_id: Option<RemoteObjectId>,
    /// Connection owning `session_id`, when the frame is reached through a target session
    pub session_handler: Option<Arc<CDPClient>>,
    pub session_id: Option<SessionId>,
    /// Target the frame was found in, for out-of-process frames
    pub target_id: Option<TargetId>,
}

impl FrameContext {
    pub fn is_out_of_process(&self) -> bool {
        self.target_id.is_some()
    }

    /// Routing inherited by iframe elements found inside this frame
    pub fn routing_for_children(&self) -> FrameRouting {
        FrameRouting {
            session_handler: self.session_handler.clone(),
            session_id: self.session_id.clone(),
            parent_frame_id: Some(self.frame_id.clone()),
        }
    }
}

/// Routing of an element discovered inside an already resolved frame
///
/// Lets a nested iframe resolve relative to its real parent instead of the
/// top-level page.
#[derive(Debug, Clone, Default)]
pub struct FrameRouting {
    pub session_handler: Option<Arc<CDPClient>>,
    pub session_id: Option<SessionId>,
    pub parent_frame_id: Option<FrameId>,
}
