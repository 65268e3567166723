//! CDP Session - Represents an attached browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the client's transport (flattened mode) - the session id
//! stamped on each command is what routes it to the target.

use std::sync::Arc;
use std::time::Duration;

use devtools_dom::types::attached_session_id;
use serde_json::{json, Value};

use super::client::CDPClient;
use super::protocol::{CDPRequest, SessionId, TargetId};
use crate::error::Result;

/// CDP Session bound to a specific target
#[derive(Clone, Debug)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a target in flattened mode
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId, timeout: Duration) -> Result<Self> {
        let request = CDPRequest::new("Target.attachToTarget").with_params(json!({
            "targetId": target_id,
            "flatten": true,
        }));
        let result = client.execute_command(request, timeout).await?;
        let session_id = attached_session_id(&result)?;

        tracing::debug!(%target_id, %session_id, "Attached to target");

        Ok(Self {
            client,
            target_id,
            session_id,
        })
    }

    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let mut request = CDPRequest::new(method).with_session(Some(self.session_id.clone()));
        request.params = params;
        self.client.execute_command(request, timeout).await
    }

    /// Enable domains in parallel; individual failures are logged, not fatal
    pub async fn enable_domains(&self, domains: &[&str], timeout: Duration) -> usize {
        let enable_futures: Vec<_> = domains
            .iter()
            .map(|domain| self.send(format!("{}.enable", domain), None, timeout))
            .collect();

        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(
                "Some domain enables failed: {}/{}",
                failures,
                results.len()
            );
        }
        results.len() - failures
    }

    /// Detach from the target; the session id is dead afterwards
    pub async fn detach(self, timeout: Duration) -> Result<()> {
        let request = CDPRequest::new("Target.detachFromTarget")
            .with_params(json!({ "sessionId": self.session_id }));
        self.client.execute_command(request, timeout).await?;
        Ok(())
    }
}
