//! Browser Session - one tab's scope
//!
//! Owns everything that used to be ambient: the page connection, the
//! browser-level endpoint used for target enumeration, and the configuration.
//! Element handles keep an `Arc` to their session instead of reaching for globals.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cdp::protocol::RemoteObjectId;
use crate::cdp::{CDPClient, ClientOptions, Connector, WebSocketConnector};
use crate::element::ElementHandle;
use crate::error::Result;
use crate::router::SessionRouter;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub id: String,
    /// Page-level endpoint, e.g. `ws://localhost:9222/devtools/page/<id>`
    pub cdp_url: String,
    /// Browser-level endpoint for target enumeration; `cdp_url` when unset
    pub browser_url: Option<String>,
    pub command_timeout_ms: u64,
    /// Timeout for element-scoped commands, which may cross processes
    pub scoped_command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub isolated_world_name: String,
    pub lifecycle_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            browser_url: None,
            command_timeout_ms: 30_000,
            scoped_command_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            isolated_world_name: "devtools_isolated_world".to_string(),
            lifecycle_channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn new(cdp_url: impl Into<String>) -> Self {
        Self {
            cdp_url: cdp_url.into(),
            ..Default::default()
        }
    }

    pub fn with_browser_url(mut self, browser_url: impl Into<String>) -> Self {
        self.browser_url = Some(browser_url.into());
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_scoped_command_timeout(mut self, timeout: Duration) -> Self {
        self.scoped_command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_isolated_world_name(mut self, name: impl Into<String>) -> Self {
        self.isolated_world_name = name.into();
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn scoped_command_timeout(&self) -> Duration {
        Duration::from_millis(self.scoped_command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn browser_endpoint(&self) -> &str {
        self.browser_url.as_deref().unwrap_or(&self.cdp_url)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            command_timeout: self.command_timeout(),
            connect_timeout: self.connect_timeout(),
            lifecycle_capacity: self.lifecycle_channel_capacity,
        }
    }
}

/// Browser Session - the page connection plus what frame resolution needs
pub struct BrowserSession {
    pub config: SessionConfig,

    /// Root connection for this tab
    client: Arc<CDPClient>,

    /// Opens the secondary browser-level connection during OOPIF resolution
    browser_connector: Arc<dyn Connector>,

    router: SessionRouter,
}

impl BrowserSession {
    /// WebSocket endpoints from the config; nothing connects yet
    pub fn new(config: SessionConfig) -> Result<Arc<Self>> {
        let page = Arc::new(WebSocketConnector::new(&config.cdp_url)?);
        let browser = Arc::new(WebSocketConnector::new(config.browser_endpoint())?);
        Ok(Self::with_connectors(config, page, browser))
    }

    /// Custom transports (tests, pipes, proxies)
    pub fn with_connectors(
        config: SessionConfig,
        page: Arc<dyn Connector>,
        browser: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let client = CDPClient::new(page, config.client_options());
        let router = SessionRouter::new(config.scoped_command_timeout());
        Arc::new(Self {
            config,
            client,
            browser_connector: browser,
            router,
        })
    }

    /// Open the page connection now instead of on first command
    pub async fn start(&self) -> Result<()> {
        self.client.ensure_connected().await?;
        tracing::debug!(session = %self.config.id, "Browser session started");
        Ok(())
    }

    /// Close the page connection
    pub async fn stop(&self) -> Result<()> {
        self.client.close().await?;
        tracing::debug!(session = %self.config.id, "Browser session stopped");
        Ok(())
    }

    /// Root connection
    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    /// A fresh, not yet connected, browser-level connection
    pub(crate) fn open_browser_client(&self) -> Arc<CDPClient> {
        CDPClient::new(self.browser_connector.clone(), self.config.client_options())
    }

    /// Wrap a remote object found in the top-level document
    pub fn element(self: &Arc<Self>, object_id: impl Into<RemoteObjectId>, node_name: impl Into<String>) -> ElementHandle {
        ElementHandle::new(self.clone(), object_id.into(), node_name.into())
    }
}
