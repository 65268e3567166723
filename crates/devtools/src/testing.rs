//! In-memory browser for tests
//!
//! Speaks the wire format over channels: every connect opens a fresh link,
//! every received command is recorded and answered by a scripted handler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::cdp::protocol::CDPRequest;
use crate::cdp::transport::{Connector, Transport};
use crate::error::{CDPError, Result};

/// How the fake answers one command
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Result(Value),
    Error(i64, &'static str),
    /// Never answer
    Silent,
    /// Answer after a delay
    Delayed(Duration, Value),
    /// First time: drop the connection without answering. Afterwards: answer.
    HangUpOnce(Value),
}

type Handler = Arc<dyn Fn(&CDPRequest) -> Reply + Send + Sync>;

struct Link {
    to_client: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Link {
    fn send(&self, text: String) -> bool {
        match self.to_client.lock().as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }
}

struct Inner {
    endpoint: String,
    handler: Handler,
    received: Mutex<Vec<CDPRequest>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    refuse: AtomicBool,
    hung_up_once: AtomicBool,
    current: Mutex<Option<Arc<Link>>>,
}

#[derive(Clone)]
pub(crate) struct FakeBrowser {
    inner: Arc<Inner>,
}

impl FakeBrowser {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CDPRequest) -> Reply + Send + Sync + 'static,
    {
        Self::named("ws://fake/devtools/page", handler)
    }

    pub fn named<F>(endpoint: &str, handler: F) -> Self
    where
        F: Fn(&CDPRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_string(),
                handler: Arc::new(handler),
                received: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                hung_up_once: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn received(&self) -> Vec<CDPRequest> {
        self.inner.received.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.method).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.inner
            .received
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn total_commands(&self) -> usize {
        self.inner.received.lock().len()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Links whose client side has gone away
    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Wait until `count` links have been released by the client
    pub async fn wait_for_disconnects(&self, count: usize) -> bool {
        for _ in 0..200 {
            if self.disconnects() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Push a raw frame to the client over the current link
    pub fn push(&self, raw: impl Into<String>) -> bool {
        let link = self.inner.current.lock().clone();
        link.is_some_and(|link| link.send(raw.into()))
    }

    pub fn emit_event(&self, method: &str, params: Value) -> bool {
        self.push(json!({"method": method, "params": params}).to_string())
    }

    /// Drop the current link; the client's stream ends
    pub fn hang_up(&self) {
        if let Some(link) = self.inner.current.lock().take() {
            link.to_client.lock().take();
        }
    }

    fn answer(link: &Arc<Link>, request: &CDPRequest, reply: Reply, inner: &Arc<Inner>) {
        let id = request.id.unwrap_or_default();
        let respond = |result: Value| {
            let mut frame = json!({"id": id, "result": result});
            if let Some(session_id) = &request.session_id {
                frame["sessionId"] = json!(session_id);
            }
            frame.to_string()
        };

        match reply {
            Reply::Result(result) => {
                link.send(respond(result));
            }
            Reply::Error(code, message) => {
                link.send(json!({"id": id, "error": {"code": code, "message": message}}).to_string());
            }
            Reply::Silent => {}
            Reply::Delayed(delay, result) => {
                let frame = respond(result);
                let link = link.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    link.send(frame);
                });
            }
            Reply::HangUpOnce(result) => {
                if inner.hung_up_once.swap(true, Ordering::SeqCst) {
                    link.send(respond(result));
                } else {
                    link.to_client.lock().take();
                }
            }
        }
    }
}

#[async_trait]
impl Connector for FakeBrowser {
    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    async fn connect(&self) -> Result<Transport> {
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(CDPError::connection_lost("connection refused"));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<String>();
        let (to_browser_tx, mut to_browser_rx) = mpsc::unbounded_channel::<String>();

        let link = Arc::new(Link {
            to_client: Mutex::new(Some(to_client_tx)),
        });
        // Replacing the previous link drops its sender and ends its stream
        if let Some(previous) = self.inner.current.lock().replace(link.clone()) {
            previous.to_client.lock().take();
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(text) = to_browser_rx.recv().await {
                let Ok(request) = serde_json::from_str::<CDPRequest>(&text) else {
                    continue;
                };
                inner.received.lock().push(request.clone());
                let reply = (inner.handler)(&request);
                FakeBrowser::answer(&link, &request, reply, &inner);
            }
            inner.disconnects.fetch_add(1, Ordering::SeqCst);
        });

        let sink = futures_util::sink::unfold(to_browser_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| CDPError::connection_lost("fake browser gone"))?;
            Ok::<_, CDPError>(tx)
        });
        let stream = futures_util::stream::unfold(to_client_rx, |mut rx| async move {
            rx.recv().await.map(|text| (Ok(text), rx))
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}
