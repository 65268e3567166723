//! Command Manager - pending request bookkeeping
//!
//! Owns the map `request id → waiting caller`. The caller side inserts and
//! purges (timeout, cancellation); the receive loop resolves. DashMap keeps
//! both paths lock-free at the map level.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::protocol::{CDPRequest, CDPResponse, RequestId};
use crate::error::{CDPError, Result};

/// Ids stay inside the int32 range the browser parses
const MAX_REQUEST_ID: RequestId = i32::MAX as RequestId;

/// Timeouts beyond this mean "no deadline"
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, clamped so huge timeouts (`Duration::MAX`) never overflow
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(FAR_FUTURE)
}

/// One in-flight command
#[derive(Debug)]
pub struct PendingCommand {
    pub id: RequestId,
    pub deadline: Instant,
    /// Transport generation the command was written to
    pub generation: u64,
    result_slot: oneshot::Sender<CDPResponse>,
}

/// Tracks pending command ids and resolves them
#[derive(Clone, Debug)]
pub struct CommandManager {
    next_id: Arc<AtomicU64>,
    pending: Arc<DashMap<RequestId, PendingCommand>>,
}

impl CommandManager {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Next id from the wrapping counter, skipping ids that are still pending
    fn allocate_id(&self) -> RequestId {
        loop {
            let id = self
                .next_id
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some(if current >= MAX_REQUEST_ID { 1 } else { current + 1 })
                })
                .unwrap_or(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a pending slot for `command`, assigning an id if it has none
    ///
    /// Returns the (possibly mutated) command and the receiver the caller awaits.
    pub fn create_command_future(
        &self,
        mut command: CDPRequest,
        timeout: Duration,
        generation: u64,
    ) -> Result<(CDPRequest, oneshot::Receiver<CDPResponse>)> {
        let id = match command.id {
            Some(id) => id,
            None => self.allocate_id(),
        };

        let (tx, rx) = oneshot::channel();
        let pending = PendingCommand {
            id,
            deadline: deadline_after(timeout),
            generation,
            result_slot: tx,
        };

        match self.pending.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CDPError::DuplicateRequestId(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pending);
            }
        }

        command.id = Some(id);
        Ok((command, rx))
    }

    /// Fulfil the pending slot for `id`
    ///
    /// Returns false for unknown ids (late or duplicate responses).
    pub fn resolve_command(&self, id: RequestId, response: CDPResponse) -> bool {
        match self.pending.remove(&id) {
            Some((_, pending)) => {
                // Receiver may be gone if the caller was cancelled
                let _ = pending.result_slot.send(response);
                true
            }
            None => false,
        }
    }

    /// Purge after timeout or cancellation
    pub fn remove_pending_command(&self, id: RequestId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Drop every slot written to `generation`; waiters observe a closed channel
    pub fn fail_generation(&self, generation: u64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.generation != generation);
        before.saturating_sub(self.pending.len())
    }

    /// Drop slots nobody will collect: deadline passed, or the caller went away
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.deadline > now && !pending.result_slot.is_closed());
        before.saturating_sub(self.pending.len())
    }

    /// Drop everything
    pub fn clear(&self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}
