//! Live session handle: request ids, pending slots and the outbound queue.
//!
//! The session I/O task is the only writer on the channel and the only code
//! that completes a pending slot. A slot is removed from the table before it
//! is completed, so a response can never resolve a command twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::codec::FrameKind;
use crate::error::{Result, RobovacError};
use crate::protocol::{Request, Response};
use crate::transport::TransportKind;

/// A frame waiting for the I/O task to seal and write it
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) kind: FrameKind,
    pub(crate) payload: Vec<u8>,
}

#[derive(Debug)]
struct Slots {
    next_id: u32,
    waiting: HashMap<u32, oneshot::Sender<Response>>,
    closed: bool,
}

/// Request ids in flight and their result slots
#[derive(Debug)]
pub struct PendingTable {
    inner: Mutex<Slots>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    /// Empty table; ids start at 1
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                next_id: 1,
                waiting: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id not currently pending and register its slot
    pub fn register(&self) -> Result<(u32, oneshot::Receiver<Response>)> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(RobovacError::Disconnected);
        }
        let id = loop {
            let candidate = slots.next_id;
            slots.next_id = slots.next_id.wrapping_add(1).max(1);
            if !slots.waiting.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        slots.waiting.insert(id, tx);
        Ok((id, rx))
    }

    /// Complete the slot for `response.id`. Returns false if nothing waits on it.
    pub fn resolve(&self, response: Response) -> bool {
        let slot = self.lock().waiting.remove(&response.id);
        match slot {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Forget a slot without completing it
    pub fn remove(&self, id: u32) {
        self.lock().waiting.remove(&id);
    }

    /// Fail every pending slot and refuse new ones
    pub fn fail_all(&self) -> usize {
        let mut slots = self.lock();
        slots.closed = true;
        let failed = slots.waiting.len();
        // Dropping the senders wakes every waiter with a receive error
        slots.waiting.clear();
        failed
    }

    /// Number of pending slots
    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Whether no slot is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the id is pending
    pub fn contains(&self, id: u32) -> bool {
        self.lock().waiting.contains_key(&id)
    }
}

/// Handle to one live session
#[derive(Debug)]
pub struct SessionLink {
    id: Uuid,
    transport: TransportKind,
    outbound: mpsc::Sender<Outbound>,
    pending: Arc<PendingTable>,
}

impl SessionLink {
    pub(crate) fn new(
        transport: TransportKind,
        outbound: mpsc::Sender<Outbound>,
        pending: Arc<PendingTable>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            outbound,
            pending,
        }
    }

    /// Session identifier, for logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Transport this session runs over
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Pending request table
    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Whether the session I/O task has ended
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Register a request; nothing is sent until [`PendingRequest::attempt`]
    pub fn begin(&self, method: &str, params: Value) -> Result<PendingRequest> {
        let (id, rx) = self.pending.register()?;
        let request = Request {
            id,
            method: method.to_string(),
            params,
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => {
                self.pending.remove(id);
                return Err(e.into());
            }
        };
        Ok(PendingRequest {
            id,
            method: request.method,
            payload,
            rx,
            sends: 0,
            table: Arc::clone(&self.pending),
            outbound: self.outbound.clone(),
        })
    }

    /// Single attempt: send and wait up to `timeout`
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let mut request = self.begin(method, params)?;
        match request.attempt(timeout).await? {
            Some(response) => response.into_result(),
            None => Err(RobovacError::Timeout {
                method: method.to_string(),
                attempts: 1,
            }),
        }
    }

}

/// A registered request. Dropping it removes the pending slot.
#[derive(Debug)]
pub struct PendingRequest {
    id: u32,
    method: String,
    payload: Vec<u8>,
    rx: oneshot::Receiver<Response>,
    sends: u32,
    table: Arc<PendingTable>,
    outbound: mpsc::Sender<Outbound>,
}

impl PendingRequest {
    /// Request id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wire method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Times the request has been sent
    pub fn sends(&self) -> u32 {
        self.sends
    }

    /// Queue the request (again) with the same id. The send counts as an
    /// attempt even when the queue stays full until `deadline`, in which
    /// case `Ok(false)` is returned and nothing was queued.
    pub async fn send_by(&mut self, deadline: Instant) -> Result<bool> {
        self.sends += 1;
        let frame = Outbound {
            kind: FrameKind::Request,
            payload: self.payload.clone(),
        };
        match tokio::time::timeout_at(deadline, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(RobovacError::Disconnected),
            Err(_) => {
                tracing::debug!(id = self.id, method = %self.method, "Outbound queue full until deadline");
                Ok(false)
            }
        }
    }

    /// Wait for the response. `Ok(None)` when the deadline passes first,
    /// `Disconnected` when the session ended.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<Response>> {
        self.wait_until(Instant::now() + timeout).await
    }

    async fn wait_until(&mut self, deadline: Instant) -> Result<Option<Response>> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => Err(RobovacError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    /// One attempt: queue and wait for the response, both within `timeout`
    pub async fn attempt(&mut self, timeout: Duration) -> Result<Option<Response>> {
        let deadline = Instant::now() + timeout;
        if !self.send_by(deadline).await? {
            return Ok(None);
        }
        self.wait_until(deadline).await
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn link() -> (SessionLink, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (
            SessionLink::new(TransportKind::Local, tx, Arc::new(PendingTable::new())),
            rx,
        )
    }

    #[test]
    fn test_resolve_exactly_once() {
        let table = PendingTable::new();
        let (id, mut rx) = table.register().unwrap();
        assert!(table.resolve(Response::ok(id, json!("ok"))));
        assert!(!table.resolve(Response::ok(id, json!("again"))));
        assert_eq!(rx.try_recv().unwrap().result, Some(json!("ok")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_response_ignored() {
        let table = PendingTable::new();
        assert!(!table.resolve(Response::ok(42, Value::Null)));
    }

    #[test]
    fn test_fail_all_wakes_waiters_and_closes() {
        let table = PendingTable::new();
        let (_, mut a) = table.register().unwrap();
        let (_, mut b) = table.register().unwrap();
        assert_eq!(table.fail_all(), 2);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
        assert!(matches!(table.register(), Err(RobovacError::Disconnected)));
    }

    #[test]
    fn test_id_skips_pending_after_wrap() {
        let table = PendingTable::new();
        let (first, _rx) = table.register().unwrap();
        assert_eq!(first, 1);
        table.lock().next_id = u32::MAX;
        let (a, _ra) = table.register().unwrap();
        let (b, _rb) = table.register().unwrap();
        assert_eq!(a, u32::MAX);
        // 0 is never used and 1 is still pending
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn test_drop_removes_slot() {
        let (link, _rx) = link();
        let request = link.begin("get_status", Value::Null).unwrap();
        let id = request.id();
        assert!(link.pending().contains(id));
        drop(request);
        assert!(!link.pending().contains(id));
    }

    #[tokio::test]
    async fn test_resend_uses_same_id() {
        let (link, mut rx) = link();
        let mut request = link.begin("app_start", Value::Null).unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(request.send_by(deadline).await.unwrap());
        assert!(request.send_by(deadline).await.unwrap());
        assert_eq!(request.sends(), 2);

        let first: Request = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
        let second: Request = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(first.id, request.id());
        assert_eq!(second.id, request.id());
    }

    #[tokio::test]
    async fn test_wait_timeout_and_disconnect() {
        let (link, _rx) = link();
        let mut request = link.begin("find_me", Value::Null).unwrap();
        assert!(request.wait(Duration::from_millis(5)).await.unwrap().is_none());

        link.pending().fail_all();
        assert!(matches!(
            request.wait(Duration::from_secs(1)).await,
            Err(RobovacError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_send_after_session_end() {
        let (link, rx) = link();
        drop(rx);
        assert!(link.is_closed());
        let mut request = link.begin("get_status", Value::Null).unwrap();
        assert!(matches!(
            request.attempt(Duration::from_secs(1)).await,
            Err(RobovacError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_missed_attempt() {
        let (tx, mut rx) = mpsc::channel(1);
        let link = SessionLink::new(TransportKind::Local, tx, Arc::new(PendingTable::new()));
        let mut first = link.begin("get_status", Value::Null).unwrap();
        assert!(first.send_by(Instant::now() + Duration::from_secs(1)).await.unwrap());

        // Nobody drains the queue
        let mut second = link.begin("get_consumable", Value::Null).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), second.attempt(Duration::from_millis(20)))
            .await
            .expect("attempt must give up at its deadline");
        assert!(result.unwrap().is_none());
        assert_eq!(second.sends(), 1);

        let queued: Request = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
        assert_eq!(queued.id, first.id());
        assert!(rx.try_recv().is_err());
    }

    proptest! {
        #[test]
        fn prop_pending_ids_unique(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let table = PendingTable::new();
            let mut live: Vec<(u32, oneshot::Receiver<Response>)> = Vec::new();
            for register in ops {
                if register || live.is_empty() {
                    live.push(table.register().unwrap());
                } else {
                    let (id, _) = live.remove(live.len() / 2);
                    table.remove(id);
                }
                let ids: HashSet<u32> = live.iter().map(|(id, _)| *id).collect();
                prop_assert_eq!(ids.len(), live.len());
                prop_assert!(!ids.contains(&0));
            }
        }
    }
}
