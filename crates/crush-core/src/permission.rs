//! The permission gate: blocks a tool between "wants to act" and "user
//! consented".
//!
//! Tools call [`PermissionService::request`] and suspend until the UI
//! resolves the request out of band (over the RPC surface), the session is
//! auto-approved, skip mode is on, or the caller's token is canceled (which
//! denies).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crush_shared::canonical::deterministic_stringify;
use crush_shared::event::{EventKind, EventPayload};
use crush_shared::{CreatePermissionRequest, PermissionNotification, PermissionRequest};

use crate::services::EventBroker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Granted,
    GrantedPersistent,
    Denied,
}

/// Key identifying a persistent grant: same session, same tool, same params
/// after canonicalization (stable JSON with sorted keys).
type GrantKey = (String, String, String);

fn grant_key(session_id: &str, tool_name: &str, params: &serde_json::Value) -> GrantKey {
    (
        session_id.to_string(),
        tool_name.to_string(),
        deterministic_stringify(params),
    )
}

#[derive(Default)]
struct GateState {
    pending: HashMap<String, oneshot::Sender<Decision>>,
    persistent_grants: HashSet<GrantKey>,
    auto_approved_sessions: HashSet<String>,
}

pub struct PermissionService {
    broker: EventBroker,
    skip: AtomicBool,
    state: Mutex<GateState>,
}

impl PermissionService {
    pub fn new(broker: EventBroker, skip: bool) -> Self {
        Self {
            broker,
            skip: AtomicBool::new(skip),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn set_skip_requests(&self, skip: bool) {
        self.skip.store(skip, Ordering::Relaxed);
    }

    pub fn skip_requests(&self) -> bool {
        self.skip.load(Ordering::Relaxed)
    }

    /// From this point on, every request for `session_id` resolves granted.
    pub fn auto_approve_session(&self, session_id: &str) {
        self.state
            .lock()
            .unwrap()
            .auto_approved_sessions
            .insert(session_id.to_string());
    }

    /// Blocks until the request is resolved. Returns `true` when allowed.
    /// A canceled `cancel` token denies.
    pub async fn request(&self, req: CreatePermissionRequest, cancel: &CancellationToken) -> bool {
        if self.skip_requests() || self.is_auto_approved(&req.session_id) {
            self.notify(&req.tool_call_id, true).await;
            return true;
        }

        let key = grant_key(&req.session_id, &req.tool_name, &req.params);
        let (id, rx) = {
            let mut state = self.state.lock().unwrap();
            if state.persistent_grants.contains(&key) {
                return true;
            }
            let id = format!("perm_{}", Uuid::new_v4());
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id.clone(), tx);
            (id, rx)
        };

        let request = req.clone().with_id(id.clone());
        self.broker
            .publish(EventKind::Created, EventPayload::PermissionRequest(request))
            .await;

        let decision = tokio::select! {
            decision = rx => decision.ok(),
            _ = cancel.cancelled() => None,
        };

        match decision {
            Some(Decision::Granted) => {
                self.notify(&req.tool_call_id, true).await;
                true
            }
            Some(Decision::GrantedPersistent) => {
                self.state.lock().unwrap().persistent_grants.insert(key);
                self.notify(&req.tool_call_id, true).await;
                true
            }
            Some(Decision::Denied) => {
                self.notify(&req.tool_call_id, false).await;
                false
            }
            None => {
                // Canceled, or the sender vanished: treat as denied.
                self.state.lock().unwrap().pending.remove(&id);
                self.notify(&req.tool_call_id, false).await;
                false
            }
        }
    }

    pub fn grant(&self, req: &PermissionRequest) {
        self.resolve(&req.id, Decision::Granted);
    }

    pub fn grant_persistent(&self, req: &PermissionRequest) {
        self.resolve(&req.id, Decision::GrantedPersistent);
    }

    pub fn deny(&self, req: &PermissionRequest) {
        self.resolve(&req.id, Decision::Denied);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn resolve(&self, id: &str, decision: Decision) {
        let sender = self.state.lock().unwrap().pending.remove(id);
        match sender {
            Some(tx) => {
                let _ = tx.send(decision);
            }
            None => debug!(request_id = id, "permission reply for unknown request"),
        }
    }

    fn is_auto_approved(&self, session_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .auto_approved_sessions
            .contains(session_id)
    }

    async fn notify(&self, tool_call_id: &str, granted: bool) {
        self.broker
            .publish(
                EventKind::Created,
                EventPayload::PermissionNotification(PermissionNotification {
                    tool_call_id: tool_call_id.to_string(),
                    granted,
                    denied: !granted,
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_gate(skip: bool) -> (Arc<PermissionService>, EventBroker) {
        let broker = EventBroker::new();
        (Arc::new(PermissionService::new(broker.clone(), skip)), broker)
    }

    fn bash_request(session: &str, call: &str) -> CreatePermissionRequest {
        CreatePermissionRequest {
            session_id: session.into(),
            tool_call_id: call.into(),
            tool_name: "bash".into(),
            description: "run a command".into(),
            action: "execute".into(),
            params: json!({"command": "echo hi"}),
            path: "/tmp/w".into(),
        }
    }

    /// Drives a request on a background task and resolves it from the event
    /// stream with the provided action.
    async fn request_and_resolve(
        gate: Arc<PermissionService>,
        broker: &EventBroker,
        req: CreatePermissionRequest,
        resolve: impl FnOnce(&PermissionService, &PermissionRequest),
    ) -> bool {
        let mut sub = broker.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(req, &cancel).await }
        });

        let published = loop {
            let ev = sub.recv().await.expect("event stream closed");
            if let EventPayload::PermissionRequest(pr) = ev.payload {
                break pr;
            }
        };
        resolve(&gate, &published);
        task.await.unwrap()
    }

    #[tokio::test]
    async fn skip_mode_grants_without_publishing_requests() {
        let (gate, broker) = new_gate(true);
        let mut sub = broker.subscribe();
        let cancel = CancellationToken::new();

        assert!(gate.request(bash_request("sess_1", "t1"), &cancel).await);

        // Exactly one notification, no permission_request.
        let ev = sub.recv().await.unwrap();
        match ev.payload {
            EventPayload::PermissionNotification(n) => {
                assert!(n.granted);
                assert_eq!(n.tool_call_id, "t1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn grant_resolves_pending_request() {
        let (gate, broker) = new_gate(false);
        let allowed =
            request_and_resolve(gate.clone(), &broker, bash_request("sess_1", "t1"), |g, r| {
                g.grant(r)
            })
            .await;
        assert!(allowed);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn deny_resolves_false_with_notification() {
        let (gate, broker) = new_gate(false);
        let mut sub = broker.subscribe();
        let allowed =
            request_and_resolve(gate.clone(), &broker, bash_request("sess_1", "t1"), |g, r| {
                g.deny(r)
            })
            .await;
        assert!(!allowed);

        let mut saw_denied = false;
        while let Some(ev) = sub.try_recv() {
            if let EventPayload::PermissionNotification(n) = ev.payload {
                assert!(!n.granted);
                assert!(n.denied);
                saw_denied = true;
            }
        }
        assert!(saw_denied);
    }

    #[tokio::test]
    async fn persistent_grant_short_circuits_equivalent_params() {
        let (gate, broker) = new_gate(false);
        let allowed =
            request_and_resolve(gate.clone(), &broker, bash_request("sess_1", "t1"), |g, r| {
                g.grant_persistent(r)
            })
            .await;
        assert!(allowed);

        // Same canonical params, different key order: no new publish, instant green.
        let mut sub = broker.subscribe();
        let cancel = CancellationToken::new();
        let mut repeat = bash_request("sess_1", "t2");
        repeat.params = json!({"command": "echo hi"});
        assert!(gate.request(repeat, &cancel).await);
        assert!(sub.try_recv().is_none());

        // Different params must still prompt.
        let mut different = bash_request("sess_1", "t3");
        different.params = json!({"command": "rm -rf /"});
        let allowed = request_and_resolve(gate.clone(), &broker, different, |g, r| g.deny(r)).await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn canceled_context_denies() {
        let (gate, broker) = new_gate(false);
        let mut sub = broker.subscribe();
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.request(bash_request("sess_1", "t1"), &cancel).await }
        });

        // Wait for the request to be registered, then cancel the caller.
        loop {
            if let Some(ev) = sub.try_recv() {
                if matches!(ev.payload, EventPayload::PermissionRequest(_)) {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();

        assert!(!task.await.unwrap());
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn auto_approved_session_grants_immediately() {
        let (gate, broker) = new_gate(false);
        gate.auto_approve_session("sess_1");

        let mut sub = broker.subscribe();
        let cancel = CancellationToken::new();
        assert!(gate.request(bash_request("sess_1", "t1"), &cancel).await);

        let ev = sub.recv().await.unwrap();
        assert!(matches!(ev.payload, EventPayload::PermissionNotification(_)));
        assert!(sub.try_recv().is_none());

        // Other sessions still prompt.
        let other = bash_request("sess_2", "t2");
        let allowed = request_and_resolve(gate.clone(), &broker, other, |g, r| g.grant(r)).await;
        assert!(allowed);
    }
}
