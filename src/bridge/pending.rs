use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use super::envelope::Nonce;
use crate::error::BridgeError;

pub(crate) type CallReply = Result<Value, BridgeError>;

#[derive(Debug)]
struct PendingCall {
    name: String,
    responder: oneshot::Sender<CallReply>,
}

/// Outstanding calls awaiting a `resolve` or `reject`.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    entries: HashMap<Nonce, PendingCall>,
}

impl PendingCalls {
    pub fn insert(&mut self, nonce: Nonce, name: &str) -> oneshot::Receiver<CallReply> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            nonce,
            PendingCall {
                name: name.to_string(),
                responder: tx,
            },
        );
        rx
    }

    /// Complete the call for `nonce`. Returns the call's name, or `None` if
    /// no call with that nonce is outstanding.
    pub fn settle(&mut self, nonce: Nonce, reply: CallReply) -> Option<String> {
        let entry = self.entries.remove(&nonce)?;
        // The caller may have stopped waiting; that is not our concern.
        let _ = entry.responder.send(reply);
        Some(entry.name)
    }

    /// Drop the entry without answering it.
    pub fn forget(&mut self, nonce: Nonce) -> bool {
        self.entries.remove(&nonce).is_some()
    }

    /// Fail every outstanding call. Returns how many were failed.
    pub fn reject_all(&mut self, make_error: impl Fn() -> BridgeError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.responder.send(Err(make_error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_settle_delivers_reply_once() {
        let mut pending = PendingCalls::default();
        let rx = pending.insert(1, "echo");
        assert_eq!(pending.len(), 1);

        assert_eq!(pending.settle(1, Ok(json!("hi"))), Some("echo".to_string()));
        assert_eq!(rx.await.unwrap().unwrap(), json!("hi"));

        assert_eq!(pending.settle(1, Ok(json!("again"))), None);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_reject_all_fails_every_waiter() {
        let mut pending = PendingCalls::default();
        let a = pending.insert(1, "a");
        let b = pending.insert(2, "b");

        assert_eq!(pending.reject_all(|| BridgeError::Closed), 2);
        assert!(a.await.unwrap().unwrap_err().is_closed());
        assert!(b.await.unwrap().unwrap_err().is_closed());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_forget_drops_responder() {
        let mut pending = PendingCalls::default();
        let rx = pending.insert(9, "slow");
        assert!(pending.forget(9));
        assert!(!pending.forget(9));
        assert!(rx.await.is_err());
    }
}
