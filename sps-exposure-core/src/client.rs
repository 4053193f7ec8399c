//! Remote call client: the boundary against opaque remote subsystem actors.
//!
//! The transport itself (wire format, connection management) is out of
//! scope; `RemoteClient` is the seam a production actor would implement on
//! top of whatever RPC layer it is embedded in.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

/// The outcome of one `call`: a success flag, the most recent failure text
/// (if any), and whatever keywords the actor published in response.
#[derive(Debug, Clone, Default)]
pub struct ReplyBundle {
    pub did_fail: bool,
    pub last_reply: Option<String>,
    pub keywords: HashMap<String, Vec<String>>,
}

impl ReplyBundle {
    pub fn success(keywords: HashMap<String, Vec<String>>) -> Self {
        Self {
            did_fail: false,
            last_reply: None,
            keywords,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            did_fail: true,
            last_reply: Some(reason.into()),
            keywords: HashMap::new(),
        }
    }

    pub fn timed_out() -> Self {
        Self::failure("timed out")
    }

    /// Pulls a single keyword value, e.g. `exptime` from a `read` reply.
    pub fn keyword(&self, name: &str) -> Option<&str> {
        self.keywords.get(name).and_then(|v| v.first()).map(String::as_str)
    }
}

/// A named request dispatched to one remote actor, with a mandatory time
/// limit. Implementors own the actual wire round-trip; this crate only
/// needs the reply shape above.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn call_raw(&self, actor: &str, command: &str, time_limit: Duration) -> ReplyBundle;

    /// Fire-and-forget dispatch: returns as soon as the command has been
    /// sent. Considered successful unless the transport itself fails.
    async fn call_no_wait(&self, actor: &str, command: &str) -> ReplyBundle;
}

/// Thin convenience wrapper adding the "crude" / "safe" call variants over
/// any `RemoteClient`. The "safe" variant additionally logs a warning
/// naming the failing actor and a short form of the command.
pub struct Client<'a> {
    inner: &'a dyn RemoteClient,
}

impl<'a> Client<'a> {
    pub fn new(inner: &'a dyn RemoteClient) -> Self {
        Self { inner }
    }

    /// "Crude" call: returns the reply bundle as-is, with a timeout applied
    /// around the transport round-trip so a hung actor cannot hang the
    /// caller past `time_limit`.
    pub async fn call(&self, actor: &str, command: &str, time_limit: Duration) -> ReplyBundle {
        match tokio::time::timeout(time_limit, self.inner.call_raw(actor, command, time_limit)).await {
            Ok(reply) => reply,
            Err(_) => ReplyBundle::timed_out(),
        }
    }

    /// "Safe" call: same as `call`, but logs a warning on failure.
    pub async fn call_safe(&self, actor: &str, command: &str, time_limit: Duration) -> ReplyBundle {
        let reply = self.call(actor, command, time_limit).await;
        if reply.did_fail {
            let short = command.split_whitespace().next().unwrap_or(command);
            tracing::warn!(actor, command = short, reason = ?reply.last_reply, "remote call failed");
        }
        reply
    }

    pub async fn call_no_wait(&self, actor: &str, command: &str) -> ReplyBundle {
        self.inner.call_no_wait(actor, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowClient {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteClient for SlowClient {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            ReplyBundle::success(HashMap::new())
        }

        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    #[tokio::test]
    async fn expiry_is_reported_as_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = SlowClient {
            delay: Duration::from_millis(50),
            calls: calls.clone(),
        };
        let client = Client::new(&inner);
        let reply = client.call("ccd_b1", "wipe", Duration::from_millis(5)).await;
        assert!(reply.did_fail);
    }

    #[tokio::test]
    async fn fast_call_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = SlowClient {
            delay: Duration::from_millis(1),
            calls,
        };
        let client = Client::new(&inner);
        let reply = client.call("ccd_b1", "wipe", Duration::from_secs(1)).await;
        assert!(!reply.did_fail);
    }
}
