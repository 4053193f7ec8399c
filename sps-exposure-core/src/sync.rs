//! `Sync` / `CmdThread`: parallel fan-out of N commands to N remote actors.
//!
//! Used directly for batch commands (slit, rda, bia, iis, ccdMotors, erase)
//! and as the primitive underlying exposure-internal sub-commands such as
//! the per-camera wipe/read dispatch.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::client::{Client, ReplyBundle, RemoteClient};
use crate::error::ExposureError;
use crate::failures::FailureSet;
use crate::keywords::KeywordRegistry;

/// Consulted before a command is dispatched; `Err` cancels the dispatch
/// (nothing is sent on the wire) with the contained reason.
pub type PreCheck = Arc<dyn Fn(&KeywordRegistry) -> Result<(), String> + Send + Sync>;

/// Consulted after a successful reply; used to republish refreshed status
/// keywords (e.g. slit focus/dither, `rda=<position>`, `bia=<state>`).
pub type PostCheck = Arc<dyn Fn(&KeywordRegistry, &ReplyBundle) + Send + Sync>;

/// One leg of a `Sync` fan-out: a single actor/command pair plus the
/// checks and the typed failure it should raise if something goes wrong.
#[derive(Clone)]
pub struct CmdThread {
    pub actor: String,
    pub cmd: String,
    pub time_lim: Duration,
    pub pre_check: Option<PreCheck>,
    pub post_check: Option<PostCheck>,
    pub on_fail: fn(String, String) -> ExposureError,
}

impl CmdThread {
    pub fn new(
        actor: impl Into<String>,
        cmd: impl Into<String>,
        time_lim: Duration,
        on_fail: fn(String, String) -> ExposureError,
    ) -> Self {
        Self {
            actor: actor.into(),
            cmd: cmd.into(),
            time_lim,
            pre_check: None,
            post_check: None,
            on_fail,
        }
    }

    pub fn with_pre_check(mut self, check: PreCheck) -> Self {
        self.pre_check = Some(check);
        self
    }

    pub fn with_post_check(mut self, check: PostCheck) -> Self {
        self.post_check = Some(check);
        self
    }
}

/// Runs one batch of `CmdThread`s to completion, accumulating failures into
/// `failures`. Returns `Ok(())` if every leg succeeded, `Err(formatted)`
/// otherwise — `formatted` is `failures.format()` at the point this batch
/// finished (it may include failures recorded by other concurrent callers
/// sharing the same accumulator).
pub async fn process(
    threads: Vec<CmdThread>,
    client: &dyn RemoteClient,
    registry: &KeywordRegistry,
    failures: &FailureSet,
) -> Result<(), String> {
    let client = Client::new(client);

    let legs = threads.into_iter().map(|thread| {
        let client = &client;
        async move {
            if let Some(pre_check) = &thread.pre_check {
                if let Err(reason) = pre_check(registry) {
                    tracing::debug!(actor = %thread.actor, reason, "pre-check cancelled dispatch");
                    failures.add((thread.on_fail)(thread.actor.clone(), reason).to_string());
                    return;
                }
            }

            tracing::info!(actor = %thread.actor, cmd = %thread.cmd, "calling");
            let reply = client.call_safe(&thread.actor, &thread.cmd, thread.time_lim).await;

            if reply.did_fail {
                let reason = reply.last_reply.clone().unwrap_or_else(|| "no reply".to_owned());
                failures.add((thread.on_fail)(thread.actor.clone(), reason).to_string());
                return;
            }

            if let Some(post_check) = &thread.post_check {
                post_check(registry, &reply);
            }
        }
    });

    join_all(legs).await;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeActors {
        fail_actors: Vec<String>,
        dispatched: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl RemoteClient for FakeActors {
        async fn call_raw(&self, actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            self.dispatched.lock().unwrap().push(actor.to_owned());
            if self.fail_actors.contains(&actor.to_owned()) {
                ReplyBundle::failure("simulated failure")
            } else {
                ReplyBundle::success(HashMap::new())
            }
        }

        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    #[tokio::test]
    async fn all_legs_succeed() {
        let actors = FakeActors {
            fail_actors: vec![],
            dispatched: Default::default(),
        };
        let registry = KeywordRegistry::new();
        let failures = FailureSet::new();
        let threads = vec![
            CmdThread::new("enu_sm1", "rexm moveTo low", Duration::from_secs(180), |a, r| {
                ExposureError::MotorsFailed { subsystem: a, reason: r }
            }),
            CmdThread::new("enu_sm2", "rexm moveTo low", Duration::from_secs(180), |a, r| {
                ExposureError::MotorsFailed { subsystem: a, reason: r }
            }),
        ];
        let result = process(threads, &actors, &registry, &failures).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn pre_check_cancels_dispatch_for_one_leg_only() {
        let dispatched = std::sync::Mutex::new(Vec::new());
        let actors = FakeActors {
            fail_actors: vec![],
            dispatched,
        };
        let registry = KeywordRegistry::new();
        let failures = FailureSet::new();
        let blocked = Arc::new(AtomicUsize::new(0));
        let blocked2 = blocked.clone();

        let threads = vec![
            CmdThread::new("enu_sm1", "rexm moveTo low", Duration::from_secs(180), |a, r| {
                ExposureError::SlitMoveFailed { subsystem: a, reason: r }
            }),
            CmdThread::new("enu_sm2", "rexm moveTo low", Duration::from_secs(180), |a, r| {
                ExposureError::SlitMoveFailed { subsystem: a, reason: r }
            })
            .with_pre_check(Arc::new(move |_registry| {
                blocked2.fetch_add(1, Ordering::SeqCst);
                Err("rexmFSM is (ONLINE, MOVING)".to_owned())
            })),
        ];

        let result = process(threads, &actors, &registry, &failures).await;
        assert!(result.is_err());
        assert_eq!(blocked.load(Ordering::SeqCst), 1);
        assert!(failures.format().contains("enu_sm2"));
        assert!(!failures.format().contains("enu_sm1"));
        assert_eq!(actors.dispatched.lock().unwrap().len(), 1);
    }
}
