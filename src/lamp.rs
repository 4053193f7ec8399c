//! Lamp-control threads (§4.8): one rendezvous per variant, all built on
//! the same ready/go handshake, grounded on the source's
//! `LampsControl`/`ShutterControlled`/`IISControl` class hierarchy —
//! reworked here as one struct parameterized by a [`LampVariant`] rather
//! than three subclasses, per the design notes' call for tagged-variant
//! selection over dynamic class substitution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sps_exposure_core::{Client, ExposureConfig, ExposureError, RemoteClient};

/// Bounded poll of a `goSignal`-style flag, observing both cancellation
/// flags at each tick — the lamp-thread analogue of `detector::poll_until`
/// but without a deadline of its own (a lamp thread waits indefinitely for
/// its rendezvous partner, only `doAbort`/`doFinish` can cut it short).
async fn wait_for_flag(flag: &AtomicBool, do_abort: &AtomicBool, do_finish: &AtomicBool, subsystem: &str) -> Result<(), ExposureError> {
    if do_finish.load(Ordering::Acquire) {
        return Err(ExposureError::EarlyFinish {
            subsystem: subsystem.to_owned(),
            reason: "doFinish requested before exposing".to_owned(),
        });
    }
    loop {
        if flag.load(Ordering::Acquire) {
            return Ok(());
        }
        if do_abort.load(Ordering::Acquire) {
            return Err(ExposureError::aborted(subsystem, "aborted while waiting for go signal"));
        }
        if do_finish.load(Ordering::Acquire) {
            return Err(ExposureError::EarlyFinish {
                subsystem: subsystem.to_owned(),
                reason: "doFinish requested before exposing".to_owned(),
            });
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampVariant {
    /// The default: waits for the ready signal, waits for the go signal,
    /// fires `go`, then the exposure's shutter timing is authoritative —
    /// the caller declares the exposure finished once `go` replies.
    Standard,
    /// Flats/arcs off a controlled bench: after `go` the thread additionally
    /// sleeps `shutterControlledSafetySleep` before returning, and fires
    /// `go noWait` rather than waiting for the lamp bench's own reply.
    ShutterControlled,
    /// The illumination-system lamp: skips the ready-signal wait entirely
    /// ("don't wait for ready signal, at least for now") and targets the
    /// `iis` command vocabulary instead of `go`/`waitForReadySignal`.
    Iis,
}

pub struct LampControl {
    variant: LampVariant,
    lamps_actor: String,
    config: ExposureConfig,
    client: Arc<dyn RemoteClient>,
    do_abort: Arc<AtomicBool>,
    do_finish: Arc<AtomicBool>,
    ready: AtomicBool,
    go_signal: AtomicBool,
    aborted: AtomicBool,
}

impl LampControl {
    pub fn new(
        variant: LampVariant,
        lamps_actor: impl Into<String>,
        config: ExposureConfig,
        client: Arc<dyn RemoteClient>,
        do_abort: Arc<AtomicBool>,
        do_finish: Arc<AtomicBool>,
    ) -> Self {
        Self {
            variant,
            lamps_actor: lamps_actor.into(),
            config,
            client,
            do_abort,
            do_finish,
            ready: AtomicBool::new(false),
            go_signal: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn variant(&self) -> LampVariant {
        self.variant
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Polls until the ready signal lands — the module-side half of
    /// `exp.waitForReadySignal()`, consulted before a lamp-timed module
    /// opens its shutter so the shutter-open window always covers a lamp
    /// already confirmed ready.
    pub async fn wait_until_ready(&self) -> Result<(), ExposureError> {
        wait_for_flag(&self.ready, &self.do_abort, &self.do_finish, &self.lamps_actor).await
    }

    /// Releases the go signal; a module calls this once every module it
    /// shares an exposure with has reached the variant's release condition
    /// (all shutters open, for the standard/shutter-controlled variants).
    pub fn set_go_signal(&self) {
        self.go_signal.store(true, Ordering::Release);
    }

    async fn wait_for_ready_signal(&self) -> Result<(), ExposureError> {
        let client = Client::new(self.client.as_ref());
        let reply = client
            .call_safe(&self.lamps_actor, "waitForReadySignal", self.config.lamp_ready_time_limit)
            .await;
        if reply.did_fail {
            return Err(ExposureError::LampsFailed {
                subsystem: self.lamps_actor.clone(),
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn go(&self, exptime_secs: f64) -> Result<(), ExposureError> {
        let client = Client::new(self.client.as_ref());
        let time_lim = Duration::from_secs_f64(exptime_secs) + self.config.lamp_go_overhead;

        match self.variant {
            LampVariant::ShutterControlled => {
                let reply = client.call_safe(&self.lamps_actor, "go noWait", Duration::from_secs(10)).await;
                if reply.did_fail {
                    return Err(ExposureError::LampsFailed {
                        subsystem: self.lamps_actor.clone(),
                        reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
                    });
                }
                tokio::time::sleep(self.config.shutter_controlled_safety_sleep).await;
                Ok(())
            }
            LampVariant::Iis => {
                let reply = client.call_safe(&self.lamps_actor, "iis go", time_lim).await;
                if reply.did_fail {
                    return Err(ExposureError::IisFailed {
                        subsystem: self.lamps_actor.clone(),
                        reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
                    });
                }
                Ok(())
            }
            LampVariant::Standard => {
                let reply = client.call_safe(&self.lamps_actor, "go", time_lim).await;
                if reply.did_fail {
                    return Err(ExposureError::LampsFailed {
                        subsystem: self.lamps_actor.clone(),
                        reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
                    });
                }
                Ok(())
            }
        }
    }

    /// Runs the variant's full ready → go-signal → go sequence, returning
    /// once the lamp bench has confirmed illumination (or the safety sleep
    /// has elapsed, for `ShutterControlled`). The IIS variant skips the
    /// ready-signal wait.
    pub async fn run(&self, exptime_secs: f64) -> Result<(), ExposureError> {
        if self.variant != LampVariant::Iis {
            self.wait_for_ready_signal().await?;
        }
        wait_for_flag(&self.go_signal, &self.do_abort, &self.do_finish, &self.lamps_actor).await?;
        self.go(exptime_secs).await
    }

    /// Idempotent: sends `stop` once, swallowing a second call.
    pub async fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = Client::new(self.client.as_ref());
        let _ = client.call_safe(&self.lamps_actor, "stop", Duration::from_secs(5)).await;
    }

    /// The deferred "declare done" action sent once `waitForCompletion`
    /// returns — distinct from `abort`, but the same command on this bench.
    pub async fn declare_done(&self) {
        let client = Client::new(self.client.as_ref());
        let _ = client.call_safe(&self.lamps_actor, "stop", Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sps_exposure_core::ReplyBundle;

    struct FakeLamps;

    #[async_trait::async_trait]
    impl RemoteClient for FakeLamps {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    fn control(variant: LampVariant) -> (LampControl, Arc<AtomicBool>, Arc<AtomicBool>) {
        let do_abort = Arc::new(AtomicBool::new(false));
        let do_finish = Arc::new(AtomicBool::new(false));
        let control = LampControl::new(
            variant,
            "dcb",
            ExposureConfig::default(),
            Arc::new(FakeLamps),
            do_abort.clone(),
            do_finish.clone(),
        );
        (control, do_abort, do_finish)
    }

    #[tokio::test]
    async fn standard_variant_waits_for_ready_then_go_signal() {
        let (control, _, _) = control(LampVariant::Standard);
        let run = async {
            control.run(1.0).await
        };
        control.set_go_signal();
        assert!(run.await.is_ok());
        assert!(control.is_ready());
    }

    #[tokio::test]
    async fn iis_variant_skips_ready_signal_wait() {
        let (control, _, _) = control(LampVariant::Iis);
        control.set_go_signal();
        assert!(control.run(1.0).await.is_ok());
        assert!(!control.is_ready());
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let (control, _, _) = control(LampVariant::Standard);
        control.abort().await;
        control.abort().await;
    }

    #[tokio::test]
    async fn early_finish_before_go_signal_is_reported() {
        let (control, _, do_finish) = control(LampVariant::Standard);
        do_finish.store(true, Ordering::Release);
        let result = control.run(1.0).await;
        assert!(matches!(result, Err(ExposureError::EarlyFinish { .. })));
    }
}
