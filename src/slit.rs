//! Slit-motion thread (§4.9), grounded on the source's `SlitControl` plus
//! the two `driftSlitExposure` variants: the mutual lamp/slit rendezvous,
//! and the slit-as-sole-timing-driver form used when there is no lamp
//! thread in the exposure at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sps_exposure_core::{Client, ExposureConfig, ExposureError, KeyVar, KeywordRegistry, RemoteClient, Subscription};

async fn wait_for_flag(flag: &AtomicBool, do_abort: &AtomicBool, do_finish: &AtomicBool, subsystem: &str) -> Result<(), ExposureError> {
    loop {
        if flag.load(Ordering::Acquire) {
            return Ok(());
        }
        if do_abort.load(Ordering::Acquire) {
            return Err(ExposureError::aborted(subsystem, "aborted while waiting for slit go signal"));
        }
        if do_finish.load(Ordering::Acquire) {
            return Err(ExposureError::EarlyFinish {
                subsystem: subsystem.to_owned(),
                reason: "doFinish requested before slit motion started".to_owned(),
            });
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub struct SlitControl {
    enu_actor: String,
    pixel_range: (f64, f64),
    exptime_secs: f64,
    config: ExposureConfig,
    client: Arc<dyn RemoteClient>,
    do_abort: Arc<AtomicBool>,
    do_finish: Arc<AtomicBool>,
    go_signal: AtomicBool,
    at_speed: Arc<AtomicBool>,
    aborted: AtomicBool,
    _at_speed_sub: Subscription,
}

impl SlitControl {
    /// Subscribes to this module's `slitFSM` keyword so `isSliding` reflects
    /// the hexapod's own reported state rather than this thread's intent —
    /// the standalone variant's `postWipeFunc` blocks on that observation,
    /// not on having issued the move.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enu_actor: impl Into<String>,
        pixel_range: (f64, f64),
        exptime_secs: f64,
        config: ExposureConfig,
        client: Arc<dyn RemoteClient>,
        registry: KeywordRegistry,
        do_abort: Arc<AtomicBool>,
        do_finish: Arc<AtomicBool>,
    ) -> Self {
        let enu_actor = enu_actor.into();
        registry.add_model(&enu_actor);

        let at_speed = Arc::new(AtomicBool::new(false));
        let at_speed_cb = at_speed.clone();
        let sub = registry.subscribe(
            &enu_actor,
            "slitFSM",
            Arc::new(move |kv: &KeyVar| {
                let Some(state) = kv.values.first() else { return };
                at_speed_cb.store(state.to_lowercase().contains("speed"), Ordering::Release);
            }),
        );

        Self {
            enu_actor,
            pixel_range,
            exptime_secs,
            config,
            client,
            do_abort,
            do_finish,
            go_signal: AtomicBool::new(false),
            at_speed,
            aborted: AtomicBool::new(false),
            _at_speed_sub: sub,
        }
    }

    pub fn set_go_signal(&self) {
        self.go_signal.store(true, Ordering::Release);
    }

    pub fn is_sliding(&self) -> bool {
        self.at_speed.load(Ordering::Acquire)
    }

    /// Test/manual-override seam mirroring what the `slitFSM` subscription
    /// set up in `new` normally drives.
    pub fn mark_at_speed(&self, at_speed: bool) {
        self.at_speed.store(at_speed, Ordering::Release);
    }

    async fn go(&self) -> Result<(), ExposureError> {
        let (lo, hi) = self.pixel_range;
        let cmd = format!("slit linearVerticalMove expTime={:.2} pixelRange={lo},{hi}", self.exptime_secs);
        let time_lim = Duration::from_secs_f64(self.exptime_secs) + self.config.slit_move_overhead;
        let client = Client::new(self.client.as_ref());
        let reply = client.call_safe(&self.enu_actor, &cmd, time_lim).await;
        if reply.did_fail {
            return Err(ExposureError::SlitMoveFailed {
                subsystem: self.enu_actor.clone(),
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }
        Ok(())
    }

    /// Waits for the module's release signal, then starts the slide. Used
    /// by the mutual-rendezvous variant, where the release comes from the
    /// shutter-open callback.
    pub async fn run(&self) -> Result<(), ExposureError> {
        wait_for_flag(&self.go_signal, &self.do_abort, &self.do_finish, &self.enu_actor).await?;
        self.go().await
    }

    /// Starts the slide immediately and blocks until the hexapod reports
    /// cruising speed — the standalone variant's `postWipeFunc`, which
    /// replaces the shutter as the exposure's timing gate entirely.
    pub async fn start_and_wait_at_speed(&self) -> Result<(), ExposureError> {
        self.go().await?;
        loop {
            if self.at_speed.load(Ordering::Acquire) {
                return Ok(());
            }
            if self.do_abort.load(Ordering::Acquire) {
                return Err(ExposureError::aborted(&self.enu_actor, "aborted while waiting for slit at-speed"));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Idempotent: sends `slit abort` once.
    pub async fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = Client::new(self.client.as_ref());
        let _ = client.call_safe(&self.enu_actor, "slit abort", Duration::from_secs(15)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sps_exposure_core::ReplyBundle;

    struct FakeEnu;

    #[async_trait::async_trait]
    impl RemoteClient for FakeEnu {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    fn control() -> (SlitControl, Arc<AtomicBool>, Arc<AtomicBool>) {
        let do_abort = Arc::new(AtomicBool::new(false));
        let do_finish = Arc::new(AtomicBool::new(false));
        let control = SlitControl::new(
            "enu_sm1",
            (100.0, 2000.0),
            10.0,
            ExposureConfig::default(),
            Arc::new(FakeEnu),
            sps_exposure_core::KeywordRegistry::new(),
            do_abort.clone(),
            do_finish.clone(),
        );
        (control, do_abort, do_finish)
    }

    #[tokio::test]
    async fn run_waits_for_go_signal_before_moving() {
        let (control, _, _) = control();
        control.set_go_signal();
        assert!(control.run().await.is_ok());
    }

    #[tokio::test]
    async fn standalone_variant_blocks_until_at_speed() {
        let (control, _, _) = control();
        control.mark_at_speed(true);
        assert!(control.start_and_wait_at_speed().await.is_ok());
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let (control, _, _) = control();
        control.abort().await;
        control.abort().await;
    }
}
