//! IR (hx) detector thread: ramp discipline — a reset frame followed by N
//! reads of duration `readTime`, with a startup watchdog and a final-read
//! rule driven by the module's shutter-close callback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};

use sps_exposure_core::{CameraId, Client, ExposureConfig, ExposureError, KeyVar, KeywordRegistry, RemoteClient, Subscription};

use super::ReadOutcome;

/// `beam_config_date` sentinel meaning "unavailable" — the IR detector
/// never produces a real value for it.
pub const IR_BEAM_CONFIG_DATE: f64 = 9998.0;

fn n_read0(exptype: &str, exptime_secs: f64, config: &ExposureConfig) -> u32 {
    let read_time = config.ramp.read_time_secs;
    match exptype {
        "bias" => 0,
        "dark" => (exptime_secs / read_time).round() as u32 + 1,
        _ => {
            let base = ((exptime_secs + config.exp_time_overhead_secs) / read_time).floor() as u32;
            base + config.ramp.n_read_min + config.ramp.n_extra_read
        }
    }
}

#[derive(Default)]
struct Inner {
    wiped_at: Option<Instant>,
    obstime: Option<OffsetDateTime>,
    outcome: Option<ReadOutcome>,
}

pub struct IrDetector {
    pub cam: CameraId,
    client: Arc<dyn RemoteClient>,
    registry: KeywordRegistry,
    config: ExposureConfig,
    do_abort: Arc<AtomicBool>,
    do_finish: Arc<AtomicBool>,
    n_read_target: AtomicU32,
    n_read_observed: Arc<AtomicU32>,
    wiped: Arc<AtomicBool>,
    reset_observed: Arc<AtomicBool>,
    do_finalize: AtomicBool,
    cleared: AtomicBool,
    notify: Arc<Notify>,
    inner: Mutex<Inner>,
    _subscription: Subscription,
}

impl IrDetector {
    pub fn new(
        cam: CameraId,
        client: Arc<dyn RemoteClient>,
        registry: KeywordRegistry,
        config: ExposureConfig,
        do_abort: Arc<AtomicBool>,
        do_finish: Arc<AtomicBool>,
    ) -> Self {
        let actor = cam.hx_actor();
        registry.add_model(&actor);

        let wiped = Arc::new(AtomicBool::new(false));
        let reset_observed = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let n_read_observed = Arc::new(AtomicU32::new(0));

        let wiped_cb = wiped.clone();
        let reset_cb = reset_observed.clone();
        let notify_cb = notify.clone();
        let n_read_observed_cb = n_read_observed.clone();

        let subscription = registry.subscribe(
            &actor,
            "hxread",
            Arc::new(move |kv: &KeyVar| {
                if let Some(state) = kv.values.first() {
                    match state.as_str() {
                        "reset" => {
                            reset_cb.store(true, Ordering::Release);
                        }
                        "read" => {
                            wiped_cb.store(true, Ordering::Release);
                            n_read_observed_cb.fetch_add(1, Ordering::AcqRel);
                        }
                        _ => {}
                    }
                }
                notify_cb.notify_waiters();
            }),
        );

        Self {
            cam,
            client,
            registry,
            config,
            do_abort,
            do_finish,
            n_read_target: AtomicU32::new(0),
            n_read_observed,
            wiped,
            reset_observed,
            do_finalize: AtomicBool::new(false),
            cleared: AtomicBool::new(false),
            notify,
            inner: Mutex::new(Inner::default()),
            _subscription: subscription,
        }
    }

    fn actor(&self) -> String {
        self.cam.hx_actor()
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.is_cleared() || self.wiped.load(Ordering::Acquire) && self.n_read_observed.load(Ordering::Acquire) >= self.n_read_target.load(Ordering::Acquire)
    }

    pub async fn is_storable(&self) -> bool {
        !self.is_cleared() && self.inner.lock().await.outcome.is_some()
    }

    /// Issues the ramp and blocks until the reset frame is observed,
    /// enforcing the reset half of the startup watchdog (§4.6). Returns the
    /// deadline for [`Self::wait_first_read`], which the module runs
    /// concurrently with the CCD wipes in the same sync cohort so first-read
    /// alignment across detector types is preserved.
    pub async fn start_ramp(
        &self,
        visit: u64,
        exptype: &str,
        exptime_secs: f64,
        pfs_design_id: i64,
    ) -> Result<Instant, ExposureError> {
        let actor = self.actor();
        let n_read = n_read0(exptype, exptime_secs, &self.config);
        self.n_read_target.store(n_read, Ordering::Release);

        let cmd = format!(
            "ramp nread={n_read} visit={visit} exptype={exptype} expectedExptime={exptime_secs:.2} pfsDesign=0x{pfs_design_id:016x}"
        );
        let client = Client::new(self.client.as_ref());
        let reply = client.call_safe(&actor, &cmd, self.config.read_time_limit).await;
        if reply.did_fail {
            return Err(ExposureError::HxRampFailed {
                subsystem: actor,
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }

        let start_ramp = Instant::now();
        let read_time = self.config.ramp.read_time_secs;
        let max_reset_duration = std::time::Duration::from_secs_f64(2.0 * read_time + 5.0);
        let max_first_read_duration = std::time::Duration::from_secs_f64(3.0 * read_time + 5.0);

        let reset_deadline = start_ramp + max_reset_duration;
        while !self.reset_observed.load(Ordering::Acquire) {
            if Instant::now() >= reset_deadline {
                return Err(ExposureError::HxRampFailed {
                    subsystem: actor,
                    reason: "reset frame not observed before watchdog deadline".to_owned(),
                });
            }
            self.wait_or_timeout(reset_deadline).await;
        }

        let mut inner = self.inner.lock().await;
        inner.wiped_at = Some(Instant::now());
        inner.obstime = Some(OffsetDateTime::now_utc());
        drop(inner);

        Ok(start_ramp + max_first_read_duration)
    }

    /// Waits for the first integration frame, enforcing the remaining half
    /// of the startup watchdog. The module calls this concurrently with its
    /// CCD wipes (§4.6); `wiped()` only flips once this returns `Ok`.
    pub async fn wait_first_read(&self, first_read_deadline: Instant) -> Result<(), ExposureError> {
        let actor = self.actor();
        while !self.wiped.load(Ordering::Acquire) {
            if Instant::now() >= first_read_deadline {
                return Err(ExposureError::HxRampFailed {
                    subsystem: actor,
                    reason: "first read not observed before watchdog deadline".to_owned(),
                });
            }
            self.wait_or_timeout(first_read_deadline).await;
        }
        Ok(())
    }

    /// Convenience composition of [`Self::start_ramp`] +
    /// [`Self::wait_first_read`] for a module with no CCDs to interleave
    /// with (an IR-only spectrograph module).
    pub async fn wipe(&self, visit: u64, exptype: &str, exptime_secs: f64, pfs_design_id: i64) -> Result<(), ExposureError> {
        let deadline = self.start_ramp(visit, exptype, exptime_secs, pfs_design_id).await?;
        self.wait_first_read(deadline).await
    }

    pub fn wiped(&self) -> bool {
        self.wiped.load(Ordering::Acquire)
    }

    async fn wait_or_timeout(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let _ = tokio::time::timeout(remaining.min(std::time::Duration::from_millis(50)), self.notify.notified()).await;
    }

    /// Called from the module's shutter-close callback: from the next
    /// `hxread` onward, a short ramp will be stopped early.
    pub fn declare_final_read(&self) {
        self.do_finalize.store(true, Ordering::Release);
    }

    /// Waits for the ramp to complete (naturally, or stopped early once
    /// `declare_final_read` fires and fewer than `nExtraRead` reads
    /// remain), then records the read outcome.
    pub async fn finish_ramp(&self, exptime_secs: f64) -> Result<(), ExposureError> {
        let actor = self.actor();
        let n_target = self.n_read_target.load(Ordering::Acquire);
        let n_extra = self.config.ramp.n_extra_read;

        loop {
            let observed = self.n_read_observed.load(Ordering::Acquire);
            let finalize = self.do_finalize.load(Ordering::Acquire);
            if finalize && observed + 1 + n_extra < n_target {
                let client = Client::new(self.client.as_ref());
                let reply = client
                    .call_safe(&actor, "ramp finish stopRamp", self.config.read_time_limit)
                    .await;
                if reply.did_fail {
                    return Err(ExposureError::HxRampFailed {
                        subsystem: actor,
                        reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
                    });
                }
                break;
            }
            if observed >= n_target {
                break;
            }
            let far_future = Instant::now() + std::time::Duration::from_secs(3600);
            self.wait_or_timeout(far_future).await;
        }

        let (wiped_at, obstime) = {
            let inner = self.inner.lock().await;
            (
                inner.wiped_at.expect("finish_ramp called before wipe completed"),
                inner.obstime.expect("finish_ramp called before wipe completed"),
            )
        };
        let darktime = wiped_at.elapsed().as_secs_f64();
        let _obstime_iso = obstime.format(&Rfc3339).unwrap_or_default();
        let time_exp_start = obstime;
        let time_exp_end = time_exp_start + time::Duration::seconds_f64(exptime_secs);

        self.inner.lock().await.outcome = Some(ReadOutcome {
            cam: self.cam,
            exptime: exptime_secs,
            darktime,
            time_exp_start,
            time_exp_end,
            beam_config_date: IR_BEAM_CONFIG_DATE,
        });
        Ok(())
    }

    /// For a dark exposure (no shutter event): the final read is computed
    /// from `nRead0 · readTime` rather than a shutter-close callback.
    pub async fn finish_dark_ramp(&self) -> Result<(), ExposureError> {
        let n_target = self.n_read_target.load(Ordering::Acquire) as f64;
        let exptime = n_target * self.config.ramp.read_time_secs;
        self.n_read_observed.store(n_target as u32, Ordering::Release);
        self.finish_ramp(exptime).await
    }

    pub async fn store(&self) -> Option<ReadOutcome> {
        self.inner.lock().await.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_read0_for_bias_is_zero() {
        let config = ExposureConfig::default();
        assert_eq!(n_read0("bias", 0.0, &config), 0);
    }

    #[test]
    fn n_read0_for_dark_uses_round() {
        let mut config = ExposureConfig::default();
        config.ramp.read_time_secs = 10.857;
        assert_eq!(n_read0("dark", 60.0, &config), 7);
    }

    #[test]
    fn n_read0_for_object_adds_min_and_extra_reads() {
        let mut config = ExposureConfig::default();
        config.ramp.read_time_secs = 10.0;
        config.exp_time_overhead_secs = 10.0;
        config.ramp.n_read_min = 3;
        config.ramp.n_extra_read = 1;
        // (5 + 10) / 10 = 1 (floor) + 3 + 1 = 5
        assert_eq!(n_read0("object", 5.0, &config), 5);
    }
}
