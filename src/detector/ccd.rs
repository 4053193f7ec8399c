//! CCD detector thread: `none → wiping → integrating → reading → idle`,
//! with `cleared` reachable from any state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use atomic::Atomic;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use sps_exposure_core::{CameraId, Client, ExposureConfig, ExposureError, KeyVar, KeywordRegistry, RemoteClient, Subscription};

use super::{poll_until, LightSource, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CcdState {
    #[default]
    None,
    Wiping,
    Integrating,
    Reading,
    Idle,
    Cleared,
}

impl CcdState {
    fn from_exposure_state(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "wiping" => Some(Self::Wiping),
            "integrating" => Some(Self::Integrating),
            "reading" => Some(Self::Reading),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }
}

/// The result of a finished read, sufficient to build the `sps_exposure`
/// persistence row (§4.5 Persistence).
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub cam: CameraId,
    pub exptime: f64,
    pub darktime: f64,
    pub time_exp_start: OffsetDateTime,
    pub time_exp_end: OffsetDateTime,
    pub beam_config_date: f64,
}

#[derive(Default)]
struct Inner {
    wiped_at: Option<Instant>,
    obstime: Option<OffsetDateTime>,
    outcome: Option<ReadOutcome>,
}

pub struct CcdDetector {
    pub cam: CameraId,
    client: Arc<dyn RemoteClient>,
    registry: KeywordRegistry,
    config: ExposureConfig,
    state: Arc<Atomic<CcdState>>,
    cleared: Arc<AtomicBool>,
    do_abort: Arc<AtomicBool>,
    do_finish: Arc<AtomicBool>,
    inner: Mutex<Inner>,
    _subscription: Subscription,
}

impl CcdDetector {
    pub fn new(
        cam: CameraId,
        client: Arc<dyn RemoteClient>,
        registry: KeywordRegistry,
        config: ExposureConfig,
        do_abort: Arc<AtomicBool>,
        do_finish: Arc<AtomicBool>,
    ) -> Self {
        let actor = cam.ccd_actor();
        registry.add_model(&actor);

        let state = Arc::new(Atomic::new(CcdState::None));
        let state_for_cb = state.clone();

        let subscription = registry.subscribe(
            &actor,
            "exposureState",
            Arc::new(move |kv: &KeyVar| {
                if let Some(value) = kv.values.first() {
                    if let Some(new_state) = CcdState::from_exposure_state(value) {
                        state_for_cb.store(new_state, Ordering::Release);
                    }
                }
            }),
        );

        Self {
            cam,
            client,
            registry,
            config,
            state,
            cleared: Arc::new(AtomicBool::new(false)),
            do_abort,
            do_finish,
            inner: Mutex::new(Inner::default()),
            _subscription: subscription,
        }
    }

    pub fn state(&self) -> CcdState {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }

    /// `isFinished = storable ∨ cleared`.
    pub fn is_finished(&self) -> bool {
        self.is_cleared() || self.state() == CcdState::Idle
    }

    /// `storable ⇒ readVar present`.
    pub async fn is_storable(&self) -> bool {
        !self.is_cleared() && self.inner.lock().await.outcome.is_some()
    }

    fn actor(&self) -> String {
        self.cam.ccd_actor()
    }

    pub async fn clear_exposure(&self) {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = Client::new(self.client.as_ref());
        let _ = client
            .call_safe(&self.actor(), "clearExposure", self.config.clear_time_limit)
            .await;
        self.state.store(CcdState::Cleared, Ordering::Release);
    }

    pub async fn wipe(&self, window: Option<Window>) -> Result<(), ExposureError> {
        let actor = self.actor();
        let cmd = match window {
            Some(_) => "wipe nrows=0".to_owned(),
            None => "wipe".to_owned(),
        };

        let client = Client::new(self.client.as_ref());
        let reply = client.call_safe(&actor, &cmd, self.config.wipe_time_limit).await;
        if reply.did_fail {
            self.clear_exposure().await;
            return Err(ExposureError::WipeFailed {
                subsystem: actor,
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }

        let deadline = Instant::now() + self.config.wipe_time_limit;
        loop {
            if self.state() == CcdState::Integrating {
                break;
            }
            if Instant::now() >= deadline {
                self.clear_exposure().await;
                return Err(ExposureError::WipeFailed {
                    subsystem: actor,
                    reason: "integrating state not observed before time limit".to_owned(),
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let mut inner = self.inner.lock().await;
        inner.wiped_at = Some(Instant::now());
        inner.obstime = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    pub async fn integrate(&self, exptime_secs: f64) -> Result<(), ExposureError> {
        let wiped_at = self.inner.lock().await.wiped_at;
        let wiped_at = wiped_at.expect("integrate called before wipe completed");
        let deadline = wiped_at + std::time::Duration::from_secs_f64(exptime_secs);
        poll_until(deadline, &self.do_abort, &self.do_finish, &self.actor()).await
    }

    /// Reads the detector. `light_source` decides whether a read failure
    /// discards the data (`Dcb`) or is kept for possible recovery (`Pfi`).
    #[allow(clippy::too_many_arguments)]
    pub async fn read(
        &self,
        exptype: &str,
        visit: u64,
        exptime_secs: f64,
        window: Option<Window>,
        light_source: LightSource,
        beam_config_date: f64,
        pfs_design_id: i64,
    ) -> Result<(), ExposureError> {
        let actor = self.actor();
        let (wiped_at, obstime) = {
            let inner = self.inner.lock().await;
            (
                inner.wiped_at.expect("read called before wipe completed"),
                inner.obstime.expect("read called before wipe completed"),
            )
        };
        let darktime = wiped_at.elapsed().as_secs_f64();
        let obstime_iso = obstime.format(&Rfc3339).unwrap_or_default();

        let mut cmd = format!(
            "read {exptype} visit={visit} exptime={exptime_secs:.2} darktime={darktime:.2} obstime={obstime_iso} pfsDesign=0x{pfs_design_id:016x}"
        );
        if let Some(window) = window {
            cmd.push_str(&format!(" row0={} nrows={}", window.row0, window.nrows));
        }

        let client = Client::new(self.client.as_ref());
        let reply = client.call_safe(&actor, &cmd, self.config.read_time_limit).await;

        if reply.did_fail {
            let reason = reply.last_reply.unwrap_or_else(|| "no reply".to_owned());
            if !light_source.is_pfi() {
                self.clear_exposure().await;
            } else {
                self.cleared.store(true, Ordering::Release);
            }
            return Err(ExposureError::ReadFailed { subsystem: actor, reason });
        }

        let deadline = Instant::now() + self.config.read_time_limit;
        loop {
            if self.state() == CcdState::Idle {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ExposureError::ReadFailed {
                    subsystem: actor,
                    reason: "idle state not observed before time limit".to_owned(),
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let time_exp_start = obstime;
        let time_exp_end = time_exp_start + time::Duration::seconds_f64(exptime_secs);
        self.inner.lock().await.outcome = Some(ReadOutcome {
            cam: self.cam,
            exptime: exptime_secs,
            darktime,
            time_exp_start,
            time_exp_end,
            beam_config_date,
        });
        Ok(())
    }

    /// `store`: hands back the parsed read outcome, if any, for the
    /// orchestrator to persist and aggregate into `fileIds`.
    pub async fn store(&self) -> Option<ReadOutcome> {
        self.inner.lock().await.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use sps_exposure_core::ReplyBundle;

    struct FakeCcd {
        fail_wipe: bool,
        fail_read: bool,
        registry: KeywordRegistry,
    }

    #[async_trait::async_trait]
    impl RemoteClient for FakeCcd {
        async fn call_raw(&self, actor: &str, command: &str, _time_limit: Duration) -> ReplyBundle {
            if command.starts_with("wipe") {
                if self.fail_wipe {
                    return ReplyBundle::failure("wipe failed");
                }
                self.registry.publish(actor, "exposureState", vec!["wiping".into()]);
                self.registry.publish(actor, "exposureState", vec!["integrating".into()]);
                ReplyBundle::success(HashMap::new())
            } else if command.starts_with("read") {
                if self.fail_read {
                    return ReplyBundle::failure("read failed");
                }
                self.registry.publish(actor, "exposureState", vec!["reading".into()]);
                self.registry.publish(actor, "exposureState", vec!["idle".into()]);
                ReplyBundle::success(HashMap::new())
            } else {
                ReplyBundle::success(HashMap::new())
            }
        }

        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    fn detector(fail_wipe: bool, fail_read: bool) -> (CcdDetector, Arc<AtomicBool>, Arc<AtomicBool>) {
        let registry = KeywordRegistry::new();
        let client: Arc<dyn RemoteClient> = Arc::new(FakeCcd {
            fail_wipe,
            fail_read,
            registry: registry.clone(),
        });
        let do_abort = Arc::new(AtomicBool::new(false));
        let do_finish = Arc::new(AtomicBool::new(false));
        let detector = CcdDetector::new(
            CameraId::new(sps_exposure_core::Arm::B, 1),
            client,
            registry,
            ExposureConfig {
                wipe_time_limit: Duration::from_secs(1),
                read_time_limit: Duration::from_secs(1),
                ..Default::default()
            },
            do_abort.clone(),
            do_finish.clone(),
        );
        (detector, do_abort, do_finish)
    }

    #[tokio::test]
    async fn wipe_then_read_produces_storable_outcome() {
        let (detector, _, _) = detector(false, false);
        detector.wipe(None).await.unwrap();
        assert_eq!(detector.state(), CcdState::Integrating);
        detector
            .read("object", 1, 0.01, None, LightSource::Pfi, 9998.0, 0x1234)
            .await
            .unwrap();
        assert!(detector.is_storable().await);
        assert!(detector.is_finished());
    }

    #[tokio::test]
    async fn failed_wipe_clears_and_errors() {
        let (detector, _, _) = detector(true, false);
        let result = detector.wipe(None).await;
        assert!(matches!(result, Err(ExposureError::WipeFailed { .. })));
        assert!(detector.is_cleared());
    }

    #[tokio::test]
    async fn failed_read_from_pfi_keeps_cleared_flag_but_not_cleared_locally() {
        let (detector, _, _) = detector(false, true);
        detector.wipe(None).await.unwrap();
        let result = detector
            .read("object", 1, 0.01, None, LightSource::Pfi, 9998.0, 0x1234)
            .await;
        assert!(matches!(result, Err(ExposureError::ReadFailed { .. })));
        assert!(detector.is_cleared());
        assert!(!detector.is_storable().await);
    }

    #[tokio::test]
    async fn clear_exposure_is_idempotent() {
        let (detector, _, _) = detector(false, false);
        detector.clear_exposure().await;
        detector.clear_exposure().await;
        assert!(detector.is_cleared());
    }
}
