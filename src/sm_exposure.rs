//! Spectrograph-module exposure thread (§4.7): one per spectrograph
//! module, owning that module's detectors, its shutter-state reduction,
//! and (for the slide-slit variants) its slit-motion thread. Grounded on
//! the source's `SpecModuleExposure` and `utils/shutters.py::ShutterState`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use sps_exposure_core::{ids, Arm, CameraId, Client, ExposureError, KeyVar, Subscription};

use crate::detector::{AnyDetector, LightSource, Window};
use crate::lamp::LampControl;
use crate::shared::ExposureShared;
use crate::slit::SlitControl;

const ENU_EXPOSE_TIME_MARGIN_SECS: f64 = 5.0;

/// Reduction of the raw `shutters` keyword history into the three
/// predicates the orchestration logic actually needs. A fresh module
/// starts in `"none"`, matching the source's `states=['none']` seed.
#[derive(Debug, Default)]
pub struct ShutterState {
    states: Vec<String>,
}

impl ShutterState {
    pub fn new() -> Self {
        Self { states: vec!["none".to_owned()] }
    }

    pub fn is_open(&self) -> bool {
        self.states.last().is_some_and(|s| s.contains("open"))
    }

    pub fn did_expose(&self) -> bool {
        if self.states.len() < 2 {
            return false;
        }
        let prev = &self.states[self.states.len() - 2];
        let last = &self.states[self.states.len() - 1];
        prev.contains("open") && last.contains("close")
    }

    pub fn was_open(&self) -> bool {
        self.states.iter().any(|s| s.contains("open"))
    }

    /// Appends `state`, returning `true` only if it differs from the
    /// current head — a repeated keyword update is not a transition.
    pub fn push(&mut self, state: String) -> bool {
        if self.states.last() == Some(&state) {
            false
        } else {
            self.states.push(state);
            true
        }
    }
}

/// The hook point the slide-slit-standalone variant uses to replace the
/// shutter as the exposure's timing driver entirely (source:
/// `driftSlitExposure/exposure.py`'s `postWipeFunc` override).
pub enum PostWipeHook {
    None,
    SlideSlitStandalone(Arc<SlitControl>),
}

pub struct SpecModuleExposure {
    pub spec_num: u8,
    enu_actor: String,
    detectors: Vec<AnyDetector>,
    shutter_state: Arc<Mutex<ShutterState>>,
    _shutter_sub: Subscription,
    light_source: LightSource,
    shared: Arc<ExposureShared>,
    slit: Option<Arc<SlitControl>>,
    /// The illumination-system lamp for this module, if `doIIS` was
    /// requested — gated purely on this module's own shutter opening,
    /// unlike the exposure-wide lamp bench.
    iis: Option<Arc<LampControl>>,
    post_wipe: PostWipeHook,
    blue_window: Option<Window>,
    red_window: Option<Window>,
}

impl SpecModuleExposure {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec_num: u8,
        detectors: Vec<AnyDetector>,
        light_source: LightSource,
        shared: Arc<ExposureShared>,
        slit: Option<Arc<SlitControl>>,
        iis: Option<Arc<LampControl>>,
        post_wipe: PostWipeHook,
        blue_window: Option<Window>,
        red_window: Option<Window>,
    ) -> Self {
        let enu_actor = CameraId::new(Arm::B, spec_num).enu_actor();
        shared.registry.add_model(&enu_actor);

        let shutter_state = Arc::new(Mutex::new(ShutterState::new()));
        let shared_cb = shared.clone();
        let state_cb = shutter_state.clone();
        let iis_cb = iis.clone();

        let sub = shared.registry.subscribe(
            &enu_actor,
            "shutters",
            Arc::new(move |kv: &KeyVar| {
                let Some(state) = kv.values.first().cloned() else { return };
                let mut guard = state_cb.lock();
                if !guard.push(state) {
                    return;
                }
                let is_open = guard.is_open();
                let did_expose = guard.did_expose();
                drop(guard);

                if is_open {
                    if shared_cb.record_shutters_open() {
                        tracing::info!(visit = shared_cb.visit, "pfiShutters=open");
                    }
                    if let Some(iis) = &iis_cb {
                        iis.set_go_signal();
                    }
                }
                if did_expose {
                    if shared_cb.record_shutters_closed() {
                        tracing::info!(visit = shared_cb.visit, "pfiShutters=close");
                    }
                }
            }),
        );

        Self {
            spec_num,
            enu_actor,
            detectors,
            shutter_state,
            _shutter_sub: sub,
            light_source,
            shared,
            slit,
            iis,
            post_wipe,
            blue_window,
            red_window,
        }
    }

    pub fn iis(&self) -> Option<&Arc<LampControl>> {
        self.iis.as_ref()
    }

    pub fn slit(&self) -> Option<&Arc<SlitControl>> {
        self.slit.as_ref()
    }

    pub fn light_source(&self) -> LightSource {
        self.light_source
    }

    pub fn is_finished(&self) -> bool {
        self.detectors.iter().all(|d| d.is_finished())
    }

    pub fn shutter_state(&self) -> (bool, bool, bool) {
        let state = self.shutter_state.lock();
        (state.is_open(), state.did_expose(), state.was_open())
    }

    fn ir(&self) -> Option<&crate::detector::IrDetector> {
        self.detectors.iter().find_map(|d| d.as_ir())
    }

    fn ccds(&self) -> impl Iterator<Item = &crate::detector::CcdDetector> {
        self.detectors.iter().filter_map(|d| d.as_ccd())
    }

    fn shutter_mask(&self) -> u32 {
        let arms: Vec<Arm> = self.detectors.iter().map(|d| d.cam().arm).filter(|a| !a.is_infrared()).collect();
        ids::shutter_mask(arms)
    }

    fn window_for(&self, arm: Arm) -> Option<Window> {
        match arm {
            Arm::B | Arm::M => self.blue_window,
            Arm::R => self.red_window,
            Arm::N => None,
        }
    }

    /// Issues the ramp (if this module has an IR detector) and blocks until
    /// `reset`, then wipes the CCDs concurrently with the ramp's own
    /// first-read watchdog (§4.6). Honors `doSyncSpectrograph` by blocking
    /// on every sibling module before returning.
    pub async fn wipe(&self, visit: u64) -> Result<(), ExposureError> {
        let exptype = self.shared.exptype;
        let exptime = self.shared.exptime;

        if let Some(ir) = self.ir() {
            let first_read_deadline = ir.start_ramp(visit, exptype, exptime, self.shared.pfs_design_id).await?;
            let ccd_wipes = futures::future::join_all(self.ccds().map(|ccd| ccd.wipe(self.window_for(ccd.cam.arm))));
            let (first_read, ccd_results) = tokio::join!(ir.wait_first_read(first_read_deadline), ccd_wipes);
            first_read?;
            for result in ccd_results {
                result?;
            }
        } else {
            let ccd_wipes = futures::future::join_all(self.ccds().map(|ccd| ccd.wipe(self.window_for(ccd.cam.arm))));
            for result in ccd_wipes.await {
                result?;
            }
        }

        self.shared.module_wiped();
        if self.shared.config.do_sync_spectrograph {
            self.shared.wait_all_modules_wiped(&self.enu_actor).await?;
        }
        Ok(())
    }

    /// Runs this module's post-wipe hook, if any — the slide-slit-standalone
    /// variant blocks here until the hexapod reports cruising speed, in
    /// place of waiting on the shutter.
    pub async fn run_post_wipe(&self) -> Result<(), ExposureError> {
        match &self.post_wipe {
            PostWipeHook::None => Ok(()),
            PostWipeHook::SlideSlitStandalone(slit) => slit.start_and_wait_at_speed().await,
        }
    }

    /// Opens the shutter for `shutterTime` (defaulting to the exposure's
    /// own `exptime` unless a lamp variant supplies a longer window to
    /// cover the lamp ready/go overhead), returning the reported exptime
    /// and `dateobs`.
    pub async fn integrate(&self, shutter_time: Option<f64>) -> Result<(f64, OffsetDateTime), ExposureError> {
        let shutter_time = shutter_time.unwrap_or(self.shared.exptime);
        let cmd = format!(
            "shutters expose exptime={:.2} shutterMask={} visit={}",
            shutter_time,
            self.shutter_mask(),
            self.shared.visit
        );
        let time_lim = std::time::Duration::from_secs_f64(shutter_time + ENU_EXPOSE_TIME_MARGIN_SECS);

        let client = Client::new(self.shared.client.as_ref());
        let reply = client.call_safe(&self.enu_actor, &cmd, time_lim).await;
        if reply.did_fail {
            return Err(ExposureError::ShuttersFailed {
                subsystem: self.enu_actor.clone(),
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }

        let exptime = reply
            .keyword("exptime")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(self.shared.exptime);
        let dateobs = reply
            .keyword("dateobs")
            .and_then(|v| OffsetDateTime::parse(v, &time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok((exptime, dateobs))
    }

    /// Reads every still-active detector in this module and blocks until
    /// each reports finished.
    pub async fn read(&self, visit: u64, exptime: f64, beam_config_date: f64) -> Result<(), ExposureError> {
        let exptype = self.shared.exptype;
        let pfs_design_id = self.shared.pfs_design_id;
        let reads = self.ccds().filter(|ccd| !ccd.is_cleared()).map(|ccd| {
            ccd.read(
                exptype,
                visit,
                exptime,
                self.window_for(ccd.cam.arm),
                self.light_source,
                beam_config_date,
                pfs_design_id,
            )
        });
        let results = futures::future::join_all(reads).await;
        for result in results {
            result?;
        }

        if let Some(ir) = self.ir() {
            if !ir.is_cleared() {
                if exptype == "bias" || exptype == "dark" {
                    ir.finish_dark_ramp().await?;
                } else {
                    ir.finish_ramp(exptime).await?;
                }
            }
        }
        Ok(())
    }

    /// Called from the exposure's shutter-close aggregation once every
    /// module has reported `didExpose`: tells this module's IR ramp (if
    /// any) that the next short read will be its last.
    pub fn declare_final_read(&self) {
        if let Some(ir) = self.ir() {
            ir.declare_final_read();
        }
    }

    /// Sends `exposure finish` to this module's ENU if its shutter is
    /// currently open, and waits for the resulting `close` transition —
    /// the active close that lets a blocked `integrate` call return early
    /// instead of running to its full `shutterTime`. A no-op for a module
    /// whose shutter never opened.
    pub async fn finish_shutter(&self) -> Result<(), ExposureError> {
        if !self.shutter_state().0 {
            return Ok(());
        }
        let client = Client::new(self.shared.client.as_ref());
        let reply = client.call_safe(&self.enu_actor, "exposure finish", self.shared.config.clear_time_limit).await;
        if reply.did_fail {
            return Err(ExposureError::ShuttersFailed {
                subsystem: self.enu_actor.clone(),
                reason: reply.last_reply.unwrap_or_else(|| "no reply".to_owned()),
            });
        }
        self.wait_for_shutter_close().await
    }

    async fn wait_for_shutter_close(&self) -> Result<(), ExposureError> {
        loop {
            if !self.shutter_state().0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Clears every detector that hasn't finished (used on abort/discard).
    pub async fn clear_exposure(&self) {
        for detector in &self.detectors {
            detector.clear_exposure().await;
        }
    }

    pub fn exit(&self) {
        if let Some(slit) = &self.slit {
            let slit = slit.clone();
            tokio::spawn(async move { slit.abort().await });
        }
    }

    pub fn enu_actor(&self) -> &str {
        &self.enu_actor
    }

    pub async fn is_storable(&self) -> bool {
        for detector in &self.detectors {
            if detector.is_storable().await {
                return true;
            }
        }
        false
    }

    pub async fn store(&self) -> Vec<crate::detector::ReadOutcome> {
        let mut outcomes = Vec::new();
        for detector in &self.detectors {
            if let Some(outcome) = detector.store().await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_shutter_state_is_none_of_the_three_predicates() {
        let state = ShutterState::new();
        assert!(!state.is_open());
        assert!(!state.did_expose());
        assert!(!state.was_open());
    }

    #[test]
    fn open_then_close_sets_did_expose_once() {
        let mut state = ShutterState::new();
        state.push("open".to_owned());
        assert!(state.is_open());
        assert!(!state.did_expose());
        state.push("close".to_owned());
        assert!(!state.is_open());
        assert!(state.did_expose());
        assert!(state.was_open());
    }

    #[test]
    fn repeated_identical_state_is_not_a_transition() {
        let mut state = ShutterState::new();
        assert!(state.push("open".to_owned()));
        assert!(!state.push("open".to_owned()));
    }
}
