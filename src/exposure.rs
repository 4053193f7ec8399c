//! The exposure orchestrator (§4.10): resolves a request to an
//! [`ExposureKind`], builds the module/lamp/slit threads the variant
//! needs, runs them to completion, and exposes the aggregate state the
//! registry polls (`isFinished`, `storable`, `fileIds`). Grounded on the
//! source's `utils/exposure.py::Exposure`/`DarkExposure` plus the
//! `lampsExposure.py`/`driftSlitExposure.py` subclass variants, collapsed
//! here into one struct driven by `ExposureKind`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sps_exposure_core::{ids, Arm, CameraId, ExposureConfig, ExposureError, KeywordRegistry, RemoteClient};

use crate::detector::{AnyDetector, CcdDetector, IrDetector, LightSource, ReadOutcome};
use crate::lamp::{LampControl, LampVariant};
use crate::shared::ExposureShared;
use crate::sm_exposure::{PostWipeHook, SpecModuleExposure};
use crate::slit::SlitControl;
use crate::visit::{ExposureKind, ExposureRequest};

/// A single module's timing recipe, derived once from the exposure's kind
/// (source: `lampsExposure.Exposure.shutterOverHead=10` vs.
/// `ShutterExposure.shutterOverHead=0`).
struct Timing {
    waits_for_lamp_ready: bool,
    shutter_overhead_secs: f64,
}

impl Timing {
    fn for_kind(kind: ExposureKind) -> Self {
        match kind {
            ExposureKind::LampTimed => Timing { waits_for_lamp_ready: true, shutter_overhead_secs: 10.0 },
            ExposureKind::ShutterControlledTiming => Timing { waits_for_lamp_ready: true, shutter_overhead_secs: 0.0 },
            _ => Timing { waits_for_lamp_ready: false, shutter_overhead_secs: 0.0 },
        }
    }
}

pub struct Exposure {
    shared: Arc<ExposureShared>,
    modules: Vec<Arc<SpecModuleExposure>>,
    darks: Vec<(AnyDetector, LightSource)>,
    lamp: Option<Arc<LampControl>>,
    slits: Vec<Arc<SlitControl>>,
    timing: Timing,
    request_exptime: f64,
    do_science_check: bool,
}

impl Exposure {
    /// `light_sources` maps spectrograph-module number to where its light
    /// is coming from; a module with no entry defaults to `Pfi` (the
    /// telescope's own focal plane), matching a sane fallback for modules
    /// not wired to a calibration bench.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        req: &ExposureRequest,
        client: Arc<dyn RemoteClient>,
        registry: KeywordRegistry,
        config: ExposureConfig,
        light_sources: &HashMap<u8, LightSource>,
        pfs_design_id: i64,
    ) -> Self {
        let kind = ExposureKind::select(req);
        let cams = req.windowed_cams_excluding_infrared();
        let exptype = req.wire_exptype();

        let mut by_module: HashMap<u8, Vec<CameraId>> = HashMap::new();
        for cam in &cams {
            by_module.entry(cam.spec_num).or_default().push(*cam);
        }
        let module_count = if kind == ExposureKind::Dark { 0 } else { by_module.len() };

        let light_source = by_module
            .keys()
            .next()
            .and_then(|spec_num| light_sources.get(spec_num))
            .copied()
            .unwrap_or(LightSource::Pfi);

        let shared = Arc::new(ExposureShared::new(
            req.visit,
            exptype,
            req.exptime,
            kind,
            light_source,
            pfs_design_id,
            module_count,
            client.clone(),
            registry.clone(),
            config.clone(),
        ));

        if kind == ExposureKind::Dark {
            let darks = cams
                .into_iter()
                .map(|cam| {
                    let ls = light_sources.get(&cam.spec_num).copied().unwrap_or(LightSource::Pfi);
                    (build_detector(cam, client.clone(), registry.clone(), config.clone(), &shared), ls)
                })
                .collect();
            return Self {
                shared,
                modules: Vec::new(),
                darks,
                lamp: None,
                slits: Vec::new(),
                timing: Timing::for_kind(kind),
                request_exptime: req.exptime,
                do_science_check: req.do_science_check,
            };
        }

        let lamp = match kind {
            ExposureKind::LampTimed | ExposureKind::SlideSlitLampTimed => Some(Arc::new(LampControl::new(
                LampVariant::Standard,
                "dcb",
                config.clone(),
                client.clone(),
                shared.do_abort.clone(),
                shared.do_finish.clone(),
            ))),
            ExposureKind::ShutterControlledTiming => Some(Arc::new(LampControl::new(
                LampVariant::ShutterControlled,
                "dcb",
                config.clone(),
                client.clone(),
                shared.do_abort.clone(),
                shared.do_finish.clone(),
            ))),
            _ => None,
        };

        let mut modules = Vec::new();
        let mut slits = Vec::new();
        for (spec_num, module_cams) in by_module {
            let detectors: Vec<AnyDetector> = module_cams
                .iter()
                .map(|cam| build_detector(*cam, client.clone(), registry.clone(), config.clone(), &shared))
                .collect();

            let slit = if req.do_slide_slit {
                let pixel_range = req.slide_slit_pixel_range.unwrap_or((0.0, 0.0));
                let slit = Arc::new(SlitControl::new(
                    CameraId::new(Arm::B, spec_num).enu_actor(),
                    pixel_range,
                    req.exptime,
                    config.clone(),
                    client.clone(),
                    registry.clone(),
                    shared.do_abort.clone(),
                    shared.do_finish.clone(),
                ));
                slits.push(slit.clone());
                Some(slit)
            } else {
                None
            };

            let post_wipe = match (kind, &slit) {
                (ExposureKind::SlideSlitStandalone, Some(slit)) => PostWipeHook::SlideSlitStandalone(slit.clone()),
                _ => PostWipeHook::None,
            };

            let iis = if req.do_iis {
                Some(Arc::new(LampControl::new(
                    LampVariant::Iis,
                    CameraId::new(Arm::B, spec_num).enu_actor(),
                    config.clone(),
                    client.clone(),
                    shared.do_abort.clone(),
                    shared.do_finish.clone(),
                )))
            } else {
                None
            };

            let module_light_source = light_sources.get(&spec_num).copied().unwrap_or(LightSource::Pfi);
            modules.push(Arc::new(SpecModuleExposure::new(
                spec_num,
                detectors,
                module_light_source,
                shared.clone(),
                slit,
                iis,
                post_wipe,
                req.blue_window,
                req.red_window,
            )));
        }

        Self {
            shared,
            modules,
            darks: Vec::new(),
            lamp,
            slits,
            timing: Timing::for_kind(kind),
            request_exptime: req.exptime,
            do_science_check: req.do_science_check,
        }
    }

    /// `fiberIllumination=<visit>,0x<byte>` (§6): bit `2·(sm−1)` is set when
    /// that module's illumination-system lamp is running (engineering fiber
    /// lit), bit `2·(sm−1)+1` when the module is wired to the telescope
    /// focal plane for a non-dark-like exposure (science fibers lit).
    pub fn fiber_illumination_byte(&self) -> u8 {
        let mut byte = 0u8;
        for module in &self.modules {
            let sm = module.spec_num;
            if sm == 0 || sm > 4 {
                continue;
            }
            let shift = 2 * (sm - 1);
            if module.iis().is_some() {
                byte |= 1 << shift;
            }
            if module.light_source().is_pfi() && !is_dark_like_wire(self.shared.exptype) {
                byte |= 1 << (shift + 1);
            }
        }
        byte
    }

    pub fn visit(&self) -> u64 {
        self.shared.visit
    }

    pub fn exptype(&self) -> &'static str {
        self.shared.exptype
    }

    pub fn exptime(&self) -> f64 {
        self.request_exptime
    }

    /// Starts every thread this exposure owns. Returns once everything has
    /// been launched — `wait_for_completion` is what actually blocks until
    /// the exposure is done.
    pub async fn start(self: &Arc<Self>) {
        for module in &self.modules {
            let exposure = self.clone();
            let module = module.clone();
            tokio::spawn(async move {
                if let Err(err) = exposure.run_module(&module).await {
                    exposure.shared.failures.add(err.to_string());
                    exposure.abort_flag();
                }
            });
        }

        for slit in &self.slits {
            let exposure = self.clone();
            let slit = slit.clone();
            tokio::spawn(async move {
                if let Err(err) = slit.run().await {
                    exposure.shared.failures.add(err.to_string());
                    exposure.abort_flag();
                }
            });
        }

        if let Some(lamp) = &self.lamp {
            let exposure = self.clone();
            let lamp = lamp.clone();
            tokio::spawn(async move {
                match lamp.run(exposure.request_exptime).await {
                    // The standard lamp bench's `go` reply is the signal that
                    // pulsing is over — the shutters must close right away
                    // rather than run out the full lamp-timed shutter window.
                    // `ShutterControlled`/`Iis` modules close on their own
                    // timing and must not be finished here.
                    Ok(()) if lamp.variant() == LampVariant::Standard => exposure.finish().await,
                    Ok(()) => {}
                    Err(err) => {
                        exposure.shared.failures.add(err.to_string());
                        exposure.abort_flag();
                    }
                }
            });
        }

        for module in &self.modules {
            if let Some(iis) = module.iis() {
                let exposure = self.clone();
                let iis = iis.clone();
                tokio::spawn(async move {
                    if let Err(err) = iis.run(exposure.request_exptime).await {
                        exposure.shared.failures.add(err.to_string());
                        exposure.abort_flag();
                    }
                });
            }
        }

        if !self.darks.is_empty() {
            let exposure = self.clone();
            tokio::spawn(async move {
                let visit = exposure.shared.visit;
                let exptype = exposure.shared.exptype;
                let exptime = exposure.shared.exptime;
                let pfs_design_id = exposure.shared.pfs_design_id;
                let results = futures::future::join_all(exposure.darks.iter().map(|(detector, light_source)| {
                    run_dark_detector(detector, visit, exptype, exptime, *light_source, pfs_design_id)
                }))
                .await;
                for result in results {
                    if let Err(err) = result {
                        exposure.shared.failures.add(err.to_string());
                        exposure.abort_flag();
                    }
                }
            });
        }

        self.spawn_gate_watcher();
    }

    /// Every lamp-gated variant needs a watcher that releases the lamp's
    /// (and, for the mutual-rendezvous variant, the slit's) go signal once
    /// the release condition is met — this is that watcher. For a plain
    /// `LampTimed`/`ShutterControlledTiming` exposure the condition is just
    /// "every module's shutter is open"; for `SlideSlitLampTimed` whichever
    /// event (shutters open, slit at speed) lands last releases its
    /// counterpart (§4.9 design notes).
    fn spawn_gate_watcher(self: &Arc<Self>) {
        let kind = self.shared.kind;
        if !matches!(
            kind,
            ExposureKind::LampTimed | ExposureKind::ShutterControlledTiming | ExposureKind::SlideSlitLampTimed
        ) {
            return;
        }
        let exposure = self.clone();
        tokio::spawn(async move {
            loop {
                if exposure.shared.do_abort.load(Ordering::Acquire) {
                    return;
                }
                if exposure.shared.all_slits_sliding() {
                    if let Some(lamp) = &exposure.lamp {
                        lamp.set_go_signal();
                    }
                }
                if exposure.shared.all_shutters_open() {
                    if let Some(lamp) = &exposure.lamp {
                        lamp.set_go_signal();
                    }
                    for slit in &exposure.slits {
                        slit.set_go_signal();
                    }
                }
                let done = match exposure.shared.kind {
                    ExposureKind::SlideSlitLampTimed => {
                        exposure.shared.all_slits_sliding() && exposure.shared.all_shutters_open()
                    }
                    _ => exposure.shared.all_shutters_open(),
                };
                if done {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        });
    }

    async fn run_module(&self, module: &SpecModuleExposure) -> Result<(), ExposureError> {
        self.check_science_fiber_home(module)?;

        module.wipe(self.shared.visit).await?;
        module.run_post_wipe().await?;

        if self.timing.waits_for_lamp_ready {
            if let Some(lamp) = &self.lamp {
                lamp.wait_until_ready().await?;
            }
        }

        let shutter_time = if self.timing.waits_for_lamp_ready {
            Some(self.shared.exptime + self.timing.shutter_overhead_secs)
        } else {
            None
        };

        let integrate_result = module.integrate(shutter_time).await;
        let (exptime, _dateobs) = match integrate_result {
            Ok(ok) => ok,
            Err(ExposureError::ShuttersFailed { subsystem, reason }) => {
                let (_, _, was_open) = module.shutter_state();
                if !was_open {
                    tracing::warn!(actor = %subsystem, reason, "shutters failed before ever opening, discarding");
                    return Err(ExposureError::ShuttersFailed { subsystem, reason });
                }
                self.shared.failures.add(ExposureError::ShuttersFailed { subsystem, reason }.to_string());
                (self.shared.exptime, time::OffsetDateTime::now_utc())
            }
            Err(other) => return Err(other),
        };

        module.declare_final_read();

        let beam_config_date = self
            .shared
            .registry
            .current(module.enu_actor(), "beamConfigDate")
            .and_then(|v| v.first().and_then(|s| s.parse().ok()))
            .unwrap_or(0.0);

        module.read(self.shared.visit, exptime, beam_config_date).await?;
        Ok(())
    }

    /// `doScienceCheck`'s precondition (§9 Open Questions: the source stops
    /// on any science fiber not at home). This crate approximates "home" as
    /// "this module's slide-slit hexapod is not currently mid-slide" — the
    /// only slit-position signal available at this layer — and only checks
    /// modules that actually own a slide-slit thread; a module with no slit
    /// has no home/not-home distinction to violate.
    fn check_science_fiber_home(&self, module: &SpecModuleExposure) -> Result<(), ExposureError> {
        if !self.do_science_check || !module.light_source().is_pfi() {
            return Ok(());
        }
        if let Some(slit) = module.slit() {
            if slit.is_sliding() {
                return Err(ExposureError::PreconditionFailed {
                    subsystem: module.enu_actor().to_owned(),
                    reason: "doScienceCheck requires the slit to be at home".to_owned(),
                });
            }
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        if !self.darks.is_empty() {
            return self.darks.iter().all(|(d, _)| d.is_finished());
        }
        self.modules.iter().all(|m| m.is_finished())
    }

    pub async fn is_storable(&self) -> bool {
        if !self.darks.is_empty() {
            for (d, _) in &self.darks {
                if d.is_storable().await {
                    return true;
                }
            }
            return false;
        }
        for module in &self.modules {
            if module.is_storable().await {
                return true;
            }
        }
        false
    }

    /// Polls `isFinished` to completion, cooperatively yielding between
    /// checks (the registry-level analogue of `waitForCompletion`).
    pub async fn wait_for_completion(&self) {
        while !self.is_finished() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        if let Some(lamp) = &self.lamp {
            lamp.declare_done().await;
        }
    }

    pub async fn outcomes(&self) -> Vec<ReadOutcome> {
        if !self.darks.is_empty() {
            let mut outcomes = Vec::new();
            for (d, _) in &self.darks {
                if let Some(outcome) = d.store().await {
                    outcomes.push(outcome);
                }
            }
            return outcomes;
        }
        let mut outcomes = Vec::new();
        for module in &self.modules {
            outcomes.extend(module.store().await);
        }
        outcomes
    }

    /// `fileIds=<visit>,<cams joined by ;>,0x<mask:04x>` (source:
    /// `Exposure.waitForCompletion`'s nested `genFileIds`).
    pub fn file_ids(&self, outcomes: &[ReadOutcome]) -> String {
        let cams: Vec<CameraId> = outcomes.iter().map(|o| o.cam).collect();
        let names: Vec<String> = cams.iter().map(|c| c.to_string()).collect();
        let mask = ids::file_ids_mask(cams);
        format!("{},{},0x{:04x}", self.shared.visit, names.join(";"), mask)
    }

    /// `abort` ≡ `finish(doDiscard=true)` (source: `exposure.py`'s
    /// `abort`/`finish` both routing through one `_finish` with a discard
    /// flag): `clearExposure` runs unconditionally, and any module whose
    /// shutter is currently open is told `exposure finish` and awaited
    /// until it closes, so a blocked integration never reads out and
    /// reports `fileIds` as if it had completed normally.
    pub async fn abort(&self, reason: impl Into<String>) {
        self.shared.failures.add(ExposureError::aborted("exposure", reason.into()).to_string());
        self.abort_flag();
        self.clear_exposure().await;
        self.finish_open_shutters().await;
    }

    fn abort_flag(&self) {
        self.shared.do_abort.store(true, Ordering::Release);
    }

    /// Both the `abort` and `finish` commands resolve to this single
    /// action in the normative revision: set `doFinish`, clear any
    /// detector whose shutter never opened (nothing to save), and send
    /// `exposure finish` to any module whose shutter is currently open so
    /// it closes immediately instead of running out its full
    /// `shutterTime` (spec.md's `exposure finish` revision).
    pub async fn finish(&self) {
        self.shared.do_finish.store(true, Ordering::Release);
        let all_was_open = if self.darks.is_empty() {
            self.modules.iter().any(|m| m.shutter_state().2)
        } else {
            true
        };
        if !all_was_open {
            self.clear_exposure().await;
        }
        self.finish_open_shutters().await;
    }

    async fn clear_exposure(&self) {
        if !self.darks.is_empty() {
            for (d, _) in &self.darks {
                d.clear_exposure().await;
            }
            return;
        }
        for module in &self.modules {
            module.clear_exposure().await;
        }
    }

    /// Actively closes every module's shutter that is currently open —
    /// the ENU round trip `finish`/`abort` need so a blocked `integrate`
    /// call returns right away instead of running to its full
    /// `shutterTime` (§4.7/§4.10). A no-op for dark-like exposures, which
    /// have no shutter.
    async fn finish_open_shutters(&self) {
        for module in &self.modules {
            if let Err(err) = module.finish_shutter().await {
                self.shared.failures.add(err.to_string());
            }
        }
    }

    pub fn exit(&self) {
        for module in &self.modules {
            module.exit();
        }
    }

    pub fn failures(&self) -> String {
        self.shared.failures.format()
    }

    pub fn failures_empty(&self) -> bool {
        self.shared.failures.is_empty()
    }
}

fn is_dark_like_wire(exptype: &str) -> bool {
    exptype == "bias" || exptype == "dark"
}

fn build_detector(
    cam: CameraId,
    client: Arc<dyn RemoteClient>,
    registry: KeywordRegistry,
    config: ExposureConfig,
    shared: &ExposureShared,
) -> AnyDetector {
    if cam.arm.is_infrared() {
        AnyDetector::Ir(IrDetector::new(cam, client, registry, config, shared.do_abort.clone(), shared.do_finish.clone()))
    } else {
        AnyDetector::Ccd(CcdDetector::new(cam, client, registry, config, shared.do_abort.clone(), shared.do_finish.clone()))
    }
}

async fn run_dark_detector(
    detector: &AnyDetector,
    visit: u64,
    exptype: &str,
    exptime: f64,
    light_source: LightSource,
    pfs_design_id: i64,
) -> Result<(), ExposureError> {
    match detector {
        AnyDetector::Ccd(ccd) => {
            ccd.wipe(None).await?;
            ccd.integrate(exptime).await?;
            ccd.read(exptype, visit, exptime, None, light_source, 0.0, pfs_design_id).await
        }
        AnyDetector::Ir(ir) => {
            ir.wipe(visit, exptype, exptime, pfs_design_id).await?;
            ir.finish_dark_ramp().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::time::Duration;
    use sps_exposure_core::ReplyBundle;

    struct FakeRemote;

    #[async_trait::async_trait]
    impl RemoteClient for FakeRemote {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            ReplyBundle::success(Map::new())
        }
        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(Map::new())
        }
    }

    fn dark_request() -> ExposureRequest {
        ExposureRequest {
            visit: 42,
            exptype: crate::visit::ExpType::Bias,
            exptime: 0.0,
            cams: vec![CameraId::new(Arm::B, 1)],
            do_lamps: false,
            do_shutter_timing: false,
            do_iis: false,
            do_test: false,
            do_science_check: false,
            do_slide_slit: false,
            slide_slit_pixel_range: None,
            blue_window: None,
            red_window: None,
        }
    }

    #[test]
    fn dark_request_selects_dark_kind_and_builds_no_modules() {
        let req = dark_request();
        let exposure = Exposure::new(
            &req,
            Arc::new(FakeRemote),
            KeywordRegistry::new(),
            ExposureConfig::default(),
            &Map::new(),
            0,
        );
        assert!(exposure.modules.is_empty());
        assert_eq!(exposure.darks.len(), 1);
    }

    #[test]
    fn file_ids_format_matches_visit_names_mask() {
        let req = dark_request();
        let exposure = Exposure::new(
            &req,
            Arc::new(FakeRemote),
            KeywordRegistry::new(),
            ExposureConfig::default(),
            &Map::new(),
            0,
        );
        let outcome = ReadOutcome {
            cam: CameraId::new(Arm::B, 1),
            exptime: 0.0,
            darktime: 0.0,
            time_exp_start: time::OffsetDateTime::now_utc(),
            time_exp_end: time::OffsetDateTime::now_utc(),
            beam_config_date: 0.0,
        };
        assert_eq!(exposure.file_ids(&[outcome]), "42,b1,0x0001");
    }

    fn object_request(spec_num: u8) -> ExposureRequest {
        ExposureRequest {
            visit: 1,
            exptype: crate::visit::ExpType::Object,
            exptime: 10.0,
            cams: vec![CameraId::new(Arm::B, spec_num)],
            do_lamps: false,
            do_shutter_timing: false,
            do_iis: true,
            do_test: false,
            do_science_check: false,
            do_slide_slit: false,
            slide_slit_pixel_range: None,
            blue_window: None,
            red_window: None,
        }
    }

    #[test]
    fn fiber_illumination_sets_both_bits_for_a_pfi_module_with_iis() {
        let req = object_request(1);
        let exposure =
            Exposure::new(&req, Arc::new(FakeRemote), KeywordRegistry::new(), ExposureConfig::default(), &Map::new(), 0);
        assert_eq!(exposure.fiber_illumination_byte(), 0b11);
    }

    #[test]
    fn fiber_illumination_skips_science_bit_for_a_dcb_module() {
        let req = object_request(2);
        let mut sources = Map::new();
        sources.insert(2, LightSource::Dcb);
        let exposure = Exposure::new(&req, Arc::new(FakeRemote), KeywordRegistry::new(), ExposureConfig::default(), &sources, 0);
        // sm=2 -> engineering bit 2, science bit 3; Dcb suppresses the science bit.
        assert_eq!(exposure.fiber_illumination_byte(), 0b0100);
    }

    #[tokio::test]
    async fn finish_shutter_is_a_noop_when_never_opened() {
        let req = object_request(1);
        let exposure =
            Exposure::new(&req, Arc::new(FakeRemote), KeywordRegistry::new(), ExposureConfig::default(), &Map::new(), 0);
        exposure.modules[0].finish_shutter().await.unwrap();
    }

    #[tokio::test]
    async fn finish_shutter_sends_exposure_finish_and_waits_for_close() {
        let req = object_request(1);
        let registry = KeywordRegistry::new();
        let exposure = Exposure::new(&req, Arc::new(FakeRemote), registry.clone(), ExposureConfig::default(), &Map::new(), 0);
        let module = exposure.modules[0].clone();
        let enu_actor = module.enu_actor().to_owned();

        registry.publish(&enu_actor, "shutters", vec!["open".to_owned()]);
        assert!(module.shutter_state().0);

        let finish = tokio::spawn(async move { module.finish_shutter().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.publish(&enu_actor, "shutters", vec!["close".to_owned()]);

        tokio::time::timeout(Duration::from_secs(1), finish).await.unwrap().unwrap().unwrap();
    }

    #[test]
    fn science_check_rejects_a_pfi_module_whose_slit_is_mid_slide() {
        let mut req = object_request(1);
        req.do_science_check = true;
        req.do_slide_slit = true;
        req.slide_slit_pixel_range = Some((0.0, 100.0));
        let exposure =
            Exposure::new(&req, Arc::new(FakeRemote), KeywordRegistry::new(), ExposureConfig::default(), &Map::new(), 0);
        let module = &exposure.modules[0];
        module.slit().unwrap().mark_at_speed(true);
        let err = exposure.check_science_fiber_home(module).unwrap_err();
        assert!(matches!(err, ExposureError::PreconditionFailed { .. }));
    }
}
