//! The exposure request shape and the variant-selection table (§4.10):
//! which `ExposureKind` a request resolves to, replacing the source's
//! dynamic class substitution with a tagged enum plus a factory.

use std::collections::HashMap;

use sps_exposure_core::{Arm, CameraId};

use crate::detector::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpType {
    Bias,
    Dark,
    Object,
    Arc,
    Flat,
    Domeflat,
}

impl ExpType {
    /// The exposure-type token sent to `ccd`/`hx` actors. A `doTest` request
    /// always reports `test` on the wire regardless of its nominal kind.
    pub fn wire_str(self, do_test: bool) -> &'static str {
        if do_test {
            return "test";
        }
        match self {
            ExpType::Bias => "bias",
            ExpType::Dark => "dark",
            ExpType::Object => "object",
            ExpType::Arc => "arc",
            ExpType::Flat => "flat",
            ExpType::Domeflat => "domeflat",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "bias" => Some(ExpType::Bias),
            "dark" => Some(ExpType::Dark),
            "object" => Some(ExpType::Object),
            "arc" => Some(ExpType::Arc),
            "flat" => Some(ExpType::Flat),
            "domeflat" => Some(ExpType::Domeflat),
            _ => None,
        }
    }

    pub fn is_dark_like(self) -> bool {
        matches!(self, ExpType::Bias | ExpType::Dark)
    }
}

/// Which concrete orchestrator a request resolves to (§4.10's selection
/// table, read off `Commands/ExposeCmd.py::ExposeCmd.process`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureKind {
    /// Bias/dark: bare detector threads, no shutter, no lamp, no slit.
    Dark,
    /// A plain shutter-timed exposure: the shutter's own open/close keyword
    /// is the clock.
    Plain,
    /// Lamps drive the clock; shutters open once every module reports lamps
    /// on (the science/object path, `doLamps`).
    LampTimed,
    /// Shutters are held open for a fixed safety window after lamps
    /// confirm on — used for flats/arcs off a controlled bench
    /// (`doShutterTiming` without `doLamps`).
    ShutterControlledTiming,
    /// The slit slides during the exposure and is the sole timing driver;
    /// no lamps.
    SlideSlitStandalone,
    /// The slit slides and lamps gate each other: whichever event (shutters
    /// open vs. slit at speed) lands last releases its counterpart.
    SlideSlitLampTimed,
}

impl ExposureKind {
    pub fn select(req: &ExposureRequest) -> Self {
        if req.exptype.is_dark_like() {
            return ExposureKind::Dark;
        }
        if req.do_slide_slit {
            return if req.do_lamps || req.do_iis {
                ExposureKind::SlideSlitLampTimed
            } else {
                ExposureKind::SlideSlitStandalone
            };
        }
        if req.do_lamps {
            return ExposureKind::LampTimed;
        }
        if req.do_shutter_timing {
            return ExposureKind::ShutterControlledTiming;
        }
        ExposureKind::Plain
    }
}

#[derive(Debug, Clone)]
pub struct ExposureRequest {
    pub visit: u64,
    pub exptype: ExpType,
    pub exptime: f64,
    pub cams: Vec<CameraId>,
    pub do_lamps: bool,
    pub do_shutter_timing: bool,
    pub do_iis: bool,
    pub do_test: bool,
    pub do_science_check: bool,
    pub do_slide_slit: bool,
    pub slide_slit_pixel_range: Option<(f64, f64)>,
    pub blue_window: Option<Window>,
    pub red_window: Option<Window>,
}

impl ExposureRequest {
    /// Exposure type as it should be reported over the wire, honoring
    /// `doTest`.
    pub fn wire_exptype(&self) -> &'static str {
        self.exptype.wire_str(self.do_test)
    }

    /// Splits `cams` into per-spectrograph-module groups, the Rust
    /// equivalent of `idsUtils.splitCamPerSpec` — each group becomes one
    /// spectrograph-module exposure thread.
    pub fn cams_by_module(&self) -> HashMap<u8, Vec<CameraId>> {
        let mut groups: HashMap<u8, Vec<CameraId>> = HashMap::new();
        for cam in &self.cams {
            groups.entry(cam.spec_num).or_default().push(*cam);
        }
        groups
    }

    /// Drops the IR arm from a windowed request: row windowing only applies
    /// to the CCD arms (§3), so a windowed request silently excludes `n*`
    /// cameras rather than failing.
    pub fn windowed_cams_excluding_infrared(&self) -> Vec<CameraId> {
        if self.blue_window.is_none() && self.red_window.is_none() {
            return self.cams.clone();
        }
        self.cams.iter().copied().filter(|cam| !cam.arm.is_infrared()).collect()
    }

    pub fn window_for_arm(&self, arm: Arm) -> Option<Window> {
        match arm {
            Arm::B | Arm::M => self.blue_window,
            Arm::R => self.red_window,
            Arm::N => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> ExposureRequest {
        ExposureRequest {
            visit: 1,
            exptype: ExpType::Object,
            exptime: 10.0,
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
    fn dark_like_exptypes_always_select_dark_kind_regardless_of_flags() {
        let mut req = base_request();
        req.exptype = ExpType::Bias;
        req.do_lamps = true;
        assert_eq!(ExposureKind::select(&req), ExposureKind::Dark);
    }

    #[test]
    fn slide_slit_with_lamps_selects_the_mutual_rendezvous_variant() {
        let mut req = base_request();
        req.do_slide_slit = true;
        req.do_lamps = true;
        assert_eq!(ExposureKind::select(&req), ExposureKind::SlideSlitLampTimed);
    }

    #[test]
    fn slide_slit_alone_selects_the_standalone_variant() {
        let mut req = base_request();
        req.do_slide_slit = true;
        assert_eq!(ExposureKind::select(&req), ExposureKind::SlideSlitStandalone);
    }

    #[test]
    fn plain_request_falls_through_to_shutter_timed() {
        let req = base_request();
        assert_eq!(ExposureKind::select(&req), ExposureKind::Plain);
    }

    #[test]
    fn windowed_request_drops_infrared_camera() {
        let mut req = base_request();
        req.cams = vec![CameraId::new(Arm::B, 1), CameraId::new(Arm::N, 1)];
        req.blue_window = Some(Window { row0: 0, nrows: 100 });
        let cams = req.windowed_cams_excluding_infrared();
        assert_eq!(cams, vec![CameraId::new(Arm::B, 1)]);
    }
}
