//! Detector threads: one per CCD camera, one per IR (hx) detector.

pub mod ccd;
pub mod ir;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use sps_exposure_core::ExposureError;

pub use ccd::{CcdDetector, ReadOutcome};
pub use ir::IrDetector;

use sps_exposure_core::CameraId;

/// A detector thread of either flavor, so the module layer can hold a
/// uniform collection instead of branching on arm everywhere it needs to
/// ask "is this one finished yet".
pub enum AnyDetector {
    Ccd(CcdDetector),
    Ir(IrDetector),
}

impl AnyDetector {
    pub fn cam(&self) -> CameraId {
        match self {
            AnyDetector::Ccd(d) => d.cam,
            AnyDetector::Ir(d) => d.cam,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            AnyDetector::Ccd(d) => d.is_finished(),
            AnyDetector::Ir(d) => d.is_finished(),
        }
    }

    pub fn is_cleared(&self) -> bool {
        match self {
            AnyDetector::Ccd(d) => d.is_cleared(),
            AnyDetector::Ir(d) => d.is_cleared(),
        }
    }

    pub async fn is_storable(&self) -> bool {
        match self {
            AnyDetector::Ccd(d) => d.is_storable().await,
            AnyDetector::Ir(d) => d.is_storable().await,
        }
    }

    pub async fn store(&self) -> Option<ReadOutcome> {
        match self {
            AnyDetector::Ccd(d) => d.store().await,
            AnyDetector::Ir(d) => d.store().await,
        }
    }

    pub async fn clear_exposure(&self) {
        if let AnyDetector::Ccd(d) = self {
            d.clear_exposure().await;
        }
    }

    pub fn as_ir(&self) -> Option<&IrDetector> {
        match self {
            AnyDetector::Ir(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_ccd(&self) -> Option<&CcdDetector> {
        match self {
            AnyDetector::Ccd(d) => Some(d),
            _ => None,
        }
    }
}

/// Where the light for this module's exposure is coming from. Read-failure
/// recovery and the `fiberIllumination` keyword both depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightSource {
    /// The telescope's own focal plane — a failed read may still carry
    /// recoverable sky data, so the detector is not discarded.
    Pfi,
    /// A calibration lamp bench (DCB) — a failed read carries no usable
    /// data.
    Dcb,
}

impl LightSource {
    pub fn is_pfi(self) -> bool {
        matches!(self, LightSource::Pfi)
    }
}

/// Process-wide record of which light source each spectrograph module is
/// currently wired to, updated by the `declareLightSource` command
/// (§6) and read by every `Exposure::new` call. A module with no entry
/// defaults to `Pfi` — the telescope focal plane is the sane fallback for
/// a module nobody has declared onto a calibration bench.
#[derive(Debug, Default)]
pub struct LightSourceTable {
    sources: RwLock<HashMap<u8, LightSource>>,
}

impl LightSourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, spec_num: u8, source: LightSource) {
        self.sources.write().insert(spec_num, source);
    }

    /// A point-in-time copy suitable for handing to `Exposure::new`, which
    /// borrows its light-source map only for the duration of construction.
    pub fn snapshot(&self) -> HashMap<u8, LightSource> {
        self.sources.read().clone()
    }
}

/// CCD row windowing, applied per-arm. Never applied to the IR arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row0: u32,
    pub nrows: u32,
}

/// Polls at ~1 ms until `deadline`, observing the two cooperative
/// cancellation flags at each tick (design notes: "polling loops with 1 ms
/// sleeps").
pub async fn poll_until(
    deadline: Instant,
    do_abort: &AtomicBool,
    do_finish: &AtomicBool,
    subsystem: &str,
) -> Result<(), ExposureError> {
    if do_finish.load(Ordering::Acquire) {
        return Err(ExposureError::EarlyFinish {
            subsystem: subsystem.to_owned(),
            reason: "doFinish was already set".to_owned(),
        });
    }
    if do_abort.load(Ordering::Acquire) {
        return Err(ExposureError::aborted(subsystem, "doAbort was already set"));
    }

    loop {
        if do_abort.load(Ordering::Acquire) {
            return Err(ExposureError::aborted(subsystem, "aborted while integrating"));
        }
        if do_finish.load(Ordering::Acquire) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
