//! State one exposure's threads all need to see: the two cancellation
//! flags, the failure accumulator, the remote-call seam, and the handful
//! of cross-module rendezvous counters the lamp/slit gating logic polls.
//!
//! Splitting this out of [`crate::exposure::Exposure`] is what lets a
//! [`crate::sm_exposure::SpecModuleExposure`] see "how many modules have
//! opened their shutters so far" without holding a reference back to its
//! own parent — the cyclic-ownership problem the design notes call out
//! for this layer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sps_exposure_core::{ExposureConfig, ExposureError, FailureSet, KeywordRegistry, RemoteClient};

use crate::detector::LightSource;
use crate::visit::ExposureKind;

pub struct ExposureShared {
    pub visit: u64,
    pub exptype: &'static str,
    pub exptime: f64,
    pub kind: ExposureKind,
    pub light_source: LightSource,
    /// The `pfsConfig` design id looked up once at submission time (§6
    /// Persisted state), reported on every `read`/`ramp` wire command.
    pub pfs_design_id: i64,
    pub do_abort: Arc<AtomicBool>,
    pub do_finish: Arc<AtomicBool>,
    pub failures: FailureSet,
    pub client: Arc<dyn RemoteClient>,
    pub registry: KeywordRegistry,
    pub config: ExposureConfig,

    module_count: usize,
    modules_wiped: AtomicUsize,
    shutters_open_count: AtomicUsize,
    shutters_closed_count: AtomicUsize,
    slit_sliding_count: AtomicUsize,
    did_gen_open_key: AtomicBool,
    did_gen_close_key: AtomicBool,
}

impl ExposureShared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        visit: u64,
        exptype: &'static str,
        exptime: f64,
        kind: ExposureKind,
        light_source: LightSource,
        pfs_design_id: i64,
        module_count: usize,
        client: Arc<dyn RemoteClient>,
        registry: KeywordRegistry,
        config: ExposureConfig,
    ) -> Self {
        Self {
            visit,
            exptype,
            exptime,
            kind,
            light_source,
            pfs_design_id,
            do_abort: Arc::new(AtomicBool::new(false)),
            do_finish: Arc::new(AtomicBool::new(false)),
            failures: FailureSet::new(),
            client,
            registry,
            config,
            module_count,
            modules_wiped: AtomicUsize::new(0),
            shutters_open_count: AtomicUsize::new(0),
            shutters_closed_count: AtomicUsize::new(0),
            slit_sliding_count: AtomicUsize::new(0),
            did_gen_open_key: AtomicBool::new(false),
            did_gen_close_key: AtomicBool::new(false),
        }
    }

    pub fn module_count(&self) -> usize {
        self.module_count
    }

    /// Records that one module finished wiping every detector it owns.
    pub fn module_wiped(&self) {
        self.modules_wiped.fetch_add(1, Ordering::AcqRel);
    }

    /// `doSyncSpectrograph`'s barrier: blocks until every module in the
    /// exposure (not just this thread's own) has wiped.
    pub async fn wait_all_modules_wiped(&self, subsystem: &str) -> Result<(), ExposureError> {
        loop {
            if self.modules_wiped.load(Ordering::Acquire) >= self.module_count {
                return Ok(());
            }
            if self.do_abort.load(Ordering::Acquire) {
                return Err(ExposureError::aborted(subsystem, "aborted while waiting for sibling modules to wipe"));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// `true` exactly once, on the call that brings the open count up to
    /// `moduleCount` — the single module whose callback should actually
    /// emit the aggregate `pfiShutters=open` keyword.
    pub fn record_shutters_open(&self) -> bool {
        let count = self.shutters_open_count.fetch_add(1, Ordering::AcqRel) + 1;
        count == self.module_count && !self.did_gen_open_key.swap(true, Ordering::AcqRel)
    }

    pub fn record_shutters_closed(&self) -> bool {
        let count = self.shutters_closed_count.fetch_add(1, Ordering::AcqRel) + 1;
        count == self.module_count && !self.did_gen_close_key.swap(true, Ordering::AcqRel)
    }

    pub fn record_slit_sliding(&self) -> usize {
        self.slit_sliding_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn all_shutters_open(&self) -> bool {
        self.shutters_open_count.load(Ordering::Acquire) >= self.module_count
    }

    pub fn all_shutters_closed(&self) -> bool {
        self.shutters_closed_count.load(Ordering::Acquire) >= self.module_count
    }

    pub fn all_slits_sliding(&self) -> bool {
        self.slit_sliding_count.load(Ordering::Acquire) >= self.module_count
    }

    /// Polls `condition` at ~1 ms until it's true, observing abort. Used by
    /// the lamp/slit rendezvous watchers to release a go signal once every
    /// sibling module has reached the release condition (§4.8/§4.9).
    pub async fn wait_until(&self, subsystem: &str, mut condition: impl FnMut() -> bool) -> Result<(), ExposureError> {
        loop {
            if condition() {
                return Ok(());
            }
            if self.do_abort.load(Ordering::Acquire) {
                return Err(ExposureError::aborted(subsystem, "aborted while waiting for rendezvous condition"));
            }
            if self.do_finish.load(Ordering::Acquire) {
                return Err(ExposureError::EarlyFinish {
                    subsystem: subsystem.to_owned(),
                    reason: "doFinish requested before rendezvous condition was met".to_owned(),
                });
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(module_count: usize) -> ExposureShared {
        struct NoopClient;
        #[async_trait::async_trait]
        impl RemoteClient for NoopClient {
            async fn call_raw(&self, _a: &str, _c: &str, _t: Duration) -> sps_exposure_core::ReplyBundle {
                sps_exposure_core::ReplyBundle::success(Default::default())
            }
            async fn call_no_wait(&self, _a: &str, _c: &str) -> sps_exposure_core::ReplyBundle {
                sps_exposure_core::ReplyBundle::success(Default::default())
            }
        }
        ExposureShared::new(
            1,
            "object",
            10.0,
            ExposureKind::Plain,
            LightSource::Pfi,
            0,
            module_count,
            Arc::new(NoopClient),
            KeywordRegistry::new(),
            ExposureConfig::default(),
        )
    }

    #[test]
    fn shutter_open_key_fires_exactly_once_at_module_count() {
        let shared = shared(2);
        assert!(!shared.record_shutters_open());
        assert!(shared.record_shutters_open());
        // A third, spurious call (e.g. a re-publish) must not fire again.
        assert!(!shared.record_shutters_open());
    }
}
