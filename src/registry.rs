//! The exposure registry (§4.11): visit-keyed map of in-flight exposures,
//! with atomic insert-if-absent and the terminal-reply policy from §7's
//! propagation table. Grounded on the source's `Commands/ExposeCmd.py`
//! (`process`/`abort`/`finish`/`status`) collapsed into one registry type
//! rather than a command-handler class.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::PgPool;

use sps_exposure_core::{ExposureConfig, KeywordRegistry, RemoteClient};

use crate::detector::LightSource;
use crate::exposure::Exposure;
use crate::persistence;
use crate::visit::ExposureRequest;

/// The terminal outcome of one exposure, ready for the command surface to
/// turn into success/warn/fail lines (§7).
pub enum Outcome {
    Success { file_ids: String },
    StorableWithFailures { file_ids: String, failures: String },
    Failed { failures: String },
}

pub struct ExposureRegistry {
    exposures: Mutex<HashMap<u64, Arc<Exposure>>>,
    client: Arc<dyn RemoteClient>,
    registry: KeywordRegistry,
    config: ExposureConfig,
    pool: PgPool,
}

impl ExposureRegistry {
    pub fn new(client: Arc<dyn RemoteClient>, registry: KeywordRegistry, config: ExposureConfig, pool: PgPool) -> Self {
        Self {
            exposures: Mutex::new(HashMap::new()),
            client,
            registry,
            config,
            pool,
        }
    }

    /// Builds and registers the exposure for `req`, rejecting a visit that
    /// already has one in flight. The pfsConfig design lookup and the
    /// `sps_visit` row insert both happen before the critical section (they
    /// are idempotent-enough DB/filesystem reads/writes); the insert-if-absent
    /// check and the registry insert itself stay atomic under one lock
    /// acquisition (§5 Shared-resource policy).
    pub async fn submit(
        &self,
        req: &ExposureRequest,
        light_sources: &HashMap<u8, LightSource>,
    ) -> Result<Arc<Exposure>, String> {
        if self.exposures.lock().contains_key(&req.visit) {
            return Err(format!("exposure(visit={}) already ongoing", req.visit));
        }

        let design = persistence::pfs_design_for_visit(&self.pool, &self.config.raw_data_path, req.visit).await;
        if let Err(err) = persistence::insert_visit(&self.pool, req.visit, req.wire_exptype()).await {
            tracing::warn!(error = %err, visit = req.visit, "failed to persist sps_visit row");
        }

        let mut exposures = self.exposures.lock();
        if exposures.contains_key(&req.visit) {
            return Err(format!("exposure(visit={}) already ongoing", req.visit));
        }
        let exposure = Arc::new(Exposure::new(
            req,
            self.client.clone(),
            self.registry.clone(),
            self.config.clone(),
            light_sources,
            design.design_id,
        ));
        exposures.insert(req.visit, exposure.clone());
        Ok(exposure)
    }

    /// Runs one registered exposure to completion and removes it, producing
    /// the terminal outcome the command surface reports. Mirrors
    /// `ExposeCmd.process`'s `waitForCompletion` → `fileIds`/`fail` tail.
    pub async fn run_to_completion(&self, exposure: Arc<Exposure>) -> Outcome {
        exposure.start().await;
        exposure.wait_for_completion().await;

        tracing::info!(
            visit = exposure.visit(),
            "fiberIllumination=0x{:02x}",
            exposure.fiber_illumination_byte()
        );

        let outcomes = exposure.outcomes().await;
        let storable = !outcomes.is_empty();
        let failures_empty = exposure.failures_empty();

        // Storable ⇒ row, inserted before the terminal reply is produced (§8).
        if let Err(err) = persistence::insert_exposures(&self.pool, exposure.visit(), &outcomes).await {
            tracing::warn!(error = %err, visit = exposure.visit(), "failed to persist sps_exposure rows");
        }

        let result = if failures_empty {
            Outcome::Success { file_ids: exposure.file_ids(&outcomes) }
        } else if storable {
            Outcome::StorableWithFailures {
                file_ids: exposure.file_ids(&outcomes),
                failures: exposure.failures(),
            }
        } else {
            Outcome::Failed { failures: exposure.failures() }
        };

        exposure.exit();
        self.exposures.lock().remove(&exposure.visit());
        result
    }

    pub fn abort(&self, visit: u64) -> Result<Arc<Exposure>, String> {
        self.lookup(visit)
    }

    pub fn finish(&self, visit: u64) -> Result<Arc<Exposure>, String> {
        self.lookup(visit)
    }

    fn lookup(&self, visit: u64) -> Result<Arc<Exposure>, String> {
        self.exposures
            .lock()
            .get(&visit)
            .cloned()
            .ok_or_else(|| self.unknown_visit_message())
    }

    fn unknown_visit_message(&self) -> String {
        let visits = self.exposures.lock();
        let mut ids: Vec<u64> = visits.keys().copied().collect();
        ids.sort_unstable();
        let list = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        format!("no such exposure, valid visits: [{list}]")
    }

    /// One `text="Exposure(visit=<v> exptype=<t> exptime=<x>)"` line per
    /// active exposure.
    pub fn status_lines(&self) -> Vec<String> {
        let mut exposures: Vec<(u64, Arc<Exposure>)> =
            self.exposures.lock().iter().map(|(visit, exposure)| (*visit, exposure.clone())).collect();
        exposures.sort_by_key(|(visit, _)| *visit);
        exposures
            .into_iter()
            .map(|(visit, exposure)| format!("Exposure(visit={} exptype={} exptime={})", visit, exposure.exptype(), exposure.exptime()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::time::Duration;
    use sps_exposure_core::{Arm, CameraId, ReplyBundle};

    struct NoopClient;

    #[async_trait::async_trait]
    impl RemoteClient for NoopClient {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            ReplyBundle::success(Map::new())
        }
        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(Map::new())
        }
    }

    fn bias_request(visit: u64) -> ExposureRequest {
        ExposureRequest {
            visit,
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

    fn registry() -> ExposureRegistry {
        // `connect_lazy` defers the actual TCP connection to first use, so
        // these tests never touch a real database: `submit` only needs the
        // pool to fail gracefully, which `pfs_design_for_visit` already
        // handles by falling back to the filesystem/default lookup.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction does not dial the database");
        ExposureRegistry::new(Arc::new(NoopClient), KeywordRegistry::new(), ExposureConfig::default(), pool)
    }

    #[tokio::test]
    async fn duplicate_visit_is_rejected() {
        let registry = registry();
        let sources = Map::new();
        registry.submit(&bias_request(1), &sources).await.unwrap();
        let err = registry.submit(&bias_request(1), &sources).await.unwrap_err();
        assert_eq!(err, "exposure(visit=1) already ongoing");
    }

    #[tokio::test]
    async fn abort_on_unknown_visit_lists_valid_visits() {
        let registry = registry();
        let sources = Map::new();
        registry.submit(&bias_request(7), &sources).await.unwrap();
        let err = registry.abort(99).unwrap_err();
        assert_eq!(err, "no such exposure, valid visits: [7]");
    }

    #[tokio::test]
    async fn status_lines_cover_every_active_exposure() {
        let registry = registry();
        let sources = Map::new();
        registry.submit(&bias_request(1), &sources).await.unwrap();
        registry.submit(&bias_request(2), &sources).await.unwrap();
        let lines = registry.status_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Exposure(visit=1"));
    }
}
