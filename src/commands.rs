//! Batch command fan-out (§4.4, §6): `rda` / `slit` / `bia` / `iis` /
//! `ccdMotors` / `fpa` / `erase`, each a thin builder over
//! [`sps_exposure_core::sync::CmdThread`] targeting the actor family and
//! time limit the source's `cmdList.py`/`SyncCmd.py` assign it.

use std::sync::Arc;
use std::time::Duration;

use sps_exposure_core::{sync, CameraId, ExposureConfig, ExposureError, FailureSet, KeywordRegistry, RemoteClient};

fn enu_actor(spec_num: u8) -> String {
    format!("enu_sm{spec_num}")
}

/// `rda moveTo <low|med>` → `enu_sm<n> rexm moveTo <pos>` (§6 Remote actor
/// commands), 180s per leg.
pub fn rda_threads(spec_nums: &[u8], position: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    spec_nums
        .iter()
        .map(|spec_num| {
            sync::CmdThread::new(
                enu_actor(*spec_num),
                format!("rexm moveTo {position}"),
                config.rda_time_limit,
                |actor, reason| ExposureError::MotorsFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `slit <focus|dither|home|start|stop>` → `enu_sm<n> slit ...`, 30s.
pub fn slit_threads(spec_nums: &[u8], subcommand: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    spec_nums
        .iter()
        .map(|spec_num| {
            sync::CmdThread::new(
                enu_actor(*spec_num),
                format!("slit {subcommand}"),
                config.slit_time_limit,
                |actor, reason| ExposureError::SlitMoveFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `bia <on|off|strobe off>` → `enu_sm<n> bia ...`, 10s.
pub fn bia_threads(spec_nums: &[u8], subcommand: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    spec_nums
        .iter()
        .map(|spec_num| {
            sync::CmdThread::new(
                enu_actor(*spec_num),
                format!("bia {subcommand}"),
                config.bia_time_limit,
                |actor, reason| ExposureError::BiaFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `iis <on|off|prepare>` → `enu_sm<n> iis ...`, reusing the bia time
/// limit (the source has no dedicated one for this family).
pub fn iis_threads(spec_nums: &[u8], subcommand: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    spec_nums
        .iter()
        .map(|spec_num| {
            sync::CmdThread::new(
                enu_actor(*spec_num),
                format!("iis {subcommand}"),
                config.bia_time_limit,
                |actor, reason| ExposureError::IisFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `ccdMotors move` / `fpa toFocus|moveFocus` → `xcu_<cam> motors move ...`,
/// 30s. Both command families share the same actor target and failure
/// kind in the source (`fpa` is `ccdMotors` under a historical alias).
pub fn ccd_motors_threads(cams: &[CameraId], subcommand: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    cams.iter()
        .map(|cam| {
            sync::CmdThread::new(
                format!("xcu_{cam}"),
                format!("motors {subcommand}"),
                config.motors_time_limit,
                |actor, reason| ExposureError::MotorsFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `declareLightSource <pfi|dcb> [spec_nums]` → `enu_sm<n> declareLightSource
/// <source>`, reusing the `bia`/`iis` family's time limit. The caller is
/// responsible for also updating the local [`crate::detector::LightSourceTable`]
/// once every leg succeeds — this builder only covers the remote side.
pub fn declare_light_source_threads(spec_nums: &[u8], source: &str, config: &ExposureConfig) -> Vec<sync::CmdThread> {
    spec_nums
        .iter()
        .map(|spec_num| {
            sync::CmdThread::new(
                enu_actor(*spec_num),
                format!("declareLightSource {source}"),
                config.bia_time_limit,
                |actor, reason| ExposureError::PreconditionFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// `erase [cam|cams]` → `ccd_<cam> erase`.
pub fn erase_threads(cams: &[CameraId], config: &ExposureConfig) -> Vec<sync::CmdThread> {
    cams.iter()
        .map(|cam| {
            sync::CmdThread::new(
                cam.ccd_actor(),
                "erase".to_owned(),
                config.clear_time_limit,
                |actor, reason| ExposureError::EraseFailed { subsystem: actor, reason },
            )
        })
        .collect()
}

/// Runs a batch built by one of the functions above against `client`,
/// returning the formatted failure set on any leg's failure.
pub async fn run_batch(
    threads: Vec<sync::CmdThread>,
    client: &dyn RemoteClient,
    registry: &KeywordRegistry,
) -> Result<(), String> {
    let failures = FailureSet::new();
    sync::process(threads, client, registry, &failures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sps_exposure_core::{Arm, ReplyBundle};

    struct FakeActors;

    #[async_trait::async_trait]
    impl RemoteClient for FakeActors {
        async fn call_raw(&self, _actor: &str, _command: &str, _time_limit: Duration) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
        async fn call_no_wait(&self, _actor: &str, _command: &str) -> ReplyBundle {
            ReplyBundle::success(HashMap::new())
        }
    }

    #[tokio::test]
    async fn rda_targets_rexm_on_every_named_module() {
        let config = ExposureConfig::default();
        let threads = rda_threads(&[1, 2], "low", &config);
        assert_eq!(threads[0].actor, "enu_sm1");
        assert_eq!(threads[0].cmd, "rexm moveTo low");
        let registry = KeywordRegistry::new();
        let result = run_batch(threads, &FakeActors, &registry).await;
        assert!(result.is_ok());
    }

    #[test]
    fn declare_light_source_targets_enu_actor() {
        let config = ExposureConfig::default();
        let threads = declare_light_source_threads(&[3], "dcb", &config);
        assert_eq!(threads[0].actor, "enu_sm3");
        assert_eq!(threads[0].cmd, "declareLightSource dcb");
    }

    #[test]
    fn ccd_motors_targets_xcu_actor() {
        let config = ExposureConfig::default();
        let threads = ccd_motors_threads(&[CameraId::new(Arm::B, 1)], "move low", &config);
        assert_eq!(threads[0].actor, "xcu_b1");
    }

    #[test]
    fn erase_targets_ccd_actor() {
        let config = ExposureConfig::default();
        let threads = erase_threads(&[CameraId::new(Arm::R, 3)], &config);
        assert_eq!(threads[0].actor, "ccd_r3");
        assert_eq!(threads[0].cmd, "erase");
    }
}
