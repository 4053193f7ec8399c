//! Per-variant configuration knobs, gathered into one record so they can be
//! supplied once at construction instead of hardcoded throughout the
//! orchestration logic (design notes: "dynamic class substitution for
//! variant selection").

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// IR ramp timing parameters (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    pub read_time_secs: f64,
    pub n_read_min: u32,
    pub n_extra_read: u32,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            read_time_secs: 10.857,
            n_read_min: 3,
            n_extra_read: 1,
        }
    }
}

/// Top-level exposure engine configuration (§6 Environment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// If set, module `wipe` waits for every module in the exposure to
    /// report `wiped` before any shutter opens, not just its own detectors.
    pub do_sync_spectrograph: bool,
    /// Added to the lamp-timed shutter-open duration.
    pub exp_time_overhead_secs: f64,
    /// Added to the ShutterControlled post-`go` safety sleep.
    pub shutter_overhead_secs: f64,
    pub do_update_engineering_fiber_status: bool,
    pub do_update_science_fiber_status: bool,
    pub ramp: RampConfig,

    #[serde(with = "duration_secs")]
    pub wipe_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub read_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub clear_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub lamp_ready_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub lamp_go_overhead: Duration,
    #[serde(with = "duration_secs")]
    pub shutter_controlled_safety_sleep: Duration,
    #[serde(with = "duration_secs")]
    pub slit_move_overhead: Duration,
    #[serde(with = "duration_secs")]
    pub rda_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub slit_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub bia_time_limit: Duration,
    #[serde(with = "duration_secs")]
    pub motors_time_limit: Duration,

    pub database_url: String,
    pub raw_data_path: String,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            do_sync_spectrograph: false,
            exp_time_overhead_secs: 10.0,
            shutter_overhead_secs: 2.0,
            do_update_engineering_fiber_status: true,
            do_update_science_fiber_status: true,
            ramp: RampConfig::default(),
            wipe_time_limit: secs(30),
            read_time_limit: secs(90),
            clear_time_limit: secs(10),
            lamp_ready_time_limit: secs(300),
            lamp_go_overhead: secs(60),
            shutter_controlled_safety_sleep: secs(2),
            slit_move_overhead: secs(20),
            rda_time_limit: secs(180),
            slit_time_limit: secs(30),
            bia_time_limit: secs(10),
            motors_time_limit: secs(30),
            database_url: "postgres://localhost/opdb".to_owned(),
            raw_data_path: "/data/raw".to_owned(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timeouts() {
        let config = ExposureConfig::default();
        assert_eq!(config.wipe_time_limit, secs(30));
        assert_eq!(config.read_time_limit, secs(90));
        assert_eq!(config.clear_time_limit, secs(10));
        assert_eq!(config.ramp.n_read_min, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ExposureConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let parsed: ExposureConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(parsed.wipe_time_limit, config.wipe_time_limit);
    }
}
