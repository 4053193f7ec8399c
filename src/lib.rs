//! Coordination engine for a multi-spectrograph exposure controller: the
//! detector, lamp, and slit threads; the per-module and per-exposure
//! orchestration; the exposure registry; persistence; and the batch
//! command surface built on top of `sps_exposure_core`.

pub mod commands;
pub mod detector;
pub mod exposure;
pub mod http;
pub mod hub;
pub mod lamp;
pub mod persistence;
pub mod registry;
pub mod shared;
pub mod slit;
pub mod sm_exposure;
pub mod visit;
