//! Actor-agnostic primitives for the exposure orchestration engine: the
//! remote call client, the keyword model registry, the failure
//! accumulator, camera/arm id utilities, the `Sync`/`CmdThread` fan-out
//! primitive, the error taxonomy and the configuration record.
//!
//! Nothing in this crate knows what an "exposure" is — that domain lives
//! in `sps-exposure-actor`, built on top of these pieces the way a
//! device-protocol crate underlies a specific driver.

pub mod client;
pub mod config;
pub mod error;
pub mod failures;
pub mod ids;
pub mod keywords;
pub mod sync;

pub use client::{Client, ReplyBundle, RemoteClient};
pub use config::{ExposureConfig, RampConfig};
pub use error::ExposureError;
pub use failures::FailureSet;
pub use ids::{Arm, CameraId};
pub use keywords::{KeyVar, KeywordRegistry, Subscription};
pub use sync::{process as sync_process, CmdThread};
