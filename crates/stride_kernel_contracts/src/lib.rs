#![forbid(unsafe_code)]

pub mod common;
pub mod ledger;
pub mod motion;
pub mod reconcile;
pub mod rollup;

pub use common::{
    ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, TrackerState, Validate,
};
