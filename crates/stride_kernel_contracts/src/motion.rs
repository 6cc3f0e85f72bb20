#![forbid(unsafe_code)]

use crate::ledger::MAX_DAILY_STEP_COUNT;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const MOTION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Upper bound on a cumulative incremental-stream emission. A subscription
/// lives for one app-foreground session at most, so this is far above any
/// plausible emission.
pub const MAX_SESSION_EMISSION: u64 = 10_000_000;

/// Sensor semantics, resolved exactly once at initialization. Runtime code
/// branches on this tag, never on repeated capability probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionPlatformKind {
    /// Cumulative counter queryable on demand for an arbitrary window;
    /// monotonic within a calendar day by construction.
    Absolute,
    /// Live stream of cumulative counts since the current subscription
    /// began. Re-subscribing resets the emitted sequence to near zero.
    Incremental,
    /// Sensor missing or the capability check failed.
    Unavailable,
}

impl MotionPlatformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionPlatformKind::Absolute => "ABSOLUTE",
            MotionPlatformKind::Incremental => "INCREMENTAL",
            MotionPlatformKind::Unavailable => "UNAVAILABLE",
        }
    }
}

/// Why a tracking session could not be initialized. Both variants are
/// terminal for the session; nothing in this subsystem retries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionInitError {
    SensorUnavailable,
    PermissionDenied,
}

impl MotionInitError {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionInitError::SensorUnavailable => "SENSOR_UNAVAILABLE",
            MotionInitError::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

/// Query window for an absolute-counter read, `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotionWindow {
    pub since: MonotonicTimeNs,
    pub until: MonotonicTimeNs,
}

impl MotionWindow {
    pub fn v1(since: MonotonicTimeNs, until: MonotonicTimeNs) -> Result<Self, ContractViolation> {
        let window = Self { since, until };
        window.validate()?;
        Ok(window)
    }
}

impl Validate for MotionWindow {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.until.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "motion_window.until",
                reason: "must be > 0",
            });
        }
        if self.until.0 < self.since.0 {
            return Err(ContractViolation::InvalidValue {
                field: "motion_window.until",
                reason: "must be >= motion_window.since",
            });
        }
        Ok(())
    }
}

/// One raw reading handed to the merge engine, tagged by sensor semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionObservation {
    /// The sensor's own cumulative total for the queried window.
    AbsoluteWindowCount { window: MotionWindow, count: u64 },
    /// Latest emission from the live stream: cumulative since this
    /// subscription began, not since any calendar boundary.
    IncrementalEmission { session_count: u64 },
}

impl Validate for MotionObservation {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            MotionObservation::AbsoluteWindowCount { window, count } => {
                window.validate()?;
                if *count > MAX_DAILY_STEP_COUNT {
                    return Err(ContractViolation::InvalidValue {
                        field: "motion_observation.count",
                        reason: "exceeds max daily step count",
                    });
                }
                Ok(())
            }
            MotionObservation::IncrementalEmission { session_count } => {
                if *session_count > MAX_SESSION_EMISSION {
                    return Err(ContractViolation::InvalidValue {
                        field: "motion_observation.session_count",
                        reason: "exceeds max session emission",
                    });
                }
                Ok(())
            }
        }
    }
}
