#![forbid(unsafe_code)]

use crate::ledger::{CalendarDate, UserId, MAX_DAILY_STEP_COUNT};
use crate::motion::{MotionObservation, MotionPlatformKind, MAX_SESSION_EMISSION};
use crate::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};

pub const RECONCILE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(pub u128);

impl Validate for CorrelationId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "correlation_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Sequence number of a reconciliation tick within one tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickSeq(pub u64);

impl Validate for TickSeq {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "tick_seq",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeCapabilityId {
    MergeCompute,
    CommitResolve,
}

impl MergeCapabilityId {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeCapabilityId::MergeCompute => "MERGE_COMPUTE",
            MergeCapabilityId::CommitResolve => "COMMIT_RESOLVE",
        }
    }
}

/// Engine-local session counters. Ephemeral: lives for one tracking session
/// (app-foreground lifetime) and is reset whenever tracking restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerSessionState {
    /// Latest emission seen from the incremental stream (always 0 on
    /// absolute platforms).
    pub session_count: u64,
    /// `session_count` at the last successful commit.
    pub session_baseline: u64,
    /// The total most recently accepted by the ledger for today.
    pub last_persisted_total: u64,
}

impl TrackerSessionState {
    pub fn fresh() -> Self {
        Self {
            session_count: 0,
            session_baseline: 0,
            last_persisted_total: 0,
        }
    }
}

impl Validate for TrackerSessionState {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.session_count > MAX_SESSION_EMISSION {
            return Err(ContractViolation::InvalidValue {
                field: "tracker_session_state.session_count",
                reason: "exceeds max session emission",
            });
        }
        if self.session_baseline > MAX_SESSION_EMISSION {
            return Err(ContractViolation::InvalidValue {
                field: "tracker_session_state.session_baseline",
                reason: "exceeds max session emission",
            });
        }
        if self.last_persisted_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "tracker_session_state.last_persisted_total",
                reason: "exceeds max daily step count",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEnvelope {
    pub schema_version: SchemaVersion,
    pub correlation_id: CorrelationId,
    pub tick_seq: TickSeq,
}

impl TickEnvelope {
    pub fn v1(correlation_id: CorrelationId, tick_seq: TickSeq) -> Result<Self, ContractViolation> {
        let envelope = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            correlation_id,
            tick_seq,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

impl Validate for TickEnvelope {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "tick_envelope.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        self.correlation_id.validate()?;
        self.tick_seq.validate()?;
        Ok(())
    }
}

/// Compute the candidate total for today from one raw observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeComputeRequest {
    pub schema_version: SchemaVersion,
    pub envelope: TickEnvelope,
    pub user_id: UserId,
    pub date: CalendarDate,
    pub platform: MotionPlatformKind,
    pub session: TrackerSessionState,
    pub observation: MotionObservation,
}

impl MergeComputeRequest {
    pub fn v1(
        envelope: TickEnvelope,
        user_id: UserId,
        date: CalendarDate,
        platform: MotionPlatformKind,
        session: TrackerSessionState,
        observation: MotionObservation,
    ) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            envelope,
            user_id,
            date,
            platform,
            session,
            observation,
        };
        req.validate()?;
        Ok(req)
    }
}

impl Validate for MergeComputeRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "merge_compute_request.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        self.envelope.validate()?;
        self.session.validate()?;
        self.observation.validate()?;
        match (self.platform, &self.observation) {
            (MotionPlatformKind::Absolute, MotionObservation::AbsoluteWindowCount { .. }) => Ok(()),
            (MotionPlatformKind::Incremental, MotionObservation::IncrementalEmission { .. }) => {
                Ok(())
            }
            (MotionPlatformKind::Unavailable, _) => Err(ContractViolation::InvalidValue {
                field: "merge_compute_request.platform",
                reason: "unavailable platform never reaches the merge engine",
            }),
            _ => Err(ContractViolation::InvalidValue {
                field: "merge_compute_request.observation",
                reason: "observation kind must match resolved platform",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeComputeOk {
    pub schema_version: SchemaVersion,
    pub capability_id: MergeCapabilityId,
    pub reason_code: ReasonCodeId,
    pub user_id: UserId,
    pub date: CalendarDate,
    /// The value the engine now believes is correct for today, pending
    /// commit. Never below `last_persisted_total`.
    pub candidate_total: u64,
    /// Steps added on top of `last_persisted_total` by this tick (always 0
    /// on absolute platforms where the candidate replaces wholesale).
    pub delta: u64,
    /// True when the raw incremental delta was negative and clamped to 0
    /// (stream reset after a restart or re-subscription).
    pub clamped_reset: bool,
}

impl MergeComputeOk {
    pub fn v1(
        reason_code: ReasonCodeId,
        user_id: UserId,
        date: CalendarDate,
        candidate_total: u64,
        delta: u64,
        clamped_reset: bool,
    ) -> Result<Self, ContractViolation> {
        let ok = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            capability_id: MergeCapabilityId::MergeCompute,
            reason_code,
            user_id,
            date,
            candidate_total,
            delta,
            clamped_reset,
        };
        ok.validate()?;
        Ok(ok)
    }
}

impl Validate for MergeComputeOk {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "merge_compute_ok.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        if self.capability_id != MergeCapabilityId::MergeCompute {
            return Err(ContractViolation::InvalidValue {
                field: "merge_compute_ok.capability_id",
                reason: "must be MERGE_COMPUTE",
            });
        }
        if self.candidate_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "merge_compute_ok.candidate_total",
                reason: "exceeds max daily step count",
            });
        }
        if self.delta > self.candidate_total {
            return Err(ContractViolation::InvalidValue {
                field: "merge_compute_ok.delta",
                reason: "must be <= candidate_total",
            });
        }
        Ok(())
    }
}

/// Resolve the cycle's ledger read against the local candidate, deciding
/// the displayed value and the session counters going forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResolveRequest {
    pub schema_version: SchemaVersion,
    pub envelope: TickEnvelope,
    pub user_id: UserId,
    pub date: CalendarDate,
    pub candidate_total: u64,
    /// Whether the upsert attempt this tick was accepted by the ledger.
    /// Session counters only advance past the candidate on success.
    pub commit_succeeded: bool,
    /// Remote value for today observed by the read-back; `None` when the
    /// read-back itself failed.
    pub remote_total: Option<u64>,
    pub session: TrackerSessionState,
}

impl CommitResolveRequest {
    pub fn v1(
        envelope: TickEnvelope,
        user_id: UserId,
        date: CalendarDate,
        candidate_total: u64,
        commit_succeeded: bool,
        remote_total: Option<u64>,
        session: TrackerSessionState,
    ) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            envelope,
            user_id,
            date,
            candidate_total,
            commit_succeeded,
            remote_total,
            session,
        };
        req.validate()?;
        Ok(req)
    }
}

impl Validate for CommitResolveRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_request.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        self.envelope.validate()?;
        self.session.validate()?;
        if self.candidate_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_request.candidate_total",
                reason: "exceeds max daily step count",
            });
        }
        if self.candidate_total < self.session.last_persisted_total {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_request.candidate_total",
                reason: "must be >= session.last_persisted_total",
            });
        }
        if let Some(remote) = self.remote_total {
            if remote > MAX_DAILY_STEP_COUNT {
                return Err(ContractViolation::InvalidValue {
                    field: "commit_resolve_request.remote_total",
                    reason: "exceeds max daily step count",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResolveOk {
    pub schema_version: SchemaVersion,
    pub capability_id: MergeCapabilityId,
    pub reason_code: ReasonCodeId,
    pub user_id: UserId,
    pub date: CalendarDate,
    /// The single authoritative value displayed after this cycle:
    /// `max(candidate_total, remote_total)`.
    pub resolved_total: u64,
    /// True when a concurrent writer's larger value was adopted.
    pub adopted_remote: bool,
    pub session_after: TrackerSessionState,
}

impl CommitResolveOk {
    pub fn v1(
        reason_code: ReasonCodeId,
        user_id: UserId,
        date: CalendarDate,
        resolved_total: u64,
        adopted_remote: bool,
        session_after: TrackerSessionState,
    ) -> Result<Self, ContractViolation> {
        let ok = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            capability_id: MergeCapabilityId::CommitResolve,
            reason_code,
            user_id,
            date,
            resolved_total,
            adopted_remote,
            session_after,
        };
        ok.validate()?;
        Ok(ok)
    }
}

impl Validate for CommitResolveOk {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_ok.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        if self.capability_id != MergeCapabilityId::CommitResolve {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_ok.capability_id",
                reason: "must be COMMIT_RESOLVE",
            });
        }
        if self.resolved_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_ok.resolved_total",
                reason: "exceeds max daily step count",
            });
        }
        self.session_after.validate()?;
        if self.session_after.last_persisted_total > self.resolved_total {
            return Err(ContractViolation::InvalidValue {
                field: "commit_resolve_ok.session_after",
                reason: "last_persisted_total must not exceed resolved_total",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRefuse {
    pub schema_version: SchemaVersion,
    pub capability_id: MergeCapabilityId,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl MergeRefuse {
    pub fn v1(
        capability_id: MergeCapabilityId,
        reason_code: ReasonCodeId,
        message: String,
    ) -> Result<Self, ContractViolation> {
        let refuse = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            capability_id,
            reason_code,
            message,
        };
        refuse.validate()?;
        Ok(refuse)
    }
}

impl Validate for MergeRefuse {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "merge_refuse.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        if self.message.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "merge_refuse.message",
                reason: "must not be empty",
            });
        }
        if self.message.len() > 256 {
            return Err(ContractViolation::InvalidValue {
                field: "merge_refuse.message",
                reason: "must be <= 256 chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRequest {
    MergeCompute(MergeComputeRequest),
    CommitResolve(CommitResolveRequest),
}

impl Validate for MergeRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            MergeRequest::MergeCompute(req) => req.validate(),
            MergeRequest::CommitResolve(req) => req.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResponse {
    MergeComputeOk(MergeComputeOk),
    CommitResolveOk(CommitResolveOk),
    Refuse(MergeRefuse),
}
