#![forbid(unsafe_code)]

use stride_kernel_contracts::motion::MotionObservation;
use stride_kernel_contracts::reconcile::{
    CommitResolveOk, CommitResolveRequest, MergeCapabilityId, MergeComputeOk, MergeComputeRequest,
    MergeRefuse, MergeRequest, MergeResponse, TrackerSessionState,
};
use stride_kernel_contracts::{ReasonCodeId, Validate};

pub mod reason_codes {
    use stride_kernel_contracts::ReasonCodeId;

    // Merge-engine reason-code namespace.
    pub const MERGE_OK_ABSOLUTE_REPLACE: ReasonCodeId = ReasonCodeId(0x4D47_0001);
    pub const MERGE_OK_INCREMENTAL_DELTA: ReasonCodeId = ReasonCodeId(0x4D47_0002);
    pub const MERGE_OK_INCREMENTAL_RESET_CLAMPED: ReasonCodeId = ReasonCodeId(0x4D47_0003);

    pub const COMMIT_LOCAL_RETAINED: ReasonCodeId = ReasonCodeId(0x4D47_0010);
    pub const COMMIT_REMOTE_ADOPTED: ReasonCodeId = ReasonCodeId(0x4D47_0011);
    pub const COMMIT_READBACK_MISSING: ReasonCodeId = ReasonCodeId(0x4D47_0012);
    pub const COMMIT_RETRY_PENDING: ReasonCodeId = ReasonCodeId(0x4D47_0013);

    pub const MERGE_INPUT_SCHEMA_INVALID: ReasonCodeId = ReasonCodeId(0x4D47_00F1);
    pub const MERGE_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x4D47_00F4);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeConfig {
    pub max_daily_step_count: u64,
}

impl MergeConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_daily_step_count: stride_kernel_contracts::ledger::MAX_DAILY_STEP_COUNT,
        }
    }
}

/// Pure merge core of the reconciliation loop. Owns no state: session
/// counters come in with the request and leave with the response, so every
/// decision is replayable.
#[derive(Debug, Clone)]
pub struct MergeRuntime {
    config: MergeConfig,
}

impl MergeRuntime {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, req: &MergeRequest) -> MergeResponse {
        if req.validate().is_err() {
            return self.refuse(
                capability_from_request(req),
                reason_codes::MERGE_INPUT_SCHEMA_INVALID,
                "merge request failed contract validation",
            );
        }

        match req {
            MergeRequest::MergeCompute(r) => self.run_merge_compute(r),
            MergeRequest::CommitResolve(r) => self.run_commit_resolve(r),
        }
    }

    fn run_merge_compute(&self, req: &MergeComputeRequest) -> MergeResponse {
        let last_persisted = req.session.last_persisted_total;
        let (candidate_total, delta, clamped_reset, reason_code) = match req.observation {
            MotionObservation::AbsoluteWindowCount { count, .. } => {
                // The sensor's cumulative total for today replaces the
                // previous candidate wholesale. The candidate still never
                // drops below what the ledger already accepted.
                let candidate = count.max(last_persisted).min(self.config.max_daily_step_count);
                (candidate, 0, false, reason_codes::MERGE_OK_ABSOLUTE_REPLACE)
            }
            MotionObservation::IncrementalEmission { session_count } => {
                let raw_delta = session_count as i128 - req.session.session_baseline as i128;
                let clamped = raw_delta < 0;
                // A negative delta means the stream reset underneath us
                // (restart or re-subscription). Clamping to zero accepts an
                // under-count for the gap instead of ever double-counting.
                let delta = if clamped { 0 } else { raw_delta as u64 };
                let candidate = last_persisted
                    .saturating_add(delta)
                    .min(self.config.max_daily_step_count);
                let reason = if clamped {
                    reason_codes::MERGE_OK_INCREMENTAL_RESET_CLAMPED
                } else {
                    reason_codes::MERGE_OK_INCREMENTAL_DELTA
                };
                (candidate, candidate - last_persisted, clamped, reason)
            }
        };

        match MergeComputeOk::v1(
            reason_code,
            req.user_id.clone(),
            req.date,
            candidate_total,
            delta,
            clamped_reset,
        ) {
            Ok(ok) => MergeResponse::MergeComputeOk(ok),
            Err(_) => self.refuse(
                MergeCapabilityId::MergeCompute,
                reason_codes::MERGE_INTERNAL_PIPELINE_ERROR,
                "failed to construct merge compute output",
            ),
        }
    }

    fn run_commit_resolve(&self, req: &CommitResolveRequest) -> MergeResponse {
        let remote = req.remote_total;
        let resolved_total = remote
            .map_or(req.candidate_total, |r| r.max(req.candidate_total))
            .min(self.config.max_daily_step_count);
        let adopted_remote = matches!(remote, Some(r) if r > req.candidate_total);

        let session_after = if req.commit_succeeded {
            // Successful commit: the candidate (or a larger concurrent
            // value) is now the persisted floor, and future incremental
            // deltas are measured from the current emission.
            TrackerSessionState {
                session_count: req.session.session_count,
                session_baseline: req.session.session_count,
                last_persisted_total: resolved_total,
            }
        } else {
            // Failed commit: the candidate is preserved for the next tick.
            // The baseline must not advance, otherwise the uncommitted
            // delta would be dropped. A larger remote value is still
            // adopted; it is persisted by construction.
            TrackerSessionState {
                session_count: req.session.session_count,
                session_baseline: req.session.session_baseline,
                last_persisted_total: remote
                    .map_or(req.session.last_persisted_total, |r| {
                        r.max(req.session.last_persisted_total)
                    })
                    .min(self.config.max_daily_step_count),
            }
        };

        let reason_code = if !req.commit_succeeded {
            reason_codes::COMMIT_RETRY_PENDING
        } else if adopted_remote {
            reason_codes::COMMIT_REMOTE_ADOPTED
        } else if remote.is_none() {
            reason_codes::COMMIT_READBACK_MISSING
        } else {
            reason_codes::COMMIT_LOCAL_RETAINED
        };

        match CommitResolveOk::v1(
            reason_code,
            req.user_id.clone(),
            req.date,
            resolved_total,
            adopted_remote,
            session_after,
        ) {
            Ok(ok) => MergeResponse::CommitResolveOk(ok),
            Err(_) => self.refuse(
                MergeCapabilityId::CommitResolve,
                reason_codes::MERGE_INTERNAL_PIPELINE_ERROR,
                "failed to construct commit resolve output",
            ),
        }
    }

    fn refuse(
        &self,
        capability_id: MergeCapabilityId,
        reason_code: ReasonCodeId,
        message: &'static str,
    ) -> MergeResponse {
        let out = MergeRefuse::v1(capability_id, reason_code, message.to_string())
            .expect("MergeRefuse::v1 must construct for static messages");
        MergeResponse::Refuse(out)
    }
}

fn capability_from_request(req: &MergeRequest) -> MergeCapabilityId {
    match req {
        MergeRequest::MergeCompute(_) => MergeCapabilityId::MergeCompute,
        MergeRequest::CommitResolve(_) => MergeCapabilityId::CommitResolve,
    }
}
