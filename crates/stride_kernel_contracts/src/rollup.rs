#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::ledger::{CalendarDate, UserId, MAX_DAILY_STEP_COUNT, MAX_RANGE_SPAN_DAYS};
use crate::reconcile::TickEnvelope;
use crate::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};

pub const ROLLUP_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Calendar days in the rolling week window, today inclusive.
pub const WEEK_WINDOW_DAYS: u32 = 7;
/// Calendar days in the rolling month window, today inclusive.
pub const MONTH_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupCapabilityId {
    RollupCompute,
}

impl RollupCapabilityId {
    pub fn as_str(self) -> &'static str {
        match self {
            RollupCapabilityId::RollupCompute => "ROLLUP_COMPUTE",
        }
    }
}

/// Derive today/week/month totals from ledger rows plus the engine's
/// current candidate for today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupComputeRequest {
    pub schema_version: SchemaVersion,
    pub envelope: TickEnvelope,
    pub user_id: UserId,
    pub today: CalendarDate,
    pub candidate_total: u64,
    /// Persisted per-day totals covering at most the month window. Missing
    /// dates imply zero.
    pub ledger_rows: BTreeMap<CalendarDate, u64>,
}

impl RollupComputeRequest {
    pub fn v1(
        envelope: TickEnvelope,
        user_id: UserId,
        today: CalendarDate,
        candidate_total: u64,
        ledger_rows: BTreeMap<CalendarDate, u64>,
    ) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: ROLLUP_CONTRACT_VERSION,
            envelope,
            user_id,
            today,
            candidate_total,
            ledger_rows,
        };
        req.validate()?;
        Ok(req)
    }
}

impl Validate for RollupComputeRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ROLLUP_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_request.schema_version",
                reason: "must match ROLLUP_CONTRACT_VERSION",
            });
        }
        self.envelope.validate()?;
        if self.candidate_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_request.candidate_total",
                reason: "exceeds max daily step count",
            });
        }
        if self.ledger_rows.len() as i64 > MAX_RANGE_SPAN_DAYS {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_request.ledger_rows",
                reason: "exceeds max range query width",
            });
        }
        for (date, count) in &self.ledger_rows {
            if *date > self.today {
                return Err(ContractViolation::InvalidValue {
                    field: "rollup_compute_request.ledger_rows",
                    reason: "must not contain dates after today",
                });
            }
            if *count > MAX_DAILY_STEP_COUNT {
                return Err(ContractViolation::InvalidValue {
                    field: "rollup_compute_request.ledger_rows",
                    reason: "row exceeds max daily step count",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupComputeOk {
    pub schema_version: SchemaVersion,
    pub capability_id: RollupCapabilityId,
    pub reason_code: ReasonCodeId,
    pub user_id: UserId,
    pub today: CalendarDate,
    /// `max(candidate_total, ledger value for today)`.
    pub today_total: u64,
    /// Sum over the week window, today's component substituted by
    /// `today_total`.
    pub week_total: u64,
    /// Sum over the month window, today's component substituted by
    /// `today_total`.
    pub month_total: u64,
}

impl RollupComputeOk {
    pub fn v1(
        reason_code: ReasonCodeId,
        user_id: UserId,
        today: CalendarDate,
        today_total: u64,
        week_total: u64,
        month_total: u64,
    ) -> Result<Self, ContractViolation> {
        let ok = Self {
            schema_version: ROLLUP_CONTRACT_VERSION,
            capability_id: RollupCapabilityId::RollupCompute,
            reason_code,
            user_id,
            today,
            today_total,
            week_total,
            month_total,
        };
        ok.validate()?;
        Ok(ok)
    }
}

impl Validate for RollupComputeOk {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ROLLUP_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_ok.schema_version",
                reason: "must match ROLLUP_CONTRACT_VERSION",
            });
        }
        if self.today_total > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_ok.today_total",
                reason: "exceeds max daily step count",
            });
        }
        if self.week_total < self.today_total || self.month_total < self.week_total {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_compute_ok.week_total",
                reason: "window totals must be monotone in window width",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupRefuse {
    pub schema_version: SchemaVersion,
    pub capability_id: RollupCapabilityId,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl RollupRefuse {
    pub fn v1(
        capability_id: RollupCapabilityId,
        reason_code: ReasonCodeId,
        message: String,
    ) -> Result<Self, ContractViolation> {
        let refuse = Self {
            schema_version: ROLLUP_CONTRACT_VERSION,
            capability_id,
            reason_code,
            message,
        };
        refuse.validate()?;
        Ok(refuse)
    }
}

impl Validate for RollupRefuse {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.message.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_refuse.message",
                reason: "must not be empty",
            });
        }
        if self.message.len() > 256 {
            return Err(ContractViolation::InvalidValue {
                field: "rollup_refuse.message",
                reason: "must be <= 256 chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupRequest {
    RollupCompute(RollupComputeRequest),
}

impl Validate for RollupRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            RollupRequest::RollupCompute(req) => req.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupResponse {
    RollupComputeOk(RollupComputeOk),
    Refuse(RollupRefuse),
}
