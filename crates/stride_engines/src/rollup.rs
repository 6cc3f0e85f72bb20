#![forbid(unsafe_code)]

use stride_kernel_contracts::ledger::CalendarDate;
use stride_kernel_contracts::rollup::{
    RollupCapabilityId, RollupComputeOk, RollupComputeRequest, RollupRefuse, RollupRequest,
    RollupResponse, MONTH_WINDOW_DAYS, WEEK_WINDOW_DAYS,
};
use stride_kernel_contracts::{ReasonCodeId, Validate};

pub mod reason_codes {
    use stride_kernel_contracts::ReasonCodeId;

    // Rollup-engine reason-code namespace.
    pub const ROLLUP_OK_COMPUTE: ReasonCodeId = ReasonCodeId(0x5255_0001);

    pub const ROLLUP_INPUT_SCHEMA_INVALID: ReasonCodeId = ReasonCodeId(0x5255_00F1);
    pub const ROLLUP_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x5255_00F4);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupConfig {
    pub week_window_days: u32,
    pub month_window_days: u32,
}

impl RollupConfig {
    pub fn mvp_v1() -> Self {
        Self {
            week_window_days: WEEK_WINDOW_DAYS,
            month_window_days: MONTH_WINDOW_DAYS,
        }
    }
}

/// Derives display rollups from persisted rows plus the live candidate.
/// Missing dates contribute zero; nothing is interpolated or estimated.
#[derive(Debug, Clone)]
pub struct RollupRuntime {
    config: RollupConfig,
}

impl RollupRuntime {
    pub fn new(config: RollupConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, req: &RollupRequest) -> RollupResponse {
        if req.validate().is_err() {
            return self.refuse(
                reason_codes::ROLLUP_INPUT_SCHEMA_INVALID,
                "rollup request failed contract validation",
            );
        }

        match req {
            RollupRequest::RollupCompute(r) => self.run_rollup_compute(r),
        }
    }

    fn run_rollup_compute(&self, req: &RollupComputeRequest) -> RollupResponse {
        let ledger_today = req.ledger_rows.get(&req.today).copied().unwrap_or(0);
        let today_total = req.candidate_total.max(ledger_today);

        let week_total = match self.window_total(req, today_total, self.config.week_window_days) {
            Ok(total) => total,
            Err(response) => return response,
        };
        let month_total = match self.window_total(req, today_total, self.config.month_window_days)
        {
            Ok(total) => total,
            Err(response) => return response,
        };

        match RollupComputeOk::v1(
            reason_codes::ROLLUP_OK_COMPUTE,
            req.user_id.clone(),
            req.today,
            today_total,
            week_total,
            month_total,
        ) {
            Ok(ok) => RollupResponse::RollupComputeOk(ok),
            Err(_) => self.refuse(
                reason_codes::ROLLUP_INTERNAL_PIPELINE_ERROR,
                "failed to construct rollup output",
            ),
        }
    }

    /// Sum of the window ending today (inclusive), with today's component
    /// substituted by the reconciled `today_total`.
    fn window_total(
        &self,
        req: &RollupComputeRequest,
        today_total: u64,
        window_days: u32,
    ) -> Result<u64, RollupResponse> {
        let start = match window_start(req.today, window_days) {
            Ok(start) => start,
            Err(_) => {
                return Err(self.refuse(
                    reason_codes::ROLLUP_INTERNAL_PIPELINE_ERROR,
                    "window start fell outside the supported calendar range",
                ))
            }
        };
        let past_sum: u64 = req
            .ledger_rows
            .range(start..req.today)
            .map(|(_, count)| *count)
            .sum();
        Ok(past_sum.saturating_add(today_total))
    }

    fn refuse(&self, reason_code: ReasonCodeId, message: &'static str) -> RollupResponse {
        let out = RollupRefuse::v1(
            RollupCapabilityId::RollupCompute,
            reason_code,
            message.to_string(),
        )
        .expect("RollupRefuse::v1 must construct for static messages");
        RollupResponse::Refuse(out)
    }
}

fn window_start(
    today: CalendarDate,
    window_days: u32,
) -> Result<CalendarDate, stride_kernel_contracts::ContractViolation> {
    today.days_back(window_days.saturating_sub(1))
}
