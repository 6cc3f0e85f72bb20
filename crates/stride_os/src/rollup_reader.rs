#![forbid(unsafe_code)]

use stride_engines::rollup::{RollupConfig, RollupRuntime};
use stride_kernel_contracts::ledger::{CalendarDate, DateRange, UserId};
use stride_kernel_contracts::reconcile::{CorrelationId, TickEnvelope, TickSeq};
use stride_kernel_contracts::rollup::{
    RollupComputeOk, RollupComputeRequest, RollupRefuse, RollupRequest, RollupResponse,
    MONTH_WINDOW_DAYS,
};
use stride_kernel_contracts::ContractViolation;

use crate::ledger_client::{DailyLedgerClientRuntime, LedgerClientError};

#[derive(Debug, Clone, PartialEq)]
pub enum RollupReadError {
    Client(LedgerClientError),
    Refused(RollupRefuse),
    Contract(ContractViolation),
}

impl From<LedgerClientError> for RollupReadError {
    fn from(err: LedgerClientError) -> Self {
        RollupReadError::Client(err)
    }
}

impl From<ContractViolation> for RollupReadError {
    fn from(v: ContractViolation) -> Self {
        RollupReadError::Contract(v)
    }
}

/// Refreshes today/week/month display totals: one month-window range query
/// against the ledger, then the rollup engine folds in the tracker's
/// current candidate. On a failed query the caller keeps showing the last
/// known rollup instead of blocking.
#[derive(Debug, Clone)]
pub struct RollupReader {
    runtime: RollupRuntime,
}

impl RollupReader {
    pub fn new(config: RollupConfig) -> Self {
        Self {
            runtime: RollupRuntime::new(config),
        }
    }

    pub fn refresh(
        &self,
        client: &mut DailyLedgerClientRuntime,
        user_id: &UserId,
        today: CalendarDate,
        candidate_total: u64,
        correlation_id: CorrelationId,
        tick_seq: TickSeq,
    ) -> Result<RollupComputeOk, RollupReadError> {
        let range = DateRange::v1(today.days_back(MONTH_WINDOW_DAYS - 1)?, today)?;
        let ledger_rows = client.query_range(user_id, range)?;

        let envelope = TickEnvelope::v1(correlation_id, tick_seq)?;
        let req = RollupComputeRequest::v1(
            envelope,
            user_id.clone(),
            today,
            candidate_total,
            ledger_rows,
        )?;
        match self.runtime.run(&RollupRequest::RollupCompute(req)) {
            RollupResponse::RollupComputeOk(ok) => Ok(ok),
            RollupResponse::Refuse(refuse) => Err(RollupReadError::Refused(refuse)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_kernel_contracts::ledger::DailyStepUpsertInput;
    use stride_kernel_contracts::MonotonicTimeNs;
    use stride_storage::daily_ledger::DailyLedgerStore;

    fn user() -> UserId {
        UserId::new("user_demo").unwrap()
    }

    fn today() -> CalendarDate {
        CalendarDate::new(2026, 8, 6).unwrap()
    }

    fn client_with_rows(rows: &[(u32, u64)]) -> DailyLedgerClientRuntime {
        let mut store = DailyLedgerStore::new_in_memory();
        for (idx, (back, count)) in rows.iter().enumerate() {
            store
                .upsert_daily_steps(
                    DailyStepUpsertInput::v1(
                        MonotonicTimeNs(idx as u64 + 1),
                        user(),
                        today().days_back(*back).unwrap(),
                        *count,
                        Some(format!("seed_{idx}")),
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        DailyLedgerClientRuntime::Loopback(store)
    }

    fn refresh(
        client: &mut DailyLedgerClientRuntime,
        candidate_total: u64,
    ) -> RollupComputeOk {
        RollupReader::new(RollupConfig::mvp_v1())
            .refresh(
                client,
                &user(),
                today(),
                candidate_total,
                CorrelationId(8801),
                TickSeq(1),
            )
            .unwrap()
    }

    #[test]
    fn at_rollup_reader_01_week_and_month_windows_fold_in_the_candidate() {
        let mut client = client_with_rows(&[
            (0, 800),
            (1, 1_000),
            (2, 1_000),
            (6, 1_000),
            (7, 1_000),
            (29, 1_000),
            (30, 9_999),
        ]);
        let ok = refresh(&mut client, 1_200);

        // Today's persisted 800 is outrun by the live candidate.
        assert_eq!(ok.today_total, 1_200);
        assert_eq!(ok.week_total, 1_200 + 1_000 + 1_000 + 1_000);
        // Rows 7 and 29 days back join the month window; 30 back is out.
        assert_eq!(ok.month_total, 1_200 + 5 * 1_000);
    }

    #[test]
    fn at_rollup_reader_02_empty_ledger_rolls_up_the_candidate_alone() {
        let mut client = client_with_rows(&[]);
        let ok = refresh(&mut client, 640);
        assert_eq!(ok.today_total, 640);
        assert_eq!(ok.week_total, 640);
        assert_eq!(ok.month_total, 640);
    }

    #[test]
    fn at_rollup_reader_03_failed_range_query_surfaces_as_client_error() {
        let mut client = DailyLedgerClientRuntime::always_fail("ledger unreachable", 5_000);
        let err = RollupReader::new(RollupConfig::mvp_v1())
            .refresh(
                &mut client,
                &user(),
                today(),
                640,
                CorrelationId(8801),
                TickSeq(1),
            )
            .unwrap_err();
        assert!(matches!(err, RollupReadError::Client(_)));
    }
}
