#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use stride_kernel_contracts::ledger::{
    CalendarDate, DailyStepRecord, DailyStepUpsertEvent, DailyStepUpsertInput, DateRange, UserId,
};

use crate::daily_ledger::{DailyLedgerStore, StorageError};

/// Typed repository interface for daily-ledger persistence wiring.
pub trait DailyLedgerRepo {
    fn upsert_daily_steps(&mut self, input: DailyStepUpsertInput) -> Result<u64, StorageError>;
    fn daily_steps_row(&self, user_id: &UserId, date: CalendarDate) -> Option<&DailyStepRecord>;
    fn query_daily_steps_range(
        &self,
        user_id: &UserId,
        range: DateRange,
    ) -> Result<BTreeMap<CalendarDate, u64>, StorageError>;
    fn upsert_event_rows(&self) -> &[DailyStepUpsertEvent];
    fn rebuild_current_rows(&mut self) -> Result<(), StorageError>;
}

impl DailyLedgerRepo for DailyLedgerStore {
    fn upsert_daily_steps(&mut self, input: DailyStepUpsertInput) -> Result<u64, StorageError> {
        DailyLedgerStore::upsert_daily_steps(self, input)
    }

    fn daily_steps_row(&self, user_id: &UserId, date: CalendarDate) -> Option<&DailyStepRecord> {
        DailyLedgerStore::daily_steps_row(self, user_id, date)
    }

    fn query_daily_steps_range(
        &self,
        user_id: &UserId,
        range: DateRange,
    ) -> Result<BTreeMap<CalendarDate, u64>, StorageError> {
        DailyLedgerStore::query_daily_steps_range(self, user_id, range)
    }

    fn upsert_event_rows(&self) -> &[DailyStepUpsertEvent] {
        DailyLedgerStore::upsert_event_rows(self)
    }

    fn rebuild_current_rows(&mut self) -> Result<(), StorageError> {
        DailyLedgerStore::rebuild_current_rows(self)
    }
}
