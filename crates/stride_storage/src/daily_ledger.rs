#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use stride_kernel_contracts::ledger::{
    CalendarDate, DailyStepRecord, DailyStepUpsertEvent, DailyStepUpsertInput, DateRange, UserId,
};
use stride_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    DuplicateKey { table: &'static str, key: String },
    AppendOnlyViolation { table: &'static str },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

/// Derived idempotency key for an upsert that did not carry one. Keyed on
/// the payload, so an at-least-once retry of the same `(user, date, count)`
/// collapses onto the original event.
fn derived_idempotency_key(user_id: &UserId, date: CalendarDate, step_count: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(date.iso_string().as_bytes());
    hasher.update(b"|");
    hasher.update(step_count.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// In-memory daily ledger: an append-only upsert event log plus a
/// current-row projection keyed `(user_id, date)`. Current rows can always
/// be rebuilt from the event log.
#[derive(Debug, Default)]
pub struct DailyLedgerStore {
    upsert_events: Vec<DailyStepUpsertEvent>,
    current_rows: BTreeMap<(UserId, CalendarDate), DailyStepRecord>,
    seen_idempotency_keys: BTreeMap<String, u64>,
    next_seq: u64,
}

impl DailyLedgerStore {
    pub fn new_in_memory() -> Self {
        Self {
            upsert_events: Vec::new(),
            current_rows: BTreeMap::new(),
            seen_idempotency_keys: BTreeMap::new(),
            next_seq: 1,
        }
    }

    /// Accept one per-day total. Replaces the current row for the key;
    /// repeating an identical upsert is a stored-state no-op. Returns the
    /// sequence number of the accepted (or previously accepted) event.
    pub fn upsert_daily_steps(
        &mut self,
        input: DailyStepUpsertInput,
    ) -> Result<u64, StorageError> {
        input.validate()?;

        let effective_key = input.idempotency_key.clone().unwrap_or_else(|| {
            derived_idempotency_key(&input.user_id, input.date, input.step_count)
        });

        if let Some(&seq) = self.seen_idempotency_keys.get(&effective_key) {
            let prior = self
                .upsert_events
                .iter()
                .find(|event| event.seq == seq)
                .ok_or(StorageError::AppendOnlyViolation {
                    table: "daily_step_upsert_events",
                })?;
            if prior.user_id == input.user_id
                && prior.date == input.date
                && prior.step_count == input.step_count
            {
                return Ok(seq);
            }
            return Err(StorageError::DuplicateKey {
                table: "daily_step_upsert_events",
                key: effective_key,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let record = DailyStepRecord::v1(
            input.user_id.clone(),
            input.date,
            input.step_count,
            input.at,
        )?;
        self.upsert_events.push(DailyStepUpsertEvent {
            seq,
            at: input.at,
            user_id: input.user_id.clone(),
            date: input.date,
            step_count: input.step_count,
            idempotency_key: Some(effective_key.clone()),
        });
        self.seen_idempotency_keys.insert(effective_key, seq);
        self.current_rows
            .insert((input.user_id, input.date), record);
        Ok(seq)
    }

    pub fn daily_steps_row(
        &self,
        user_id: &UserId,
        date: CalendarDate,
    ) -> Option<&DailyStepRecord> {
        self.current_rows.get(&(user_id.clone(), date))
    }

    /// Per-day totals over inclusive `[from, to]`. One entry per date that
    /// has a record; callers treat missing dates as zero.
    pub fn query_daily_steps_range(
        &self,
        user_id: &UserId,
        range: DateRange,
    ) -> Result<BTreeMap<CalendarDate, u64>, StorageError> {
        range.validate()?;
        let lower = (user_id.clone(), range.from);
        let upper = (user_id.clone(), range.to);
        Ok(self
            .current_rows
            .range(lower..=upper)
            .map(|((_, date), record)| (*date, record.step_count))
            .collect())
    }

    pub fn upsert_event_rows(&self) -> &[DailyStepUpsertEvent] {
        &self.upsert_events
    }

    pub fn current_rows(&self) -> &BTreeMap<(UserId, CalendarDate), DailyStepRecord> {
        &self.current_rows
    }

    /// Rebuild the current-row projection by replaying the event log in
    /// sequence order.
    pub fn rebuild_current_rows(&mut self) -> Result<(), StorageError> {
        let mut last_seq = 0u64;
        let mut rebuilt: BTreeMap<(UserId, CalendarDate), DailyStepRecord> = BTreeMap::new();
        for event in &self.upsert_events {
            if event.seq <= last_seq {
                return Err(StorageError::AppendOnlyViolation {
                    table: "daily_step_upsert_events",
                });
            }
            last_seq = event.seq;
            let record = DailyStepRecord::v1(
                event.user_id.clone(),
                event.date,
                event.step_count,
                event.at,
            )?;
            rebuilt.insert((event.user_id.clone(), event.date), record);
        }
        self.current_rows = rebuilt;
        Ok(())
    }
}
