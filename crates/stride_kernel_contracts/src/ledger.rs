#![forbid(unsafe_code)]

use chrono::{Datelike, Days, NaiveDate};

use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const LEDGER_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Upper bound on a single day's accepted step total. Generous enough for
/// ultra-endurance outliers; anything above it is sensor garbage.
pub const MAX_DAILY_STEP_COUNT: u64 = 250_000;

/// Widest range query the store accepts, in calendar days.
pub const MAX_RANGE_SPAN_DAYS: i64 = 366;

const MIN_CALENDAR_YEAR: i32 = 2000;
const MAX_CALENDAR_YEAR: i32 = 2100;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "user_id",
                reason: "must not be empty",
            });
        }
        if id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "user_id",
                reason: "must be <= 128 chars",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A local-timezone calendar day. The daily ledger is keyed on this, never
/// on an instant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self, ContractViolation> {
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(
            ContractViolation::InvalidValue {
                field: "calendar_date",
                reason: "not a valid calendar day",
            },
        )?;
        Self::from_naive(date)
    }

    pub fn from_naive(date: NaiveDate) -> Result<Self, ContractViolation> {
        if date.year() < MIN_CALENDAR_YEAR || date.year() > MAX_CALENDAR_YEAR {
            return Err(ContractViolation::InvalidValue {
                field: "calendar_date",
                reason: "year outside supported calendar range",
            });
        }
        Ok(Self(date))
    }

    pub fn parse_iso(text: &str) -> Result<Self, ContractViolation> {
        let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| {
            ContractViolation::InvalidValue {
                field: "calendar_date",
                reason: "must be an ISO calendar date (YYYY-MM-DD)",
            }
        })?;
        Self::from_naive(date)
    }

    pub fn as_naive(self) -> NaiveDate {
        self.0
    }

    pub fn iso_string(self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn days_back(self, days: u32) -> Result<Self, ContractViolation> {
        let date = self.0.checked_sub_days(Days::new(u64::from(days))).ok_or(
            ContractViolation::InvalidValue {
                field: "calendar_date",
                reason: "window start precedes supported calendar range",
            },
        )?;
        Self::from_naive(date)
    }
}

/// Inclusive `[from, to]` calendar-day bounds for a ledger range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub from: CalendarDate,
    pub to: CalendarDate,
}

impl DateRange {
    pub fn v1(from: CalendarDate, to: CalendarDate) -> Result<Self, ContractViolation> {
        let range = Self { from, to };
        range.validate()?;
        Ok(range)
    }

    pub fn span_days(&self) -> i64 {
        (self.to.as_naive() - self.from.as_naive()).num_days() + 1
    }

    pub fn contains(&self, date: CalendarDate) -> bool {
        date >= self.from && date <= self.to
    }
}

impl Validate for DateRange {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.from > self.to {
            return Err(ContractViolation::InvalidValue {
                field: "date_range.from",
                reason: "must not be after date_range.to",
            });
        }
        if self.span_days() > MAX_RANGE_SPAN_DAYS {
            return Err(ContractViolation::InvalidValue {
                field: "date_range",
                reason: "span exceeds max range query width",
            });
        }
        Ok(())
    }
}

/// One accepted per-day total. Unique per `(user_id, date)`; mutated only by
/// upsert, never deleted by this subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStepRecord {
    pub schema_version: SchemaVersion,
    pub user_id: UserId,
    pub date: CalendarDate,
    pub step_count: u64,
    pub updated_at: MonotonicTimeNs,
}

impl DailyStepRecord {
    pub fn v1(
        user_id: UserId,
        date: CalendarDate,
        step_count: u64,
        updated_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: LEDGER_CONTRACT_VERSION,
            user_id,
            date,
            step_count,
            updated_at,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for DailyStepRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != LEDGER_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_record.schema_version",
                reason: "must match LEDGER_CONTRACT_VERSION",
            });
        }
        if self.step_count > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_record.step_count",
                reason: "exceeds max daily step count",
            });
        }
        if self.updated_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_record.updated_at",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Input for one upsert event appended to the ledger's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStepUpsertInput {
    pub schema_version: SchemaVersion,
    pub at: MonotonicTimeNs,
    pub user_id: UserId,
    pub date: CalendarDate,
    pub step_count: u64,
    pub idempotency_key: Option<String>,
}

impl DailyStepUpsertInput {
    pub fn v1(
        at: MonotonicTimeNs,
        user_id: UserId,
        date: CalendarDate,
        step_count: u64,
        idempotency_key: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let input = Self {
            schema_version: LEDGER_CONTRACT_VERSION,
            at,
            user_id,
            date,
            step_count,
            idempotency_key,
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for DailyStepUpsertInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != LEDGER_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_upsert_input.schema_version",
                reason: "must match LEDGER_CONTRACT_VERSION",
            });
        }
        if self.at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_upsert_input.at",
                reason: "must be > 0",
            });
        }
        if self.step_count > MAX_DAILY_STEP_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "daily_step_upsert_input.step_count",
                reason: "exceeds max daily step count",
            });
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "daily_step_upsert_input.idempotency_key",
                    reason: "must not be empty when provided",
                });
            }
            if key.len() > 128 {
                return Err(ContractViolation::InvalidValue {
                    field: "daily_step_upsert_input.idempotency_key",
                    reason: "must be <= 128 chars",
                });
            }
        }
        Ok(())
    }
}

/// One row of the append-only upsert event ledger. Current rows are a
/// projection of these and can be rebuilt from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStepUpsertEvent {
    pub seq: u64,
    pub at: MonotonicTimeNs,
    pub user_id: UserId,
    pub date: CalendarDate,
    pub step_count: u64,
    pub idempotency_key: Option<String>,
}
