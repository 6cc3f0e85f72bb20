#![forbid(unsafe_code)]

use std::env;

use stride_engines::rollup::RollupConfig;
use stride_kernel_contracts::ledger::{CalendarDate, DailyStepUpsertInput, DateRange, UserId};
use stride_kernel_contracts::motion::MotionPlatformKind;
use stride_kernel_contracts::reconcile::{CorrelationId, TickSeq};
use stride_kernel_contracts::{MonotonicTimeNs, TrackerState};
use stride_os::ledger_client::{
    DailyLedgerClientRuntime, LedgerClientError, LedgerRangeQueryEnvelope,
    LedgerRangeResultEnvelope, LedgerRangeRowEnvelope, LedgerUpsertEnvelope,
};
use stride_os::motion::{MotionSourceRuntime, ScriptedAbsoluteCounter, ScriptedIncrementalFeed};
use stride_os::rollup_reader::{RollupReadError, RollupReader};
use stride_os::tracker::{
    StepTrackerConfig, StepTrackerRuntime, TickOutcome, TickReport, TrackerStartError,
};

const ADAPTER_CORRELATION_ID: CorrelationId = CorrelationId(0xA11D);

/// API failure surfaced to HTTP callers. Transient maps to 503, permanent
/// to 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterApiError {
    pub transient: bool,
    pub message: String,
}

impl AdapterApiError {
    fn from_client(err: LedgerClientError) -> Self {
        match err {
            LedgerClientError::Transient { message, .. } => Self {
                transient: true,
                message,
            },
            LedgerClientError::Permanent { message } => Self {
                transient: false,
                message,
            },
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub struct AdapterWorkerCounters {
    pub pass_count: u64,
    pub committed_total: u64,
    pub adopted_remote_total: u64,
    pub retry_pending_total: u64,
    pub skipped_total: u64,
    pub last_pass_at_ns: Option<u64>,
    pub last_resolved_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrackerSnapshotDto {
    pub state: String,
    pub platform: String,
    pub today: String,
    pub displayed_total: u64,
    pub candidate_total: u64,
    pub last_synced_at_ns: Option<u64>,
    pub last_sync_error: Option<String>,
    pub ticks_run: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollupDto {
    pub today: u64,
    pub week: u64,
    pub month: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub ledger_mode: String,
    pub tracker: Option<TrackerSnapshotDto>,
    pub rollups: Option<RollupDto>,
    pub worker: AdapterWorkerCounters,
    pub reason: Option<String>,
}

/// Scripted tracking-session setup parsed from the environment, for running
/// the adapter as a self-contained device agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEnvConfig {
    pub user_id: String,
    pub source_kind: String,
    pub script: Vec<u64>,
}

impl TrackerEnvConfig {
    pub fn from_env() -> Option<Self> {
        let user_id = env::var("STRIDE_TRACKER_USER").ok()?;
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            return None;
        }
        let source_kind = env::var("STRIDE_TRACKER_SOURCE")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "incremental".to_string());
        let script = env::var("STRIDE_TRACKER_SCRIPT")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|part| part.trim().parse::<u64>().ok())
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            user_id,
            source_kind,
            script,
        })
    }

    pub fn motion_source(&self) -> MotionSourceRuntime {
        match self.source_kind.as_str() {
            "absolute" => {
                MotionSourceRuntime::absolute(ScriptedAbsoluteCounter::new(self.script.clone()))
            }
            "unavailable" => MotionSourceRuntime::unavailable(),
            _ => MotionSourceRuntime::incremental(ScriptedIncrementalFeed::new(
                self.script.clone(),
            )),
        }
    }
}

/// Process-wide runtime behind the HTTP surface: the ledger client (serving
/// the daily-ledger API) plus an optional tracking session driven by the
/// background worker.
#[derive(Debug)]
pub struct AdapterRuntime {
    client: DailyLedgerClientRuntime,
    tracker: Option<StepTrackerRuntime>,
    reader: RollupReader,
    counters: AdapterWorkerCounters,
}

impl AdapterRuntime {
    pub fn default_from_env() -> Self {
        Self::new(DailyLedgerClientRuntime::from_env_or_loopback())
    }

    pub fn new(client: DailyLedgerClientRuntime) -> Self {
        Self {
            client,
            tracker: None,
            reader: RollupReader::new(RollupConfig::mvp_v1()),
            counters: AdapterWorkerCounters::default(),
        }
    }

    pub fn ledger_mode(&self) -> &'static str {
        match &self.client {
            DailyLedgerClientRuntime::Loopback(_) => "loopback",
            DailyLedgerClientRuntime::Http(_) => "http",
            DailyLedgerClientRuntime::AlwaysFail { .. } => "always_fail",
        }
    }

    pub fn handle_ledger_upsert(
        &mut self,
        envelope: LedgerUpsertEnvelope,
        now_ns: u64,
    ) -> Result<(), AdapterApiError> {
        let user_id = UserId::new(envelope.user_id)
            .map_err(|_| AdapterApiError::permanent("invalid user_id"))?;
        let date = CalendarDate::parse_iso(&envelope.date)
            .map_err(|_| AdapterApiError::permanent("invalid date"))?;
        let at = if envelope.updated_at_ns > 0 {
            envelope.updated_at_ns
        } else {
            now_ns.max(1)
        };
        let input = DailyStepUpsertInput::v1(
            MonotonicTimeNs(at),
            user_id,
            date,
            envelope.step_count,
            Some(envelope.idempotency_key),
        )
        .map_err(|v| AdapterApiError::permanent(format!("invalid upsert: {v:?}")))?;
        self.client
            .upsert(input)
            .map_err(AdapterApiError::from_client)
    }

    pub fn handle_ledger_range(
        &mut self,
        envelope: LedgerRangeQueryEnvelope,
    ) -> Result<LedgerRangeResultEnvelope, AdapterApiError> {
        let user_id = UserId::new(envelope.user_id)
            .map_err(|_| AdapterApiError::permanent("invalid user_id"))?;
        let from = CalendarDate::parse_iso(&envelope.from)
            .map_err(|_| AdapterApiError::permanent("invalid from date"))?;
        let to = CalendarDate::parse_iso(&envelope.to)
            .map_err(|_| AdapterApiError::permanent("invalid to date"))?;
        let range = DateRange::v1(from, to)
            .map_err(|v| AdapterApiError::permanent(format!("invalid range: {v:?}")))?;
        let rows = self
            .client
            .query_range(&user_id, range)
            .map_err(AdapterApiError::from_client)?;
        Ok(LedgerRangeResultEnvelope {
            schema_version: 1,
            rows: rows
                .into_iter()
                .map(|(date, step_count)| LedgerRangeRowEnvelope {
                    date: date.iso_string(),
                    step_count,
                })
                .collect(),
        })
    }

    pub fn start_tracking(
        &mut self,
        user_id: UserId,
        today: CalendarDate,
        motion: MotionSourceRuntime,
        now_ns: u64,
    ) -> Result<MotionPlatformKind, TrackerStartError> {
        let mut tracker = StepTrackerRuntime::new(
            StepTrackerConfig::mvp_v1(),
            user_id,
            ADAPTER_CORRELATION_ID,
            today,
            motion,
        );
        let started = tracker.start(&mut self.client, MonotonicTimeNs(now_ns.max(1)));
        // A stopped tracker is still kept for the health report.
        self.tracker = Some(tracker);
        started
    }

    pub fn stop_tracking(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.stop();
        }
    }

    pub fn tracker_state(&self) -> Option<TrackerState> {
        self.tracker.as_ref().map(|t| t.state())
    }

    /// One worker pass: a reconcile tick for the hosted tracking session.
    /// Returns `None` when no session is configured.
    pub fn run_reconcile_worker_pass(
        &mut self,
        now_ns: u64,
        today: CalendarDate,
    ) -> Option<TickOutcome> {
        let tracker = self.tracker.as_mut()?;
        let outcome =
            tracker.run_reconcile_tick(&mut self.client, MonotonicTimeNs(now_ns.max(1)), today);
        self.counters.pass_count += 1;
        self.counters.last_pass_at_ns = Some(now_ns);
        match &outcome {
            TickOutcome::Completed(report) => self.count_report(report),
            TickOutcome::Skipped(_) => self.counters.skipped_total += 1,
        }
        Some(outcome)
    }

    fn count_report(&mut self, report: &TickReport) {
        if report.committed {
            self.counters.committed_total += 1;
        }
        if report.adopted_remote {
            self.counters.adopted_remote_total += 1;
        }
        if report.sync_error.is_some() {
            self.counters.retry_pending_total += 1;
        }
        self.counters.last_resolved_total = Some(report.resolved_total);
    }

    pub fn worker_counters(&self) -> &AdapterWorkerCounters {
        &self.counters
    }

    pub fn health_report(&mut self) -> AdapterHealthResponse {
        let ledger_mode = self.ledger_mode().to_string();
        let tracker_dto = self.tracker.as_ref().map(|tracker| {
            let snapshot = tracker.snapshot();
            TrackerSnapshotDto {
                state: snapshot.state.as_str().to_string(),
                platform: snapshot.platform.as_str().to_string(),
                today: snapshot.today.iso_string(),
                displayed_total: snapshot.displayed_total,
                candidate_total: snapshot.candidate_total,
                last_synced_at_ns: snapshot.last_synced_at.map(|t| t.0),
                last_sync_error: snapshot.last_sync_error,
                ticks_run: snapshot.ticks_run,
            }
        });

        let mut reason = None;
        let rollups = match self.tracker.as_ref().map(|t| t.snapshot()) {
            Some(snapshot) => match self.reader.refresh(
                &mut self.client,
                &snapshot.user_id,
                snapshot.today,
                snapshot.candidate_total,
                ADAPTER_CORRELATION_ID,
                TickSeq(snapshot.ticks_run.max(1)),
            ) {
                Ok(ok) => Some(RollupDto {
                    today: ok.today_total,
                    week: ok.week_total,
                    month: ok.month_total,
                }),
                Err(err) => {
                    reason = Some(rollup_error_message(&err));
                    None
                }
            },
            None => None,
        };

        AdapterHealthResponse {
            status: "ok".to_string(),
            ledger_mode,
            tracker: tracker_dto,
            rollups,
            worker: self.counters.clone(),
            reason,
        }
    }
}

fn rollup_error_message(err: &RollupReadError) -> String {
    match err {
        RollupReadError::Client(client_err) => {
            format!("rollup refresh failed: {}", client_err.message())
        }
        RollupReadError::Refused(refuse) => {
            format!("rollup refused: {}", refuse.message)
        }
        RollupReadError::Contract(v) => format!("rollup contract violation: {v:?}"),
    }
}
