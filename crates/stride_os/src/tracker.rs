#![forbid(unsafe_code)]

use stride_engines::merge::{MergeConfig, MergeRuntime};
use stride_kernel_contracts::ledger::{
    CalendarDate, DailyStepUpsertInput, UserId, MAX_DAILY_STEP_COUNT,
};
use stride_kernel_contracts::motion::{
    MotionInitError, MotionObservation, MotionPlatformKind, MotionWindow,
};
use stride_kernel_contracts::reconcile::{
    CommitResolveRequest, CorrelationId, MergeComputeRequest, MergeRequest, MergeResponse,
    TickEnvelope, TickSeq, TrackerSessionState,
};
use stride_kernel_contracts::{MonotonicTimeNs, ReasonCodeId, TrackerState};

use crate::ledger_client::{upsert_idempotency_key, DailyLedgerClientRuntime};
use crate::motion::MotionSourceRuntime;

pub mod reason_codes {
    use stride_kernel_contracts::ReasonCodeId;

    // Tracker wiring reason-code namespace.
    pub const TRACKER_TICK_COMMITTED: ReasonCodeId = ReasonCodeId(0x5452_0001);
    pub const TRACKER_TICK_ADOPTED_REMOTE: ReasonCodeId = ReasonCodeId(0x5452_0002);
    pub const TRACKER_TICK_NOTHING_NEW: ReasonCodeId = ReasonCodeId(0x5452_0003);
    pub const TRACKER_TICK_RETRY_PENDING: ReasonCodeId = ReasonCodeId(0x5452_0010);

    pub const TRACKER_OBSERVATION_MISSING: ReasonCodeId = ReasonCodeId(0x5452_00F1);
    pub const TRACKER_MERGE_REFUSED: ReasonCodeId = ReasonCodeId(0x5452_00F2);
}

pub const RECONCILE_INTERVAL_MS_DEFAULT: u32 = 60_000;

fn is_allowed_tracker_transition(from: TrackerState, to: TrackerState) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (TrackerState::Idle, TrackerState::Initializing)
            | (TrackerState::Initializing, TrackerState::Tracking)
            | (TrackerState::Initializing, TrackerState::Stopped)
            | (TrackerState::Tracking, TrackerState::Reconciling)
            | (TrackerState::Reconciling, TrackerState::Tracking)
            | (TrackerState::Tracking, TrackerState::Stopped)
            | (TrackerState::Reconciling, TrackerState::Stopped)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTrackerConfig {
    pub reconcile_interval_ms: u32,
    pub merge: MergeConfig,
}

impl StepTrackerConfig {
    pub fn mvp_v1() -> Self {
        Self {
            reconcile_interval_ms: RECONCILE_INTERVAL_MS_DEFAULT,
            merge: MergeConfig::mvp_v1(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerStartError {
    NotIdle { state: TrackerState },
    Motion(MotionInitError),
}

/// What one reconcile cycle did, for counters and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick_seq: TickSeq,
    pub platform: MotionPlatformKind,
    pub candidate_total: u64,
    pub resolved_total: u64,
    pub committed: bool,
    pub adopted_remote: bool,
    pub rolled_over: bool,
    pub reason_code: ReasonCodeId,
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSkipReason {
    NotTracking(TrackerState),
    CycleInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    Skipped(TickSkipReason),
}

/// Read-only view of the tracker for display surfaces and health reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub state: TrackerState,
    pub platform: MotionPlatformKind,
    pub user_id: UserId,
    pub today: CalendarDate,
    pub displayed_total: u64,
    pub candidate_total: u64,
    pub session: TrackerSessionState,
    pub last_synced_at: Option<MonotonicTimeNs>,
    pub last_sync_error: Option<String>,
    pub ticks_run: u64,
}

/// The reconciliation engine for one user's tracking session.
///
/// Owns the session counters and drives the merge/commit cycle:
/// `Idle -> Initializing -> Tracking <-> Reconciling -> Stopped`. One
/// instance lives for one app-foreground session and is torn down
/// explicitly; nothing here is global.
#[derive(Debug)]
pub struct StepTrackerRuntime {
    config: StepTrackerConfig,
    user_id: UserId,
    correlation_id: CorrelationId,
    today: CalendarDate,
    day_started_at: MonotonicTimeNs,
    state: TrackerState,
    platform: MotionPlatformKind,
    session: TrackerSessionState,
    candidate_total: u64,
    displayed_total: u64,
    last_synced_at: Option<MonotonicTimeNs>,
    last_sync_error: Option<String>,
    ticks_run: u64,
    motion: MotionSourceRuntime,
    merge: MergeRuntime,
}

impl StepTrackerRuntime {
    pub fn new(
        config: StepTrackerConfig,
        user_id: UserId,
        correlation_id: CorrelationId,
        today: CalendarDate,
        motion: MotionSourceRuntime,
    ) -> Self {
        let merge = MergeRuntime::new(config.merge);
        Self {
            config,
            user_id,
            correlation_id,
            today,
            day_started_at: MonotonicTimeNs(0),
            state: TrackerState::Idle,
            platform: MotionPlatformKind::Unavailable,
            session: TrackerSessionState::fresh(),
            candidate_total: 0,
            displayed_total: 0,
            last_synced_at: None,
            last_sync_error: None,
            ticks_run: 0,
            motion,
            merge,
        }
    }

    pub fn config(&self) -> StepTrackerConfig {
        self.config
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Resolve the sensor, request permission, and bootstrap the session
    /// from the ledger's current value for today. Initialization failures
    /// stop the session for good; everything later is absorbed per tick.
    pub fn start(
        &mut self,
        client: &mut DailyLedgerClientRuntime,
        now: MonotonicTimeNs,
    ) -> Result<MotionPlatformKind, TrackerStartError> {
        if self.state != TrackerState::Idle {
            return Err(TrackerStartError::NotIdle { state: self.state });
        }
        self.transition(TrackerState::Initializing);

        match self.motion.initialize() {
            Ok(kind) => {
                self.platform = kind;
            }
            Err(err) => {
                self.transition(TrackerState::Stopped);
                return Err(TrackerStartError::Motion(err));
            }
        }

        // The remote total for today is the session's starting floor. A
        // failed read starts the floor at zero; the first tick's read
        // adopts whatever the ledger actually holds.
        let remote = match client.query_today(&self.user_id, self.today) {
            Ok(value) => value.unwrap_or(0).min(MAX_DAILY_STEP_COUNT),
            Err(err) => {
                self.last_sync_error = Some(err.message().to_string());
                0
            }
        };
        self.session = TrackerSessionState {
            session_count: 0,
            session_baseline: 0,
            last_persisted_total: remote,
        };
        self.candidate_total = remote;
        self.displayed_total = remote;
        self.day_started_at = now;
        self.transition(TrackerState::Tracking);
        Ok(self.platform)
    }

    /// One reconciliation cycle: observe, merge, commit when ahead of the
    /// ledger, and resolve against whatever a concurrent writer persisted.
    /// Called from the tick timer, a user-initiated refresh, or a received
    /// sample event; a cycle already in flight coalesces the new one.
    pub fn run_reconcile_tick(
        &mut self,
        client: &mut DailyLedgerClientRuntime,
        now: MonotonicTimeNs,
        today: CalendarDate,
    ) -> TickOutcome {
        match self.state {
            TrackerState::Reconciling => {
                return TickOutcome::Skipped(TickSkipReason::CycleInFlight)
            }
            TrackerState::Tracking => {}
            other => return TickOutcome::Skipped(TickSkipReason::NotTracking(other)),
        }
        self.transition(TrackerState::Reconciling);
        self.ticks_run += 1;
        let tick_seq = TickSeq(self.ticks_run);

        let rolled_over = today != self.today;
        if rolled_over {
            // New local day: yesterday's row stays in the ledger as-is and
            // today restarts from zero. The incremental baseline re-anchors
            // so the old day's emissions are not replayed into the new one.
            self.today = today;
            self.day_started_at = now;
            self.candidate_total = 0;
            self.displayed_total = 0;
            self.session = TrackerSessionState {
                session_count: self.session.session_count,
                session_baseline: self.session.session_count,
                last_persisted_total: 0,
            };
        }

        let envelope = TickEnvelope::v1(self.correlation_id, tick_seq)
            .expect("tick envelope must construct for non-zero identifiers");
        let window = MotionWindow {
            since: self.day_started_at,
            until: MonotonicTimeNs(now.0.max(self.day_started_at.0).max(1)),
        };

        let Some(observation) = self.motion.observe(window) else {
            self.last_sync_error = Some("motion source yielded no observation".to_string());
            return self.finish_tick(TickReport {
                tick_seq,
                platform: self.platform,
                candidate_total: self.candidate_total,
                resolved_total: self.displayed_total,
                committed: false,
                adopted_remote: false,
                rolled_over,
                reason_code: reason_codes::TRACKER_OBSERVATION_MISSING,
                sync_error: Some("motion source yielded no observation".to_string()),
            });
        };
        if let MotionObservation::IncrementalEmission { session_count } = observation {
            self.session.session_count = session_count;
        }

        let computed = match MergeComputeRequest::v1(
            envelope,
            self.user_id.clone(),
            today,
            self.platform,
            self.session,
            observation,
        ) {
            Ok(req) => match self.merge.run(&MergeRequest::MergeCompute(req)) {
                MergeResponse::MergeComputeOk(ok) => ok,
                _ => return self.finish_refused(tick_seq, rolled_over),
            },
            Err(_) => return self.finish_refused(tick_seq, rolled_over),
        };
        self.candidate_total = computed.candidate_total;

        // Read the ledger before writing: a concurrent writer's larger
        // total is adopted instead of being overwritten, and an already
        // current row is left untouched.
        let mut sync_error: Option<String> = None;
        let remote_known = match client.query_today(&self.user_id, today) {
            Ok(value) => Some(value.unwrap_or(0).min(MAX_DAILY_STEP_COUNT)),
            Err(err) => {
                sync_error = Some(err.message().to_string());
                None
            }
        };

        let needs_write = match remote_known {
            Some(remote) => self.candidate_total > remote,
            None => self.candidate_total > self.session.last_persisted_total,
        };
        let mut committed = false;
        if needs_write {
            let key =
                upsert_idempotency_key(&self.user_id, today, self.candidate_total);
            match DailyStepUpsertInput::v1(
                now,
                self.user_id.clone(),
                today,
                self.candidate_total,
                Some(key),
            ) {
                Ok(input) => match client.upsert(input) {
                    Ok(()) => committed = true,
                    Err(err) => sync_error = Some(err.message().to_string()),
                },
                Err(_) => {
                    sync_error = Some("upsert input failed contract validation".to_string())
                }
            }
        }
        // A cycle with nothing to write succeeds as long as the read gave
        // us ground truth; a failed write leaves the candidate pending.
        let commit_succeeded = committed || (!needs_write && remote_known.is_some());

        let resolved = match CommitResolveRequest::v1(
            envelope,
            self.user_id.clone(),
            today,
            self.candidate_total,
            commit_succeeded,
            remote_known,
            self.session,
        ) {
            Ok(req) => match self.merge.run(&MergeRequest::CommitResolve(req)) {
                MergeResponse::CommitResolveOk(ok) => ok,
                _ => return self.finish_refused(tick_seq, rolled_over),
            },
            Err(_) => return self.finish_refused(tick_seq, rolled_over),
        };

        self.session = resolved.session_after;
        self.displayed_total = resolved.resolved_total;
        self.candidate_total = self
            .candidate_total
            .max(self.session.last_persisted_total);
        if commit_succeeded {
            self.last_synced_at = Some(now);
            self.last_sync_error = None;
        } else {
            self.last_sync_error = sync_error.clone();
        }

        let reason_code = if !commit_succeeded {
            reason_codes::TRACKER_TICK_RETRY_PENDING
        } else if resolved.adopted_remote {
            reason_codes::TRACKER_TICK_ADOPTED_REMOTE
        } else if committed {
            reason_codes::TRACKER_TICK_COMMITTED
        } else {
            reason_codes::TRACKER_TICK_NOTHING_NEW
        };

        self.finish_tick(TickReport {
            tick_seq,
            platform: self.platform,
            candidate_total: self.candidate_total,
            resolved_total: resolved.resolved_total,
            committed,
            adopted_remote: resolved.adopted_remote,
            rolled_over,
            reason_code,
            sync_error,
        })
    }

    /// Tear down the session: unsubscribe the motion stream and refuse all
    /// further writes. Idempotent.
    pub fn stop(&mut self) {
        if self.state == TrackerState::Stopped {
            return;
        }
        self.motion.unsubscribe();
        self.state = TrackerState::Stopped;
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            state: self.state,
            platform: self.platform,
            user_id: self.user_id.clone(),
            today: self.today,
            displayed_total: self.displayed_total,
            candidate_total: self.candidate_total,
            session: self.session,
            last_synced_at: self.last_synced_at,
            last_sync_error: self.last_sync_error.clone(),
            ticks_run: self.ticks_run,
        }
    }

    fn finish_tick(&mut self, report: TickReport) -> TickOutcome {
        self.transition(TrackerState::Tracking);
        TickOutcome::Completed(report)
    }

    fn finish_refused(&mut self, tick_seq: TickSeq, rolled_over: bool) -> TickOutcome {
        self.last_sync_error = Some("merge engine refused the tick".to_string());
        self.finish_tick(TickReport {
            tick_seq,
            platform: self.platform,
            candidate_total: self.candidate_total,
            resolved_total: self.displayed_total,
            committed: false,
            adopted_remote: false,
            rolled_over,
            reason_code: reason_codes::TRACKER_MERGE_REFUSED,
            sync_error: Some("merge engine refused the tick".to_string()),
        })
    }

    fn transition(&mut self, to: TrackerState) {
        if is_allowed_tracker_transition(self.state, to) {
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_kernel_contracts::ledger::DateRange;
    use stride_storage::daily_ledger::DailyLedgerStore;

    use crate::motion::{ScriptedAbsoluteCounter, ScriptedIncrementalFeed};

    fn user() -> UserId {
        UserId::new("user_demo").unwrap()
    }

    fn date(day: u32) -> CalendarDate {
        CalendarDate::new(2026, 8, day).unwrap()
    }

    fn loopback() -> DailyLedgerClientRuntime {
        DailyLedgerClientRuntime::Loopback(DailyLedgerStore::new_in_memory())
    }

    fn seeded_loopback(day: u32, step_count: u64) -> DailyLedgerClientRuntime {
        let mut store = DailyLedgerStore::new_in_memory();
        store
            .upsert_daily_steps(
                DailyStepUpsertInput::v1(
                    MonotonicTimeNs(1),
                    user(),
                    date(day),
                    step_count,
                    Some("seed_other_device".to_string()),
                )
                .unwrap(),
            )
            .unwrap();
        DailyLedgerClientRuntime::Loopback(store)
    }

    fn tracker(motion: MotionSourceRuntime) -> StepTrackerRuntime {
        StepTrackerRuntime::new(
            StepTrackerConfig::mvp_v1(),
            user(),
            CorrelationId(9901),
            date(6),
            motion,
        )
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("expected completed tick, got {other:?}"),
        }
    }

    fn stored_today(client: &DailyLedgerClientRuntime, day: u32) -> Option<u64> {
        let DailyLedgerClientRuntime::Loopback(store) = client else {
            panic!("expected loopback client");
        };
        store
            .daily_steps_row(&user(), date(day))
            .map(|row| row.step_count)
    }

    #[test]
    fn at_tracker_01_unavailable_sensor_stops_the_session() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::unavailable());
        let err = tracker.start(&mut client, MonotonicTimeNs(10)).unwrap_err();
        assert_eq!(
            err,
            TrackerStartError::Motion(MotionInitError::SensorUnavailable)
        );
        assert_eq!(tracker.state(), TrackerState::Stopped);

        let outcome = tracker.run_reconcile_tick(&mut client, MonotonicTimeNs(20), date(6));
        assert_eq!(
            outcome,
            TickOutcome::Skipped(TickSkipReason::NotTracking(TrackerState::Stopped))
        );
    }

    #[test]
    fn at_tracker_02_denied_permission_stops_the_session() {
        let mut client = loopback();
        let mut tracker = tracker(
            MotionSourceRuntime::absolute(ScriptedAbsoluteCounter::new(vec![100]))
                .with_permission_denied(),
        );
        let err = tracker.start(&mut client, MonotonicTimeNs(10)).unwrap_err();
        assert_eq!(
            err,
            TrackerStartError::Motion(MotionInitError::PermissionDenied)
        );
        assert_eq!(tracker.state(), TrackerState::Stopped);
    }

    #[test]
    fn at_tracker_03_absolute_ticks_replace_the_stored_total() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![1_200, 1_500]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();

        let first = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        assert!(first.committed);
        assert_eq!(first.resolved_total, 1_200);
        assert_eq!(stored_today(&client, 6), Some(1_200));

        let second = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(6),
        ));
        assert_eq!(second.resolved_total, 1_500);
        // Replaced, not summed to 2_700.
        assert_eq!(stored_today(&client, 6), Some(1_500));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.displayed_total, 1_500);
        assert_eq!(snapshot.last_synced_at, Some(MonotonicTimeNs(130_000_000_000)));
    }

    #[test]
    fn at_tracker_04_incremental_deltas_stack_on_the_remote_floor() {
        let mut client = seeded_loopback(6, 300);
        let mut tracker = tracker(MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(vec![50, 70]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();
        assert_eq!(tracker.snapshot().session.last_persisted_total, 300);

        let first = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        assert!(first.committed);
        assert_eq!(first.resolved_total, 350);
        assert_eq!(stored_today(&client, 6), Some(350));
        let session = tracker.snapshot().session;
        assert_eq!(session.session_baseline, 50);
        assert_eq!(session.last_persisted_total, 350);

        let second = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(6),
        ));
        assert_eq!(second.resolved_total, 420);
        assert_eq!(stored_today(&client, 6), Some(420));
    }

    #[test]
    fn at_tracker_05_transient_failure_preserves_the_candidate() {
        let mut failing = DailyLedgerClientRuntime::always_fail("ledger unreachable", 5_000);
        let mut tracker = tracker(MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(vec![50, 70]),
        ));
        tracker.start(&mut failing, MonotonicTimeNs(10)).unwrap();

        let first = completed(tracker.run_reconcile_tick(
            &mut failing,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        assert!(!first.committed);
        assert_eq!(first.reason_code, reason_codes::TRACKER_TICK_RETRY_PENDING);
        // The candidate keeps showing locally even though nothing synced.
        assert_eq!(first.resolved_total, 50);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.displayed_total, 50);
        assert_eq!(snapshot.session.session_baseline, 0);
        assert_eq!(snapshot.last_synced_at, None);
        assert!(snapshot.last_sync_error.is_some());

        // Connectivity returns: the full accumulated delta lands at once.
        let mut client = loopback();
        let second = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(6),
        ));
        assert!(second.committed);
        assert_eq!(second.resolved_total, 120);
        assert_eq!(stored_today(&client, 6), Some(120));
        assert!(tracker.snapshot().last_sync_error.is_none());
    }

    #[test]
    fn at_tracker_06_concurrent_larger_total_is_adopted_never_overwritten() {
        let mut client = seeded_loopback(6, 1_400);
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![1_500, 1_500, 1_700]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();

        let first = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        assert!(first.committed);
        assert_eq!(stored_today(&client, 6), Some(1_500));

        // Another device lands a larger total between ticks.
        if let DailyLedgerClientRuntime::Loopback(store) = &mut client {
            store
                .upsert_daily_steps(
                    DailyStepUpsertInput::v1(
                        MonotonicTimeNs(90_000_000_000),
                        user(),
                        date(6),
                        1_600,
                        Some("other_device_1600".to_string()),
                    )
                    .unwrap(),
                )
                .unwrap();
        }

        let second = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(6),
        ));
        assert!(second.adopted_remote);
        assert!(!second.committed);
        assert_eq!(
            second.reason_code,
            reason_codes::TRACKER_TICK_ADOPTED_REMOTE
        );
        assert_eq!(second.resolved_total, 1_600);
        // The smaller local candidate was never re-persisted.
        assert_eq!(stored_today(&client, 6), Some(1_600));
        assert_eq!(tracker.snapshot().displayed_total, 1_600);

        // Local progress past the adopted value commits again.
        let third = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(190_000_000_000),
            date(6),
        ));
        assert!(third.committed);
        assert_eq!(stored_today(&client, 6), Some(1_700));
    }

    #[test]
    fn at_tracker_07_stored_total_never_decreases_across_ticks() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![900, 1_200, 1_100, 1_300]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();

        let mut last_stored = 0;
        for tick in 1..=4u64 {
            completed(tracker.run_reconcile_tick(
                &mut client,
                MonotonicTimeNs(tick * 60_000_000_000),
                date(6),
            ));
            let stored = stored_today(&client, 6).unwrap_or(0);
            assert!(stored >= last_stored, "stored total decreased at tick {tick}");
            last_stored = stored;
        }
        assert_eq!(last_stored, 1_300);
    }

    #[test]
    fn at_tracker_08_stop_halts_all_further_writes() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![1_200, 1_500]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();
        completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));

        tracker.stop();
        assert_eq!(tracker.state(), TrackerState::Stopped);
        let outcome = tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(6),
        );
        assert_eq!(
            outcome,
            TickOutcome::Skipped(TickSkipReason::NotTracking(TrackerState::Stopped))
        );
        assert_eq!(stored_today(&client, 6), Some(1_200));
        tracker.stop();
        assert_eq!(tracker.state(), TrackerState::Stopped);
    }

    #[test]
    fn at_tracker_09_day_rollover_rebases_without_touching_yesterday() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(vec![1_000, 200]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();

        completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        assert_eq!(stored_today(&client, 6), Some(1_000));

        let rollover = completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(130_000_000_000),
            date(7),
        ));
        assert!(rollover.rolled_over);
        assert_eq!(rollover.resolved_total, 200);
        assert_eq!(stored_today(&client, 6), Some(1_000));
        assert_eq!(stored_today(&client, 7), Some(200));
        assert_eq!(tracker.snapshot().today, date(7));
    }

    #[test]
    fn at_tracker_10_restart_after_commit_undercounts_but_never_doubles() {
        // First session commits 500 for today.
        let mut client = loopback();
        let mut first_session = tracker(MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(vec![500]),
        ));
        first_session.start(&mut client, MonotonicTimeNs(10)).unwrap();
        completed(first_session.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));
        first_session.stop();
        assert_eq!(stored_today(&client, 6), Some(500));

        // App restarts; the new subscription emits from near zero. Steps
        // taken between the commit and the restart are not recoverable, but
        // nothing already persisted is counted twice.
        let mut second_session = tracker(MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(vec![30]),
        ));
        second_session
            .start(&mut client, MonotonicTimeNs(200_000_000_000))
            .unwrap();
        assert_eq!(second_session.snapshot().session.last_persisted_total, 500);

        let report = completed(second_session.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(260_000_000_000),
            date(6),
        ));
        assert_eq!(report.resolved_total, 530);
        assert_eq!(stored_today(&client, 6), Some(530));
    }

    #[test]
    fn at_tracker_11_repeated_identical_totals_stay_idempotent() {
        let mut client = loopback();
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![1_000, 1_000, 1_000]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();

        for tick in 1..=3u64 {
            completed(tracker.run_reconcile_tick(
                &mut client,
                MonotonicTimeNs(tick * 60_000_000_000),
                date(6),
            ));
        }
        let DailyLedgerClientRuntime::Loopback(store) = &client else {
            panic!("expected loopback client");
        };
        // One write; the unchanged ticks had nothing new to persist.
        assert_eq!(store.upsert_event_rows().len(), 1);
        assert_eq!(stored_today(&client, 6), Some(1_000));
    }

    #[test]
    fn at_tracker_12_range_survives_alongside_tick_commits() {
        let mut client = seeded_loopback(5, 2_000);
        let mut tracker = tracker(MotionSourceRuntime::absolute(
            ScriptedAbsoluteCounter::new(vec![1_200]),
        ));
        tracker.start(&mut client, MonotonicTimeNs(10)).unwrap();
        completed(tracker.run_reconcile_tick(
            &mut client,
            MonotonicTimeNs(70_000_000_000),
            date(6),
        ));

        let range = DateRange::v1(date(1), date(6)).unwrap();
        let rows = client.query_range(&user(), range).unwrap();
        assert_eq!(rows.get(&date(5)), Some(&2_000));
        assert_eq!(rows.get(&date(6)), Some(&1_200));
    }
}
