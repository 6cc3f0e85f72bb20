#![forbid(unsafe_code)]

use std::fmt::Write as _;

use stride_engines::rollup::RollupConfig;
use stride_kernel_contracts::ledger::{CalendarDate, DailyStepUpsertInput, UserId};
use stride_kernel_contracts::reconcile::{CorrelationId, TickSeq};
use stride_kernel_contracts::rollup::RollupComputeOk;
use stride_kernel_contracts::MonotonicTimeNs;
use stride_os::ledger_client::DailyLedgerClientRuntime;
use stride_os::motion::{MotionSourceRuntime, ScriptedAbsoluteCounter, ScriptedIncrementalFeed};
use stride_os::rollup_reader::RollupReader;
use stride_os::tracker::{
    StepTrackerConfig, StepTrackerRuntime, TickOutcome, TickReport, TrackerSnapshot,
};
use stride_storage::daily_ledger::DailyLedgerStore;

const REPLAY_CORRELATION_ID: CorrelationId = CorrelationId(0x5E95);
const REPLAY_TICK_SPACING_NS: u64 = 60_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaySourceKind {
    Absolute,
    Incremental,
}

impl ReplaySourceKind {
    pub fn parse(text: &str) -> Result<Self, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "absolute" => Ok(Self::Absolute),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!(
                "unknown source kind {other:?}, expected absolute or incremental"
            )),
        }
    }
}

/// One deterministic tracking session: a scripted sensor, optional
/// pre-seeded ledger rows (earlier days or another device's total for
/// today), and one reconcile tick per script entry.
#[derive(Debug, Clone)]
pub struct ReplayScenario {
    pub user_id: String,
    pub today: CalendarDate,
    pub source: ReplaySourceKind,
    pub script: Vec<u64>,
    pub seeded_rows: Vec<(CalendarDate, u64)>,
}

#[derive(Debug)]
pub struct ReplayOutcome {
    pub ticks: Vec<TickReport>,
    pub snapshot: TrackerSnapshot,
    pub rollups: RollupComputeOk,
}

pub fn run_replay(scenario: &ReplayScenario) -> Result<ReplayOutcome, String> {
    if scenario.script.is_empty() {
        return Err("replay script must contain at least one reading".to_string());
    }
    let user_id =
        UserId::new(scenario.user_id.clone()).map_err(|v| format!("invalid user id: {v:?}"))?;

    let mut store = DailyLedgerStore::new_in_memory();
    for (idx, (date, step_count)) in scenario.seeded_rows.iter().enumerate() {
        store
            .upsert_daily_steps(
                DailyStepUpsertInput::v1(
                    MonotonicTimeNs(idx as u64 + 1),
                    user_id.clone(),
                    *date,
                    *step_count,
                    Some(format!("replay_seed_{idx}")),
                )
                .map_err(|v| format!("invalid seed row: {v:?}"))?,
            )
            .map_err(|e| format!("seed row rejected: {e:?}"))?;
    }
    let mut client = DailyLedgerClientRuntime::Loopback(store);

    let motion = match scenario.source {
        ReplaySourceKind::Absolute => {
            MotionSourceRuntime::absolute(ScriptedAbsoluteCounter::new(scenario.script.clone()))
        }
        ReplaySourceKind::Incremental => MotionSourceRuntime::incremental(
            ScriptedIncrementalFeed::new(scenario.script.clone()),
        ),
    };

    let mut tracker = StepTrackerRuntime::new(
        StepTrackerConfig::mvp_v1(),
        user_id.clone(),
        REPLAY_CORRELATION_ID,
        scenario.today,
        motion,
    );
    tracker
        .start(&mut client, MonotonicTimeNs(REPLAY_TICK_SPACING_NS / 2))
        .map_err(|e| format!("tracking session failed to start: {e:?}"))?;

    let mut ticks = Vec::with_capacity(scenario.script.len());
    for tick in 1..=scenario.script.len() as u64 {
        let now = MonotonicTimeNs(tick * REPLAY_TICK_SPACING_NS);
        match tracker.run_reconcile_tick(&mut client, now, scenario.today) {
            TickOutcome::Completed(report) => ticks.push(report),
            TickOutcome::Skipped(reason) => {
                return Err(format!("tick {tick} unexpectedly skipped: {reason:?}"))
            }
        }
    }

    let snapshot = tracker.snapshot();
    let rollups = RollupReader::new(RollupConfig::mvp_v1())
        .refresh(
            &mut client,
            &user_id,
            scenario.today,
            snapshot.candidate_total,
            REPLAY_CORRELATION_ID,
            TickSeq(scenario.script.len() as u64),
        )
        .map_err(|e| format!("rollup refresh failed: {e:?}"))?;
    tracker.stop();

    Ok(ReplayOutcome {
        ticks,
        snapshot,
        rollups,
    })
}

pub fn render_replay(outcome: &ReplayOutcome) -> String {
    let mut out = String::new();
    for report in &outcome.ticks {
        let status = if report.committed {
            "committed"
        } else if report.adopted_remote {
            "adopted-remote"
        } else if report.sync_error.is_some() {
            "retry-pending"
        } else {
            "nothing-new"
        };
        let _ = writeln!(
            out,
            "tick {:>3}  candidate={:>7}  resolved={:>7}  {}",
            report.tick_seq.0, report.candidate_total, report.resolved_total, status
        );
    }
    let _ = writeln!(
        out,
        "session   state={} platform={} displayed={}",
        outcome.snapshot.state.as_str(),
        outcome.snapshot.platform.as_str(),
        outcome.snapshot.displayed_total
    );
    let _ = writeln!(
        out,
        "rollups   today={} week={} month={}",
        outcome.rollups.today_total, outcome.rollups.week_total, outcome.rollups.month_total
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> CalendarDate {
        CalendarDate::new(2026, 8, 6).unwrap()
    }

    #[test]
    fn at_replay_01_incremental_scenario_commits_each_delta() {
        let scenario = ReplayScenario {
            user_id: "user_demo".to_string(),
            today: today(),
            source: ReplaySourceKind::Incremental,
            script: vec![50, 70, 0],
            seeded_rows: vec![(today(), 300), (today().days_back(1).unwrap(), 4_000)],
        };
        let outcome = run_replay(&scenario).unwrap();

        assert_eq!(outcome.ticks.len(), 3);
        assert_eq!(outcome.ticks[0].resolved_total, 350);
        assert_eq!(outcome.ticks[1].resolved_total, 420);
        assert!(!outcome.ticks[2].committed);
        assert_eq!(outcome.snapshot.displayed_total, 420);
        assert_eq!(outcome.rollups.today_total, 420);
        assert_eq!(outcome.rollups.week_total, 420 + 4_000);
    }

    #[test]
    fn at_replay_02_absolute_scenario_replaces_per_tick() {
        let scenario = ReplayScenario {
            user_id: "user_demo".to_string(),
            today: today(),
            source: ReplaySourceKind::Absolute,
            script: vec![1_200, 1_500],
            seeded_rows: Vec::new(),
        };
        let outcome = run_replay(&scenario).unwrap();

        assert_eq!(outcome.ticks[0].resolved_total, 1_200);
        assert_eq!(outcome.ticks[1].resolved_total, 1_500);
        assert_eq!(outcome.rollups.today_total, 1_500);
        assert_eq!(outcome.rollups.month_total, 1_500);
    }

    #[test]
    fn at_replay_03_render_is_stable_and_line_per_tick() {
        let scenario = ReplayScenario {
            user_id: "user_demo".to_string(),
            today: today(),
            source: ReplaySourceKind::Absolute,
            script: vec![900],
            seeded_rows: Vec::new(),
        };
        let outcome = run_replay(&scenario).unwrap();
        let rendered = render_replay(&outcome);
        assert_eq!(rendered.lines().count(), 3);
        assert!(rendered.contains("committed"));
        assert!(rendered.contains("rollups"));
    }

    #[test]
    fn at_replay_04_empty_script_is_rejected() {
        let scenario = ReplayScenario {
            user_id: "user_demo".to_string(),
            today: today(),
            source: ReplaySourceKind::Incremental,
            script: Vec::new(),
            seeded_rows: Vec::new(),
        };
        assert!(run_replay(&scenario).is_err());
    }
}
