#![forbid(unsafe_code)]

use stride_kernel_contracts::ledger::{
    CalendarDate, DailyStepUpsertInput, DateRange, UserId,
};
use stride_kernel_contracts::MonotonicTimeNs;
use stride_storage::daily_ledger::{DailyLedgerStore, StorageError};
use stride_storage::repo::DailyLedgerRepo;

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn date(day: u32) -> CalendarDate {
    CalendarDate::new(2026, 8, day).unwrap()
}

fn upsert(
    t: u64,
    user_id: UserId,
    day: u32,
    step_count: u64,
    idempotency_key: Option<&str>,
) -> DailyStepUpsertInput {
    DailyStepUpsertInput::v1(
        MonotonicTimeNs(t),
        user_id,
        date(day),
        step_count,
        idempotency_key.map(ToString::to_string),
    )
    .unwrap()
}

fn commit_via_repo<R: DailyLedgerRepo>(repo: &mut R, input: DailyStepUpsertInput) -> u64 {
    repo.upsert_daily_steps(input).unwrap()
}

#[test]
fn at_daily_ledger_db_01_first_commit_creates_the_row() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    commit_via_repo(&mut store, upsert(10, u.clone(), 6, 1_200, Some("idem_1")));

    let row = store.daily_steps_row(&u, date(6)).expect("row must exist");
    assert_eq!(row.step_count, 1_200);
    assert_eq!(row.updated_at, MonotonicTimeNs(10));
    assert_eq!(store.upsert_event_rows().len(), 1);
}

#[test]
fn at_daily_ledger_db_02_repeat_upsert_with_same_key_is_a_no_op() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    let first_seq = store
        .upsert_daily_steps(upsert(10, u.clone(), 6, 1_500, Some("idem_1")))
        .unwrap();
    let second_seq = store
        .upsert_daily_steps(upsert(25, u.clone(), 6, 1_500, Some("idem_1")))
        .unwrap();

    assert_eq!(first_seq, second_seq);
    assert_eq!(store.upsert_event_rows().len(), 1);
    let row = store.daily_steps_row(&u, date(6)).expect("row must exist");
    assert_eq!(row.step_count, 1_500);
    // The retry did not touch the stored row.
    assert_eq!(row.updated_at, MonotonicTimeNs(10));
}

#[test]
fn at_daily_ledger_db_03_keyless_retry_of_identical_payload_collapses() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    let first_seq = store
        .upsert_daily_steps(upsert(10, u.clone(), 6, 1_500, None))
        .unwrap();
    let second_seq = store
        .upsert_daily_steps(upsert(40, u.clone(), 6, 1_500, None))
        .unwrap();

    assert_eq!(first_seq, second_seq);
    assert_eq!(store.upsert_event_rows().len(), 1);
}

#[test]
fn at_daily_ledger_db_04_same_key_with_different_payload_is_rejected() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    store
        .upsert_daily_steps(upsert(10, u.clone(), 6, 1_500, Some("idem_1")))
        .unwrap();
    let err = store
        .upsert_daily_steps(upsert(20, u.clone(), 6, 1_600, Some("idem_1")))
        .unwrap_err();

    assert!(matches!(err, StorageError::DuplicateKey { .. }));
    let row = store.daily_steps_row(&u, date(6)).expect("row must exist");
    assert_eq!(row.step_count, 1_500);
}

#[test]
fn at_daily_ledger_db_05_replace_semantics_update_value_and_timestamp() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    store
        .upsert_daily_steps(upsert(10, u.clone(), 6, 1_200, Some("idem_1")))
        .unwrap();
    store
        .upsert_daily_steps(upsert(70, u.clone(), 6, 1_500, Some("idem_2")))
        .unwrap();

    let row = store.daily_steps_row(&u, date(6)).expect("row must exist");
    assert_eq!(row.step_count, 1_500);
    assert_eq!(row.updated_at, MonotonicTimeNs(70));
    assert_eq!(store.upsert_event_rows().len(), 2);
}

#[test]
fn at_daily_ledger_db_06_range_query_is_inclusive_and_skips_missing_dates() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    store
        .upsert_daily_steps(upsert(10, u.clone(), 1, 1_000, None))
        .unwrap();
    store
        .upsert_daily_steps(upsert(11, u.clone(), 3, 2_000, None))
        .unwrap();
    store
        .upsert_daily_steps(upsert(12, u.clone(), 6, 3_000, None))
        .unwrap();
    store
        .upsert_daily_steps(upsert(13, u.clone(), 9, 4_000, None))
        .unwrap();

    let range = DateRange::v1(date(1), date(6)).unwrap();
    let rows = store.query_daily_steps_range(&u, range).unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows.get(&date(1)), Some(&1_000));
    assert_eq!(rows.get(&date(3)), Some(&2_000));
    assert_eq!(rows.get(&date(6)), Some(&3_000));
    assert_eq!(rows.get(&date(2)), None);
    assert_eq!(rows.get(&date(9)), None);
}

#[test]
fn at_daily_ledger_db_07_range_query_is_isolated_per_user() {
    let mut store = DailyLedgerStore::new_in_memory();
    let a = user("user_a");
    let b = user("user_b");

    store
        .upsert_daily_steps(upsert(10, a.clone(), 6, 1_000, None))
        .unwrap();
    store
        .upsert_daily_steps(upsert(11, b.clone(), 6, 9_000, None))
        .unwrap();

    let range = DateRange::v1(date(1), date(30)).unwrap();
    let rows = store.query_daily_steps_range(&a, range).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.get(&date(6)), Some(&1_000));
}

#[test]
fn at_daily_ledger_db_08_current_rows_rebuild_from_the_event_log() {
    let mut store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");

    store
        .upsert_daily_steps(upsert(10, u.clone(), 6, 1_200, Some("idem_1")))
        .unwrap();
    store
        .upsert_daily_steps(upsert(20, u.clone(), 6, 1_500, Some("idem_2")))
        .unwrap();
    store
        .upsert_daily_steps(upsert(30, u.clone(), 7, 400, Some("idem_3")))
        .unwrap();

    store.rebuild_current_rows().unwrap();

    assert_eq!(store.current_rows().len(), 2);
    let row = store.daily_steps_row(&u, date(6)).expect("row must exist");
    assert_eq!(row.step_count, 1_500);
    let row = store.daily_steps_row(&u, date(7)).expect("row must exist");
    assert_eq!(row.step_count, 400);
}

#[test]
fn at_daily_ledger_db_09_inverted_range_bounds_are_rejected() {
    let store = DailyLedgerStore::new_in_memory();
    let u = user("user_a");
    let range = DateRange {
        from: date(9),
        to: date(1),
    };
    let err = store.query_daily_steps_range(&u, range).unwrap_err();
    assert!(matches!(err, StorageError::ContractViolation(_)));
}
