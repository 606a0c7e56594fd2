mod common;

use common::*;
use round_subscriber::{
    AlgorandSubscriber, BoundedWatermarkStore, ErrorKind, FileWatermarkStore,
    InMemoryWatermarkStore, MatchedEvent, NamedFilter, PollSummary, StopReason, SubscriberError,
    SyncBehaviour, SyncStatus, TransactionFilter, TransactionType, WatermarkStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn wildcard(name: &str) -> NamedFilter {
    NamedFilter::new(name, TransactionFilter::default())
}

fn usdc_filter() -> NamedFilter {
    NamedFilter::new(
        "usdc",
        TransactionFilter::default()
            .with_type(TransactionType::AssetTransfer)
            .with_asset_id(USDC)
            .with_min_amount(1_000_000),
    )
}

async fn run_to_stop(subscriber: &mut AlgorandSubscriber) -> StopReason {
    subscriber.start().unwrap();
    tokio::time::timeout(Duration::from_secs(120), subscriber.wait_until_stopped())
        .await
        .expect("subscriber did not stop")
}

#[tokio::test(start_paused = true)]
async fn sync_oldest_visits_every_backlog_round_once() {
    let ledger = Arc::new(ScriptedLedger::new(105));
    let store = Arc::new(RecordingStore::new(100));
    let polls: Arc<Mutex<Vec<PollSummary>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 2, false),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    let sink = polls.clone();
    subscriber
        .on_poll(move |summary| sink.lock().unwrap().push(summary.clone()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert_eq!(reason, StopReason::CaughtUp(105));
    assert_eq!(ledger.fetched(), vec![101, 102, 103, 104, 105]);
    assert_eq!(store.history(), vec![101, 102, 103, 104, 105]);

    let ranges: Vec<_> = polls
        .lock()
        .unwrap()
        .iter()
        .filter_map(|p| p.synced_range)
        .collect();
    assert_eq!(ranges, vec![(101, 102), (103, 104), (105, 105)]);
    assert!(store.history().windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn sync_newest_skips_stale_backlog() {
    let ledger = Arc::new(ScriptedLedger::new(1000));
    let store = Arc::new(RecordingStore::new(100));

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncNewest, 5, false),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();

    let summary = subscriber.poll_once().await.unwrap();

    assert_eq!(summary.synced_range, Some((996, 1000)));
    assert_eq!(summary.skipped_range, Some((101, 995)));
    assert_eq!(summary.new_watermark, 1000);
    assert_eq!(ledger.fetched(), vec![996, 997, 998, 999, 1000]);
    assert!(ledger.fetched().iter().all(|r| *r >= 996));
}

#[tokio::test]
async fn fail_behaviour_refuses_large_backlog() {
    let ledger = Arc::new(ScriptedLedger::new(1000));
    let store = Arc::new(RecordingStore::new(100));
    let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::Fail, 5, true),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    let sink = errors.clone();
    subscriber
        .on_error(move |e: &SubscriberError| sink.lock().unwrap().push(e.kind()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert!(matches!(reason, StopReason::Fatal(_)));
    assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::Backlog]);
    assert!(ledger.fetched().is_empty());
    assert!(store.history().is_empty());
}

#[tokio::test]
async fn usdc_filter_matches_only_large_transfers() {
    let ledger = Arc::new(
        ScriptedLedger::new(101).with_block(
            101,
            vec![
                axfer("BIG", 101, USDC, 2_000_000),
                axfer("SMALL", 101, USDC, 500_000),
                axfer("OTHER-ASSET", 101, 1, 5_000_000),
            ],
        ),
    );
    let store = Arc::new(RecordingStore::new(100));
    let log: EventLog = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![usdc_filter()], SyncBehaviour::SyncOldest, 1, false),
        ledger,
        store.clone(),
    )
    .unwrap();
    subscriber.on("usdc", recorder(log.clone())).unwrap();

    let summary = subscriber.poll_once().await.unwrap();

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].filter_name, "usdc");
    assert_eq!(events[0].transaction.id, "BIG");
    assert_eq!(events[0].round, 101);
    assert_eq!(summary.transactions_scanned, 3);
    assert_eq!(summary.events_matched, 1);
    assert_eq!(store.history(), vec![101]);
}

#[tokio::test]
async fn events_follow_block_order_then_filter_order() {
    let ledger = Arc::new(
        ScriptedLedger::new(102)
            .with_block(101, vec![appl("A1", 101, 7), appl("A2", 101, 8), appl("A3", 101, 7)])
            .with_block(102, vec![appl("B1", 102, 7)]),
    );
    let store = Arc::new(RecordingStore::new(100));
    let log: EventLog = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(
            vec![
                NamedFilter::new("app-7", TransactionFilter::default().with_app_id(7)),
                wildcard("everything"),
            ],
            SyncBehaviour::SyncOldest,
            10,
            false,
        ),
        ledger,
        store,
    )
    .unwrap();
    subscriber
        .on("app-7", recorder(log.clone()))
        .unwrap()
        .on("everything", recorder(log.clone()))
        .unwrap();

    subscriber.poll_once().await.unwrap();

    let delivered: Vec<(String, String)> = log
        .lock()
        .unwrap()
        .iter()
        .map(|e| (e.transaction.id.clone(), e.filter_name.clone()))
        .collect();
    let expected: Vec<(String, String)> = [
        ("A1", "app-7"),
        ("A1", "everything"),
        ("A2", "everything"),
        ("A3", "app-7"),
        ("A3", "everything"),
        ("B1", "app-7"),
        ("B1", "everything"),
    ]
    .iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect();
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn failing_handler_does_not_block_other_filters_or_progress() {
    let ledger = Arc::new(
        ScriptedLedger::new(102)
            .with_block(101, vec![appl("A1", 101, 1), axfer("B1", 101, 2, 10)])
            .with_block(102, vec![appl("A2", 102, 1), axfer("B2", 102, 2, 10)]),
    );
    let store = Arc::new(RecordingStore::new(100));
    let log: EventLog = Arc::default();
    let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(
            vec![
                NamedFilter::new("A", TransactionFilter::default().with_app_id(1)),
                NamedFilter::new("B", TransactionFilter::default().with_asset_id(2)),
            ],
            SyncBehaviour::SyncOldest,
            10,
            false,
        ),
        ledger,
        store.clone(),
    )
    .unwrap();
    let sink = errors.clone();
    subscriber
        .on("A", |_: &MatchedEvent| -> round_subscriber::HandlerResult {
            Err("webhook rejected".into())
        })
        .unwrap()
        .on("B", recorder(log.clone()))
        .unwrap()
        .on_error(move |e: &SubscriberError| sink.lock().unwrap().push(e.kind()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert_eq!(reason, StopReason::CaughtUp(102));
    let ids: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.transaction.id.clone())
        .collect();
    assert_eq!(ids, vec!["B1", "B2"]);
    assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::Handler, ErrorKind::Handler]);
    assert_eq!(store.history(), vec![101, 102]);
}

#[tokio::test]
async fn stop_signal_halts_after_signalling_round() {
    let ledger = Arc::new(ScriptedLedger::new(110));
    let store = Arc::new(RecordingStore::new(100).stopping_at(105));

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, true),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert_eq!(reason, StopReason::WatermarkSignal(105));
    assert_eq!(ledger.fetched(), vec![101, 102, 103, 104, 105]);
    assert_eq!(store.history().last(), Some(&105));
    assert!(!ledger.fetched().contains(&106));
    assert_eq!(
        subscriber.status(),
        SyncStatus::Stopped(StopReason::WatermarkSignal(105))
    );
}

#[tokio::test]
async fn finished_round_range_stays_finished_after_restart() {
    let ledger = Arc::new(ScriptedLedger::new(200));
    let inner = Arc::new(InMemoryWatermarkStore::new(0));
    let bounded = || {
        Arc::new(
            BoundedWatermarkStore::new(inner.clone())
                .with_start_round(101)
                .with_end_round(105),
        )
    };

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, true),
        ledger.clone(),
        bounded(),
    )
    .unwrap();
    assert_eq!(run_to_stop(&mut subscriber).await, StopReason::WatermarkSignal(105));
    drop(subscriber);

    let mut restarted = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, true),
        ledger.clone(),
        bounded(),
    )
    .unwrap();
    assert_eq!(run_to_stop(&mut restarted).await, StopReason::WatermarkSignal(105));

    assert_eq!(ledger.fetched(), vec![101, 102, 103, 104, 105]);
    assert_eq!(inner.get().await.unwrap(), 105);
}

#[tokio::test(start_paused = true)]
async fn rejected_ledger_payloads_are_reported_distinctly() {
    let ledger = Arc::new(ScriptedLedger::new(103).rejecting_once_at(102));
    let store = Arc::new(RecordingStore::new(100));
    let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, false),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    let sink = errors.clone();
    subscriber
        .on_error(move |e: &SubscriberError| sink.lock().unwrap().push(e.kind()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert_eq!(reason, StopReason::CaughtUp(103));
    assert_eq!(store.history(), vec![101, 102, 103]);
    assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::LedgerRejected]);
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_errors_are_retried_without_skipping() {
    let ledger = Arc::new(ScriptedLedger::new(103).failing_once_at(102).failing_tip(1));
    let store = Arc::new(RecordingStore::new(100));
    let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, false),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    let sink = errors.clone();
    subscriber
        .on_error(move |e: &SubscriberError| sink.lock().unwrap().push(e.kind()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert_eq!(reason, StopReason::CaughtUp(103));
    assert_eq!(ledger.fetched(), vec![101, 102, 102, 103]);
    assert_eq!(store.history(), vec![101, 102, 103]);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![ErrorKind::TransientFetch, ErrorKind::TransientFetch]
    );
}

#[tokio::test]
async fn persistence_failure_is_fatal() {
    let ledger = Arc::new(ScriptedLedger::new(105));
    let store = Arc::new(RecordingStore::new(100).failing_at(102));
    let errors: Arc<Mutex<Vec<ErrorKind>>> = Arc::default();

    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, true),
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    let sink = errors.clone();
    subscriber
        .on_error(move |e: &SubscriberError| sink.lock().unwrap().push(e.kind()))
        .unwrap();

    let reason = run_to_stop(&mut subscriber).await;

    assert!(matches!(reason, StopReason::Fatal(_)));
    assert_eq!(store.history(), vec![101]);
    assert_eq!(store.current(), 101);
    assert_eq!(ledger.fetched(), vec![101, 102]);
    assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::Persistence]);
    assert!(subscriber.status().is_stopped());
}

#[tokio::test]
async fn file_watermark_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watermark.json");
    let ledger = Arc::new(ScriptedLedger::new(103));

    let first = Arc::new(FileWatermarkStore::new(&path).with_default_round(100));
    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, false),
        ledger.clone(),
        first,
    )
    .unwrap();
    assert_eq!(run_to_stop(&mut subscriber).await, StopReason::CaughtUp(103));
    drop(subscriber);

    ledger.set_tip(105);
    let second = Arc::new(FileWatermarkStore::new(&path).with_default_round(100));
    let mut subscriber = AlgorandSubscriber::new(
        config(vec![wildcard("all")], SyncBehaviour::SyncOldest, 10, false),
        ledger.clone(),
        second.clone(),
    )
    .unwrap();
    assert_eq!(run_to_stop(&mut subscriber).await, StopReason::CaughtUp(105));

    assert_eq!(ledger.fetched(), vec![101, 102, 103, 104, 105]);
    assert_eq!(second.get().await.unwrap(), 105);
}
