// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driven through the engine's public operations with
//! in-memory collaborator doubles. Time is injected, so every test controls
//! timeouts and checkpoint pacing explicitly.

use evsub_engine::config::{StartFrom, SubscriptionConfig};
use evsub_engine::subscription::{NakAction, PersistentSubscription, SubscriptionState};
use evsub_engine::testing::{
    RecordingCheckpointReader, RecordingCheckpointWriter, RecordingLoader, RecordingSink,
    stream_event,
};
use evsub_engine::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Harness {
    engine: PersistentSubscription,
    loader: RecordingLoader,
    checkpoint_reader: RecordingCheckpointReader,
    checkpoint_writer: RecordingCheckpointWriter,
}

fn harness(config: SubscriptionConfig) -> Harness {
    let loader = RecordingLoader::new();
    let checkpoint_reader = RecordingCheckpointReader::new();
    let checkpoint_writer = RecordingCheckpointWriter::new();
    let engine = PersistentSubscription::new(
        config,
        Arc::new(loader.clone()),
        Arc::new(checkpoint_reader.clone()),
        Arc::new(checkpoint_writer.clone()),
    )
    .expect("valid configuration");
    Harness {
        engine,
        loader,
        checkpoint_reader,
        checkpoint_writer,
    }
}

fn config() -> SubscriptionConfig {
    SubscriptionConfig::new("streamName", "groupName")
}

fn add_client(engine: &mut PersistentSubscription, allowed: usize, now: Instant) -> (Uuid, RecordingSink) {
    let correlation_id = Uuid::new_v4();
    let sink = RecordingSink::new();
    engine.add_client(
        Uuid::new_v4(),
        correlation_id,
        Box::new(sink.clone()),
        allowed,
        "127.0.0.1:50000",
        "test-user",
        now,
    );
    (correlation_id, sink)
}

#[test]
fn test_construction_rejects_invalid_identity() {
    let loader = Arc::new(RecordingLoader::new());
    let reader = Arc::new(RecordingCheckpointReader::new());
    let writer = Arc::new(RecordingCheckpointWriter::new());

    let result = PersistentSubscription::new(
        SubscriptionConfig::new("", "groupName"),
        loader.clone(),
        reader.clone(),
        writer.clone(),
    );
    assert!(matches!(result, Err(Error::Config(_))));

    let result = PersistentSubscription::new(
        SubscriptionConfig::new("streamName", ""),
        loader,
        reader.clone(),
        writer,
    );
    assert!(matches!(result, Err(Error::Config(_))));

    // A rejected engine never consults its collaborators.
    assert_eq!(reader.load_count(), 0);
}

#[test]
fn test_identity_and_initial_state() {
    let h = harness(config());
    assert_eq!(h.engine.subscription_id(), "streamName:groupName");
    assert_eq!(h.engine.event_stream_id(), "streamName");
    assert_eq!(h.engine.group_name(), "groupName");
    assert!(!h.engine.has_clients());
    assert_eq!(h.engine.client_count(), 0);
    assert_eq!(h.engine.state(), SubscriptionState::Initializing);
    // Construction requested the persisted checkpoint exactly once.
    assert_eq!(h.checkpoint_reader.load_count(), 1);
}

#[test]
fn test_live_push_single_client_from_current() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    assert_eq!(h.engine.state(), SubscriptionState::Live);

    let (_correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.notify_live_event(stream_event(0), now);

    assert_eq!(sink.delivered(), 1);
    assert_eq!(sink.event_numbers(), vec![0]);
}

#[test]
fn test_live_push_round_robin_two_clients() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    cfg.prefer_round_robin = true;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (_c1, sink1) = add_client(&mut h.engine, 10, now);
    let (_c2, sink2) = add_client(&mut h.engine, 10, now);

    h.engine.notify_live_event(stream_event(0), now);
    h.engine.notify_live_event(stream_event(1), now);

    assert_eq!(sink1.delivered(), 1);
    assert_eq!(sink2.delivered(), 1);
}

#[test]
fn test_live_push_prefer_single_two_clients() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    cfg.prefer_round_robin = false;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (_c1, sink1) = add_client(&mut h.engine, 10, now);
    let (_c2, sink2) = add_client(&mut h.engine, 10, now);

    h.engine.notify_live_event(stream_event(0), now);
    h.engine.notify_live_event(stream_event(1), now);

    assert_eq!(sink1.delivered(), 2);
    assert_eq!(sink2.delivered(), 0);
}

#[test]
fn test_history_pull_round_robin_two_clients() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);
    // Start-from-beginning paged its first read from 0, clamped to the
    // history room.
    assert_eq!(h.loader.last_request(), Some((0, 20)));

    let (_c1, sink1) = add_client(&mut h.engine, 10, now);
    let (_c2, sink2) = add_client(&mut h.engine, 10, now);

    h.engine
        .handle_read_completed(vec![stream_event(0), stream_event(1)], Some(2), now);

    assert_eq!(sink1.delivered(), 1);
    assert_eq!(sink2.delivered(), 1);
    // The engine keeps paging forward.
    assert_eq!(h.loader.last_request(), Some((2, 20)));
}

#[test]
fn test_live_push_before_checkpoint_loaded() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    let mut h = harness(cfg);
    let now = Instant::now();

    let (_c1, sink) = add_client(&mut h.engine, 10, now);
    // Nothing loaded yet: the push must not fail, and is dropped per policy.
    h.engine.notify_live_event(stream_event(0), now);
    assert_eq!(sink.delivered(), 0);
    assert_eq!(h.engine.metrics().live_dropped, 1);

    h.engine.handle_checkpoint_loaded(None, now);
    h.engine.notify_live_event(stream_event(1), now);
    assert_eq!(sink.delivered(), 1);
}

#[test]
fn test_buffer_accumulates_without_clients() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    h.engine
        .handle_read_completed(vec![stream_event(0), stream_event(1)], Some(2), now);
    assert_eq!(h.engine.info().buffered, 2);

    let (_c1, sink) = add_client(&mut h.engine, 10, now);
    assert_eq!(sink.event_numbers(), vec![0, 1]);
    assert_eq!(h.engine.info().buffered, 0);
}

#[test]
fn test_resume_from_loaded_checkpoint() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(Some(4), now);
    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);
    assert_eq!(h.loader.last_request(), Some((5, 20)));
    assert_eq!(h.engine.info().last_checkpoint, Some(4));
}

#[test]
fn test_allowed_outstanding_caps_dispatch() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 2, now);

    let events: Vec<_> = (0..5).map(stream_event).collect();
    h.engine.handle_read_completed(events, Some(5), now);
    assert_eq!(sink.delivered(), 2);
    assert_eq!(h.engine.info().in_flight, 2);
    assert_eq!(h.engine.info().buffered, 3);

    let ids = sink.event_ids();
    h.engine.ack(correlation, &ids, now);
    assert_eq!(sink.delivered(), 4);
}

#[test]
fn test_ack_is_idempotent_and_never_redispatches() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);

    let ids = sink.event_ids();
    h.engine.ack(correlation, &ids, now);
    assert_eq!(h.engine.metrics().acked, 1);
    assert_eq!(h.engine.info().last_checkpoint, Some(0));

    // Second ack of the same event is a no-op.
    h.engine.ack(correlation, &ids, now);
    assert_eq!(h.engine.metrics().acked, 1);
    assert_eq!(h.engine.info().last_checkpoint, Some(0));

    // Nothing gets redelivered afterwards.
    h.engine.tick(now + Duration::from_secs(120));
    assert_eq!(sink.delivered(), 1);
}

#[test]
fn test_ack_for_unknown_client_or_event_is_ignored() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);
    assert_eq!(sink.delivered(), 1);

    // Unknown correlation: logged and ignored.
    h.engine.ack(Uuid::new_v4(), &sink.event_ids(), now);
    assert_eq!(h.engine.metrics().acked, 0);

    // Unknown event id for a known client: logged and ignored.
    h.engine.ack(correlation, &[Uuid::new_v4()], now);
    assert_eq!(h.engine.metrics().acked, 0);
    assert_eq!(h.engine.info().in_flight, 1);
}

#[test]
fn test_nak_retry_then_ack_matches_direct_ack() {
    let now = Instant::now();

    // Direct ack.
    let mut direct = harness(config());
    direct.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut direct.engine, 10, now);
    direct
        .engine
        .handle_read_completed(vec![stream_event(0)], Some(1), now);
    direct.engine.ack(correlation, &sink.event_ids(), now);
    let direct_checkpoint = direct.engine.info().last_checkpoint;

    // Nak(Retry) followed by an ack of the redelivery.
    let mut retried = harness(config());
    retried.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut retried.engine, 10, now);
    retried
        .engine
        .handle_read_completed(vec![stream_event(0)], Some(1), now);

    let first_ids = sink.event_ids();
    retried
        .engine
        .nak(correlation, &first_ids, NakAction::Retry, now);
    // The nak requeued and immediately redelivered with a bumped retry count.
    assert_eq!(sink.delivered(), 2);
    assert_eq!(sink.retry_counts(), vec![0, 1]);

    let redelivered = sink.event_ids()[1];
    retried.engine.ack(correlation, &[redelivered], now);
    assert_eq!(retried.engine.info().last_checkpoint, direct_checkpoint);
}

#[test]
fn test_nak_skip_advances_checkpoint() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);

    h.engine
        .nak(correlation, &sink.event_ids(), NakAction::Skip, now);
    assert_eq!(h.engine.info().last_checkpoint, Some(0));
    // Skipped events are not redelivered.
    assert_eq!(sink.delivered(), 1);
    assert_eq!(h.engine.info().buffered, 0);
}

#[test]
fn test_nak_park_and_replay() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);

    h.engine
        .nak(correlation, &sink.event_ids(), NakAction::Park, now);
    assert_eq!(h.engine.info().parked, 1);
    // Parking counts as acknowledged for checkpointing.
    assert_eq!(h.engine.info().last_checkpoint, Some(0));

    h.engine.replay_parked(now);
    assert_eq!(h.engine.info().parked, 0);
    assert_eq!(sink.delivered(), 2);
    // Replayed deliveries start over with a fresh retry count.
    assert_eq!(sink.retry_counts(), vec![0, 0]);
}

#[test]
fn test_timeout_requeues_then_parks() {
    let mut cfg = config();
    cfg.max_retry_count = 1;
    let mut h = harness(cfg);
    let t0 = Instant::now();
    let timeout = Duration::from_secs(30);

    h.engine.handle_checkpoint_loaded(None, t0);
    let (_correlation, sink) = add_client(&mut h.engine, 10, t0);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), t0);
    assert_eq!(sink.delivered(), 1);

    // First timeout: requeued and redelivered with retry 1.
    let t1 = t0 + timeout + Duration::from_secs(1);
    h.engine.tick(t1);
    assert_eq!(sink.delivered(), 2);
    assert_eq!(sink.retry_counts(), vec![0, 1]);
    assert_eq!(h.engine.metrics().timed_out, 1);

    // Second timeout exceeds max_retry_count: parked, checkpoint advances.
    let t2 = t1 + timeout + Duration::from_secs(1);
    h.engine.tick(t2);
    assert_eq!(sink.delivered(), 2);
    assert_eq!(h.engine.info().parked, 1);
    assert_eq!(h.engine.info().last_checkpoint, Some(0));
}

#[test]
fn test_client_removal_requeues_in_flight() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (c1, sink1) = add_client(&mut h.engine, 10, now);
    let (_c2, sink2) = add_client(&mut h.engine, 10, now);

    h.engine.notify_live_event(stream_event(0), now);
    h.engine.notify_live_event(stream_event(1), now);
    assert_eq!(sink1.delivered(), 1);
    assert_eq!(sink2.delivered(), 1);

    h.engine.remove_client(c1, now);
    assert_eq!(h.engine.client_count(), 1);
    // The orphaned in-flight event went back out to the surviving client,
    // with its retry count untouched.
    assert_eq!(sink2.delivered(), 2);
    assert_eq!(sink2.retry_counts(), vec![0, 0]);
}

#[test]
fn test_duplicate_client_registration_is_ignored() {
    let mut h = harness(config());
    let now = Instant::now();
    h.engine.handle_checkpoint_loaded(None, now);

    let connection_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let sink = RecordingSink::new();
    h.engine.add_client(
        connection_id,
        correlation_id,
        Box::new(sink.clone()),
        10,
        "addr",
        "user",
        now,
    );
    h.engine.add_client(
        connection_id,
        correlation_id,
        Box::new(sink.clone()),
        10,
        "addr",
        "user",
        now,
    );
    assert_eq!(h.engine.client_count(), 1);
}

#[test]
fn test_catch_up_hands_over_to_live() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (_correlation, sink) = add_client(&mut h.engine, 10, now);

    let events: Vec<_> = (0..3).map(stream_event).collect();
    h.engine.handle_read_completed(events, Some(3), now);
    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);

    // The tail read comes back empty: hand over to live.
    h.engine.handle_read_completed(Vec::new(), None, now);
    assert_eq!(h.engine.state(), SubscriptionState::Live);

    // The next contiguous push flows straight through.
    h.engine.notify_live_event(stream_event(3), now);
    assert_eq!(sink.event_numbers(), vec![0, 1, 2, 3]);
}

#[test]
fn test_live_event_at_frontier_completes_catch_up() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (_correlation, sink) = add_client(&mut h.engine, 10, now);

    // Read from 0 is outstanding; a racing push at the frontier is dropped
    // because the read may return the same event.
    h.engine.notify_live_event(stream_event(0), now);
    assert_eq!(h.engine.metrics().live_dropped, 1);

    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);
    // No read is outstanding now (the buffer had room, so a new read was
    // issued for position 1)... which makes a frontier push at 1 racy again.
    h.engine.handle_read_completed(Vec::new(), None, now);
    assert_eq!(h.engine.state(), SubscriptionState::Live);

    h.engine.notify_live_event(stream_event(1), now);
    assert_eq!(sink.event_numbers(), vec![0, 1]);
}

#[test]
fn test_live_event_during_read_backoff_completes_catch_up() {
    let mut h = harness(config());
    let t0 = Instant::now();

    h.engine.handle_checkpoint_loaded(None, t0);
    let (_correlation, sink) = add_client(&mut h.engine, 10, t0);
    h.engine.handle_read_failed("storage offline".to_owned(), t0);

    // No read outstanding and the push lands exactly on the frontier: that
    // alone proves we are caught up, storage outage or not.
    h.engine.notify_live_event(stream_event(0), t0);
    assert_eq!(h.engine.state(), SubscriptionState::Live);
    assert_eq!(sink.event_numbers(), vec![0]);
}

#[test]
fn test_live_gap_falls_back_to_catch_up() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (_correlation, sink) = add_client(&mut h.engine, 10, now);

    h.engine.notify_live_event(stream_event(3), now);
    assert_eq!(sink.delivered(), 1);

    // The feed skipped 4; the engine pages the gap in instead.
    h.engine.notify_live_event(stream_event(5), now);
    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);
    assert_eq!(h.loader.last_request(), Some((4, 20)));

    h.engine
        .handle_read_completed(vec![stream_event(4), stream_event(5)], None, now);
    assert_eq!(h.engine.state(), SubscriptionState::Live);
    assert_eq!(sink.event_numbers(), vec![3, 4, 5]);
}

#[test]
fn test_live_overflow_falls_back_and_preserves_order() {
    let mut cfg = config();
    cfg.start_from = StartFrom::Current;
    cfg.live_buffer_size = 2;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    // No clients: pushes accumulate in the live segment up to its cap.
    h.engine.notify_live_event(stream_event(0), now);
    h.engine.notify_live_event(stream_event(1), now);
    h.engine.notify_live_event(stream_event(2), now);

    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);
    assert_eq!(h.engine.metrics().live_dropped, 1);
    assert_eq!(h.loader.last_request(), Some((2, 18)));

    h.engine.handle_read_completed(vec![stream_event(2)], None, now);
    let (_correlation, sink) = add_client(&mut h.engine, 10, now);
    assert_eq!(sink.event_numbers(), vec![0, 1, 2]);
}

#[test]
fn test_dropped_live_events_while_catching_up_are_paged_in() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    // Pushes far beyond the frontier are dropped while catching up.
    h.engine.notify_live_event(stream_event(7), now);
    h.engine.notify_live_event(stream_event(8), now);
    assert_eq!(h.engine.metrics().live_dropped, 2);
    assert_eq!(h.engine.info().buffered, 0);
}

#[test]
fn test_checkpoint_write_after_interval() {
    let mut cfg = config();
    cfg.checkpoint_interval = 2;
    cfg.checkpoint_max_delay = Duration::from_secs(3600);
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine
        .handle_read_completed(vec![stream_event(0), stream_event(1)], Some(2), now);

    let ids = sink.event_ids();
    h.engine.ack(correlation, &ids[..1], now);
    assert_eq!(h.checkpoint_writer.writes(), Vec::<u64>::new());

    h.engine.ack(correlation, &ids[1..], now);
    assert_eq!(h.checkpoint_writer.writes(), vec![1]);
}

#[test]
fn test_checkpoint_write_after_max_delay() {
    let mut cfg = config();
    cfg.checkpoint_interval = 1000;
    cfg.checkpoint_max_delay = Duration::from_secs(2);
    let mut h = harness(cfg);
    let t0 = Instant::now();

    h.engine.handle_checkpoint_loaded(None, t0);
    let (correlation, sink) = add_client(&mut h.engine, 10, t0);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), t0);
    h.engine.ack(correlation, &sink.event_ids(), t0);
    assert_eq!(h.checkpoint_writer.writes(), Vec::<u64>::new());

    h.engine.tick(t0 + Duration::from_secs(3));
    assert_eq!(h.checkpoint_writer.writes(), vec![0]);
}

#[test]
fn test_failed_checkpoint_write_retries_latest_value() {
    let mut cfg = config();
    cfg.checkpoint_interval = 1;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine
        .handle_read_completed(vec![stream_event(0), stream_event(1)], Some(2), now);

    let ids = sink.event_ids();
    h.engine.ack(correlation, &ids[..1], now);
    assert_eq!(h.checkpoint_writer.writes(), vec![0]);

    h.engine
        .handle_checkpoint_written(Err("disk unavailable".to_owned()), now);
    assert_eq!(h.engine.metrics().checkpoint_write_failures, 1);

    // Progress since the failure: the retry carries the newest value.
    h.engine.ack(correlation, &ids[1..], now);
    assert_eq!(h.checkpoint_writer.writes(), vec![0, 1]);
}

#[test]
fn test_read_failure_backs_off_and_retries() {
    let mut h = harness(config());
    let t0 = Instant::now();

    h.engine.handle_checkpoint_loaded(None, t0);
    assert_eq!(h.loader.requests().len(), 1);

    h.engine.handle_read_failed("storage offline".to_owned(), t0);
    assert_eq!(h.engine.state(), SubscriptionState::CatchingUp);
    assert_eq!(h.engine.metrics().read_failures, 1);

    // Still inside the backoff window: no new read.
    h.engine.tick(t0 + Duration::from_millis(100));
    assert_eq!(h.loader.requests().len(), 1);

    // Past the backoff: the same position is retried.
    h.engine.tick(t0 + Duration::from_secs(1));
    assert_eq!(h.loader.requests().len(), 2);
    assert_eq!(h.loader.last_request(), Some((0, 20)));
}

#[test]
fn test_stop_writes_final_checkpoint_and_refuses_everything() {
    let mut cfg = config();
    cfg.checkpoint_interval = 1000;
    cfg.checkpoint_max_delay = Duration::from_secs(3600);
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (correlation, sink) = add_client(&mut h.engine, 10, now);
    h.engine.handle_read_completed(vec![stream_event(0)], Some(1), now);
    h.engine.ack(correlation, &sink.event_ids(), now);
    // Neither trigger fired yet.
    assert_eq!(h.checkpoint_writer.writes(), Vec::<u64>::new());

    h.engine.stop();
    assert_eq!(h.engine.state(), SubscriptionState::Stopped);
    // The drain attempted a final write of the acknowledged progress.
    assert_eq!(h.checkpoint_writer.writes(), vec![0]);

    // Stopped engines refuse clients and ignore completions.
    let (_c2, late_sink) = add_client(&mut h.engine, 10, now);
    assert_eq!(h.engine.client_count(), 1);
    h.engine.handle_read_completed(vec![stream_event(1)], Some(2), now);
    assert_eq!(late_sink.delivered(), 0);
    assert_eq!(sink.delivered(), 1);
}

#[test]
fn test_in_flight_never_exceeds_allowance_under_churn() {
    let mut h = harness(config());
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (c1, sink1) = add_client(&mut h.engine, 1, now);
    let (_c2, sink2) = add_client(&mut h.engine, 3, now);

    let events: Vec<_> = (0..10).map(stream_event).collect();
    h.engine.handle_read_completed(events, Some(10), now);
    assert!(sink1.delivered() <= 1);
    assert!(sink2.delivered() <= 3);
    assert_eq!(h.engine.info().in_flight, 4);

    // Churn: acks free capacity, the buffer drains, the cap holds throughout.
    for _ in 0..10 {
        let ids = sink1.event_ids();
        if let Some(&last) = ids.last() {
            h.engine.ack(c1, &[last], now);
        }
        assert!(h.engine.info().in_flight <= 4);
    }
}

#[test]
fn test_all_acked_drains_to_highest_delivered() {
    let mut cfg = config();
    cfg.checkpoint_interval = 1;
    let mut h = harness(cfg);
    let now = Instant::now();

    h.engine.handle_checkpoint_loaded(None, now);
    let (c1, sink1) = add_client(&mut h.engine, 2, now);
    let (c2, sink2) = add_client(&mut h.engine, 2, now);

    let events: Vec<_> = (0..8).map(stream_event).collect();
    h.engine.handle_read_completed(events, Some(8), now);

    // Everyone acks everything they receive until the buffer is dry.
    loop {
        let mut progressed = false;
        for (correlation, sink) in [(c1, &sink1), (c2, &sink2)] {
            let ids = sink.event_ids();
            if !ids.is_empty() {
                h.engine.ack(correlation, &ids, now);
                progressed = true;
            }
        }
        if h.engine.info().buffered == 0 && h.engine.info().in_flight == 0 {
            break;
        }
        assert!(progressed, "dispatch stalled with events outstanding");
    }

    assert_eq!(h.engine.info().last_checkpoint, Some(7));
    assert_eq!(h.engine.metrics().acked, 8);
}
