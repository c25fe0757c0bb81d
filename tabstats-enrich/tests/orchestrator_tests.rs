//! Fetch chain behaviour: retries, throttling, credential and provenance handling
//!
//! Timer-driven tests run on a paused clock, so multi-second backoffs
//! complete instantly and call gaps are exact.

mod helpers;

use helpers::{ephemeral_id, nicked_id, player_json, real_id, Pipeline, ScriptedProfileSource};
use std::sync::Arc;
use tabstats_common::events::{AbandonReason, CommitKind, EnrichmentEvent};
use tabstats_enrich::pool::WorkerPool;
use tabstats_enrich::{Candidate, EnrichedRecord, FetchError, RecordState};

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<EnrichmentEvent>,
) -> Vec<EnrichmentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn request_failures_schedule_eight_retries_then_commit_bare() {
    let source = Arc::new(ScriptedProfileSource::failing(FetchError::RequestFailed(
        "connection reset".into(),
    )));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let mut rx = pipeline.events.subscribe();
    let id = real_id(1);

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Steve")])
        .await;

    // Initial call plus eight retries
    assert_eq!(source.calls_for(id), 9);
    assert_eq!(
        source.gaps_ms(id),
        vec![0, 250, 500, 1_000, 2_000, 4_000, 8_000, 16_000]
    );

    let record = pipeline.world.get(id).expect("bare record committed");
    assert_eq!(record.state(), RecordState::Bare);
    assert_eq!(record.display_name(), "Steve");
    assert!(!pipeline.world.is_assembling(id));

    let commits: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EnrichmentEvent::RecordCommitted { kind, attempts, .. } => Some((kind, attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(commits, vec![(CommitKind::Bare, 9)]);
}

#[tokio::test(start_paused = true)]
async fn per_key_throttle_backs_off_linearly() {
    let id = real_id(2);
    let source = Arc::new(
        ScriptedProfileSource::always(Ok(player_json("Steve", 3))).script(
            id,
            vec![
                Err(FetchError::Throttled { global: false }),
                Err(FetchError::Throttled { global: false }),
                Err(FetchError::Throttled { global: false }),
            ],
        ),
    );
    let pipeline = Pipeline::new(Arc::clone(&source));

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Steve")])
        .await;

    assert_eq!(source.gaps_ms(id), vec![2_000, 4_000, 6_000]);
    let record = pipeline.world.get(id).unwrap();
    assert_eq!(record.state(), RecordState::Enriched);
}

#[tokio::test(start_paused = true)]
async fn global_throttle_uses_longer_base() {
    let id = real_id(3);
    let source = Arc::new(
        ScriptedProfileSource::always(Ok(player_json("Steve", 3))).script(
            id,
            vec![
                Err(FetchError::Throttled { global: true }),
                Err(FetchError::Throttled { global: true }),
            ],
        ),
    );
    let pipeline = Pipeline::new(Arc::clone(&source));

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Steve")])
        .await;

    assert_eq!(source.gaps_ms(id), vec![5_000, 10_000]);
    assert!(pipeline.world.contains(id));
}

#[tokio::test(start_paused = true)]
async fn throttling_past_the_budget_commits_bare() {
    let source = Arc::new(ScriptedProfileSource::failing(FetchError::Throttled {
        global: false,
    }));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let id = real_id(4);

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Steve")])
        .await;

    assert_eq!(source.calls_for(id), 9);
    assert_eq!(pipeline.world.get(id).unwrap().state(), RecordState::Bare);
}

#[tokio::test(start_paused = true)]
async fn invalid_credential_abandons_and_halts() {
    let source = Arc::new(ScriptedProfileSource::failing(FetchError::InvalidCredential));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let mut rx = pipeline.events.subscribe();
    let steve = real_id(5);

    pipeline
        .tick_and_settle(&[Candidate::new(steve, "Steve")])
        .await;

    assert_eq!(source.calls(), 1);
    assert!(pipeline.world.get(steve).is_none());
    assert!(!pipeline.world.is_assembling(steve));
    assert!(pipeline.orchestrator.is_halted());

    // Halted: real identities are held back, disguised ones still commit
    let alex = real_id(6);
    let nicked = nicked_id(7);
    let summary = pipeline.discovery.on_tick(&[
        Candidate::new(steve, "Steve"),
        Candidate::new(alex, "Alex"),
        Candidate::new(nicked, "Nicked1"),
    ]);
    pipeline.orchestrator.wait_idle().await;

    assert_eq!(summary.dispatched, 1);
    assert_eq!(source.calls(), 1);
    assert!(pipeline.world.get(nicked).unwrap().is_nicked());

    let events = drain_events(&mut rx);
    let rejections = events
        .iter()
        .filter(|e| matches!(e, EnrichmentEvent::CredentialRejected { .. }))
        .count();
    assert_eq!(rejections, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        EnrichmentEvent::FetchAbandoned {
            reason: AbandonReason::InvalidCredential,
            ..
        }
    )));
}

#[tokio::test]
async fn nicked_identity_never_hits_the_network() {
    let source = Arc::new(ScriptedProfileSource::always(Ok(player_json("X", 1))));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let id = nicked_id(8);

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Nicked1")])
        .await;

    assert_eq!(source.calls(), 0);
    let record = pipeline.world.get(id).unwrap();
    assert!(record.is_nicked());
    assert!(record.game_stats().is_empty());
    assert_eq!(record.display_name(), "Nicked1");
}

#[tokio::test(start_paused = true)]
async fn ephemeral_without_profile_is_never_retried() {
    let source = Arc::new(ScriptedProfileSource::failing(FetchError::ProfileNotFound));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let id = ephemeral_id(9);
    let candidate = Candidate::new(id, "LobbyBot");

    pipeline.tick_and_settle(&[candidate.clone()]).await;
    assert_eq!(source.calls(), 1);
    assert!(pipeline.world.get(id).is_none());
    assert!(pipeline.world.is_rejected(id));

    let summary = pipeline.discovery.on_tick(&[candidate]);
    pipeline.orchestrator.wait_idle().await;
    assert_eq!(summary.dispatched, 0);
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn real_identity_without_profile_retries_like_any_failure() {
    let source = Arc::new(ScriptedProfileSource::failing(FetchError::ProfileNotFound));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let id = real_id(10);

    pipeline
        .tick_and_settle(&[Candidate::new(id, "Steve")])
        .await;

    assert_eq!(source.calls(), 9);
    assert_eq!(pipeline.world.get(id).unwrap().state(), RecordState::Bare);
}

#[tokio::test]
async fn existing_record_is_reused_under_new_identifier() {
    let source = Arc::new(ScriptedProfileSource::always(Ok(player_json("X", 1))));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let mut rx = pipeline.events.subscribe();

    let original = real_id(11);
    pipeline.world.commit(
        original,
        EnrichedRecord::enriched(original, "Steve", "§a[VIP] ", Default::default()),
    );

    let replay_id = ephemeral_id(12);
    pipeline
        .tick_and_settle(&[Candidate::new(replay_id, "steve").with_label("§a[VIP] Steve")])
        .await;

    assert_eq!(source.calls(), 0);
    let resolved = pipeline.world.get(replay_id).unwrap();
    assert_eq!(resolved.id(), replay_id);
    assert_eq!(resolved.display_name(), "Steve");
    assert_eq!(resolved.rank_label(), "§a[VIP] ");
    assert_eq!(
        pipeline.world.get_by_name("§a[VIP] Steve").unwrap().id(),
        replay_id
    );

    assert!(drain_events(&mut rx).iter().any(|e| matches!(
        e,
        EnrichmentEvent::RecordCommitted {
            kind: CommitKind::Resolved,
            ..
        }
    )));
}

#[tokio::test]
async fn disabled_pipeline_dispatches_nothing() {
    let source = Arc::new(ScriptedProfileSource::always(Ok(player_json("Steve", 1))));
    let pipeline = Pipeline::new(Arc::clone(&source));
    pipeline.orchestrator.set_enabled(false);
    let id = real_id(13);

    let summary = pipeline.discovery.on_tick(&[Candidate::new(id, "Steve")]);
    pipeline.orchestrator.wait_idle().await;

    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(source.calls(), 0);
    assert!(!pipeline.world.is_assembling(id));
}

#[tokio::test(start_paused = true)]
async fn disabling_mid_chain_abandons_on_next_attempt() {
    let id = real_id(14);
    let source = Arc::new(
        ScriptedProfileSource::always(Ok(player_json("Steve", 1)))
            .script(id, vec![Err(FetchError::Throttled { global: true })]),
    );
    let pipeline = Pipeline::new(Arc::clone(&source));

    pipeline.discovery.on_tick(&[Candidate::new(id, "Steve")]);
    // Let the first attempt run and park on its 5 s backoff
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    pipeline.orchestrator.set_enabled(false);
    pipeline.orchestrator.wait_idle().await;

    assert_eq!(source.calls(), 1);
    assert!(pipeline.world.get(id).is_none());
    assert!(!pipeline.world.is_assembling(id));
}

#[tokio::test(start_paused = true)]
async fn backoff_does_not_hold_a_worker() {
    let parked = real_id(16);
    let other = real_id(17);
    let source = Arc::new(
        ScriptedProfileSource::always(Ok(player_json("Alex", 1)))
            .script(parked, vec![Err(FetchError::Throttled { global: true })]),
    );
    let pipeline = Pipeline::with_pool(Arc::clone(&source), WorkerPool::new(1));
    let start = tokio::time::Instant::now();

    pipeline.discovery.on_tick(&[Candidate::new(parked, "Steve")]);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(source.calls_for(parked), 1);

    pipeline.discovery.on_tick(&[Candidate::new(other, "Alex")]);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // The only worker was free while the first chain sat out its 5 s backoff
    assert!(pipeline.world.contains(other));
    assert_eq!(source.calls_for(parked), 1);
    assert!(pipeline.world.is_assembling(parked));
    assert!(start.elapsed() < std::time::Duration::from_secs(5));

    pipeline.orchestrator.wait_idle().await;
    assert_eq!(source.gaps_ms(parked), vec![5_000]);
    assert!(pipeline.world.contains(parked));
}

#[tokio::test]
async fn enriched_record_takes_name_from_profile() {
    let source = Arc::new(ScriptedProfileSource::always(Ok(serde_json::json!({
        "displayname": "Steve",
        "newPackageRank": "MVP",
        "stats": {"Duels": {"wins": 4, "losses": 2}}
    }))));
    let pipeline = Pipeline::new(Arc::clone(&source));
    let id = real_id(15);

    pipeline
        .tick_and_settle(&[Candidate::new(id, "sTEVE")])
        .await;

    let record = pipeline.world.get(id).unwrap();
    assert_eq!(record.display_name(), "Steve");
    assert_eq!(record.rank_label(), "§b[MVP] ");
    assert!(record.stats("BEDWARS").is_empty());
    assert_eq!(record.stats("DUELS").len(), 3);
}
